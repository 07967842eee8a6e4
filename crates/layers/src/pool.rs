//! Pooling wrappers with step-mode dispatch.
//!
//! Candle's pooling kernels cover kernel/stride windows; adaptive average
//! pooling is assembled here from window arithmetic so classifier heads can
//! fix their input resolution regardless of the incoming feature map size.

use candle_core::{Error, Result, Tensor};
use stepmode::{checks, functional, StepMode, StepModule};

/// Max pooling over `[N, C, H, W]` windows.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    kernel_size: (usize, usize),
    stride: (usize, usize),
    step_mode: StepMode,
}

impl MaxPool2d {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        Self {
            kernel_size: (kernel_size, kernel_size),
            stride: (stride, stride),
            step_mode: StepMode::Single,
        }
    }

    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        xs.max_pool2d_with_stride(self.kernel_size, self.stride)
    }
}

impl StepModule for MaxPool2d {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => {
                checks::expect_rank("max_pool2d.input", xs, 4)?;
                self.apply(xs)
            }
            StepMode::Multi => {
                checks::expect_multi_step("max_pool2d.input", xs, 5)?;
                functional::seq_to_ann_forward(xs, |merged| self.apply(merged))
            }
        }
    }
}

/// Average pooling over `[N, C, H, W]` windows.
#[derive(Debug, Clone)]
pub struct AvgPool2d {
    kernel_size: (usize, usize),
    stride: (usize, usize),
    step_mode: StepMode,
}

impl AvgPool2d {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        Self {
            kernel_size: (kernel_size, kernel_size),
            stride: (stride, stride),
            step_mode: StepMode::Single,
        }
    }

    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        xs.avg_pool2d_with_stride(self.kernel_size, self.stride)
    }
}

impl StepModule for AvgPool2d {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => {
                checks::expect_rank("avg_pool2d.input", xs, 4)?;
                self.apply(xs)
            }
            StepMode::Multi => {
                checks::expect_multi_step("avg_pool2d.input", xs, 5)?;
                functional::seq_to_ann_forward(xs, |merged| self.apply(merged))
            }
        }
    }
}

/// Average pooling to a fixed `(out_h, out_w)` output resolution.
#[derive(Debug, Clone)]
pub struct AdaptiveAvgPool2d {
    output_size: (usize, usize),
    step_mode: StepMode,
}

impl AdaptiveAvgPool2d {
    pub fn new(output_size: (usize, usize)) -> Result<Self> {
        if output_size.0 == 0 || output_size.1 == 0 {
            return Err(Error::Msg(
                "adaptive pooling output size must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            output_size,
            step_mode: StepMode::Single,
        })
    }

    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let (out_h, out_w) = self.output_size;
        if h % out_h == 0 && w % out_w == 0 {
            let kernel = (h / out_h, w / out_w);
            return xs.avg_pool2d_with_stride(kernel, kernel);
        }
        let mut rows = Vec::with_capacity(out_h);
        for i in 0..out_h {
            let h_start = (i * h) / out_h;
            let h_end = ((i + 1) * h).div_ceil(out_h).max(h_start + 1);
            let mut cells = Vec::with_capacity(out_w);
            for j in 0..out_w {
                let w_start = (j * w) / out_w;
                let w_end = ((j + 1) * w).div_ceil(out_w).max(w_start + 1);
                let window = xs
                    .narrow(2, h_start, h_end - h_start)?
                    .narrow(3, w_start, w_end - w_start)?;
                cells.push(window.mean(3)?.mean(2)?);
            }
            rows.push(Tensor::stack(&cells, 2)?);
        }
        Tensor::stack(&rows, 2)
    }
}

impl StepModule for AdaptiveAvgPool2d {
    fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    fn forward_t(&mut self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        match self.step_mode {
            StepMode::Single => {
                checks::expect_rank("adaptive_avg_pool2d.input", xs, 4)?;
                self.apply(xs)
            }
            StepMode::Multi => {
                checks::expect_multi_step("adaptive_avg_pool2d.input", xs, 5)?;
                functional::seq_to_ann_forward(xs, |merged| self.apply(merged))
            }
        }
    }
}
