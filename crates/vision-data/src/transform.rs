//! Normalization constants and train-time augmentation.
//!
//! Augmentation operates on raw `u8` buffers in `[C, H, W]` layout so crops
//! and flips stay exact; the batcher converts to normalized `f32` afterwards.

use rand::rngs::StdRng;
use rand::Rng;

/// Per-channel normalization applied after scaling pixels to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Normalize {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Normalize {
    /// Standard CIFAR-10 statistics.
    pub fn cifar10() -> Self {
        Self {
            mean: vec![0.4914, 0.4822, 0.4465],
            std: vec![0.2470, 0.2435, 0.2616],
        }
    }

    /// Standard CIFAR-100 statistics.
    pub fn cifar100() -> Self {
        Self {
            mean: vec![0.5071, 0.4865, 0.4409],
            std: vec![0.2673, 0.2564, 0.2762],
        }
    }

    /// Standard MNIST statistics.
    pub fn mnist() -> Self {
        Self {
            mean: vec![0.1307],
            std: vec![0.3081],
        }
    }

    pub fn apply(&self, pixel: u8, channel: usize) -> f32 {
        (pixel as f32 / 255.0 - self.mean[channel]) / self.std[channel]
    }
}

/// Train-time augmentation policy.
#[derive(Debug, Clone, Copy)]
pub struct Augment {
    /// Zero padding added on each side before a random crop back to the
    /// original resolution.
    pub crop_padding: usize,
    /// Probability of a horizontal flip.
    pub flip_probability: f64,
}

impl Augment {
    /// The usual CIFAR recipe: 4-pixel padded crop plus mirror.
    pub fn cifar() -> Self {
        Self {
            crop_padding: 4,
            flip_probability: 0.5,
        }
    }

    /// Crop jitter only, for digit datasets where mirroring changes the class.
    pub fn crop_only(crop_padding: usize) -> Self {
        Self {
            crop_padding,
            flip_probability: 0.0,
        }
    }

    /// Applies the policy to one `[C, H, W]` image.
    pub fn apply(
        &self,
        image: &[u8],
        channels: usize,
        height: usize,
        width: usize,
        rng: &mut StdRng,
    ) -> Vec<u8> {
        let mut out = image.to_vec();
        if self.crop_padding > 0 {
            out = random_padded_crop(&out, channels, height, width, self.crop_padding, rng);
        }
        if self.flip_probability > 0.0 && rng.gen::<f64>() < self.flip_probability {
            out = horizontal_flip(&out, channels, height, width);
        }
        out
    }
}

/// Zero-pads by `padding` on every side, then crops back to `(height, width)`
/// at a uniformly random offset.
pub fn random_padded_crop(
    image: &[u8],
    channels: usize,
    height: usize,
    width: usize,
    padding: usize,
    rng: &mut StdRng,
) -> Vec<u8> {
    let offset_y = rng.gen_range(0..=2 * padding);
    let offset_x = rng.gen_range(0..=2 * padding);
    let mut out = vec![0u8; channels * height * width];
    for c in 0..channels {
        for y in 0..height {
            // source row in padded coordinates; rows outside the source stay zero
            let src_y = y + offset_y;
            if src_y < padding || src_y >= padding + height {
                continue;
            }
            for x in 0..width {
                let src_x = x + offset_x;
                if src_x < padding || src_x >= padding + width {
                    continue;
                }
                out[c * height * width + y * width + x] =
                    image[c * height * width + (src_y - padding) * width + (src_x - padding)];
            }
        }
    }
    out
}

/// Mirrors a `[C, H, W]` image along the width axis.
pub fn horizontal_flip(image: &[u8], channels: usize, height: usize, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; channels * height * width];
    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                out[c * height * width + y * width + x] =
                    image[c * height * width + y * width + (width - 1 - x)];
            }
        }
    }
    out
}
