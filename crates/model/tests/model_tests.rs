use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use model::{SpikingVgg, SpikingVggConfig, VggVariant};
use stepmode::{StepMode, StepModule};

fn small_config(device: &Device) -> SpikingVggConfig {
    let mut cfg = SpikingVggConfig::new(VggVariant::Vgg11, 10, device.clone());
    cfg.pool_size = (1, 1);
    cfg.classifier_hidden = 64;
    cfg
}

#[test]
fn multi_step_forward_produces_per_step_logits() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut net = SpikingVgg::new(&small_config(&device), vb)?;
    net.set_step_mode(StepMode::Multi);

    let x_seq = Tensor::rand(0f32, 1f32, (2, 2, 3, 32, 32), &device)?;
    let logits = net.forward_t(&x_seq, true)?;
    assert_eq!(logits.dims(), &[2, 2, 10]);
    assert_eq!(logits.dtype(), DType::F32);
    Ok(())
}

#[test]
fn single_step_mode_consumes_plain_batches() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut net = SpikingVgg::new(&small_config(&device), vb)?;

    let x = Tensor::rand(0f32, 1f32, (2, 3, 32, 32), &device)?;
    let logits = net.forward_t(&x, false)?;
    assert_eq!(logits.dims(), &[2, 10]);
    Ok(())
}

#[test]
fn reset_allows_a_new_batch_size() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut net = SpikingVgg::new(&small_config(&device), vb)?;

    let first = Tensor::rand(0f32, 1f32, (2, 3, 32, 32), &device)?;
    net.forward_t(&first, true)?;

    let second = Tensor::rand(0f32, 1f32, (3, 3, 32, 32), &device)?;
    assert!(net.forward_t(&second, true).is_err());
    net.reset();
    assert!(net.forward_t(&second, true).is_ok());
    Ok(())
}

#[test]
fn parameters_are_registered_in_the_var_map() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let mut cfg = small_config(&device);
    cfg.batch_norm = true;
    let _net = SpikingVgg::new(&cfg, vb)?;

    // vgg11: 8 convolutions (weight only, bias folded into batch norm),
    // 8 batch norms (weight/bias/running stats), 3 classifier projections
    let vars = varmap.all_vars();
    assert_eq!(vars.len(), 8 + 8 * 4 + 3 * 2);
    Ok(())
}
