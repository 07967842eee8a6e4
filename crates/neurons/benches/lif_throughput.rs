use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use neurons::{LifNode, NeuronConfig};
use stepmode::{StepMode, StepModule};

fn bench_lif(c: &mut Criterion) {
    let device = Device::Cpu;
    let time_steps = 8usize;
    let batch = 16usize;
    let feature_sizes = &[256usize, 1024, 4096];

    let mut group = c.benchmark_group("lif/multi_step");
    for &features in feature_sizes {
        let input = Tensor::rand(0f32, 2f32, (time_steps, batch, features), &device)
            .expect("input sequence");
        let elements = (time_steps * batch * features) as u64;
        group.throughput(Throughput::Elements(elements));

        group.bench_with_input(BenchmarkId::from_parameter(features), &input, |b, input| {
            b.iter(|| {
                let mut node =
                    LifNode::new(NeuronConfig::default(), 2.0).expect("node construction");
                node.set_step_mode(StepMode::Multi);
                let spikes = node.forward_t(black_box(input), true).expect("forward");
                black_box(spikes);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lif);
criterion_main!(benches);
