use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::{
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

fn bench_linear(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let seq = 64usize;
    let widths = &[256usize, 512, 1024];
    let dtypes = &[DType::F16, DType::BF16, DType::F32];

    for &dtype in dtypes {
        let mut group = c.benchmark_group(format!("linear/{dtype:?}"));
        for &width in widths {
            let cfg = LinearConfig::new(width, width).with_bias(false);
            let linear = Linear::with_init(cfg, &LinearInit::XavierNormal, &device, dtype)
                .expect("linear init");
            let input = Tensor::randn(0f32, 1.0, (batch, seq, width), &device)
                .expect("input")
                .to_dtype(dtype)
                .expect("cast input");
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            group.throughput(Throughput::Elements((batch * seq * width * width) as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{width}x{width}")),
                &(linear.clone(), input.clone(), policy),
                |b, (linear, input, policy)| {
                    b.iter(|| {
                        let out = linear.forward(black_box(input), policy).expect("forward");
                        black_box(out);
                    });
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, bench_linear);
criterion_main!(benches);
