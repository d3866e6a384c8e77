//! Benchmarks for layer interpolation and full checkpoint assembly.
//!
//! Run with: cargo bench -p vblend-merge

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vblend_merge::{
    blend_checkpoints, BlendRequest, BlendRule, Checkpoint, CheckpointMetadata, ModelRef,
    NullObserver, StoragePrecision, Tensor, TensorBlender,
};

/// Generate deterministic test data.
fn generate_test_data(shape: &[usize], phase: f32) -> Tensor {
    let size: usize = shape.iter().product();
    let data: Vec<f32> = (0..size)
        .map(|i| ((i as f32 + phase) * 1.234567).sin() * 10.0)
        .collect();
    Tensor::from_shape_vec(shape, data).unwrap()
}

fn generate_checkpoint(layers: usize, phase: f32) -> Checkpoint {
    (0..layers).fold(
        Checkpoint::new(CheckpointMetadata::new(40000)),
        |ckpt, i| {
            ckpt.with_parameter(
                format!("dec.resblocks.{i}.convs1.0.weight"),
                generate_test_data(&[192, 192, 3], phase),
            )
        },
    )
}

/// Benchmark a single tensor blend at each storage precision.
fn bench_tensor_blend(c: &mut Criterion) {
    let mut group = c.benchmark_group("tensor_blend");

    for size in [1024, 16384, 262144, 1048576].iter() {
        let a = generate_test_data(&[*size], 0.0);
        let b = generate_test_data(&[*size], 0.5);

        group.throughput(Throughput::Elements(*size as u64));

        for precision in [StoragePrecision::F32, StoragePrecision::F16, StoragePrecision::BF16] {
            let blender = TensorBlender::new(precision);
            group.bench_with_input(
                BenchmarkId::new(precision.to_string(), size),
                size,
                |bench, _| {
                    bench.iter(|| {
                        let _ = blender.blend("w", black_box(&a), black_box(&b), black_box(0.3));
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark serial vs parallel checkpoint assembly.
fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    group.sample_size(10);

    for layers in [8, 32].iter() {
        let primary = generate_checkpoint(*layers, 0.0);
        let secondary = generate_checkpoint(*layers, 0.5);

        for parallel in [false, true] {
            let mut request = BlendRequest::new(
                "bench.safetensors",
                ModelRef::new("a", 0),
                ModelRef::new("b", 0),
            );
            request.rules.push(BlendRule::new("dec.resblocks.1*", 0.8));
            request.parallel = parallel;

            let label = if parallel { "parallel" } else { "serial" };
            group.bench_with_input(BenchmarkId::new(label, layers), layers, |bench, _| {
                bench.iter(|| {
                    let _ = blend_checkpoints(
                        primary.clone(),
                        secondary.clone(),
                        black_box(&request),
                        &NullObserver,
                    );
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_tensor_blend, bench_assembly);
criterion_main!(benches);
