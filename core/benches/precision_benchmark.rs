use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use stagewise::distributed::{CollectiveBackend, CpuBackend};
use stagewise::precision::{float16_to_fp32, fp32_to_float16, Precision};
use stagewise::{Tensor, ValueTree};

fn activation_tree() -> ValueTree {
    // (hidden [8, 128, 256], (mask [8, 128], [loss]))
    let hidden = Tensor::<f32>::full(&[8, 128, 256], 0.5);
    let mask = Tensor::<i64>::ones(&[8, 128]);
    ValueTree::tuple([
        ValueTree::from(hidden),
        ValueTree::tuple([ValueTree::from(mask), ValueTree::list([ValueTree::from(1.25f32)])]),
    ])
}

fn benchmark_tree_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_conversion");
    let tree = activation_tree();

    for precision in [Precision::Half, Precision::BFloat16] {
        group.bench_function(format!("to_{precision}"), |b| {
            b.iter(|| black_box(fp32_to_float16(tree.clone(), precision).unwrap()))
        });
    }

    let reduced = fp32_to_float16(tree, Precision::BFloat16).unwrap();
    group.bench_function("bf16_to_fp32", |b| {
        b.iter(|| black_box(float16_to_fp32(reduced.clone()).unwrap()))
    });

    group.finish();
}

fn benchmark_embedding_allreduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("embedding_allreduce");
    group.sample_size(20);

    // A 2-member group like the first/last stage pair, on a 1024x256 table.
    group.bench_function("ring_2x_1024x256", |b| {
        b.iter(|| {
            std::thread::scope(|s| {
                for member in CpuBackend::ring(2) {
                    s.spawn(move || {
                        let mut weight = Tensor::<f32>::full(&[1024, 256], member.rank() as f32);
                        member.all_reduce_sum(&mut weight).unwrap();
                        black_box(weight);
                    });
                }
            })
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_tree_conversion, benchmark_embedding_allreduce);
criterion_main!(benches);
