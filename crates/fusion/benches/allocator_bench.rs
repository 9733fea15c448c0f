//! Diversity allocator benchmarks
//!
//! Covers the in-memory part of fusion that runs on the pipeline task:
//! duplicate removal, leader clustering and round-based allocation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use magazine_common::{AffinityMatrix, ImageAsset};
use magazine_fusion::{allocate, cluster, deduplicate, FusionConfig, ImageReusePolicy};

const DIM: usize = 512;

/// Deterministic pseudo-random normalized embedding
fn random_embedding(seed: u64) -> Vec<f32> {
    let mut data = Vec::with_capacity(DIM);
    let mut s = seed;
    for _ in 0..DIM {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        let val = ((s >> 32) as u32 as f32) / (u32::MAX as f32) - 0.5;
        data.push(val);
    }

    let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut data {
            *x /= norm;
        }
    }
    data
}

fn images(count: usize) -> Vec<ImageAsset> {
    (0..count)
        .map(|i| {
            let mut asset = ImageAsset::new(format!("image-{i}"), format!("{i}.jpg"), format!("digest-{i}"));
            asset.embedding = Some(random_embedding(i as u64));
            asset
        })
        .collect()
}

fn matrix(sections: usize, images: &[ImageAsset]) -> AffinityMatrix {
    let queries: Vec<Vec<f32>> = (0..sections).map(|s| random_embedding(10_000 + s as u64)).collect();
    AffinityMatrix {
        image_ids: images.iter().map(|i| i.id.clone()).collect(),
        scores: queries
            .iter()
            .map(|q| {
                images
                    .iter()
                    .map(|img| {
                        img.embedding
                            .as_ref()
                            .map_or(0.0, |e| q.iter().zip(e).map(|(a, b)| a * b).sum())
                    })
                    .collect()
            })
            .collect(),
    }
}

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicate");
    let config = FusionConfig::default();

    for count in [10, 50, 200] {
        let pool = images(count);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{count}_images")), &pool, |b, pool| {
            b.iter_with_setup(|| pool.clone(), |pool| black_box(deduplicate(pool, &config)));
        });
    }

    group.finish();
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    for (sections, count) in [(3, 10), (10, 40), (10, 200)] {
        let mut pool = images(count);
        cluster(&mut pool, 0.85);
        let scores = matrix(sections, &pool);
        let capacities = vec![4; sections];

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{sections}x{count}")),
            &pool,
            |b, pool| {
                b.iter(|| {
                    black_box(allocate(
                        sections,
                        black_box(pool),
                        &scores,
                        &capacities,
                        ImageReusePolicy::Exclusive,
                    ))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_deduplicate, bench_allocate);
criterion_main!(benches);
