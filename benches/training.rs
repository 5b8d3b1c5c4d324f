//! Training benchmark: one forward/backward pass and one full epoch.

use canvae_ids::config::{ModelConfig, TrainingConfig};
use canvae_ids::features::FeatureBatch;
use canvae_ids::model::{Adam, AttentionVae, Mode, Sampler};
use canvae_ids::training::Trainer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn batch(n: usize, seed: u64) -> FeatureBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    FeatureBatch::new(Array3::from_shape_fn((n, 1, 9), |_| rng.gen::<f32>()))
}

fn bench_train_step(c: &mut Criterion) {
    let mut model = AttentionVae::new(&ModelConfig::default(), 42).unwrap();
    let data = batch(64, 1);
    let mut rng = StdRng::seed_from_u64(0);
    let mut sampler = Sampler::seeded(1);
    let mut adam = Adam::new(1e-3, Some(5.0));

    c.bench_function("train_step_batch_64", |b| {
        b.iter(|| {
            let (loss, grads) = model
                .loss_and_gradients(black_box(data.view()), &mut Mode::Training(&mut rng), &mut sampler)
                .unwrap();
            adam.step(&mut model, &grads);
            loss
        })
    });
}

fn bench_epoch(c: &mut Criterion) {
    let config = TrainingConfig {
        max_epochs: 1,
        ..TrainingConfig::default()
    };
    let trainer = Trainer::new(config).unwrap();
    let (train, validation) = (batch(512, 2), batch(128, 3));

    let mut g = c.benchmark_group("epoch");
    g.sample_size(10);
    g.bench_function("epoch_512_frames", |b| {
        b.iter(|| {
            let mut model = AttentionVae::new(&ModelConfig::default(), 42).unwrap();
            trainer.fit(&mut model, &train, &validation).unwrap()
        })
    });
    g.finish();
}

criterion_group!(benches, bench_train_step, bench_epoch);
criterion_main!(benches);
