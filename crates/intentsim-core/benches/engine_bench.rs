use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use intentsim_core::{SimulationConfig, SimulationEngine};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

fn bench_engine_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_step");
    let samples: usize = env_or("IS_BENCH_SAMPLES", 30).max(10);
    group.sample_size(samples);
    group.warm_up_time(Duration::from_secs(env_or("IS_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("IS_BENCH_MEASURE_SECS", 10)));
    let steps: usize = env_or("IS_BENCH_STEPS", 30).max(1);
    let populations: Vec<usize> = std::env::var("IS_BENCH_PARTICLES")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![200_usize, 1000, 4000]);

    for &particles in &populations {
        group.bench_function(format!("steps{steps}_particles{particles}"), |b| {
            b.iter_batched(
                || {
                    let config = SimulationConfig {
                        max_particles: particles,
                        initial_particles: particles,
                        inflation_enabled: false,
                        persistence_interval: 0,
                        history_capacity: 0,
                        rng_seed: Some(0xBEEF),
                        ..SimulationConfig::default()
                    };
                    SimulationEngine::new(config).expect("engine")
                },
                |mut engine| {
                    for _ in 0..steps {
                        engine.step();
                    }
                    engine
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engine_steps);
criterion_main!(benches);
