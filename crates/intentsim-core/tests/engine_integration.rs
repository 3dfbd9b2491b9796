use intentsim_core::{
    AnomalyEvent, BoundaryCondition, Charge, ControlCommand, EngineObserver, InflationEvent,
    ParticleFactory, Position, SimulationConfig, SimulationEngine, SimulationState, Tick,
    TickEvents, apply_control_command, shannon_entropy,
};
use rand::{SeedableRng, rngs::SmallRng};
use std::sync::{Arc, Mutex};

fn seeded(seed: u64) -> SimulationConfig {
    SimulationConfig {
        rng_seed: Some(seed),
        ..SimulationConfig::default()
    }
}

#[derive(Default)]
struct Log {
    inflations: Vec<InflationEvent>,
    anomalies: Vec<AnomalyEvent>,
    ticks: u64,
}

struct Recorder(Arc<Mutex<Log>>);

impl EngineObserver for Recorder {
    fn on_tick(&mut self, _events: &TickEvents) {
        self.0.lock().expect("log").ticks += 1;
    }

    fn on_inflation(&mut self, event: &InflationEvent) {
        self.0.lock().expect("log").inflations.push(event.clone());
    }

    fn on_anomaly(&mut self, event: &AnomalyEvent) {
        self.0.lock().expect("log").anomalies.push(event.clone());
    }
}

#[test]
fn long_runs_stay_within_bounds() {
    let config = SimulationConfig {
        intent_fluctuation_rate: 0.5,
        particle_creation_rate: 1.0,
        boundary_condition: BoundaryCondition::Bounce,
        energy_conservation: true,
        ..seeded(0xB0B)
    };
    let extent = config.world_extent();
    let max = config.max_particles;
    let mut engine = SimulationEngine::new(config).expect("engine");
    for _ in 0..400 {
        let events = engine.step();
        assert!(events.failed.is_none(), "tick failed: {:?}", events.failed);
        assert!(engine.particle_count() <= max);
        assert!(engine.field().is_bounded());
        for p in engine.particles() {
            assert!(p.energy >= 0.0);
            assert!(p.knowledge >= 0.0);
            assert!(p.complexity >= 1.0);
            assert!((0.0..=1.0).contains(&p.interaction_tendency));
            assert!((0.0..=extent.width).contains(&p.position.x));
            assert!((0.0..=extent.height).contains(&p.position.y));
            assert!((0.0..=extent.depth).contains(&p.position.z));
        }
    }
}

#[test]
fn wrapped_positions_stay_inside_the_world() {
    let config = SimulationConfig {
        particle_speed: 25.0,
        ..seeded(21)
    };
    let extent = config.world_extent();
    let mut engine = SimulationEngine::new(config).expect("engine");
    for _ in 0..100 {
        engine.step();
    }
    for p in engine.particles() {
        assert!(p.position.x >= 0.0 && p.position.x < extent.width);
        assert!(p.position.y >= 0.0 && p.position.y < extent.height);
        assert!(p.position.z >= 0.0 && p.position.z < extent.depth);
    }
}

#[test]
fn field_sample_of_half_yields_positive_particle_with_energy_one_and_a_half() {
    let mut rng = SmallRng::seed_from_u64(99);
    let factory = ParticleFactory::new(1.0, true);
    let particle = factory.create_from_field(&mut rng, 0.5, Position::new(1.0, 2.0, 3.0), 0.0);
    assert_eq!(particle.charge, Charge::Positive);
    assert!((particle.energy - 1.5).abs() < 1e-6);
}

#[test]
fn charge_classification_is_deterministic() {
    assert_eq!(Charge::from_intent(0.5), Charge::Positive);
    assert_eq!(Charge::from_intent(-0.5), Charge::Negative);
    assert_eq!(Charge::from_intent(0.0), Charge::Neutral);
}

#[test]
fn entropy_bounds_match_charge_mix() {
    assert!((shannon_entropy(&[30, 30, 30]) - 1.0).abs() < 1e-6);
    assert_eq!(shannon_entropy(&[90, 0, 0]), 0.0);
}

#[test]
fn add_particles_never_exceeds_cap() {
    let config = SimulationConfig {
        max_particles: 50,
        initial_particles: 0,
        particle_creation_rate: 0.0,
        ..seeded(5)
    };
    let mut engine = SimulationEngine::new(config).expect("engine");
    assert_eq!(engine.add_particles(100, None), 50);
    assert_eq!(engine.add_particles(100, None), 0);
    assert_eq!(engine.add_particles(100, None), 0);
    assert_eq!(engine.particle_count(), 50);
    assert!(engine.create_particle_at(10.0, 10.0).is_none());
    engine.step();
    assert_eq!(engine.particle_count(), 50);
}

#[test]
fn inflation_triggers_on_first_tick_at_threshold() {
    let config = SimulationConfig {
        max_particles: 300,
        initial_particles: 199,
        particle_creation_rate: 0.0,
        inflation_threshold: 200,
        ..seeded(200)
    };
    let mut engine = SimulationEngine::new(config).expect("engine");
    assert_eq!(engine.particle_count(), 199);

    let quiet = engine.step();
    assert!(quiet.inflation.is_none());

    assert_eq!(engine.add_particles(5, None), 5);
    let events = engine.step();
    let inflation = events.inflation.expect("inflation fires");
    assert_eq!(inflation.tick, Tick(2));
    assert_eq!(inflation.particles_before, 204);
    assert_eq!(inflation.particles_after, 204);
    assert_eq!(inflation.expansion_factor, 2.0);
    assert!(engine.particles().iter().all(|p| p.is_post_inflation));

    for _ in 0..20 {
        assert!(engine.step().inflation.is_none());
    }
    assert_eq!(
        engine.snapshot().inflation.as_ref().map(|e| e.tick),
        Some(Tick(2))
    );
}

#[test]
fn inflation_fires_exactly_once_until_reset() {
    let config = SimulationConfig {
        initial_particles: 150,
        inflation_threshold: 160,
        particle_creation_rate: 1.0,
        ..seeded(8)
    };
    let log = Arc::new(Mutex::new(Log::default()));
    let mut engine = SimulationEngine::new(config).expect("engine");
    engine.add_observer(Box::new(Recorder(Arc::clone(&log))));
    for _ in 0..200 {
        engine.step();
    }
    assert_eq!(log.lock().expect("log").inflations.len(), 1);
    assert_eq!(log.lock().expect("log").ticks, 200);

    apply_control_command(&mut engine, ControlCommand::Reset);
    for _ in 0..200 {
        engine.step();
    }
    assert_eq!(log.lock().expect("log").inflations.len(), 2);
}

#[test]
fn snapshots_are_immutable_views() {
    let mut engine = SimulationEngine::new(seeded(3)).expect("engine");
    let before = engine.snapshot();
    for _ in 0..5 {
        engine.step();
    }
    let after = engine.snapshot();
    assert_eq!(before.counters.frame, 0);
    assert_eq!(after.counters.frame, 5);
    assert!(after.counters.simulation_time > before.counters.simulation_time);
    assert!((0.0..=1.0).contains(&after.derived.emergence_index));
}

#[test]
fn state_round_trips_through_json_and_resumes() {
    let mut engine = SimulationEngine::new(seeded(12)).expect("engine");
    for _ in 0..45 {
        engine.step();
    }
    let json = serde_json::to_string(engine.state()).expect("serialize");
    let state: SimulationState = serde_json::from_str(&json).expect("deserialize");
    let mut resumed = SimulationEngine::from_state(
        engine.config().clone(),
        state,
        Box::new(intentsim_core::NullPersistence),
    )
    .expect("resume");
    assert_eq!(resumed.tick(), Tick(45));
    assert_eq!(resumed.particle_count(), engine.particle_count());
    let events = resumed.step();
    assert_eq!(events.tick, Tick(46));
    assert!(events.failed.is_none());
}

#[test]
fn restored_state_must_match_field_grid() {
    let engine = SimulationEngine::new(seeded(13)).expect("engine");
    let config = SimulationConfig {
        field_width: 12,
        ..seeded(13)
    };
    let err = SimulationEngine::from_state(
        config,
        engine.state().clone(),
        Box::new(intentsim_core::NullPersistence),
    )
    .expect_err("mismatched grid");
    assert!(err.to_string().contains("field dimensions"));
}

#[test]
fn interactions_accumulate_in_counters() {
    let config = SimulationConfig {
        interaction_chance_scale: 1.0,
        ..seeded(14)
    };
    let mut engine = SimulationEngine::new(config).expect("engine");
    let mut total = 0;
    for _ in 0..30 {
        total += engine.step().interactions.interactions as u64;
    }
    assert!(total > 0);
    assert_eq!(engine.snapshot().counters.interactions, total);
}
