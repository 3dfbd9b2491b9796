//! Engine state, the tick pipeline, and the command surface.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use intentsim_index::UniformGridIndex;
use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::field::BLEND_KEEP;
use crate::{
    AnomalyEvent, ClusterReport, EngineError, EngineObserver, EntropyMetrics, FieldActivity,
    FieldAnalysis, FieldDimensions, InflationEvent, InflationMonitor, IntentField,
    InteractionOutcome, InteractionParams, MotionParams, NullPersistence, Particle, ParticleArena,
    ParticleFactory, ParticleId, PersistenceBatch, Position, SimulationConfig,
    SimulationPersistence, Tick, advance, analyze_clusters, analyze_entropy, candidate_pairs,
    detect_anomalies, resolve_interactions,
};

/// Tick counter plus simulated wall time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    pub tick: Tick,
    /// Seconds of simulated time elapsed.
    pub simulation_time: f64,
}

impl SimulationClock {
    fn advance(&mut self, dt: f64) {
        self.tick = self.tick.next();
        self.simulation_time += dt;
    }
}

/// Results of one cluster/entropy/field analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub tick: Tick,
    pub simulation_time: f64,
    pub particle_count: usize,
    pub entropy: EntropyMetrics,
    pub clusters: ClusterReport,
    pub field: FieldAnalysis,
    /// `0.5 * clustered + 0.25 * (1 - spatial entropy) + 0.25 * field order`, in `[0, 1]`.
    pub emergence_index: f32,
}

/// Everything the engine owns that evolves tick to tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub particles: ParticleArena,
    pub field: IntentField,
    pub clock: SimulationClock,
    pub interactions_total: u64,
    pub inflation: InflationMonitor,
    pub last_analysis: Option<AnalysisReport>,
}

impl SimulationState {
    /// Check that this state is internally consistent and fits `dims`.
    pub fn validate(&self, dims: FieldDimensions) -> Result<(), EngineError> {
        if self.field.dimensions() != dims {
            return Err(EngineError::InvalidState(
                "field dimensions do not match the configuration",
            ));
        }
        if !self.field.is_finite() || !self.field.is_bounded() {
            return Err(EngineError::InvalidState(
                "field values must be finite and within [-1, 1]",
            ));
        }
        if !self.particles.ids_are_consistent() {
            return Err(EngineError::InvalidState(
                "particle ids must be unique and ascending",
            ));
        }
        if let Some(bad) = self.particles.iter().find(|p| !p.is_finite()) {
            return Err(EngineError::NonFinite {
                id: bad.id,
                stage: "restore",
            });
        }
        if !self.clock.simulation_time.is_finite() {
            return Err(EngineError::InvalidState("simulation time must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationCounters {
    pub interactions: u64,
    pub frame: u64,
    pub simulation_time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub emergence_index: f32,
    pub field_complexity: f32,
}

/// Immutable view of the engine published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub particles: Vec<Particle>,
    pub field: IntentField,
    pub counters: SimulationCounters,
    pub derived: DerivedMetrics,
    pub inflation: Option<InflationEvent>,
    pub last_analysis: Option<AnalysisReport>,
}

impl EngineSnapshot {
    fn capture(state: &SimulationState, running: bool) -> Self {
        let derived = state
            .last_analysis
            .as_ref()
            .map(|report| DerivedMetrics {
                emergence_index: report.emergence_index,
                field_complexity: report.field.pattern_complexity,
            })
            .unwrap_or_default();
        Self {
            running,
            particles: state.particles.as_slice().to_vec(),
            field: state.field.clone(),
            counters: SimulationCounters {
                interactions: state.interactions_total,
                frame: state.clock.tick.0,
                simulation_time: state.clock.simulation_time,
            },
            derived,
            inflation: state.inflation.event().cloned(),
            last_analysis: state.last_analysis.clone(),
        }
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        Tick(self.counters.frame)
    }
}

/// What happened during one call to [`SimulationEngine::step`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickEvents {
    pub tick: Tick,
    pub field: FieldActivity,
    pub field_blended: bool,
    pub spawned: usize,
    pub culled: usize,
    pub interactions: InteractionOutcome,
    pub analyzed: bool,
    pub anomalies: Vec<AnomalyEvent>,
    pub inflation: Option<InflationEvent>,
    pub persisted: bool,
    /// Set when a stage failed and the pre-tick state was restored.
    pub failed: Option<String>,
}

impl TickEvents {
    fn new(tick: Tick) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

/// Commands accepted from control surfaces; applied between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Reset,
    UpdateConfig(Box<SimulationConfig>),
    AddParticles { count: usize, at: Option<Position> },
    CreateParticleAt { x: f32, y: f32 },
}

/// Apply a control command to the engine, logging rejected ones.
pub fn apply_control_command(engine: &mut SimulationEngine, command: ControlCommand) {
    match command {
        ControlCommand::Start => engine.start(),
        ControlCommand::Stop => engine.stop(),
        ControlCommand::Reset => engine.reset(),
        ControlCommand::UpdateConfig(config) => {
            if let Err(err) = engine.set_config(*config) {
                warn!(error = %err, "rejected configuration update");
            }
        }
        ControlCommand::AddParticles { count, at } => {
            engine.add_particles(count, at);
        }
        ControlCommand::CreateParticleAt { x, y } => {
            engine.create_particle_at(x, y);
        }
    }
}

/// Single owner of the simulation: configuration, state, randomness and sinks.
pub struct SimulationEngine {
    config: SimulationConfig,
    dims: FieldDimensions,
    state: SimulationState,
    rng: SmallRng,
    index: UniformGridIndex,
    running: bool,
    history: VecDeque<AnalysisReport>,
    observers: Vec<Box<dyn EngineObserver>>,
    persistence: Box<dyn SimulationPersistence>,
    snapshot: Arc<EngineSnapshot>,
}

impl fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("tick", &self.state.clock.tick)
            .field("particles", &self.state.particles.len())
            .field("running", &self.running)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl SimulationEngine {
    /// Create a fresh engine with the provided configuration.
    pub fn new(config: SimulationConfig) -> Result<Self, EngineError> {
        Self::with_persistence(config, Box::new(NullPersistence))
    }

    /// Create a fresh engine with a persistence sink.
    pub fn with_persistence(
        config: SimulationConfig,
        persistence: Box<dyn SimulationPersistence>,
    ) -> Result<Self, EngineError> {
        let dims = config.validate()?;
        let mut rng = config.seeded_rng();
        let state = fresh_state(&config, dims, &mut rng)?;
        Ok(Self::assemble(config, dims, state, rng, persistence))
    }

    /// Resume from a previously captured state.
    ///
    /// The state must match the configuration's field grid; particles beyond
    /// `max_particles` are dropped, newest first.
    pub fn from_state(
        config: SimulationConfig,
        mut state: SimulationState,
        persistence: Box<dyn SimulationPersistence>,
    ) -> Result<Self, EngineError> {
        let dims = config.validate()?;
        state.validate(dims)?;
        let dropped = state.particles.truncate(config.max_particles);
        if dropped > 0 {
            warn!(dropped, "restored state exceeded max_particles");
        }
        let rng = config.seeded_rng();
        info!(
            tick = state.clock.tick.0,
            particles = state.particles.len(),
            "restored simulation state"
        );
        Ok(Self::assemble(config, dims, state, rng, persistence))
    }

    fn assemble(
        config: SimulationConfig,
        dims: FieldDimensions,
        state: SimulationState,
        rng: SmallRng,
        persistence: Box<dyn SimulationPersistence>,
    ) -> Self {
        let mut history = VecDeque::new();
        if config.history_capacity > 0 {
            history.extend(state.last_analysis.clone());
        }
        let snapshot = Arc::new(EngineSnapshot::capture(&state, false));
        Self {
            index: UniformGridIndex::new(config.interaction_radius),
            config,
            dims,
            state,
            rng,
            running: false,
            history,
            observers: Vec::new(),
            persistence,
            snapshot,
        }
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.state.clock.tick
    }

    #[must_use]
    pub fn particles(&self) -> &[Particle] {
        self.state.particles.as_slice()
    }

    #[must_use]
    pub fn particle_count(&self) -> usize {
        self.state.particles.len()
    }

    #[must_use]
    pub fn field(&self) -> &IntentField {
        &self.state.field
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Retained analysis reports, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &AnalysisReport> {
        self.history.iter()
    }

    /// Latest published snapshot; cheap to clone and safe to hand to other threads.
    #[must_use]
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn add_observer(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    /// Replace the persistence sink.
    pub fn set_persistence(&mut self, persistence: Box<dyn SimulationPersistence>) {
        self.persistence = persistence;
    }

    pub fn start(&mut self) {
        if !self.running {
            info!(tick = self.tick().0, "simulation started");
        }
        self.running = true;
        self.publish_snapshot();
    }

    pub fn stop(&mut self) {
        if self.running {
            info!(tick = self.tick().0, "simulation stopped");
        }
        self.running = false;
        self.publish_snapshot();
    }

    /// Discard all state and re-seed from the configuration. The run flag is kept.
    pub fn reset(&mut self) {
        self.rng = self.config.seeded_rng();
        match fresh_state(&self.config, self.dims, &mut self.rng) {
            Ok(state) => {
                self.state = state;
                self.history.clear();
                if self.config.history_capacity > 0 {
                    self.history.extend(self.state.last_analysis.clone());
                }
                info!(particles = self.particle_count(), "simulation reset");
            }
            Err(err) => warn!(error = %err, "reset failed; keeping current state"),
        }
        self.publish_snapshot();
    }

    /// Replace the configuration.
    ///
    /// Field and world dimensions are fixed for the lifetime of an engine.
    /// Lowering `max_particles` drops the newest particles.
    pub fn set_config(&mut self, config: SimulationConfig) -> Result<(), EngineError> {
        let dims = config.validate()?;
        if dims != self.dims {
            return Err(EngineError::DimensionsChanged("field dimensions"));
        }
        if config.world_extent() != self.config.world_extent() {
            return Err(EngineError::DimensionsChanged("world dimensions"));
        }
        let dropped = self.state.particles.truncate(config.max_particles);
        if dropped > 0 {
            info!(dropped, max = config.max_particles, "trimmed particles to new cap");
        }
        while self.history.len() > config.history_capacity {
            self.history.pop_front();
        }
        self.index.cell_size = config.interaction_radius;
        self.config = config;
        debug!(config = ?self.config, "configuration updated");
        self.publish_snapshot();
        Ok(())
    }

    /// Spawn up to `count` particles, at `at` or at random positions; returns how many were added.
    pub fn add_particles(&mut self, count: usize, at: Option<Position>) -> usize {
        let time = self.state.clock.simulation_time;
        let added = spawn_particles(
            &self.config,
            &mut self.state,
            &mut self.rng,
            count,
            at,
            time,
        );
        if added < count {
            debug!(requested = count, added, "particle cap reached");
        }
        self.publish_snapshot();
        added
    }

    /// Spawn one particle at `(x, y)` in the mid-depth plane, clamped into the world.
    pub fn create_particle_at(&mut self, x: f32, y: f32) -> Option<ParticleId> {
        let extent = self.config.world_extent();
        let clamp = |v: f32, max: f32| if v.is_finite() { v.clamp(0.0, max) } else { 0.0 };
        let position = Position::new(
            clamp(x, extent.width),
            clamp(y, extent.height),
            extent.depth * 0.5,
        );
        let next = self.state.particles.next_id();
        let added = self.add_particles(1, Some(position));
        (added == 1).then_some(next)
    }

    /// Step only when started; returns `None` while stopped.
    pub fn step_if_running(&mut self) -> Option<TickEvents> {
        self.running.then(|| self.step())
    }

    /// Execute one simulation tick.
    ///
    /// A failing stage restores the state captured before the tick; the clock
    /// still advances and the failure is reported in [`TickEvents::failed`].
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.state.clock.tick.next();
        let dt = self.config.tick_interval_ms as f64 / 1000.0;
        let next_time = self.state.clock.simulation_time + dt;
        let checkpoint = self.state.clone();

        let mut events = TickEvents::new(next_tick);
        if let Err(err) = self.run_pipeline(next_tick, next_time, &mut events) {
            warn!(tick = next_tick.0, error = %err, "tick failed; restoring previous state");
            self.state = checkpoint;
            events = TickEvents {
                failed: Some(err.to_string()),
                ..TickEvents::new(next_tick)
            };
        }
        self.state.clock.advance(dt);

        self.publish_snapshot();
        self.stage_persistence(next_tick, &mut events);
        self.notify(&events);
        events
    }

    fn run_pipeline(
        &mut self,
        tick: Tick,
        time: f64,
        events: &mut TickEvents,
    ) -> Result<(), EngineError> {
        (events.field, events.field_blended) = self.stage_field(tick)?;
        events.spawned = self.stage_creation(time);
        events.culled = self.stage_motion()?;
        events.interactions = self.stage_interactions(tick)?;
        if let Some(anomalies) = self.stage_analysis(tick, time) {
            events.analyzed = true;
            events.anomalies = anomalies;
        }
        events.inflation = self.stage_inflation(tick, time);
        Ok(())
    }

    fn stage_field(&mut self, tick: Tick) -> Result<(FieldActivity, bool), EngineError> {
        let field = &mut self.state.field;
        let activity = field.update(
            &mut self.rng,
            self.config.intent_fluctuation_rate,
            self.config.probabilistic_intent,
        );
        let blend = tick.is_on_interval(self.config.field_blend_interval);
        if blend {
            let imprint = IntentField::particle_imprint(
                self.dims,
                self.state.particles.as_slice(),
                self.config.world_extent(),
            )?;
            field.blend(&imprint, BLEND_KEEP)?;
        }
        if !field.is_finite() {
            return Err(EngineError::NonFiniteField { stage: "field" });
        }
        Ok((activity, blend))
    }

    fn stage_creation(&mut self, time: f64) -> usize {
        let rate = f64::from(self.config.particle_creation_rate);
        if !self.rng.random_bool(rate) {
            return 0;
        }
        let count = self.rng.random_range(1..=3);
        spawn_particles(
            &self.config,
            &mut self.state,
            &mut self.rng,
            count,
            None,
            time,
        )
    }

    fn stage_motion(&mut self) -> Result<usize, EngineError> {
        let params = MotionParams::from_config(&self.config);
        let SimulationState {
            particles, field, ..
        } = &mut self.state;
        for particle in particles.iter_mut() {
            advance(particle, &params, field, &mut self.rng)?;
        }
        if !self.config.energy_conservation {
            return Ok(0);
        }
        let min_energy = self.config.min_energy;
        let culled = particles.retain(|p| p.energy >= min_energy);
        if culled > 0 {
            debug!(culled, "removed depleted particles");
        }
        Ok(culled)
    }

    fn stage_interactions(&mut self, tick: Tick) -> Result<InteractionOutcome, EngineError> {
        let params = InteractionParams::from_config(&self.config);
        let particles = &mut self.state.particles;
        let pairs = candidate_pairs(&mut self.index, particles.as_slice(), &params)?;
        let outcome =
            resolve_interactions(particles.as_mut_slice(), &pairs, &params, tick, &mut self.rng);
        if let Some(bad) = particles.iter().find(|p| !p.is_finite()) {
            return Err(EngineError::NonFinite {
                id: bad.id,
                stage: "interaction",
            });
        }
        self.state.interactions_total += outcome.interactions as u64;
        Ok(outcome)
    }

    fn stage_analysis(&mut self, tick: Tick, time: f64) -> Option<Vec<AnomalyEvent>> {
        if !tick.is_on_interval(self.config.analysis_interval) {
            return None;
        }
        let report = analyze_state(&self.config, &self.state, tick, time);
        let anomalies = self
            .state
            .last_analysis
            .as_ref()
            .map(|previous| detect_anomalies(previous, &report, self.state.particles.as_slice()))
            .unwrap_or_default();
        debug!(
            tick = tick.0,
            clusters = report.clusters.clusters.len(),
            entropy = report.entropy.shannon_entropy,
            emergence = report.emergence_index,
            anomalies = anomalies.len(),
            "analysis complete"
        );
        if self.config.history_capacity > 0 {
            while self.history.len() >= self.config.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(report.clone());
        }
        self.state.last_analysis = Some(report);
        Some(anomalies)
    }

    fn stage_inflation(&mut self, tick: Tick, time: f64) -> Option<InflationEvent> {
        let energy = self.state.field.energy();
        self.state.inflation.check(
            self.config.inflation_enabled,
            self.config.inflation_threshold,
            self.config.inflation_multiplier,
            &mut self.state.particles,
            energy,
            tick,
            time,
        )
    }

    fn stage_persistence(&mut self, tick: Tick, events: &mut TickEvents) {
        if !tick.is_on_interval(self.config.persistence_interval) {
            return;
        }
        let batch = PersistenceBatch {
            tick,
            config: self.config.clone(),
            state: self.state.clone(),
        };
        self.persistence.on_tick(&batch);
        events.persisted = true;
    }

    fn publish_snapshot(&mut self) {
        self.snapshot = Arc::new(EngineSnapshot::capture(&self.state, self.running));
    }

    fn notify(&mut self, events: &TickEvents) {
        for observer in &mut self.observers {
            if let Some(inflation) = &events.inflation {
                observer.on_inflation(inflation);
            }
            for anomaly in &events.anomalies {
                observer.on_anomaly(anomaly);
            }
            observer.on_tick(events);
        }
    }
}

fn fresh_state(
    config: &SimulationConfig,
    dims: FieldDimensions,
    rng: &mut SmallRng,
) -> Result<SimulationState, EngineError> {
    let field = IntentField::random(dims, config.initial_field_amplitude, rng)?;
    let mut state = SimulationState {
        particles: ParticleArena::with_capacity(config.initial_population()),
        field,
        clock: SimulationClock::default(),
        interactions_total: 0,
        inflation: InflationMonitor::new(),
        last_analysis: None,
    };
    spawn_particles(
        config,
        &mut state,
        rng,
        config.initial_population(),
        None,
        0.0,
    );
    state.last_analysis = Some(analyze_state(config, &state, Tick::zero(), 0.0));
    Ok(state)
}

fn spawn_particles<R: Rng + ?Sized>(
    config: &SimulationConfig,
    state: &mut SimulationState,
    rng: &mut R,
    count: usize,
    at: Option<Position>,
    time: f64,
) -> usize {
    let factory = ParticleFactory::from_config(config);
    let extent = config.world_extent();
    let mut added = 0;
    for _ in 0..count {
        if state.particles.len() >= config.max_particles {
            break;
        }
        let position = at.unwrap_or_else(|| {
            Position::new(
                rng.random::<f32>() * extent.width,
                rng.random::<f32>() * extent.height,
                rng.random::<f32>() * extent.depth,
            )
        });
        let value = state.field.sample(position, extent);
        let particle = factory.create_from_field(rng, value, position, time);
        if state
            .particles
            .insert(particle, config.max_particles)
            .is_some()
        {
            added += 1;
        }
    }
    added
}

fn analyze_state(
    config: &SimulationConfig,
    state: &SimulationState,
    tick: Tick,
    time: f64,
) -> AnalysisReport {
    let particles = state.particles.as_slice();
    let field = state.field.analyze();
    let clusters = analyze_clusters(particles, config.cluster_threshold);
    let entropy = analyze_entropy(
        particles,
        &field,
        state.interactions_total,
        config.world_extent(),
    );
    let emergence_index = (0.5 * clusters.clustered_fraction()
        + 0.25 * (1.0 - entropy.spatial_entropy)
        + 0.25 * entropy.field_order)
        .clamp(0.0, 1.0);
    AnalysisReport {
        tick,
        simulation_time: time,
        particle_count: particles.len(),
        entropy,
        clusters,
        field,
        emergence_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn seeded(seed: u64) -> SimulationConfig {
        SimulationConfig {
            rng_seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    #[derive(Default)]
    struct Recording {
        batches: Arc<Mutex<Vec<Tick>>>,
    }

    impl SimulationPersistence for Recording {
        fn on_tick(&mut self, payload: &PersistenceBatch) {
            self.batches.lock().expect("lock").push(payload.tick);
        }
    }

    #[test]
    fn new_engine_spawns_initial_population() {
        let engine = SimulationEngine::new(seeded(1)).expect("engine");
        assert_eq!(engine.particle_count(), 100);
        assert_eq!(engine.tick(), Tick::zero());
        assert!(!engine.is_running());
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.particles.len(), 100);
        assert!(snapshot.last_analysis.is_some());
        assert!((0.0..=1.0).contains(&snapshot.derived.field_complexity));
    }

    #[test]
    fn huge_caps_do_not_preallocate() {
        let config = SimulationConfig {
            max_particles: usize::MAX,
            history_capacity: usize::MAX,
            initial_particles: 10,
            ..seeded(11)
        };
        let mut engine = SimulationEngine::new(config).expect("engine");
        assert_eq!(engine.particle_count(), 10);
        for _ in 0..5 {
            assert!(engine.step().failed.is_none());
        }
        engine.reset();
        assert_eq!(engine.particle_count(), 10);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimulationConfig {
            max_particles: 0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            SimulationEngine::new(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn seeded_engines_are_deterministic() {
        let mut a = SimulationEngine::new(seeded(0xC0FFEE)).expect("engine");
        let mut b = SimulationEngine::new(seeded(0xC0FFEE)).expect("engine");
        for _ in 0..90 {
            a.step();
            b.step();
        }
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn step_if_running_respects_run_flag() {
        let mut engine = SimulationEngine::new(seeded(2)).expect("engine");
        assert!(engine.step_if_running().is_none());
        engine.start();
        assert!(engine.snapshot().running);
        let events = engine.step_if_running().expect("events");
        assert_eq!(events.tick, Tick(1));
        engine.stop();
        assert!(engine.step_if_running().is_none());
        assert_eq!(engine.tick(), Tick(1));
    }

    #[test]
    fn failed_tick_restores_previous_state() {
        let mut engine = SimulationEngine::new(seeded(3)).expect("engine");
        engine.state.particles.as_mut_slice()[0].velocity.vx = f32::NAN;
        let before = engine.state.particles.clone();
        let events = engine.step();
        assert!(events.failed.is_some());
        assert_eq!(engine.tick(), Tick(1));
        assert_eq!(engine.state.particles.len(), before.len());
        assert_eq!(
            engine.state.particles.as_slice()[1],
            before.as_slice()[1]
        );
    }

    #[test]
    fn analysis_runs_on_interval_and_feeds_history() {
        let config = SimulationConfig {
            analysis_interval: 10,
            history_capacity: 3,
            ..seeded(4)
        };
        let mut engine = SimulationEngine::new(config).expect("engine");
        let mut analyzed = Vec::new();
        for _ in 0..50 {
            let events = engine.step();
            if events.analyzed {
                analyzed.push(events.tick.0);
            }
        }
        assert_eq!(analyzed, vec![10, 20, 30, 40, 50]);
        let ticks: Vec<_> = engine.history().map(|r| r.tick.0).collect();
        assert_eq!(ticks, vec![30, 40, 50]);
    }

    #[test]
    fn persistence_fires_on_interval() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let config = SimulationConfig {
            persistence_interval: 5,
            ..seeded(5)
        };
        let mut engine = SimulationEngine::with_persistence(
            config,
            Box::new(Recording {
                batches: Arc::clone(&batches),
            }),
        )
        .expect("engine");
        for _ in 0..12 {
            engine.step();
        }
        assert_eq!(*batches.lock().expect("lock"), vec![Tick(5), Tick(10)]);
    }

    #[test]
    fn set_config_rejects_dimension_changes() {
        let mut engine = SimulationEngine::new(seeded(6)).expect("engine");
        let err = engine
            .set_config(SimulationConfig {
                field_width: 10,
                ..seeded(6)
            })
            .expect_err("field change");
        assert!(matches!(err, EngineError::DimensionsChanged(_)));
        let err = engine
            .set_config(SimulationConfig {
                world_width: 1000.0,
                ..seeded(6)
            })
            .expect_err("world change");
        assert!(matches!(err, EngineError::DimensionsChanged(_)));
    }

    #[test]
    fn lowering_cap_truncates_newest() {
        let mut engine = SimulationEngine::new(seeded(7)).expect("engine");
        engine
            .set_config(SimulationConfig {
                max_particles: 20,
                ..seeded(7)
            })
            .expect("config");
        assert_eq!(engine.particle_count(), 20);
        assert_eq!(engine.particles().last().map(|p| p.id), Some(ParticleId(19)));
    }

    #[test]
    fn create_particle_at_clamps_into_world() {
        let mut engine = SimulationEngine::new(seeded(8)).expect("engine");
        let id = engine.create_particle_at(-50.0, 10_000.0).expect("created");
        let particle = engine.state.particles.get(id).expect("particle");
        assert_eq!(particle.position.x, 0.0);
        assert_eq!(particle.position.y, 600.0);
        assert_eq!(particle.position.z, 5.0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut engine = SimulationEngine::new(seeded(9)).expect("engine");
        let initial = engine.state().clone();
        for _ in 0..20 {
            engine.step();
        }
        engine.reset();
        assert_eq!(engine.state(), &initial);
    }

    #[test]
    fn control_commands_route_to_engine() {
        let mut engine = SimulationEngine::new(seeded(10)).expect("engine");
        apply_control_command(&mut engine, ControlCommand::Start);
        assert!(engine.is_running());
        apply_control_command(
            &mut engine,
            ControlCommand::AddParticles {
                count: 5,
                at: Some(Position::new(10.0, 10.0, 1.0)),
            },
        );
        assert_eq!(engine.particle_count(), 105);
        apply_control_command(
            &mut engine,
            ControlCommand::UpdateConfig(Box::new(SimulationConfig {
                field_depth: 9,
                ..seeded(10)
            })),
        );
        assert_eq!(engine.config().field_depth, 5);
        apply_control_command(&mut engine, ControlCommand::Stop);
        assert!(!engine.is_running());
    }
}
