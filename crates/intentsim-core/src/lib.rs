//! Core types shared across the IntentSim workspace.
//!
//! The engine couples a population of charged particles to a bounded 3-D
//! scalar "intent" field. Each tick runs a fixed pipeline (field dynamics,
//! scheduled creation, motion, pairwise interactions, periodic analysis and
//! the inflation check) and publishes an immutable [`EngineSnapshot`].

use intentsim_index::IndexError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod anomaly;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod entropy;
pub mod field;
pub mod inflation;
pub mod interaction;
pub mod motion;
pub mod particle;

pub use anomaly::{AnomalyEvent, AnomalyKind, detect_anomalies};
pub use cluster::{Cluster, ClusterReport, analyze_clusters};
pub use config::{BoundaryCondition, FieldDimensions, SimulationConfig, WorldExtent};
pub use engine::{
    AnalysisReport, ControlCommand, DerivedMetrics, EngineSnapshot, SimulationClock,
    SimulationCounters, SimulationEngine, SimulationState, TickEvents, apply_control_command,
};
pub use entropy::{EntropyMetrics, analyze_entropy, shannon_entropy};
pub use field::{FieldActivity, FieldAnalysis, IntentField};
pub use inflation::{InflationEvent, InflationMonitor, InflationPhase};
pub use interaction::{InteractionOutcome, InteractionParams, candidate_pairs, resolve_interactions};
pub use motion::{MotionParams, advance};
pub use particle::{Charge, Particle, ParticleArena, ParticleFactory, ParticleId, ParticleKind};

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Whether this tick lands on a non-zero `interval` boundary.
    #[must_use]
    pub const fn is_on_interval(self, interval: u32) -> bool {
        interval > 0 && self.0.is_multiple_of(interval as u64)
    }
}

/// Point in world space.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance to `other`.
    #[must_use]
    pub fn distance_sq(self, other: Self) -> f32 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_sq(other).sqrt()
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    #[must_use]
    pub const fn as_tuple(self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }
}

/// Per-tick displacement in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
}

impl Velocity {
    /// Construct a new velocity vector.
    #[must_use]
    pub const fn new(vx: f32, vy: f32, vz: f32) -> Self {
        Self { vx, vy, vz }
    }

    #[must_use]
    pub fn magnitude(self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy + self.vz * self.vz).sqrt()
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.vx.is_finite() && self.vy.is_finite() && self.vz.is_finite()
    }
}

/// Errors raised while constructing or stepping the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Attempted to resize the field or the world of a running engine.
    #[error(
        "changing {0} at runtime is not supported; restart the simulation with the new configuration"
    )]
    DimensionsChanged(&'static str),
    /// A restored state does not fit the configuration it was paired with.
    #[error("invalid simulation state: {0}")]
    InvalidState(&'static str),
    /// A particle picked up NaN or infinity during a tick stage.
    #[error("particle {id} produced a non-finite value during {stage}")]
    NonFinite { id: ParticleId, stage: &'static str },
    /// The field picked up NaN or infinity during a tick stage.
    #[error("intent field produced a non-finite value during {stage}")]
    NonFiniteField { stage: &'static str },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Payload handed to the persistence sink on scheduled ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceBatch {
    pub tick: Tick,
    pub config: SimulationConfig,
    pub state: SimulationState,
}

/// Persistence sink invoked on persistence-interval ticks.
pub trait SimulationPersistence: Send {
    fn on_tick(&mut self, payload: &PersistenceBatch);
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl SimulationPersistence for NullPersistence {
    fn on_tick(&mut self, _payload: &PersistenceBatch) {}
}

/// Receives engine events after each tick completes.
///
/// Observers only see finished ticks; they can never mutate engine state and
/// must route changes back through [`ControlCommand`]s.
pub trait EngineObserver: Send {
    fn on_tick(&mut self, _events: &TickEvents) {}
    fn on_inflation(&mut self, _event: &InflationEvent) {}
    fn on_anomaly(&mut self, _event: &AnomalyEvent) {}
}
