//! Simulation configuration and validation.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// How particles behave when they reach the edge of the world volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryCondition {
    /// Leaving one face re-enters from the opposite face.
    #[default]
    Wrap,
    /// The velocity component normal to the face is reflected.
    Bounce,
}

/// Grid resolution of the intent field in cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl FieldDimensions {
    #[must_use]
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Total number of cells.
    #[must_use]
    pub const fn cell_count(self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }
}

/// Size of the world volume in world units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorldExtent {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl WorldExtent {
    #[must_use]
    pub const fn new(width: f32, height: f32, depth: f32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

/// Static configuration for an IntentSim engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Hard cap on live particles.
    pub max_particles: usize,
    /// Particles spawned when the engine is created or reset (clamped to `max_particles`).
    pub initial_particles: usize,
    /// Amplitude of the per-cell field fluctuation.
    pub intent_fluctuation_rate: f32,
    /// Fraction of the knowledge gap moved per successful interaction.
    pub learning_rate: f32,
    /// Probability per tick of spawning a small batch of particles.
    pub particle_creation_rate: f32,
    /// Upper bound on the separation at which two particles may interact.
    pub interaction_radius: f32,
    pub boundary_condition: BoundaryCondition,
    /// When enabled particles burn energy at their own decay rate and die when depleted.
    pub energy_conservation: bool,
    /// Use Gaussian rather than uniform field fluctuations.
    pub probabilistic_intent: bool,
    pub inflation_enabled: bool,
    /// Population at which the one-shot inflation transition fires.
    pub inflation_threshold: usize,
    /// Linear expansion factor reported by the inflation event.
    pub inflation_multiplier: f32,
    /// Allow spawned particles to be tagged adaptive.
    pub use_adaptive_particles: bool,
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Depth of the world in world units.
    pub world_depth: f32,
    /// Field grid cells along x.
    pub field_width: u32,
    /// Field grid cells along y.
    pub field_height: u32,
    /// Field grid cells along z.
    pub field_depth: u32,
    /// Initial field values are drawn uniformly from `[-amplitude, amplitude]`.
    pub initial_field_amplitude: f32,
    /// Speed of freshly spawned particles.
    pub particle_speed: f32,
    /// Velocity multiplier applied every tick.
    pub drag: f32,
    /// Scale of the acceleration along the field gradient.
    pub field_force: f32,
    /// Particles below this energy are culled under energy conservation.
    pub min_energy: f32,
    /// Scale `k` in the interaction probability `t1 * t2 * k`.
    pub interaction_chance_scale: f32,
    /// Multiplier on the cluster join distance `(r1 + r2) * 3`.
    pub cluster_threshold: f32,
    /// Ticks between cluster/entropy analyses; 0 disables analysis.
    pub analysis_interval: u32,
    /// Ticks between particle-field blends; 0 disables blending.
    pub field_blend_interval: u32,
    /// Ticks between persistence flushes; 0 disables persistence.
    pub persistence_interval: u32,
    /// Number of analysis reports retained in memory.
    pub history_capacity: usize,
    /// Target wall-clock cadence for drivers, in milliseconds.
    pub tick_interval_ms: u64,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_particles: 200,
            initial_particles: 100,
            intent_fluctuation_rate: 0.01,
            learning_rate: 0.1,
            particle_creation_rate: 0.3,
            interaction_radius: 50.0,
            boundary_condition: BoundaryCondition::Wrap,
            energy_conservation: false,
            probabilistic_intent: true,
            inflation_enabled: true,
            inflation_threshold: 180,
            inflation_multiplier: 2.0,
            use_adaptive_particles: true,
            world_width: 800.0,
            world_height: 600.0,
            world_depth: 10.0,
            field_width: 30,
            field_height: 20,
            field_depth: 5,
            initial_field_amplitude: 0.5,
            particle_speed: 1.0,
            drag: 0.98,
            field_force: 0.05,
            min_energy: 0.05,
            interaction_chance_scale: 0.2,
            cluster_threshold: 0.7,
            analysis_interval: 30,
            field_blend_interval: 100,
            persistence_interval: 500,
            history_capacity: 120,
            tick_interval_ms: 33,
            rng_seed: None,
        }
    }
}

fn unit_interval(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

fn non_negative(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

impl SimulationConfig {
    /// Validate the configuration and return the field grid it describes.
    pub fn validate(&self) -> Result<FieldDimensions, EngineError> {
        if !(positive(self.world_width) && positive(self.world_height) && positive(self.world_depth))
        {
            return Err(EngineError::InvalidConfig(
                "world dimensions must be positive and finite",
            ));
        }
        if self.field_width == 0 || self.field_height == 0 || self.field_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "field dimensions must be non-zero",
            ));
        }
        if self.max_particles == 0 {
            return Err(EngineError::InvalidConfig("max_particles must be non-zero"));
        }
        if !unit_interval(self.intent_fluctuation_rate) {
            return Err(EngineError::InvalidConfig(
                "intent_fluctuation_rate must be within [0, 1]",
            ));
        }
        if !unit_interval(self.learning_rate) {
            return Err(EngineError::InvalidConfig(
                "learning_rate must be within [0, 1]",
            ));
        }
        if !unit_interval(self.particle_creation_rate) {
            return Err(EngineError::InvalidConfig(
                "particle_creation_rate must be within [0, 1]",
            ));
        }
        if !unit_interval(self.interaction_chance_scale) {
            return Err(EngineError::InvalidConfig(
                "interaction_chance_scale must be within [0, 1]",
            ));
        }
        if !positive(self.interaction_radius) {
            return Err(EngineError::InvalidConfig(
                "interaction_radius must be positive",
            ));
        }
        if !(self.inflation_multiplier.is_finite() && self.inflation_multiplier >= 1.0) {
            return Err(EngineError::InvalidConfig(
                "inflation_multiplier must be at least 1",
            ));
        }
        if !unit_interval(self.initial_field_amplitude) {
            return Err(EngineError::InvalidConfig(
                "initial_field_amplitude must be within [0, 1]",
            ));
        }
        if !non_negative(self.particle_speed) || !non_negative(self.field_force) {
            return Err(EngineError::InvalidConfig(
                "particle_speed and field_force must be non-negative",
            ));
        }
        if !(positive(self.drag) && self.drag <= 1.0) {
            return Err(EngineError::InvalidConfig("drag must be within (0, 1]"));
        }
        if !non_negative(self.min_energy) {
            return Err(EngineError::InvalidConfig("min_energy must be non-negative"));
        }
        if !positive(self.cluster_threshold) {
            return Err(EngineError::InvalidConfig(
                "cluster_threshold must be positive",
            ));
        }
        Ok(FieldDimensions::new(
            self.field_width,
            self.field_height,
            self.field_depth,
        ))
    }

    /// World volume described by this configuration.
    #[must_use]
    pub const fn world_extent(&self) -> WorldExtent {
        WorldExtent::new(self.world_width, self.world_height, self.world_depth)
    }

    /// Initial population after clamping to the particle cap.
    #[must_use]
    pub fn initial_population(&self) -> usize {
        self.initial_particles.min(self.max_particles)
    }

    /// Build the deterministic RNG for this configuration.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let dims = SimulationConfig::default().validate().expect("defaults");
        assert_eq!(dims, FieldDimensions::new(30, 20, 5));
        assert_eq!(dims.cell_count(), 3000);
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let config = SimulationConfig {
            learning_rate: 1.5,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));

        let config = SimulationConfig {
            interaction_radius: f32::NAN,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_population_is_capped() {
        let config = SimulationConfig {
            max_particles: 50,
            ..SimulationConfig::default()
        };
        assert_eq!(config.initial_population(), 50);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{ "max_particles": 64, "boundary_condition": "bounce" }"#)
                .expect("partial config");
        assert_eq!(config.max_particles, 64);
        assert_eq!(config.boundary_condition, BoundaryCondition::Bounce);
        assert_eq!(config.field_width, 30);
    }

    #[test]
    fn fluctuation_rate_is_a_fraction() {
        for rate in [3.0e38, 1.5, -0.1, f32::NAN] {
            let config = SimulationConfig {
                intent_fluctuation_rate: rate,
                probabilistic_intent: false,
                ..SimulationConfig::default()
            };
            assert!(config.validate().is_err(), "rate {rate} accepted");
        }
        let config = SimulationConfig {
            intent_fluctuation_rate: 1.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
