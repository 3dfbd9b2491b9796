//! One-shot inflation phase transition.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ParticleArena, Tick};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflationPhase {
    #[default]
    Dormant,
    Triggered,
}

/// Emitted exactly once per run when the population crosses the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InflationEvent {
    pub tick: Tick,
    /// Simulation time in seconds.
    pub timestamp: f64,
    pub particles_before: usize,
    pub particles_after: usize,
    pub expansion_factor: f32,
    pub field_energy_before: f32,
    /// Energy density after a volume expansion of `expansion_factor^3`.
    pub field_energy_after: f32,
}

/// Latched `Dormant -> Triggered` state machine; only [`InflationMonitor::reset`] re-arms it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InflationMonitor {
    phase: InflationPhase,
    event: Option<InflationEvent>,
}

impl InflationMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn phase(&self) -> InflationPhase {
        self.phase
    }

    #[must_use]
    pub const fn has_inflated(&self) -> bool {
        matches!(self.phase, InflationPhase::Triggered)
    }

    /// The event recorded when the latch fired.
    #[must_use]
    pub fn event(&self) -> Option<&InflationEvent> {
        self.event.as_ref()
    }

    /// Fire the transition if enabled, still dormant, and the population reached `threshold`.
    ///
    /// On firing every particle is tagged post-inflation; the population itself is unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &mut self,
        enabled: bool,
        threshold: usize,
        multiplier: f32,
        particles: &mut ParticleArena,
        field_energy: f32,
        tick: Tick,
        timestamp: f64,
    ) -> Option<InflationEvent> {
        if !enabled || self.has_inflated() || particles.len() < threshold {
            return None;
        }
        for particle in particles.iter_mut() {
            particle.is_post_inflation = true;
        }
        let count = particles.len();
        let event = InflationEvent {
            tick,
            timestamp,
            particles_before: count,
            particles_after: count,
            expansion_factor: multiplier,
            field_energy_before: field_energy,
            field_energy_after: field_energy / multiplier.powi(3),
        };
        info!(
            tick = tick.0,
            particles = count,
            expansion = multiplier,
            "inflation triggered"
        );
        self.phase = InflationPhase::Triggered;
        self.event = Some(event.clone());
        Some(event)
    }

    /// Re-arm the latch.
    pub fn reset(&mut self) {
        self.phase = InflationPhase::Dormant;
        self.event = None;
    }
}
