//! Per-particle kinematics coupled to the intent field.

use std::f32::consts::TAU;

use rand::Rng;

use crate::{
    BoundaryCondition, Charge, EngineError, IntentField, Particle, ParticleKind, SimulationConfig,
    WorldExtent,
};

/// Energy lost per tick when energy conservation is disabled.
pub const AMBIENT_DECAY: f32 = 0.000_01;
const KNOWLEDGE_DRIFT: f32 = 0.001;
const QUANTUM_PHASE_STEP: f32 = 0.1;

/// Tunables consumed by [`advance`].
#[derive(Debug, Clone, Copy)]
pub struct MotionParams {
    pub extent: WorldExtent,
    pub boundary: BoundaryCondition,
    pub drag: f32,
    pub field_force: f32,
    pub energy_conservation: bool,
}

impl MotionParams {
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            extent: config.world_extent(),
            boundary: config.boundary_condition,
            drag: config.drag,
            field_force: config.field_force,
            energy_conservation: config.energy_conservation,
        }
    }
}

/// Advance one particle by a single tick.
///
/// Charged particles accelerate along (positive) or against (negative) the
/// local field gradient; neutral particles receive a random kick instead.
/// Culling depleted particles is left to the owning arena.
pub fn advance<R: Rng + ?Sized>(
    particle: &mut Particle,
    params: &MotionParams,
    field: &IntentField,
    rng: &mut R,
) -> Result<(), EngineError> {
    let cell = field.project(particle.position, params.extent);
    let local = field.sample(particle.position, params.extent);
    let [gx, gy, gz] = field.gradient_at(cell);

    let accel = match particle.charge {
        Charge::Neutral => [
            rng.random_range(-0.5f32..=0.5) * params.field_force,
            rng.random_range(-0.5f32..=0.5) * params.field_force,
            rng.random_range(-0.5f32..=0.5) * params.field_force,
        ],
        charged => {
            let scale = charged.sign() * params.field_force;
            [gx * scale, gy * scale, gz * scale]
        }
    };

    let v = &mut particle.velocity;
    v.vx = (v.vx + accel[0]) * params.drag;
    v.vy = (v.vy + accel[1]) * params.drag;
    v.vz = (v.vz + accel[2]) * params.drag;

    let p = &mut particle.position;
    p.x += v.vx;
    p.y += v.vy;
    p.z += v.vz;
    apply_boundary(particle, params);

    let decay = if params.energy_conservation {
        particle.intent_decay_rate
    } else {
        AMBIENT_DECAY
    };
    particle.energy = (particle.energy - decay).max(0.0);
    particle.knowledge += rng.random::<f32>() * KNOWLEDGE_DRIFT * (1.0 + local.abs());
    if particle.kind == ParticleKind::Quantum {
        particle.phase = (particle.phase + QUANTUM_PHASE_STEP).rem_euclid(TAU);
    }
    particle.age += 1;

    if particle.is_finite() {
        Ok(())
    } else {
        Err(EngineError::NonFinite {
            id: particle.id,
            stage: "motion",
        })
    }
}

fn apply_boundary(particle: &mut Particle, params: &MotionParams) {
    let extent = params.extent;
    let p = &mut particle.position;
    let v = &mut particle.velocity;
    match params.boundary {
        BoundaryCondition::Wrap => {
            p.x = wrap_axis(p.x, extent.width);
            p.y = wrap_axis(p.y, extent.height);
            p.z = wrap_axis(p.z, extent.depth);
        }
        BoundaryCondition::Bounce => {
            bounce_axis(&mut p.x, &mut v.vx, extent.width);
            bounce_axis(&mut p.y, &mut v.vy, extent.height);
            bounce_axis(&mut p.z, &mut v.vz, extent.depth);
        }
    }
}

fn wrap_axis(coord: f32, extent: f32) -> f32 {
    let wrapped = coord.rem_euclid(extent);
    // rem_euclid can round up to exactly `extent` for tiny negative inputs.
    if wrapped >= extent { 0.0 } else { wrapped }
}

fn bounce_axis(coord: &mut f32, velocity: &mut f32, extent: f32) {
    if *coord < 0.0 {
        *coord = 0.0;
        *velocity = velocity.abs();
    } else if *coord > extent {
        *coord = extent;
        *velocity = -velocity.abs();
    }
}
