//! Pairwise interaction detection and resolution.

use intentsim_index::NeighborhoodIndex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Particle, ParticleKind, SimulationConfig, Tick};

/// Extra separation allowed beyond the sum of radii.
pub const INTERACTION_MARGIN: f32 = 5.0;
/// Impulse magnitude before distance scaling.
pub const IMPULSE_STRENGTH: f32 = 0.1;
const COMPLEXITY_STEP: f32 = 0.01;
const COMPLEXITY_CAP: f32 = 100.0;
const ADAPTIVE_STEP: f32 = 0.05;

#[derive(Debug, Clone, Copy)]
pub struct InteractionParams {
    pub learning_rate: f32,
    pub interaction_radius: f32,
    /// Scale `k` in the success probability `t1 * t2 * k`.
    pub chance_scale: f32,
}

impl InteractionParams {
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            interaction_radius: config.interaction_radius,
            chance_scale: config.interaction_chance_scale,
        }
    }

    /// Maximum separation at which two particles of the given radii may interact.
    #[must_use]
    pub fn cutoff(&self, radius_a: f32, radius_b: f32) -> f32 {
        self.interaction_radius
            .min(radius_a + radius_b + INTERACTION_MARGIN)
    }
}

/// Tally of one interaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionOutcome {
    pub candidates: usize,
    pub interactions: usize,
    pub knowledge_transferred: f32,
}

/// Collect unordered index pairs `(i, j)` with `i < j` that lie within their cutoff.
///
/// Pairs come back sorted so resolution order never depends on index internals.
pub fn candidate_pairs(
    index: &mut dyn NeighborhoodIndex,
    particles: &[Particle],
    params: &InteractionParams,
) -> Result<Vec<(usize, usize, f32)>, EngineError> {
    let positions: Vec<_> = particles.iter().map(|p| p.position.as_tuple()).collect();
    index.rebuild(&positions)?;
    let radius_sq = params.interaction_radius * params.interaction_radius;
    let mut pairs = Vec::new();
    for (i, particle) in particles.iter().enumerate() {
        index.neighbors_within(i, radius_sq, &mut |j, dist_sq| {
            if j <= i {
                return;
            }
            let distance = dist_sq.0.sqrt();
            if distance <= params.cutoff(particle.radius, particles[j].radius) {
                pairs.push((i, j, distance));
            }
        });
    }
    pairs.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    Ok(pairs)
}

/// Resolve interactions for each candidate pair.
///
/// Knowledge transfer is asymmetric: the more knowledgeable particle loses
/// half of what the other gains, so total knowledge grows on every exchange.
pub fn resolve_interactions<R: Rng + ?Sized>(
    particles: &mut [Particle],
    pairs: &[(usize, usize, f32)],
    params: &InteractionParams,
    tick: Tick,
    rng: &mut R,
) -> InteractionOutcome {
    let mut outcome = InteractionOutcome {
        candidates: pairs.len(),
        ..InteractionOutcome::default()
    };
    for &(i, j, distance) in pairs {
        debug_assert!(i < j);
        let (head, tail) = particles.split_at_mut(j);
        let (a, b) = (&mut head[i], &mut tail[0]);

        let chance = (a.interaction_tendency * b.interaction_tendency * params.chance_scale)
            .clamp(0.0, 1.0);
        if rng.random::<f32>() >= chance {
            continue;
        }

        outcome.knowledge_transferred += transfer_knowledge(a, b, params.learning_rate);
        apply_impulse(a, b, distance);
        for particle in [&mut *a, &mut *b] {
            particle.interactions += 1;
            particle.last_interaction = Some(tick);
            let step = if particle.kind == ParticleKind::Composite {
                COMPLEXITY_STEP * 2.0
            } else {
                COMPLEXITY_STEP
            };
            particle.complexity = (particle.complexity + step).min(COMPLEXITY_CAP);
            if particle.kind == ParticleKind::Adaptive {
                particle.adaptive_score += ADAPTIVE_STEP;
            }
        }
        outcome.interactions += 1;
    }
    outcome
}

fn transfer_knowledge(a: &mut Particle, b: &mut Particle, learning_rate: f32) -> f32 {
    let amount = (a.knowledge - b.knowledge).abs() * learning_rate;
    if amount == 0.0 {
        return 0.0;
    }
    let (high, low) = if a.knowledge > b.knowledge {
        (a, b)
    } else {
        (b, a)
    };
    high.knowledge = (high.knowledge - amount * 0.5).max(0.0);
    low.knowledge += amount;
    amount
}

fn apply_impulse(a: &mut Particle, b: &mut Particle, distance: f32) {
    if distance <= f32::EPSILON {
        return;
    }
    let strength =
        IMPULSE_STRENGTH * a.charge.sign() * b.charge.sign() / distance.max(1.0);
    if strength == 0.0 {
        return;
    }
    let nx = (b.position.x - a.position.x) / distance;
    let ny = (b.position.y - a.position.y) / distance;
    let nz = (b.position.z - a.position.z) / distance;
    a.velocity.vx -= nx * strength;
    a.velocity.vy -= ny * strength;
    a.velocity.vz -= nz * strength;
    b.velocity.vx += nx * strength;
    b.velocity.vy += ny * strength;
    b.velocity.vz += nz * strength;
}
