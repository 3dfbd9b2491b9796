//! Information-theoretic summaries of the particle population.

use serde::{Deserialize, Serialize};

use crate::{Charge, FieldAnalysis, Particle, ParticleKind, WorldExtent};

/// Spatial bins per horizontal axis for spatial entropy.
pub const SPATIAL_BINS: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntropyMetrics {
    /// Charge-distribution entropy normalised to `[0, 1]`.
    pub shannon_entropy: f32,
    /// Occupancy entropy over an `x × y` bin grid, normalised to `[0, 1]`.
    pub spatial_entropy: f32,
    /// Field smoothness in `[0, 1]`; higher is more ordered.
    pub field_order: f32,
    pub complexity_index: f32,
    pub charge_counts: [usize; 3],
    pub kind_counts: [usize; 5],
    pub average_knowledge: f32,
    pub max_complexity: f32,
}

impl EntropyMetrics {
    #[must_use]
    pub fn charge_count(&self, charge: Charge) -> usize {
        self.charge_counts[charge.index()]
    }

    #[must_use]
    pub fn kind_count(&self, kind: ParticleKind) -> usize {
        self.kind_counts[kind.index()]
    }
}

/// Shannon entropy of `counts`, normalised by `log2(counts.len())`.
///
/// Empty input or a single bucket yields 0.
#[must_use]
pub fn shannon_entropy(counts: &[usize]) -> f32 {
    let total: usize = counts.iter().sum();
    if total == 0 || counts.len() < 2 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    (h / (counts.len() as f64).log2()).clamp(0.0, 1.0) as f32
}

fn spatial_entropy(particles: &[Particle], extent: WorldExtent) -> f32 {
    let mut bins = [0usize; SPATIAL_BINS * SPATIAL_BINS];
    for particle in particles {
        let bx = bin(particle.position.x, extent.width);
        let by = bin(particle.position.y, extent.height);
        bins[by * SPATIAL_BINS + bx] += 1;
    }
    shannon_entropy(&bins)
}

fn bin(coord: f32, extent: f32) -> usize {
    ((coord / extent * SPATIAL_BINS as f32) as usize).min(SPATIAL_BINS - 1)
}

/// Compute entropy, order and complexity metrics for one analysis pass.
#[must_use]
pub fn analyze_entropy(
    particles: &[Particle],
    field: &FieldAnalysis,
    interactions_total: u64,
    extent: WorldExtent,
) -> EntropyMetrics {
    let mut charge_counts = [0usize; 3];
    let mut kind_counts = [0usize; 5];
    let mut knowledge = 0.0f64;
    let mut max_complexity = 1.0f32;
    for particle in particles {
        charge_counts[particle.charge.index()] += 1;
        kind_counts[particle.kind.index()] += 1;
        knowledge += f64::from(particle.knowledge);
        max_complexity = max_complexity.max(particle.complexity);
    }
    let n = particles.len();
    let average_knowledge = if n == 0 {
        0.0
    } else {
        (knowledge / n as f64) as f32
    };

    let [positive, negative, neutral] = charge_counts.map(|c| c as f64);
    let [_, high_energy, quantum, composite, adaptive] = kind_counts.map(|c| c as f64);
    let variety = positive
        * negative
        * neutral
        * (high_energy + 1.0)
        * (quantum + 1.0)
        * (composite + 1.0)
        * (adaptive + 1.0)
        / ((n * n).max(1) as f64);
    let complexity_index = f64::from(average_knowledge) * variety
        + interactions_total as f64 / 1000.0
        + composite * f64::from(max_complexity)
        + adaptive * 2.0;

    EntropyMetrics {
        shannon_entropy: shannon_entropy(&charge_counts),
        spatial_entropy: spatial_entropy(particles, extent),
        field_order: field.order_parameter,
        complexity_index: complexity_index as f32,
        charge_counts,
        kind_counts,
        average_knowledge,
        max_complexity,
    }
}
