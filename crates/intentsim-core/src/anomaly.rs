//! Anomaly detection across consecutive analysis passes.

use serde::{Deserialize, Serialize};

use crate::{AnalysisReport, Particle, ParticleId, Tick};

/// Minimum absolute change in charge entropy reported as a spike.
pub const ENTROPY_SPIKE_DELTA: f32 = 0.2;
/// Cluster count growth factor reported as rapid formation.
pub const CLUSTER_GROWTH_FACTOR: f32 = 1.5;
const SAMPLE_IDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    EntropySpike,
    ClusterFormation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub kind: AnomalyKind,
    pub description: String,
    /// A few representative particle ids.
    pub particles: Vec<ParticleId>,
    /// Estimated number of particles involved.
    pub affected_particles: usize,
    /// Severity in `[0, 1]`.
    pub severity: f32,
    pub tick: Tick,
    /// Simulation time in seconds.
    pub timestamp: f64,
}

/// Compare two consecutive analyses and report entropy spikes and bursts of clustering.
#[must_use]
pub fn detect_anomalies(
    previous: &AnalysisReport,
    current: &AnalysisReport,
    particles: &[Particle],
) -> Vec<AnomalyEvent> {
    let mut events = Vec::new();
    let n = particles.len();
    let sample: Vec<ParticleId> = particles.iter().take(SAMPLE_IDS).map(|p| p.id).collect();

    let delta = current.entropy.shannon_entropy - previous.entropy.shannon_entropy;
    if delta.abs() > ENTROPY_SPIKE_DELTA {
        let direction = if delta > 0.0 { "rose" } else { "fell" };
        events.push(AnomalyEvent {
            kind: AnomalyKind::EntropySpike,
            description: format!(
                "charge entropy {direction} by {:.3} between ticks {} and {}",
                delta.abs(),
                previous.tick.0,
                current.tick.0
            ),
            particles: sample.clone(),
            affected_particles: (n as f32 * 0.3) as usize,
            severity: 0.7,
            tick: current.tick,
            timestamp: current.simulation_time,
        });
    }

    let before = previous.clusters.clusters.len();
    let after = current.clusters.clusters.len();
    if before > 0 && after as f32 > before as f32 * CLUSTER_GROWTH_FACTOR {
        events.push(AnomalyEvent {
            kind: AnomalyKind::ClusterFormation,
            description: format!("cluster count grew from {before} to {after}"),
            particles: sample,
            affected_particles: (n as f32 * 0.2) as usize,
            severity: 0.6,
            tick: current.tick,
            timestamp: current.simulation_time,
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Charge, Cluster, ClusterReport, EntropyMetrics, ParticleFactory, Position};

    fn report(tick: u64, entropy: f32, clusters: usize) -> AnalysisReport {
        AnalysisReport {
            tick: Tick(tick),
            simulation_time: tick as f64 / 30.0,
            particle_count: 10,
            entropy: EntropyMetrics {
                shannon_entropy: entropy,
                ..EntropyMetrics::default()
            },
            clusters: ClusterReport {
                clusters: (0..clusters)
                    .map(|i| Cluster {
                        charge: Charge::Positive,
                        members: vec![ParticleId(i as u64 * 2), ParticleId(i as u64 * 2 + 1)],
                        centroid: Position::default(),
                        mean_knowledge: 0.0,
                    })
                    .collect(),
                unclustered: Vec::new(),
            },
            field: Default::default(),
            emergence_index: 0.0,
        }
    }

    #[test]
    fn quiet_changes_raise_nothing() {
        let events = detect_anomalies(&report(30, 0.5, 4), &report(60, 0.6, 5), &[]);
        assert!(events.is_empty());
    }

    #[test]
    fn entropy_spike_is_reported() {
        let events = detect_anomalies(&report(30, 0.2, 2), &report(60, 0.9, 2), &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AnomalyKind::EntropySpike);
        assert_eq!(events[0].severity, 0.7);
        assert_eq!(events[0].tick, Tick(60));
    }

    #[test]
    fn cluster_burst_is_reported() {
        let events = detect_anomalies(&report(30, 0.5, 2), &report(60, 0.5, 4), &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AnomalyKind::ClusterFormation);
        assert!(events[0].description.contains("from 2 to 4"));
    }

    #[test]
    fn affected_counts_round_down() {
        use rand::{SeedableRng, rngs::SmallRng};
        let mut rng = SmallRng::seed_from_u64(5);
        let factory = ParticleFactory::new(1.0, false);
        let particles: Vec<_> = (0..5)
            .map(|i| {
                let mut p = factory.create_from_field(&mut rng, 0.5, Position::default(), 0.0);
                p.id = ParticleId(i);
                p
            })
            .collect();
        // 5 * 0.3 = 1.5 and 5 * 0.2 = 1.0
        let events = detect_anomalies(&report(30, 0.1, 2), &report(60, 0.9, 4), &particles);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AnomalyKind::EntropySpike);
        assert_eq!(events[0].affected_particles, 1);
        assert_eq!(events[1].kind, AnomalyKind::ClusterFormation);
        assert_eq!(events[1].affected_particles, 1);
        assert_eq!(events[0].particles.len(), 5);
    }

    #[test]
    fn growth_from_zero_clusters_is_not_a_burst() {
        let events = detect_anomalies(&report(30, 0.5, 0), &report(60, 0.5, 3), &[]);
        assert!(events.is_empty());
    }
}
