//! Same-charge spatial clustering.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{Charge, Particle, ParticleId, Position};

/// Join distance is `(r1 + r2) * CLUSTER_REACH * threshold`.
pub const CLUSTER_REACH: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub charge: Charge,
    pub members: Vec<ParticleId>,
    pub centroid: Position,
    pub mean_knowledge: f32,
}

impl Cluster {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    /// Groups of two or more particles, in discovery order.
    pub clusters: Vec<Cluster>,
    /// Particles that ended up in a group of one.
    pub unclustered: Vec<ParticleId>,
}

impl ClusterReport {
    /// Number of particles belonging to some cluster.
    #[must_use]
    pub fn clustered_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }

    /// Fraction of all analysed particles that are clustered, in `[0, 1]`.
    #[must_use]
    pub fn clustered_fraction(&self) -> f32 {
        let clustered = self.clustered_count();
        let total = clustered + self.unclustered.len();
        if total == 0 {
            0.0
        } else {
            clustered as f32 / total as f32
        }
    }

    #[must_use]
    pub fn largest(&self) -> Option<&Cluster> {
        self.clusters.iter().max_by_key(|cluster| cluster.len())
    }
}

/// Group particles by breadth-first region growth.
///
/// A particle joins when it shares the charge of, and lies within the join
/// distance of, any member already in the region.
#[must_use]
pub fn analyze_clusters(particles: &[Particle], threshold: f32) -> ClusterReport {
    let mut assigned = vec![false; particles.len()];
    let mut queue = VecDeque::new();
    let mut report = ClusterReport::default();

    for seed in 0..particles.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        queue.push_back(seed);
        let charge = particles[seed].charge;
        let mut members = Vec::new();

        while let Some(current) = queue.pop_front() {
            members.push(current);
            let anchor = &particles[current];
            for (candidate, other) in particles.iter().enumerate() {
                if assigned[candidate] || other.charge != charge {
                    continue;
                }
                let reach = (anchor.radius + other.radius) * CLUSTER_REACH * threshold;
                if anchor.position.distance_sq(other.position) <= reach * reach {
                    assigned[candidate] = true;
                    queue.push_back(candidate);
                }
            }
        }

        if members.len() < 2 {
            report.unclustered.push(particles[seed].id);
            continue;
        }
        members.sort_unstable();
        report.clusters.push(summarize(particles, &members, charge));
    }
    report
}

fn summarize(particles: &[Particle], members: &[usize], charge: Charge) -> Cluster {
    let n = members.len() as f32;
    let (mut cx, mut cy, mut cz, mut knowledge) = (0.0, 0.0, 0.0, 0.0);
    for &idx in members {
        let p = &particles[idx];
        cx += p.position.x;
        cy += p.position.y;
        cz += p.position.z;
        knowledge += p.knowledge;
    }
    Cluster {
        charge,
        members: members.iter().map(|&idx| particles[idx].id).collect(),
        centroid: Position::new(cx / n, cy / n, cz / n),
        mean_knowledge: knowledge / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParticleFactory;
    use rand::{SeedableRng, rngs::SmallRng};

    fn sample_particle(rng: &mut SmallRng, id: u64, value: f32, x: f32) -> Particle {
        let mut particle = ParticleFactory::new(0.0, false).create_from_field(
            rng,
            value,
            Position::new(x, 0.0, 0.0),
            0.0,
        );
        particle.id = ParticleId(id);
        particle.radius = 2.0;
        particle
    }

    #[test]
    fn chains_join_through_intermediate_members() {
        let mut rng = SmallRng::seed_from_u64(1);
        // Join distance = (2 + 2) * 3 * 1.0 = 12.
        let particles = vec![
            sample_particle(&mut rng, 0, 0.5, 0.0),
            sample_particle(&mut rng, 1, 0.5, 10.0),
            sample_particle(&mut rng, 2, 0.5, 20.0),
            sample_particle(&mut rng, 3, 0.5, 100.0),
        ];
        let report = analyze_clusters(&particles, 1.0);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(
            report.clusters[0].members,
            vec![ParticleId(0), ParticleId(1), ParticleId(2)]
        );
        assert_eq!(report.unclustered, vec![ParticleId(3)]);
        assert!((report.clusters[0].centroid.x - 10.0).abs() < 1e-5);
        assert!((report.clustered_fraction() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn clusters_never_mix_charges() {
        let mut rng = SmallRng::seed_from_u64(2);
        let particles: Vec<_> = (0..40)
            .map(|i| {
                let value = match i % 3 {
                    0 => 0.5,
                    1 => -0.5,
                    _ => 0.0,
                };
                sample_particle(&mut rng, i, value, (i / 2) as f32)
            })
            .collect();
        let report = analyze_clusters(&particles, 0.7);
        assert!(!report.clusters.is_empty());
        for cluster in &report.clusters {
            for id in &cluster.members {
                let particle = particles.iter().find(|p| p.id == *id).expect("member");
                assert_eq!(particle.charge, cluster.charge);
            }
        }
        assert_eq!(report.clustered_count() + report.unclustered.len(), particles.len());
    }

    #[test]
    fn threshold_scales_join_distance() {
        let mut rng = SmallRng::seed_from_u64(3);
        let particles = vec![
            sample_particle(&mut rng, 0, -0.5, 0.0),
            sample_particle(&mut rng, 1, -0.5, 10.0),
        ];
        assert_eq!(analyze_clusters(&particles, 1.0).clusters.len(), 1);
        assert!(analyze_clusters(&particles, 0.5).clusters.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let report = analyze_clusters(&[], 0.7);
        assert!(report.clusters.is_empty());
        assert_eq!(report.clustered_fraction(), 0.0);
        assert!(report.largest().is_none());
    }
}
