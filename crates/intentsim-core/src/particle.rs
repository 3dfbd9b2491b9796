//! Particles, their storage, and field-seeded construction.

use std::f32::consts::TAU;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Position, SimulationConfig, Tick, Velocity};

/// Stable particle identifier; never reused within one engine lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleId(pub u64);

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Field values beyond this magnitude produce a charged particle.
pub const CHARGE_THRESHOLD: f32 = 0.2;
/// Field magnitude above which particles spawn as high-energy.
pub const HIGH_ENERGY_THRESHOLD: f32 = 0.8;
const EXOTIC_CHANCE: f32 = 0.05;
const ADAPTIVE_CHANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charge {
    Positive,
    Negative,
    Neutral,
}

impl Charge {
    pub const ALL: [Self; 3] = [Self::Positive, Self::Negative, Self::Neutral];

    /// Classify a field value: `> 0.2` positive, `< -0.2` negative, otherwise neutral.
    #[must_use]
    pub fn from_intent(value: f32) -> Self {
        if value > CHARGE_THRESHOLD {
            Self::Positive
        } else if value < -CHARGE_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }

    /// Signed multiplier used by impulses and field coupling.
    #[must_use]
    pub const fn sign(self) -> f32 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
            Self::Neutral => 0.0,
        }
    }

    /// Dense index for per-charge tallies.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Positive => 0,
            Self::Negative => 1,
            Self::Neutral => 2,
        }
    }

    /// Sample an interaction tendency; positive > neutral > negative on every draw.
    pub fn sample_tendency<R: Rng + ?Sized>(self, rng: &mut R) -> f32 {
        match self {
            Self::Positive => 0.7 + rng.random::<f32>() * 0.3,
            Self::Neutral => 0.5,
            Self::Negative => 0.3 + rng.random::<f32>() * 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticleKind {
    #[default]
    Standard,
    HighEnergy,
    Quantum,
    Composite,
    Adaptive,
}

impl ParticleKind {
    pub const ALL: [Self; 5] = [
        Self::Standard,
        Self::HighEnergy,
        Self::Quantum,
        Self::Composite,
        Self::Adaptive,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Standard => 0,
            Self::HighEnergy => 1,
            Self::Quantum => 2,
            Self::Composite => 3,
            Self::Adaptive => 4,
        }
    }
}

/// A single simulated particle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Particle {
    pub id: ParticleId,
    pub position: Position,
    pub velocity: Velocity,
    pub radius: f32,
    pub mass: f32,
    pub charge: Charge,
    pub kind: ParticleKind,
    pub knowledge: f32,
    pub energy: f32,
    pub complexity: f32,
    /// Charge-derived willingness to interact, in `[0, 1]`.
    pub interaction_tendency: f32,
    pub interactions: u64,
    pub last_interaction: Option<Tick>,
    pub age: u64,
    /// Simulation time in seconds at which the particle was created.
    pub created_at: f64,
    pub intent_decay_rate: f32,
    pub adaptive_score: f32,
    /// Oscillator phase; only quantum particles advance it.
    pub phase: f32,
    pub is_post_inflation: bool,
}

impl Particle {
    /// Whether every numeric attribute is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.radius.is_finite()
            && self.mass.is_finite()
            && self.knowledge.is_finite()
            && self.energy.is_finite()
            && self.complexity.is_finite()
            && self.phase.is_finite()
            && self.adaptive_score.is_finite()
    }

    /// Radius (in field cells) and charge-signed strength of this particle's field imprint.
    ///
    /// Neutral particles leave no imprint and yield `None`.
    #[must_use]
    pub fn field_influence(&self) -> Option<(f32, f32)> {
        let (radius, strength) = match self.kind {
            ParticleKind::Standard => (2.0, 0.02),
            ParticleKind::HighEnergy => (3.0, 0.05),
            ParticleKind::Quantum => (4.0, self.phase.sin() * 0.04),
            ParticleKind::Composite => (
                2.0 + (self.complexity / 2.0).floor().min(3.0),
                0.03 * self.complexity.min(5.0),
            ),
            ParticleKind::Adaptive => (3.0, 0.04 * (1.0 + self.adaptive_score * 0.1)),
        };
        let signed = strength * self.charge.sign();
        (signed != 0.0).then_some((radius, signed))
    }
}

/// Derives new particles from local field samples.
#[derive(Debug, Clone, Copy)]
pub struct ParticleFactory {
    speed: f32,
    allow_adaptive: bool,
}

impl ParticleFactory {
    #[must_use]
    pub const fn new(speed: f32, allow_adaptive: bool) -> Self {
        Self {
            speed,
            allow_adaptive,
        }
    }

    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.particle_speed, config.use_adaptive_particles)
    }

    /// Build a particle whose charge, type, and energetics follow `field_value`.
    ///
    /// The returned particle carries a placeholder id; [`ParticleArena::insert`]
    /// assigns the real one.
    pub fn create_from_field<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        field_value: f32,
        position: Position,
        timestamp: f64,
    ) -> Particle {
        let value = if field_value.is_finite() {
            field_value.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let magnitude = value.abs();
        let charge = Charge::from_intent(value);
        let interaction_tendency = charge.sample_tendency(rng);

        let mut kind = if magnitude > HIGH_ENERGY_THRESHOLD {
            ParticleKind::HighEnergy
        } else {
            let roll = rng.random::<f32>();
            if roll < EXOTIC_CHANCE * 0.5 {
                ParticleKind::Quantum
            } else if roll < EXOTIC_CHANCE {
                ParticleKind::Composite
            } else {
                ParticleKind::Standard
            }
        };
        let mut adaptive_score = 0.0;
        if self.allow_adaptive && rng.random_bool(ADAPTIVE_CHANCE) {
            kind = ParticleKind::Adaptive;
            adaptive_score = 1.0;
        }

        let energy = 1.0 + magnitude;
        let phase = if kind == ParticleKind::Quantum {
            rng.random::<f32>() * TAU
        } else {
            0.0
        };

        Particle {
            id: ParticleId::default(),
            position,
            velocity: random_direction(rng, self.speed),
            radius: 2.0 + energy * 0.7,
            mass: 1.0 + rng.random::<f32>() * 4.0,
            charge,
            kind,
            knowledge: magnitude * 0.1,
            energy,
            complexity: 1.0 + magnitude * 2.0,
            interaction_tendency,
            interactions: 0,
            last_interaction: None,
            age: 0,
            created_at: timestamp,
            intent_decay_rate: 0.001 + rng.random::<f32>() * 0.005,
            adaptive_score,
            phase,
            is_post_inflation: false,
        }
    }
}

fn random_direction<R: Rng + ?Sized>(rng: &mut R, speed: f32) -> Velocity {
    let theta = rng.random::<f32>() * TAU;
    let cos_phi = rng.random_range(-1.0f32..=1.0);
    let sin_phi = (1.0 - cos_phi * cos_phi).max(0.0).sqrt();
    Velocity::new(
        sin_phi * theta.cos() * speed,
        sin_phi * theta.sin() * speed,
        cos_phi * speed,
    )
}

/// Owning particle collection ordered by ascending id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParticleArena {
    particles: Vec<Particle>,
    next_id: u64,
}

impl ParticleArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            particles: Vec::with_capacity(capacity),
            next_id: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Id that the next insertion will receive.
    #[must_use]
    pub const fn next_id(&self) -> ParticleId {
        ParticleId(self.next_id)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.iter_mut()
    }

    /// Insert a particle unless the arena already holds `cap` particles.
    pub fn insert(&mut self, mut particle: Particle, cap: usize) -> Option<ParticleId> {
        if self.particles.len() >= cap {
            return None;
        }
        let id = ParticleId(self.next_id);
        self.next_id += 1;
        particle.id = id;
        self.particles.push(particle);
        Some(id)
    }

    #[must_use]
    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.position_of(id).map(|idx| &self.particles[idx])
    }

    pub fn get_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        self.position_of(id).map(move |idx| &mut self.particles[idx])
    }

    #[must_use]
    pub fn contains(&self, id: ParticleId) -> bool {
        self.position_of(id).is_some()
    }

    /// Remove a particle, preserving the order of the rest.
    pub fn remove(&mut self, id: ParticleId) -> Option<Particle> {
        let idx = self.position_of(id)?;
        Some(self.particles.remove(idx))
    }

    /// Keep particles matching `keep`; returns the number removed.
    pub fn retain<F: FnMut(&Particle) -> bool>(&mut self, keep: F) -> usize {
        let before = self.particles.len();
        self.particles.retain(keep);
        before - self.particles.len()
    }

    /// Drop the newest particles until at most `max` remain; returns the number removed.
    pub fn truncate(&mut self, max: usize) -> usize {
        let before = self.particles.len();
        self.particles.truncate(max);
        before - self.particles.len()
    }

    /// Whether ids are strictly increasing and below the next id to hand out.
    #[must_use]
    pub(crate) fn ids_are_consistent(&self) -> bool {
        self.particles.windows(2).all(|w| w[0].id < w[1].id)
            && self
                .particles
                .last()
                .is_none_or(|last| last.id.0 < self.next_id)
    }

    fn position_of(&self, id: ParticleId) -> Option<usize> {
        self.particles.binary_search_by_key(&id, |p| p.id).ok()
    }
}
