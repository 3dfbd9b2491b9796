//! Bounded 3-D intent field and its dynamics.

use std::f32::consts::TAU;

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{EngineError, FieldDimensions, Particle, Position, WorldExtent};

const FLUCTUATION_CHANCE: f64 = 0.3;
const GAUSSIAN_SCALE: f32 = 0.3;
const WAVE_CHANCE: f64 = 0.05;
const HOTSPOT_CHANCE: f64 = 0.02;
const HOTSPOT_INTENSITY: f32 = 0.7;
/// Largest fluctuation amplitude the field dynamics accept.
pub const MAX_FLUCTUATION_RATE: f32 = 1.0;
/// Weight of the existing field when blending in the particle imprint.
pub const BLEND_KEEP: f32 = 0.7;
/// Cells above `+0.3` are positive regions, below `-0.3` negative, otherwise neutral.
pub const REGION_THRESHOLD: f32 = 0.3;

/// What the stochastic field update did on one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldActivity {
    pub fluctuated_cells: usize,
    pub wave: bool,
    pub hotspot: bool,
}

/// Summary statistics over the whole field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldAnalysis {
    pub average: f32,
    pub variance: f32,
    /// Mean squared cell value.
    pub energy: f32,
    /// Mean absolute difference between 6-connected neighbours, in `[0, 2]`.
    pub gradient_strength: f32,
    pub positive_fraction: f32,
    pub negative_fraction: f32,
    pub neutral_fraction: f32,
    /// Cell count of the largest connected same-class region.
    pub largest_region: usize,
    /// `1 - gradient_strength / 2`; smoother fields are more ordered.
    pub order_parameter: f32,
    /// Blend of class balance, variance and in-plane class edges, in `[0, 1]`.
    pub pattern_complexity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionClass {
    Positive,
    Negative,
    Neutral,
}

impl RegionClass {
    fn of(value: f32) -> Self {
        if value > REGION_THRESHOLD {
            Self::Positive
        } else if value < -REGION_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PlaneStats {
    sum: f64,
    sum_sq: f64,
    positive: usize,
    negative: usize,
    diff_sum: f64,
    diff_pairs: usize,
    edges: usize,
}

/// Scalar field `field[z][y][x]` with every value kept inside `[-1, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentField {
    dims: FieldDimensions,
    cells: Vec<f32>,
}

impl IntentField {
    /// Construct a field with every cell at zero.
    pub fn new(dims: FieldDimensions) -> Result<Self, EngineError> {
        if dims.cell_count() == 0 {
            return Err(EngineError::InvalidConfig(
                "field dimensions must be non-zero",
            ));
        }
        Ok(Self {
            dims,
            cells: vec![0.0; dims.cell_count()],
        })
    }

    /// Construct a field of small uniform values in `[-amplitude, amplitude]`.
    pub fn random<R: Rng + ?Sized>(
        dims: FieldDimensions,
        amplitude: f32,
        rng: &mut R,
    ) -> Result<Self, EngineError> {
        let mut field = Self::new(dims)?;
        let amplitude = amplitude.clamp(0.0, 1.0);
        for cell in &mut field.cells {
            *cell = rng.random_range(-amplitude..=amplitude);
        }
        Ok(field)
    }

    #[must_use]
    pub const fn dimensions(&self) -> FieldDimensions {
        self.dims
    }

    /// Flat cell storage in z, y, x order.
    #[must_use]
    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    fn index(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        let (w, h, d) = self.extent();
        (x < w && y < h && z < d).then(|| (z * h + y) * w + x)
    }

    const fn extent(&self) -> (usize, usize, usize) {
        (
            self.dims.width as usize,
            self.dims.height as usize,
            self.dims.depth as usize,
        )
    }

    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.index(x, y, z).map(|idx| self.cells[idx])
    }

    /// Set a cell, clamping the value into `[-1, 1]`. Returns `false` when out of range.
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) -> bool {
        match self.index(x, y, z) {
            Some(idx) => {
                self.cells[idx] = clamp_intent(value);
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, value: f32) {
        let value = clamp_intent(value);
        self.cells.fill(value);
    }

    /// Map a world position onto the grid cell containing it; out-of-range coordinates clamp.
    #[must_use]
    pub fn project(&self, position: Position, extent: WorldExtent) -> (usize, usize, usize) {
        let (w, h, d) = self.extent();
        (
            project_axis(position.x, extent.width, w),
            project_axis(position.y, extent.height, h),
            project_axis(position.z, extent.depth, d),
        )
    }

    /// Field value at the cell containing `position`.
    #[must_use]
    pub fn sample(&self, position: Position, extent: WorldExtent) -> f32 {
        let (x, y, z) = self.project(position, extent);
        self.value_at(x, y, z)
    }

    fn value_at(&self, x: usize, y: usize, z: usize) -> f32 {
        let (w, h, _) = self.extent();
        self.cells[(z * h + y) * w + x]
    }

    /// Central-difference gradient in value per cell, one-sided at the borders.
    #[must_use]
    pub fn gradient_at(&self, (x, y, z): (usize, usize, usize)) -> [f32; 3] {
        let (w, h, d) = self.extent();
        let axis = |lo: (usize, usize, usize), hi: (usize, usize, usize), steps: usize| {
            if steps == 0 {
                0.0
            } else {
                (self.value_at(hi.0, hi.1, hi.2) - self.value_at(lo.0, lo.1, lo.2)) / steps as f32
            }
        };
        let (x0, x1) = (x.saturating_sub(1), (x + 1).min(w - 1));
        let (y0, y1) = (y.saturating_sub(1), (y + 1).min(h - 1));
        let (z0, z1) = (z.saturating_sub(1), (z + 1).min(d - 1));
        [
            axis((x0, y, z), (x1, y, z), x1 - x0),
            axis((x, y0, z), (x, y1, z), y1 - y0),
            axis((x, y, z0), (x, y, z1), z1 - z0),
        ]
    }

    /// Apply one tick of fluctuation, wave and hotspot dynamics.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        fluctuation_rate: f32,
        probabilistic: bool,
    ) -> FieldActivity {
        let rate = if fluctuation_rate.is_finite() {
            fluctuation_rate.clamp(0.0, MAX_FLUCTUATION_RATE)
        } else {
            0.0
        };
        let mut activity = FieldActivity::default();

        for cell in &mut self.cells {
            if !rng.random_bool(FLUCTUATION_CHANCE) {
                continue;
            }
            let delta = if probabilistic {
                gaussian(rng) * rate * GAUSSIAN_SCALE
            } else {
                (rng.random::<f32>() * 2.0 - 1.0) * rate
            };
            *cell = clamp_intent(*cell + delta);
            activity.fluctuated_cells += 1;
        }

        if rng.random_bool(WAVE_CHANCE) {
            self.apply_wave(rng, rate);
            activity.wave = true;
        }
        if rng.random_bool(HOTSPOT_CHANCE) {
            self.apply_hotspot(rng);
            activity.hotspot = true;
        }
        activity
    }

    fn random_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> (f32, f32, f32) {
        let (w, h, d) = self.extent();
        (
            rng.random_range(0..w) as f32,
            rng.random_range(0..h) as f32,
            rng.random_range(0..d) as f32,
        )
    }

    fn apply_wave<R: Rng + ?Sized>(&mut self, rng: &mut R, rate: f32) {
        let origin = self.random_cell(rng);
        let wavelength = rng.random_range(5.0f32..=10.0);
        let strength = rng.random::<f32>() * 0.5 * rate;
        let (w, h, _) = self.extent();
        for (idx, cell) in self.cells.iter_mut().enumerate() {
            let d = grid_distance(cell_coords(idx, w, h), origin);
            let wave = (TAU * d / wavelength).sin() * strength * (-d / (2.0 * wavelength)).exp();
            *cell = clamp_intent(*cell + wave);
        }
    }

    fn apply_hotspot<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        let centre = self.random_cell(rng);
        let radius = rng.random_range(2..=4) as f32;
        let (w, h, _) = self.extent();
        for (idx, cell) in self.cells.iter_mut().enumerate() {
            let d = grid_distance(cell_coords(idx, w, h), centre);
            if d < radius {
                *cell = clamp_intent(*cell + sign * (1.0 - d / radius) * HOTSPOT_INTENSITY);
            }
        }
    }

    /// Field built purely from particle imprints, using the `(1 - d/r)^2` kernel.
    pub fn particle_imprint(
        dims: FieldDimensions,
        particles: &[Particle],
        extent: WorldExtent,
    ) -> Result<Self, EngineError> {
        let mut imprint = Self::new(dims)?;
        let (w, h, d) = imprint.extent();
        for particle in particles {
            let Some((radius, strength)) = particle.field_influence() else {
                continue;
            };
            let (cx, cy, cz) = imprint.project(particle.position, extent);
            let span = radius.ceil() as usize;
            let centre = (cx as f32, cy as f32, cz as f32);
            for z in cz.saturating_sub(span)..(cz + span + 1).min(d) {
                for y in cy.saturating_sub(span)..(cy + span + 1).min(h) {
                    for x in cx.saturating_sub(span)..(cx + span + 1).min(w) {
                        let dist = grid_distance((x as f32, y as f32, z as f32), centre);
                        if dist <= radius {
                            let falloff = (1.0 - dist / radius).powi(2);
                            imprint.cells[(z * h + y) * w + x] += strength * falloff;
                        }
                    }
                }
            }
        }
        for cell in &mut imprint.cells {
            *cell = clamp_intent(*cell);
        }
        Ok(imprint)
    }

    /// Blend `other` into this field as `keep * self + (1 - keep) * other`.
    pub fn blend(&mut self, other: &IntentField, keep: f32) -> Result<(), EngineError> {
        if other.dims != self.dims {
            return Err(EngineError::InvalidState(
                "cannot blend fields of different dimensions",
            ));
        }
        let keep = keep.clamp(0.0, 1.0);
        for (cell, incoming) in self.cells.iter_mut().zip(&other.cells) {
            *cell = clamp_intent(keep * *cell + (1.0 - keep) * incoming);
        }
        Ok(())
    }

    /// Mean squared cell value.
    #[must_use]
    pub fn energy(&self) -> f32 {
        let total: f64 = self.cells.iter().map(|v| f64::from(*v) * f64::from(*v)).sum();
        (total / self.cells.len() as f64) as f32
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.cells.iter().all(|v| v.is_finite())
    }

    /// Whether every cell lies in `[-1, 1]`.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.cells.iter().all(|v| (-1.0..=1.0).contains(v))
    }

    /// Compute field statistics; planes are scanned in parallel.
    #[must_use]
    pub fn analyze(&self) -> FieldAnalysis {
        let (_, _, d) = self.extent();
        let planes: Vec<PlaneStats> = (0..d)
            .into_par_iter()
            .map(|z| self.plane_stats(z))
            .collect();
        let totals = planes.iter().fold(PlaneStats::default(), |mut acc, plane| {
            acc.sum += plane.sum;
            acc.sum_sq += plane.sum_sq;
            acc.positive += plane.positive;
            acc.negative += plane.negative;
            acc.diff_sum += plane.diff_sum;
            acc.diff_pairs += plane.diff_pairs;
            acc.edges += plane.edges;
            acc
        });

        let n = self.cells.len();
        let n_f = n as f64;
        let average = totals.sum / n_f;
        let energy = totals.sum_sq / n_f;
        let variance = (energy - average * average).max(0.0);
        let gradient_strength = if totals.diff_pairs == 0 {
            0.0
        } else {
            totals.diff_sum / totals.diff_pairs as f64
        };
        let neutral = n - totals.positive - totals.negative;

        let balance_gap = (totals.positive.abs_diff(totals.negative)
            + totals.positive.abs_diff(neutral)
            + totals.negative.abs_diff(neutral)) as f64
            / n_f;
        let type_balance = 1.0 - balance_gap / 3.0;
        let normalized_variance = (variance * 5.0).min(1.0);
        let normalized_edges = (totals.edges as f64 / (n_f * 2.0 * 0.2)).min(1.0);

        FieldAnalysis {
            average: average as f32,
            variance: variance as f32,
            energy: energy as f32,
            gradient_strength: gradient_strength as f32,
            positive_fraction: (totals.positive as f64 / n_f) as f32,
            negative_fraction: (totals.negative as f64 / n_f) as f32,
            neutral_fraction: (neutral as f64 / n_f) as f32,
            largest_region: self.largest_region(),
            order_parameter: (1.0 - gradient_strength / 2.0).clamp(0.0, 1.0) as f32,
            pattern_complexity: (type_balance * 0.3
                + normalized_variance * 0.4
                + normalized_edges * 0.3)
                .clamp(0.0, 1.0) as f32,
        }
    }

    fn plane_stats(&self, z: usize) -> PlaneStats {
        let (w, h, d) = self.extent();
        let mut stats = PlaneStats::default();
        for y in 0..h {
            for x in 0..w {
                let value = self.value_at(x, y, z);
                let class = RegionClass::of(value);
                stats.sum += f64::from(value);
                stats.sum_sq += f64::from(value) * f64::from(value);
                match class {
                    RegionClass::Positive => stats.positive += 1,
                    RegionClass::Negative => stats.negative += 1,
                    RegionClass::Neutral => {}
                }
                let mut neighbour = |other: f32, in_plane: bool| {
                    stats.diff_sum += f64::from((value - other).abs());
                    stats.diff_pairs += 1;
                    if in_plane && RegionClass::of(other) != class {
                        stats.edges += 1;
                    }
                };
                if x + 1 < w {
                    neighbour(self.value_at(x + 1, y, z), true);
                }
                if y + 1 < h {
                    neighbour(self.value_at(x, y + 1, z), true);
                }
                if z + 1 < d {
                    neighbour(self.value_at(x, y, z + 1), false);
                }
            }
        }
        stats
    }

    fn largest_region(&self) -> usize {
        let (w, h, d) = self.extent();
        let mut visited = vec![false; self.cells.len()];
        let mut stack = Vec::new();
        let mut largest = 0;

        for start in 0..self.cells.len() {
            if visited[start] {
                continue;
            }
            let class = RegionClass::of(self.cells[start]);
            visited[start] = true;
            stack.push(start);
            let mut size = 0;
            while let Some(idx) = stack.pop() {
                size += 1;
                let x = idx % w;
                let y = (idx / w) % h;
                let z = idx / (w * h);
                let mut visit = |nx: usize, ny: usize, nz: usize| {
                    let n = (nz * h + ny) * w + nx;
                    if !visited[n] && RegionClass::of(self.cells[n]) == class {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(x - 1, y, z);
                }
                if x + 1 < w {
                    visit(x + 1, y, z);
                }
                if y > 0 {
                    visit(x, y - 1, z);
                }
                if y + 1 < h {
                    visit(x, y + 1, z);
                }
                if z > 0 {
                    visit(x, y, z - 1);
                }
                if z + 1 < d {
                    visit(x, y, z + 1);
                }
            }
            largest = largest.max(size);
        }
        largest
    }
}

fn clamp_intent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

fn project_axis(coord: f32, extent: f32, cells: usize) -> usize {
    // Negative and NaN coordinates saturate to 0 in the cast.
    let scaled = (coord / extent * cells as f32) as usize;
    scaled.min(cells - 1)
}

fn cell_coords(idx: usize, w: usize, h: usize) -> (f32, f32, f32) {
    ((idx % w) as f32, ((idx / w) % h) as f32, (idx / (w * h)) as f32)
}

fn grid_distance(a: (f32, f32, f32), b: (f32, f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2) + (a.2 - b.2).powi(2)).sqrt()
}

/// Standard normal sample via Box–Muller.
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1 = 1.0 - rng.random::<f32>();
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParticleFactory, ParticleKind};
    use rand::{SeedableRng, rngs::SmallRng};

    fn dims() -> FieldDimensions {
        FieldDimensions::new(6, 5, 3)
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(IntentField::new(FieldDimensions::new(0, 4, 4)).is_err());
    }

    #[test]
    fn updates_stay_bounded_under_extreme_rates() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut field = IntentField::random(dims(), 1.0, &mut rng).expect("field");
        for step in 0..500 {
            field.update(&mut rng, 5.0, step % 2 == 0);
            assert!(field.is_bounded(), "unbounded after step {step}");
        }
    }

    #[test]
    fn near_float_max_rates_do_not_panic() {
        let mut rng = SmallRng::seed_from_u64(43);
        let mut field = IntentField::random(dims(), 0.5, &mut rng).expect("field");
        for rate in [3.0e38, f32::MAX, f32::INFINITY, f32::NAN] {
            for probabilistic in [false, true] {
                field.update(&mut rng, rate, probabilistic);
                assert!(field.is_finite() && field.is_bounded(), "rate {rate}");
            }
        }
    }

    #[test]
    fn zero_rate_uniform_update_only_moves_via_events() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut field = IntentField::new(dims()).expect("field");
        for _ in 0..50 {
            let activity = field.update(&mut rng, 0.0, false);
            if !activity.hotspot {
                continue;
            }
            assert!(field.cells().iter().any(|v| *v != 0.0));
            return;
        }
        assert!(field.cells().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn set_clamps_and_rejects_out_of_range() {
        let mut field = IntentField::new(dims()).expect("field");
        assert!(field.set(1, 1, 1, 3.0));
        assert_eq!(field.get(1, 1, 1), Some(1.0));
        assert!(!field.set(6, 0, 0, 0.5));
        assert_eq!(field.get(0, 5, 0), None);
    }

    #[test]
    fn projection_clamps_outside_world() {
        let field = IntentField::new(FieldDimensions::new(30, 20, 5)).expect("field");
        let extent = WorldExtent::new(800.0, 600.0, 10.0);
        assert_eq!(field.project(Position::new(-5.0, 0.0, 0.0), extent), (0, 0, 0));
        assert_eq!(
            field.project(Position::new(900.0, 700.0, 50.0), extent),
            (29, 19, 4)
        );
        assert_eq!(field.project(Position::new(f32::NAN, 300.0, 5.0), extent), (0, 10, 2));
    }

    #[test]
    fn gradient_points_uphill() {
        let mut field = IntentField::new(dims()).expect("field");
        for x in 0..6 {
            for y in 0..5 {
                for z in 0..3 {
                    field.set(x, y, z, x as f32 * 0.1);
                }
            }
        }
        let [gx, gy, gz] = field.gradient_at((2, 2, 1));
        assert!((gx - 0.1).abs() < 1e-6);
        assert_eq!(gy, 0.0);
        assert_eq!(gz, 0.0);
        let [edge, _, _] = field.gradient_at((0, 0, 0));
        assert!((edge - 0.1).abs() < 1e-6);
    }

    #[test]
    fn analysis_of_uniform_field() {
        let mut field = IntentField::new(dims()).expect("field");
        field.fill(0.5);
        let analysis = field.analyze();
        assert!((analysis.average - 0.5).abs() < 1e-6);
        assert!(analysis.variance.abs() < 1e-6);
        assert!((analysis.energy - 0.25).abs() < 1e-6);
        assert_eq!(analysis.gradient_strength, 0.0);
        assert_eq!(analysis.order_parameter, 1.0);
        assert_eq!(analysis.largest_region, dims().cell_count());
        assert_eq!(analysis.positive_fraction, 1.0);
    }

    #[test]
    fn largest_region_respects_connectivity() {
        let mut field = IntentField::new(FieldDimensions::new(5, 1, 1)).expect("field");
        for (x, value) in [0.9, 0.9, -0.9, 0.9, 0.9].into_iter().enumerate() {
            field.set(x, 0, 0, value);
        }
        let analysis = field.analyze();
        assert_eq!(analysis.largest_region, 2);
        assert!(analysis.pattern_complexity > 0.0);
    }

    #[test]
    fn imprint_carries_charge_sign() {
        let mut rng = SmallRng::seed_from_u64(8);
        let factory = ParticleFactory::new(1.0, false);
        let extent = WorldExtent::new(60.0, 50.0, 30.0);
        let mut positive = factory.create_from_field(&mut rng, 0.5, Position::new(30.0, 25.0, 15.0), 0.0);
        positive.kind = ParticleKind::HighEnergy;
        let imprint = IntentField::particle_imprint(dims(), &[positive], extent).expect("imprint");
        let (cx, cy, cz) = imprint.project(Position::new(30.0, 25.0, 15.0), extent);
        let peak = imprint.get(cx, cy, cz).expect("cell");
        assert!((peak - 0.05).abs() < 1e-6);
        assert!(imprint.cells().iter().all(|v| *v >= 0.0));

        let mut field = IntentField::new(dims()).expect("field");
        field.fill(-1.0);
        field.blend(&imprint, BLEND_KEEP).expect("blend");
        let blended = field.get(cx, cy, cz).expect("cell");
        assert!((blended - (-0.7 + 0.3 * 0.05)).abs() < 1e-6);
    }
}
