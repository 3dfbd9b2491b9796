//! Spatial indexing abstractions for particle neighborhood queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A position handed to `rebuild` contained NaN or infinity.
    #[error("position {index} is not finite")]
    NonFinitePosition { index: usize },
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from particle positions.
    fn rebuild(&mut self, positions: &[(f32, f32, f32)]) -> Result<(), IndexError>;

    /// Visit neighbors of `particle_idx` within the provided squared radius.
    fn neighbors_within(
        &self,
        particle_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );

    /// Number of positions captured by the last rebuild.
    fn len(&self) -> usize;

    /// Whether the last rebuild captured no positions.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type CellKey = (i32, i32, i32);

/// Uniform bucket grid over 3-D space.
///
/// Buckets are keyed sparsely so the grid needs no world bounds; queries scan
/// every bucket overlapping the query sphere and filter by exact distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing particles.
    pub cell_size: f32,
    #[serde(skip)]
    positions: Vec<(f32, f32, f32)>,
    #[serde(skip)]
    buckets: HashMap<CellKey, Vec<usize>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            positions: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    fn cell_of(&self, (x, y, z): (f32, f32, f32)) -> CellKey {
        let inv = 1.0 / self.cell_size;
        (
            (x * inv).floor() as i32,
            (y * inv).floor() as i32,
            (z * inv).floor() as i32,
        )
    }

    /// Number of occupied buckets.
    #[must_use]
    pub fn occupied_cells(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(50.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32, f32)]) -> Result<(), IndexError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if let Some(index) = positions
            .iter()
            .position(|(x, y, z)| !(x.is_finite() && y.is_finite() && z.is_finite()))
        {
            return Err(IndexError::NonFinitePosition { index });
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
        for (idx, &pos) in positions.iter().enumerate() {
            let key = self.cell_of(pos);
            self.buckets.entry(key).or_default().push(idx);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        Ok(())
    }

    fn neighbors_within(
        &self,
        particle_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&origin) = self.positions.get(particle_idx) else {
            return;
        };
        if radius_sq.is_nan() || radius_sq < 0.0 {
            return;
        }
        let span = (radius_sq.sqrt() / self.cell_size).ceil() as i32;
        let (cx, cy, cz) = self.cell_of(origin);
        for dz in -span..=span {
            for dy in -span..=span {
                for dx in -span..=span {
                    let Some(bucket) = self.buckets.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &other in bucket {
                        if other == particle_idx {
                            continue;
                        }
                        let (ox, oy, oz) = self.positions[other];
                        let dist_sq = (ox - origin.0).powi(2)
                            + (oy - origin.1).powi(2)
                            + (oz - origin.2).powi(2);
                        if dist_sq <= radius_sq {
                            visitor(other, OrderedFloat(dist_sq));
                        }
                    }
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }
}
