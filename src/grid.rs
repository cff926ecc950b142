// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::tlv::Track;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::info;

/// Tracks below this confidence are not mapped onto the grid.
pub const MIN_CONFIDENCE: f32 = 0.5;

/// Reasons a grid request is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The named field is NaN or infinite.
    NonFinite(&'static str),
    /// The cell size of the given axis is zero or negative.
    InvalidCellSize(&'static str, f64),
    /// The given axis has `max <= min`.
    InvalidRange(char, f64, f64),
    /// The request divides into fewer than one cell, or too many, along an
    /// axis.
    InvalidGridSize(i64, i64),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NonFinite(field) => write!(f, "{} is not a finite number", field),
            Error::InvalidCellSize(field, size) => {
                write!(f, "invalid cell size: {}={}", field, size)
            }
            Error::InvalidRange(axis, min, max) => {
                write!(f, "invalid {} range: [{}, {}]", axis, min, max)
            }
            Error::InvalidGridSize(nx, ny) => write!(f, "invalid grid size: {} x {}", nx, ny),
        }
    }
}

/// Grid request: a real-world rectangle in meters and the cell size used to
/// divide it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Left edge in meters.
    pub x_min: f64,
    /// Right edge in meters.
    pub x_max: f64,
    /// Near edge in meters.
    pub y_min: f64,
    /// Far edge in meters.
    pub y_max: f64,
    /// Cell width in meters.
    pub dx: f64,
    /// Cell depth in meters.
    pub dy: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            x_min: -12.0,
            x_max: 12.0,
            y_min: 0.0,
            y_max: 120.0,
            dx: 1.0,
            dy: 5.0,
        }
    }
}

impl GridConfig {
    /// Validates the request and derives the number of cells along each axis.
    pub fn validate(&self) -> Result<GridGeometry, Error> {
        for (name, value) in [
            ("x_min", self.x_min),
            ("x_max", self.x_max),
            ("y_min", self.y_min),
            ("y_max", self.y_max),
            ("dx", self.dx),
            ("dy", self.dy),
        ] {
            if !value.is_finite() {
                return Err(Error::NonFinite(name));
            }
        }

        if self.dx <= 0.0 {
            return Err(Error::InvalidCellSize("dx", self.dx));
        }

        if self.dy <= 0.0 {
            return Err(Error::InvalidCellSize("dy", self.dy));
        }

        if self.x_max <= self.x_min {
            return Err(Error::InvalidRange('x', self.x_min, self.x_max));
        }

        if self.y_max <= self.y_min {
            return Err(Error::InvalidRange('y', self.y_min, self.y_max));
        }

        let nx = ((self.x_max - self.x_min) / self.dx).floor();
        let ny = ((self.y_max - self.y_min) / self.dy).floor();
        if nx < 1.0 || ny < 1.0 || nx > u32::MAX as f64 || ny > u32::MAX as f64 {
            return Err(Error::InvalidGridSize(nx as i64, ny as i64));
        }

        Ok(GridGeometry {
            config: *self,
            nx: nx as usize,
            ny: ny as usize,
        })
    }
}

/// A validated grid configuration.  Instances are never modified, a new
/// request replaces the whole snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridGeometry {
    /// The accepted request.
    #[serde(flatten)]
    pub config: GridConfig,
    /// Number of columns.
    pub nx: usize,
    /// Number of rows.
    pub ny: usize,
}

impl GridGeometry {
    /// Returns an all-zero grid of `ny` rows by `nx` columns.
    pub fn grid(&self) -> Array2<f32> {
        Array2::zeros((self.ny, self.nx))
    }

    /// Maps a real-world position onto grid indices, clamped to the grid.
    /// Positions which do not scale to a number land on the far edge.
    pub fn rescale(&self, x: f64, y: f64) -> (f64, f64) {
        let cfg = &self.config;
        let x_last = (self.nx - 1) as f64;
        let y_last = (self.ny - 1) as f64;

        let grid_x = (x - cfg.x_min) / (cfg.x_max - cfg.x_min) * x_last;
        let grid_y = (y - cfg.y_min) / (cfg.y_max - cfg.y_min) * y_last;

        (clamp_index(grid_x, x_last), clamp_index(grid_y, y_last))
    }

    /// Converts confident tracks into grid coordinates, in track order.
    pub fn map_tracks(&self, tracks: &[Track]) -> Vec<RescaledPoint> {
        tracks
            .iter()
            .filter(|track| track.confidence >= MIN_CONFIDENCE)
            .map(|track| {
                let real_x = track.pos_x as f64;
                let real_y = track.pos_y as f64;
                let (grid_x, grid_y) = self.rescale(real_x, real_y);
                RescaledPoint {
                    target_id: track.id,
                    grid_x,
                    grid_y,
                    real_x,
                    real_y,
                }
            })
            .collect()
    }
}

#[inline]
fn clamp_index(value: f64, last: f64) -> f64 {
    if value.is_nan() {
        last
    } else {
        value.clamp(0.0, last)
    }
}

/// A tracked target projected onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RescaledPoint {
    /// Track identifier from the radar.
    pub target_id: u32,
    /// Fractional column, within `[0, nx - 1]`.
    pub grid_x: f64,
    /// Fractional row, within `[0, ny - 1]`.
    pub grid_y: f64,
    /// Original X position in meters.
    pub real_x: f64,
    /// Original Y position in meters.
    pub real_y: f64,
}

/// Maps tracks with the active geometry, no geometry yields no points.
pub fn map_tracks(geometry: Option<&GridGeometry>, tracks: &[Track]) -> Vec<RescaledPoint> {
    match geometry {
        Some(geometry) => geometry.map_tracks(tracks),
        None => Vec::new(),
    }
}

/// Handle to the active grid geometry shared between the configuration path
/// and the UART worker.
#[derive(Debug, Clone, Default)]
pub struct SharedGrid {
    active: Arc<RwLock<Option<Arc<GridGeometry>>>>,
}

impl SharedGrid {
    /// Creates a handle with no active geometry.
    pub fn new() -> SharedGrid {
        SharedGrid::default()
    }

    /// Validates and activates a new configuration, returning the zeroed grid
    /// for it.  A rejected request leaves the active geometry untouched.
    pub fn configure(&self, config: &GridConfig) -> Result<(GridGeometry, Array2<f32>), Error> {
        let geometry = config.validate()?;
        let grid = geometry.grid();

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(geometry));

        info!(
            "grid X[{}, {}] Y[{}, {}] cells {} x {}",
            config.x_min, config.x_max, config.y_min, config.y_max, geometry.nx, geometry.ny
        );

        Ok((geometry, grid))
    }

    /// Returns the active geometry, if any.
    pub fn snapshot(&self) -> Option<Arc<GridGeometry>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
