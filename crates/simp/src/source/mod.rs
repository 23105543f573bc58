//! Collaborators the sync layer reads from but does not own.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attribute::Color;
use crate::units::DistanceUnit;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attribute {attribute:?} not found on entity {entity_id:?}")]
pub struct AttributeNotFound {
    pub entity_id: String,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("column lengths differ: {lon} longitudes, {lat} latitudes, {distance} distances")]
    LengthMismatch {
        lon: usize,
        lat: usize,
        distance: usize,
    },
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoordinateFrame {
    #[default]
    Icrs,
    Fk5,
    Fk4,
    Galactic,
}

impl fmt::Display for CoordinateFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinateFrame::Icrs => "icrs",
            CoordinateFrame::Fk5 => "fk5",
            CoordinateFrame::Fk4 => "fk4",
            CoordinateFrame::Galactic => "galactic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartesianColumns {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl CartesianColumns {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

pub trait AttributeStore: Send + Sync {
    fn get_column(&self, entity_id: &str, attribute: &str) -> Result<Vec<f64>, AttributeNotFound>;
}

/// Converts sky coordinates in degrees to cartesian parsecs. Points without a
/// distance land on the unit sphere.
pub trait CoordinateTransform: Send + Sync {
    fn to_cartesian_pc(
        &self,
        lon: &[f64],
        lat: &[f64],
        distance: Option<&[f64]>,
        frame: CoordinateFrame,
        unit: DistanceUnit,
    ) -> Result<CartesianColumns, TransformError>;
}

pub trait ColormapSampler: Send + Sync {
    fn sample(&self, colormap: &str, n: usize) -> Vec<Color>;
}

#[derive(Clone)]
pub struct DataSources {
    pub store: Arc<dyn AttributeStore>,
    pub transform: Arc<dyn CoordinateTransform>,
    pub sampler: Arc<dyn ColormapSampler>,
}

impl DataSources {
    pub fn new(
        store: Arc<dyn AttributeStore>,
        transform: Arc<dyn CoordinateTransform>,
        sampler: Arc<dyn ColormapSampler>,
    ) -> Self {
        Self {
            store,
            transform,
            sampler,
        }
    }
}

impl fmt::Debug for DataSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSources").finish_non_exhaustive()
    }
}
