//! Plain implementations of the source traits, used by the mock engine and
//! by tests.

use std::collections::HashMap;

use crate::attribute::Color;
use crate::units::DistanceUnit;

use super::{
    AttributeNotFound, AttributeStore, CartesianColumns, ColormapSampler, CoordinateFrame,
    CoordinateTransform, TransformError,
};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    columns: HashMap<(String, String), Vec<f64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_id: &str, attribute: &str, values: Vec<f64>) {
        self.columns
            .insert((entity_id.to_string(), attribute.to_string()), values);
    }
}

impl AttributeStore for InMemoryStore {
    fn get_column(&self, entity_id: &str, attribute: &str) -> Result<Vec<f64>, AttributeNotFound> {
        self.columns
            .get(&(entity_id.to_string(), attribute.to_string()))
            .cloned()
            .ok_or_else(|| AttributeNotFound {
                entity_id: entity_id.to_string(),
                attribute: attribute.to_string(),
            })
    }
}

/// Spherical to cartesian in the axes of the source frame itself. No rotation
/// between frames is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisTransform;

impl CoordinateTransform for AxisTransform {
    fn to_cartesian_pc(
        &self,
        lon: &[f64],
        lat: &[f64],
        distance: Option<&[f64]>,
        frame: CoordinateFrame,
        unit: DistanceUnit,
    ) -> Result<CartesianColumns, TransformError> {
        let distance_len = distance.map_or(lon.len(), <[f64]>::len);
        if lon.len() != lat.len() || lon.len() != distance_len {
            return Err(TransformError::LengthMismatch {
                lon: lon.len(),
                lat: lat.len(),
                distance: distance_len,
            });
        }
        log::trace!("projecting {} points in {} frame", lon.len(), frame);

        let scale = unit.parsecs();
        let mut out = CartesianColumns {
            x: Vec::with_capacity(lon.len()),
            y: Vec::with_capacity(lon.len()),
            z: Vec::with_capacity(lon.len()),
        };
        for i in 0..lon.len() {
            let r = distance.map_or(1.0, |d| d[i] * scale);
            let (sin_lon, cos_lon) = lon[i].to_radians().sin_cos();
            let (sin_lat, cos_lat) = lat[i].to_radians().sin_cos();
            out.x.push(r * cos_lat * cos_lon);
            out.y.push(r * cos_lat * sin_lon);
            out.z.push(r * sin_lat);
        }
        Ok(out)
    }
}

/// Linear ramp between two colors. The name passed to `sample` is ignored.
#[derive(Debug, Clone, Copy)]
pub struct LinearColormap {
    start: Color,
    end: Color,
}

impl LinearColormap {
    pub fn new(start: Color, end: Color) -> Self {
        Self { start, end }
    }
}

impl ColormapSampler for LinearColormap {
    fn sample(&self, _colormap: &str, n: usize) -> Vec<Color> {
        match n {
            0 => Vec::new(),
            1 => vec![self.start],
            _ => (0..n)
                .map(|i| self.start.lerp(self.end, i as f32 / (n - 1) as f32))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    #[test]
    fn test_store_missing_column() {
        let mut store = InMemoryStore::new();
        store.insert("e1", "mag", vec![1.0]);
        assert_eq!(store.get_column("e1", "mag").unwrap(), vec![1.0]);
        assert_eq!(
            store.get_column("e2", "mag"),
            Err(AttributeNotFound {
                entity_id: "e2".to_string(),
                attribute: "mag".to_string()
            })
        );
    }

    #[test]
    fn test_unit_sphere_without_distance() {
        let out = AxisTransform
            .to_cartesian_pc(&[0.0], &[90.0], None, CoordinateFrame::Galactic, DistanceUnit::Parsec)
            .unwrap();
        assert!(out.x[0].abs() < 1e-12);
        assert!((out.z[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_transform_length_mismatch() {
        let err = AxisTransform
            .to_cartesian_pc(
                &[0.0, 1.0],
                &[0.0, 1.0],
                Some(&[1.0]),
                CoordinateFrame::Icrs,
                DistanceUnit::Parsec,
            )
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::LengthMismatch {
                lon: 2,
                lat: 2,
                distance: 1
            }
        );
    }

    #[test]
    fn test_linear_colormap_endpoints() {
        let sampler = LinearColormap::new(Vec4::ZERO, Vec4::ONE);
        let colors = sampler.sample("any", 5);
        assert_eq!(colors.len(), 5);
        assert_eq!(colors[0], Vec4::ZERO);
        assert_eq!(colors[4], Vec4::ONE);
        assert_eq!(colors[2], Vec4::splat(0.5));
        assert!(sampler.sample("any", 0).is_empty());
    }
}
