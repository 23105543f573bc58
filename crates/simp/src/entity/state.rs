use bitflags::bitflags;
use glam::Vec4;

use crate::attribute::{AttributeKey, AttributeValue, Color};
use crate::source::CoordinateFrame;
use crate::units::{DistanceUnit, TimeUnit};

bitflags! {
    /// Which parts of an entity changed locally.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u32 {
        const POSITION = 1 << 0;
        const VELOCITY = 1 << 1;
        const COLOR = 1 << 2;
        const OPACITY = 1 << 3;
        const SIZE = 1 << 4;
        const VISIBILITY = 1 << 5;
        const COLORMAP = 1 << 6;
        const SIZE_SCALING = 1 << 7;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionSource {
    Cartesian {
        x: String,
        y: String,
        z: String,
        unit: DistanceUnit,
    },
    Sky {
        frame: CoordinateFrame,
        longitude: String,
        latitude: String,
        distance: Option<(String, DistanceUnit)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VelocitySource {
    pub u: String,
    pub v: String,
    pub w: String,
    pub distance_unit: DistanceUnit,
    pub time_unit: TimeUnit,
    pub nan_mode: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColormapSettings {
    pub enabled: bool,
    pub colormap: String,
    pub attribute: Option<String>,
    pub min: f32,
    pub max: f32,
    pub nan_color: Color,
    pub nan_mode: i32,
    pub samples: usize,
}

impl Default for ColormapSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            colormap: "viridis".to_string(),
            attribute: None,
            min: 0.0,
            max: 1.0,
            nan_color: Vec4::new(0.5, 0.5, 0.5, 1.0),
            nan_mode: 0,
            samples: 256,
        }
    }
}

impl ColormapSettings {
    pub fn is_active(&self) -> bool {
        self.enabled && self.attribute.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeScaling {
    pub enabled: bool,
    pub attribute: Option<String>,
    pub min: f32,
    pub max: f32,
}

impl Default for SizeScaling {
    fn default() -> Self {
        Self {
            enabled: false,
            attribute: None,
            min: 0.0,
            max: 1.0,
        }
    }
}

impl SizeScaling {
    pub fn is_active(&self) -> bool {
        self.enabled && self.attribute.is_some()
    }
}

/// What the engine should show for one entity. Alpha of `color` is the
/// opacity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub color: Color,
    pub size: f32,
    pub visible: bool,
    pub position: Option<PositionSource>,
    pub velocity: Option<VelocitySource>,
    pub colormap: ColormapSettings,
    pub size_scaling: SizeScaling,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            size: 1.0,
            visible: true,
            position: None,
            velocity: None,
            colormap: ColormapSettings::default(),
            size_scaling: SizeScaling::default(),
        }
    }
}

impl EntityState {
    pub fn opacity(&self) -> f32 {
        self.color.w
    }

    /// Applies a value received from the engine. Returns false for keys that
    /// only flow outwards, like data columns and units.
    pub fn apply_remote(&mut self, key: AttributeKey, value: &AttributeValue) -> bool {
        use AttributeKey::*;

        match (key, value) {
            (ColorRed, AttributeValue::Float(v)) => self.color.x = *v,
            (ColorGreen, AttributeValue::Float(v)) => self.color.y = *v,
            (ColorBlue, AttributeValue::Float(v)) => self.color.z = *v,
            (Alpha, AttributeValue::Float(v)) => self.color.w = *v,
            (Size, AttributeValue::Float(v)) => self.size = *v,
            (Visibility, AttributeValue::Bool(v)) => self.visible = *v,

            (ColormapEnabled, AttributeValue::Bool(v)) => self.colormap.enabled = *v,
            (ColormapMin, AttributeValue::Float(v)) => self.colormap.min = *v,
            (ColormapMax, AttributeValue::Float(v)) => self.colormap.max = *v,
            (ColormapNanRed, AttributeValue::Float(v)) => self.colormap.nan_color.x = *v,
            (ColormapNanGreen, AttributeValue::Float(v)) => self.colormap.nan_color.y = *v,
            (ColormapNanBlue, AttributeValue::Float(v)) => self.colormap.nan_color.z = *v,
            (ColormapNanAlpha, AttributeValue::Float(v)) => self.colormap.nan_color.w = *v,
            (ColormapNanMode, AttributeValue::Int(v)) => self.colormap.nan_mode = *v,

            (SizeColormapEnabled, AttributeValue::Bool(v)) => self.size_scaling.enabled = *v,
            (SizeMin, AttributeValue::Float(v)) => self.size_scaling.min = *v,
            (SizeMax, AttributeValue::Float(v)) => self.size_scaling.max = *v,

            (VelocityEnabled, AttributeValue::Bool(v)) => match self.velocity.as_mut() {
                Some(velocity) => velocity.enabled = *v,
                None => return false,
            },
            (VelocityNanMode, AttributeValue::Int(v)) => match self.velocity.as_mut() {
                Some(velocity) => velocity.nan_mode = *v,
                None => return false,
            },

            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_remote_scalars() {
        let mut state = EntityState::default();
        assert!(state.apply_remote(AttributeKey::Alpha, &AttributeValue::Float(0.5)));
        assert!(state.apply_remote(AttributeKey::Visibility, &AttributeValue::Bool(false)));
        assert!(state.apply_remote(AttributeKey::ColormapNanMode, &AttributeValue::Int(2)));
        assert_eq!(state.opacity(), 0.5);
        assert!(!state.visible);
        assert_eq!(state.colormap.nan_mode, 2);
    }

    #[test]
    fn test_apply_remote_ignores_outbound_keys() {
        let mut state = EntityState::default();
        let before = state.clone();
        assert!(!state.apply_remote(
            AttributeKey::PositionX,
            &AttributeValue::FloatArray(vec![1.0])
        ));
        assert!(!state.apply_remote(AttributeKey::PositionUnit, &AttributeValue::from("pc")));
        assert!(!state.apply_remote(AttributeKey::VelocityEnabled, &AttributeValue::Bool(true)));
        assert!(!state.apply_remote(AttributeKey::Size, &AttributeValue::Int(3)));
        assert_eq!(state, before);
    }

    #[test]
    fn test_colormap_needs_attribute() {
        let mut settings = ColormapSettings {
            enabled: true,
            ..Default::default()
        };
        assert!(!settings.is_active());
        settings.attribute = Some("mag".to_string());
        assert!(settings.is_active());
    }
}
