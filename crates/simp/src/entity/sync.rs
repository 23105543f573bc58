use crate::attribute::{AttributeKey, AttributeValue, Color};
use crate::source::{AttributeNotFound, DataSources, TransformError};
use crate::units::{DistanceUnit, UnitError};

use super::state::{EntityState, PositionSource, PropertyFlags};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("unknown entity {0:?}")]
    UnknownEntity(String),
    #[error(transparent)]
    AttributeNotFound(#[from] AttributeNotFound),
    #[error("coordinate transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error(transparent)]
    InvalidUnit(#[from] UnitError),
    #[error("column {attribute:?} has {found} values, expected {expected}")]
    ColumnLengthMismatch {
        attribute: String,
        expected: usize,
        found: usize,
    },
}

type Updates = Vec<(AttributeKey, AttributeValue)>;

fn to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&v| v as f32).collect()
}

fn channel(colors: &[Color], f: impl Fn(&Color) -> f32) -> AttributeValue {
    AttributeValue::FloatArray(colors.iter().map(f).collect())
}

fn column(sources: &DataSources, entity_id: &str, attribute: &str) -> Result<Vec<f64>, SyncError> {
    Ok(sources.store.get_column(entity_id, attribute)?)
}

fn check_len(attribute: &str, expected: usize, found: usize) -> Result<(), SyncError> {
    if expected != found {
        return Err(SyncError::ColumnLengthMismatch {
            attribute: attribute.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Builds the keyed values for the parts of `state` named by `flags`.
/// Everything is fetched before anything is returned, so a failing column
/// yields no partial update.
pub fn collect_updates(
    entity_id: &str,
    state: &EntityState,
    flags: PropertyFlags,
    sources: &DataSources,
) -> Result<Updates, SyncError> {
    let mut updates = Updates::new();

    if flags.contains(PropertyFlags::POSITION) {
        push_position(&mut updates, entity_id, state, sources)?;
    }
    if flags.contains(PropertyFlags::VELOCITY) {
        push_velocity(&mut updates, entity_id, state, sources)?;
    }
    if flags.contains(PropertyFlags::COLOR) {
        updates.push((AttributeKey::ColorRed, state.color.x.into()));
        updates.push((AttributeKey::ColorGreen, state.color.y.into()));
        updates.push((AttributeKey::ColorBlue, state.color.z.into()));
    }
    if flags.contains(PropertyFlags::OPACITY) {
        updates.push((AttributeKey::Alpha, state.color.w.into()));
    }
    if flags.contains(PropertyFlags::SIZE) {
        updates.push((AttributeKey::Size, state.size.into()));
    }
    if flags.contains(PropertyFlags::VISIBILITY) {
        updates.push((AttributeKey::Visibility, state.visible.into()));
    }
    if flags.contains(PropertyFlags::COLORMAP) {
        push_colormap(&mut updates, entity_id, state, sources)?;
    }
    if flags.contains(PropertyFlags::SIZE_SCALING) {
        push_size_scaling(&mut updates, entity_id, state, sources)?;
    }

    Ok(updates)
}

fn push_position(
    updates: &mut Updates,
    entity_id: &str,
    state: &EntityState,
    sources: &DataSources,
) -> Result<(), SyncError> {
    let Some(position) = &state.position else {
        return Ok(());
    };

    let (x, y, z, unit) = match position {
        PositionSource::Cartesian { x, y, z, unit } => {
            let xs = column(sources, entity_id, x)?;
            let ys = column(sources, entity_id, y)?;
            let zs = column(sources, entity_id, z)?;
            check_len(y, xs.len(), ys.len())?;
            check_len(z, xs.len(), zs.len())?;
            (xs, ys, zs, *unit)
        }
        PositionSource::Sky {
            frame,
            longitude,
            latitude,
            distance,
        } => {
            let lon = column(sources, entity_id, longitude)?;
            let lat = column(sources, entity_id, latitude)?;
            check_len(latitude, lon.len(), lat.len())?;
            let (distance, unit) = match distance {
                Some((attribute, unit)) => {
                    let values = column(sources, entity_id, attribute)?;
                    check_len(attribute, lon.len(), values.len())?;
                    (Some(values), *unit)
                }
                None => (None, DistanceUnit::Parsec),
            };
            let cartesian =
                sources
                    .transform
                    .to_cartesian_pc(&lon, &lat, distance.as_deref(), *frame, unit)?;
            (cartesian.x, cartesian.y, cartesian.z, DistanceUnit::Parsec)
        }
    };

    updates.push((AttributeKey::PositionX, to_f32(&x).into()));
    updates.push((AttributeKey::PositionY, to_f32(&y).into()));
    updates.push((AttributeKey::PositionZ, to_f32(&z).into()));
    updates.push((AttributeKey::PositionUnit, unit.as_str().into()));
    Ok(())
}

fn push_velocity(
    updates: &mut Updates,
    entity_id: &str,
    state: &EntityState,
    sources: &DataSources,
) -> Result<(), SyncError> {
    let velocity = match &state.velocity {
        Some(velocity) if velocity.enabled => velocity,
        _ => {
            updates.push((AttributeKey::VelocityEnabled, false.into()));
            return Ok(());
        }
    };

    let u = column(sources, entity_id, &velocity.u)?;
    let v = column(sources, entity_id, &velocity.v)?;
    let w = column(sources, entity_id, &velocity.w)?;
    check_len(&velocity.v, u.len(), v.len())?;
    check_len(&velocity.w, u.len(), w.len())?;

    updates.push((AttributeKey::VelocityX, to_f32(&u).into()));
    updates.push((AttributeKey::VelocityY, to_f32(&v).into()));
    updates.push((AttributeKey::VelocityZ, to_f32(&w).into()));
    updates.push((
        AttributeKey::VelocityDistanceUnit,
        velocity.distance_unit.as_str().into(),
    ));
    updates.push((AttributeKey::VelocityTimeUnit, velocity.time_unit.as_str().into()));
    updates.push((AttributeKey::VelocityNanMode, velocity.nan_mode.into()));
    updates.push((AttributeKey::VelocityEnabled, true.into()));
    Ok(())
}

fn push_colormap(
    updates: &mut Updates,
    entity_id: &str,
    state: &EntityState,
    sources: &DataSources,
) -> Result<(), SyncError> {
    let settings = &state.colormap;
    let attribute = match &settings.attribute {
        Some(attribute) if settings.enabled => attribute,
        _ => {
            updates.push((AttributeKey::ColormapEnabled, false.into()));
            return Ok(());
        }
    };

    let data = column(sources, entity_id, attribute)?;
    let colors = sources.sampler.sample(&settings.colormap, settings.samples);

    updates.push((AttributeKey::ColormapEnabled, true.into()));
    updates.push((AttributeKey::ColormapRed, channel(&colors, |c| c.x)));
    updates.push((AttributeKey::ColormapGreen, channel(&colors, |c| c.y)));
    updates.push((AttributeKey::ColormapBlue, channel(&colors, |c| c.z)));
    updates.push((AttributeKey::ColormapAlpha, channel(&colors, |c| c.w)));
    updates.push((AttributeKey::ColormapMin, settings.min.into()));
    updates.push((AttributeKey::ColormapMax, settings.max.into()));
    updates.push((AttributeKey::ColormapAttributeData, to_f32(&data).into()));
    updates.push((AttributeKey::ColormapNanRed, settings.nan_color.x.into()));
    updates.push((AttributeKey::ColormapNanGreen, settings.nan_color.y.into()));
    updates.push((AttributeKey::ColormapNanBlue, settings.nan_color.z.into()));
    updates.push((AttributeKey::ColormapNanAlpha, settings.nan_color.w.into()));
    updates.push((AttributeKey::ColormapNanMode, settings.nan_mode.into()));
    Ok(())
}

fn push_size_scaling(
    updates: &mut Updates,
    entity_id: &str,
    state: &EntityState,
    sources: &DataSources,
) -> Result<(), SyncError> {
    let scaling = &state.size_scaling;
    let attribute = match &scaling.attribute {
        Some(attribute) if scaling.enabled => attribute,
        _ => {
            updates.push((AttributeKey::SizeColormapEnabled, false.into()));
            return Ok(());
        }
    };

    let data = column(sources, entity_id, attribute)?;
    updates.push((AttributeKey::SizeColormapEnabled, true.into()));
    updates.push((AttributeKey::SizeAttributeData, to_f32(&data).into()));
    updates.push((AttributeKey::SizeMin, scaling.min.into()));
    updates.push((AttributeKey::SizeMax, scaling.max.into()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec4;

    use super::*;
    use crate::entity::state::{ColormapSettings, SizeScaling, VelocitySource};
    use crate::source::memory::{AxisTransform, InMemoryStore, LinearColormap};
    use crate::source::CoordinateFrame;
    use crate::units::TimeUnit;

    fn sources(store: InMemoryStore) -> DataSources {
        DataSources::new(
            Arc::new(store),
            Arc::new(AxisTransform),
            Arc::new(LinearColormap::new(Vec4::ZERO, Vec4::ONE)),
        )
    }

    fn keys(updates: &Updates) -> Vec<AttributeKey> {
        updates.iter().map(|(key, _)| *key).collect()
    }

    fn value(updates: &Updates, key: AttributeKey) -> &AttributeValue {
        &updates.iter().find(|(k, _)| *k == key).unwrap().1
    }

    #[test]
    fn test_opacity_only() {
        let state = EntityState {
            color: Vec4::new(1.0, 0.0, 0.0, 0.5),
            ..Default::default()
        };
        let updates =
            collect_updates("e1", &state, PropertyFlags::OPACITY, &sources(InMemoryStore::new()))
                .unwrap();
        assert_eq!(updates, vec![(AttributeKey::Alpha, AttributeValue::Float(0.5))]);
    }

    #[test]
    fn test_cartesian_position_is_sent_raw() {
        let mut store = InMemoryStore::new();
        store.insert("e1", "x", vec![1.0, 2.0]);
        store.insert("e1", "y", vec![3.0, 4.0]);
        store.insert("e1", "z", vec![5.0, 6.0]);
        let state = EntityState {
            position: Some(PositionSource::Cartesian {
                x: "x".into(),
                y: "y".into(),
                z: "z".into(),
                unit: DistanceUnit::Kiloparsec,
            }),
            ..Default::default()
        };

        let data = sources(store);
        let updates = collect_updates("e1", &state, PropertyFlags::POSITION, &data).unwrap();
        assert_eq!(
            keys(&updates),
            vec![
                AttributeKey::PositionX,
                AttributeKey::PositionY,
                AttributeKey::PositionZ,
                AttributeKey::PositionUnit
            ]
        );
        assert_eq!(
            value(&updates, AttributeKey::PositionZ),
            &AttributeValue::FloatArray(vec![5.0, 6.0])
        );
        assert_eq!(value(&updates, AttributeKey::PositionUnit), &AttributeValue::from("kpc"));
    }

    #[test]
    fn test_sky_position_is_converted_to_parsecs() {
        let mut store = InMemoryStore::new();
        store.insert("e1", "ra", vec![0.0, 90.0]);
        store.insert("e1", "dec", vec![0.0, 0.0]);
        store.insert("e1", "dist", vec![2.0, 1.0]);
        let state = EntityState {
            position: Some(PositionSource::Sky {
                frame: CoordinateFrame::Icrs,
                longitude: "ra".into(),
                latitude: "dec".into(),
                distance: Some(("dist".into(), DistanceUnit::Kiloparsec)),
            }),
            ..Default::default()
        };

        let data = sources(store);
        let updates = collect_updates("e1", &state, PropertyFlags::POSITION, &data).unwrap();
        let x = value(&updates, AttributeKey::PositionX).as_f32_slice().unwrap();
        let y = value(&updates, AttributeKey::PositionY).as_f32_slice().unwrap();
        assert!((x[0] - 2000.0).abs() < 1e-2);
        assert!((y[1] - 1000.0).abs() < 1e-2);
        assert_eq!(value(&updates, AttributeKey::PositionUnit), &AttributeValue::from("pc"));
    }

    #[test]
    fn test_missing_column_fails_whole_update() {
        let mut store = InMemoryStore::new();
        store.insert("e1", "x", vec![1.0]);
        let state = EntityState {
            position: Some(PositionSource::Cartesian {
                x: "x".into(),
                y: "missing".into(),
                z: "x".into(),
                unit: DistanceUnit::Parsec,
            }),
            ..Default::default()
        };

        let err = collect_updates("e1", &state, PropertyFlags::all(), &sources(store)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::AttributeNotFound(AttributeNotFound { ref attribute, .. })
                if attribute == "missing"
        ));
    }

    #[test]
    fn test_mismatched_columns() {
        let mut store = InMemoryStore::new();
        store.insert("e1", "u", vec![1.0, 2.0]);
        store.insert("e1", "v", vec![1.0]);
        let state = EntityState {
            velocity: Some(VelocitySource {
                u: "u".into(),
                v: "v".into(),
                w: "u".into(),
                distance_unit: DistanceUnit::Kilometer,
                time_unit: TimeUnit::Second,
                nan_mode: 0,
                enabled: true,
            }),
            ..Default::default()
        };

        let data = sources(store);
        let err = collect_updates("e1", &state, PropertyFlags::VELOCITY, &data).unwrap_err();
        assert_eq!(
            err,
            SyncError::ColumnLengthMismatch {
                attribute: "v".to_string(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_disabled_groups_send_only_their_switch() {
        let state = EntityState {
            colormap: ColormapSettings {
                enabled: true,
                attribute: None,
                ..Default::default()
            },
            size_scaling: SizeScaling::default(),
            ..Default::default()
        };
        let flags = PropertyFlags::VELOCITY | PropertyFlags::COLORMAP | PropertyFlags::SIZE_SCALING;
        let updates = collect_updates("e1", &state, flags, &sources(InMemoryStore::new())).unwrap();
        assert_eq!(
            updates,
            vec![
                (AttributeKey::VelocityEnabled, AttributeValue::Bool(false)),
                (AttributeKey::ColormapEnabled, AttributeValue::Bool(false)),
                (AttributeKey::SizeColormapEnabled, AttributeValue::Bool(false)),
            ]
        );
    }

    #[test]
    fn test_active_colormap_samples_the_sampler() {
        let mut store = InMemoryStore::new();
        store.insert("e1", "mag", vec![1.0, f64::NAN, 3.0]);
        let state = EntityState {
            colormap: ColormapSettings {
                enabled: true,
                attribute: Some("mag".into()),
                samples: 3,
                ..Default::default()
            },
            ..Default::default()
        };

        let data = sources(store);
        let updates = collect_updates("e1", &state, PropertyFlags::COLORMAP, &data).unwrap();
        assert_eq!(value(&updates, AttributeKey::ColormapEnabled), &AttributeValue::Bool(true));
        assert_eq!(
            value(&updates, AttributeKey::ColormapRed),
            &AttributeValue::FloatArray(vec![0.0, 0.5, 1.0])
        );
        let data = value(&updates, AttributeKey::ColormapAttributeData)
            .as_f32_slice()
            .unwrap();
        assert_eq!(data.len(), 3);
        assert!(data[1].is_nan());
    }
}
