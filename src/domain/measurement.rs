//! Measurement batches - one cycle's readings under a single timestamp

use crate::domain::types::{EulerAngles, OrientationLayout, Vector3};
use std::collections::BTreeMap;

/// Placeholder value for readings that have not landed yet
pub const SENTINEL: f64 = -10000.0;

/// Measurement name shared by both acceleration groups
pub const MEASUREMENT_ACCELERATION: &str = "acceleration";
/// Measurement name for orientation groups
pub const MEASUREMENT_ORIENTATION: &str = "orientation";

/// Current time as nanoseconds since the Unix epoch
pub fn epoch_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// The three vector reads taken in one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub linear_acceleration: Vector3,
    pub gravity: Vector3,
    pub euler: EulerAngles,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            linear_acceleration: Vector3::splat(SENTINEL),
            gravity: Vector3::splat(SENTINEL),
            euler: EulerAngles::splat(SENTINEL),
        }
    }
}

/// Identity of a field group within the fixed schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroupKind {
    LinearAcceleration,
    Gravity,
    Yaw,
    Pitch,
    Roll,
    Orientation,
}

impl FieldGroupKind {
    pub fn measurement(&self) -> &'static str {
        match self {
            FieldGroupKind::LinearAcceleration | FieldGroupKind::Gravity => {
                MEASUREMENT_ACCELERATION
            }
            FieldGroupKind::Yaw
            | FieldGroupKind::Pitch
            | FieldGroupKind::Roll
            | FieldGroupKind::Orientation => MEASUREMENT_ORIENTATION,
        }
    }
}

/// Group order for a layout. Broker topics map onto this positionally.
pub fn schema(layout: OrientationLayout) -> &'static [FieldGroupKind] {
    match layout {
        OrientationLayout::Split => &[
            FieldGroupKind::LinearAcceleration,
            FieldGroupKind::Gravity,
            FieldGroupKind::Yaw,
            FieldGroupKind::Pitch,
            FieldGroupKind::Roll,
        ],
        OrientationLayout::Combined => &[
            FieldGroupKind::LinearAcceleration,
            FieldGroupKind::Gravity,
            FieldGroupKind::Orientation,
        ],
    }
}

/// Number of field groups a batch carries for a layout
pub fn field_group_count(layout: OrientationLayout) -> usize {
    schema(layout).len()
}

/// A named set of related readings
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    pub kind: FieldGroupKind,
    pub fields: BTreeMap<&'static str, f64>,
}

impl FieldGroup {
    fn new(kind: FieldGroupKind, fields: &[(&'static str, f64)]) -> Self {
        Self { kind, fields: fields.iter().copied().collect() }
    }

    pub fn measurement(&self) -> &'static str {
        self.kind.measurement()
    }

    fn from_snapshot(kind: FieldGroupKind, s: &SensorSnapshot) -> Self {
        let lin = &s.linear_acceleration;
        let grav = &s.gravity;
        let euler = &s.euler;
        match kind {
            FieldGroupKind::LinearAcceleration => {
                Self::new(kind, &[("liX", lin.x), ("liY", lin.y), ("liZ", lin.z)])
            }
            FieldGroupKind::Gravity => {
                Self::new(kind, &[("gX", grav.x), ("gY", grav.y), ("gZ", grav.z)])
            }
            FieldGroupKind::Yaw => Self::new(kind, &[("yaw", euler.yaw)]),
            FieldGroupKind::Pitch => Self::new(kind, &[("pitch", euler.pitch)]),
            FieldGroupKind::Roll => Self::new(kind, &[("roll", euler.roll)]),
            FieldGroupKind::Orientation => Self::new(
                kind,
                &[("yaw", euler.yaw), ("pitch", euler.pitch), ("roll", euler.roll)],
            ),
        }
    }
}

/// One cycle's readings. Every group is written with `timestamp_ns`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementBatch {
    pub timestamp_ns: i64,
    pub tags: BTreeMap<String, String>,
    pub groups: Vec<FieldGroup>,
}

impl MeasurementBatch {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Default batch tags
pub fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([("source".to_string(), "imu".to_string())])
}

/// Assemble a batch from one snapshot.
///
/// Values are copied as-is, including NaN and infinities.
pub fn build_batch(
    snapshot: &SensorSnapshot,
    layout: OrientationLayout,
    tags: &BTreeMap<String, String>,
    timestamp_ns: i64,
) -> MeasurementBatch {
    let groups =
        schema(layout).iter().map(|kind| FieldGroup::from_snapshot(*kind, snapshot)).collect();

    MeasurementBatch { timestamp_ns, tags: tags.clone(), groups }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot {
            linear_acceleration: Vector3::new(0.1, 0.2, 0.3),
            gravity: Vector3::new(0.0, 0.5, 9.8),
            euler: EulerAngles { yaw: 359.9, pitch: -2.5, roll: 1.25 },
        }
    }

    #[test]
    fn test_split_layout_order() {
        let batch = build_batch(&snapshot(), OrientationLayout::Split, &default_tags(), 42);
        let kinds: Vec<_> = batch.groups.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FieldGroupKind::LinearAcceleration,
                FieldGroupKind::Gravity,
                FieldGroupKind::Yaw,
                FieldGroupKind::Pitch,
                FieldGroupKind::Roll,
            ]
        );
        assert_eq!(batch.len(), field_group_count(OrientationLayout::Split));
        assert_eq!(batch.groups[0].fields["liZ"], 0.3);
        assert_eq!(batch.groups[1].fields["gZ"], 9.8);
        assert_eq!(batch.groups[3].fields["pitch"], -2.5);
        assert_eq!(batch.groups[4].fields["roll"], 1.25);
    }

    #[test]
    fn test_combined_layout() {
        let batch = build_batch(&snapshot(), OrientationLayout::Combined, &default_tags(), 42);
        assert_eq!(batch.len(), 3);
        let orientation = &batch.groups[2];
        assert_eq!(orientation.measurement(), MEASUREMENT_ORIENTATION);
        assert_eq!(orientation.fields.len(), 3);
        assert_eq!(orientation.fields["yaw"], 359.9);
    }

    #[test]
    fn test_tags_and_timestamp_carried() {
        let mut tags = default_tags();
        tags.insert("device".to_string(), "node1".to_string());
        let batch = build_batch(&snapshot(), OrientationLayout::Split, &tags, 1_700_000_000_123);
        assert_eq!(batch.timestamp_ns, 1_700_000_000_123);
        assert_eq!(batch.tags.get("source").map(String::as_str), Some("imu"));
        assert_eq!(batch.tags.get("device").map(String::as_str), Some("node1"));
    }

    #[test]
    fn test_non_finite_values_pass_through() {
        let mut s = snapshot();
        s.gravity.x = f64::NAN;
        s.euler.roll = f64::INFINITY;
        let batch = build_batch(&s, OrientationLayout::Split, &default_tags(), 1);
        assert!(batch.groups[1].fields["gX"].is_nan());
        assert_eq!(batch.groups[4].fields["roll"], f64::INFINITY);
    }

    #[test]
    fn test_default_snapshot_is_sentinel() {
        let batch =
            build_batch(&SensorSnapshot::default(), OrientationLayout::Split, &default_tags(), 1);
        for group in &batch.groups {
            assert!(group.fields.values().all(|v| *v == SENTINEL));
        }
    }

    #[test]
    fn test_epoch_ns_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(epoch_ns() > 1_577_836_800_000_000_000);
    }
}
