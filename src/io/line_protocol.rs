//! InfluxDB line protocol encoding for measurement batches.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! Tags and fields are written sorted by key, and tags with an empty key or
//! value are left out. Every line of a batch carries the batch timestamp.

use crate::domain::measurement::{FieldGroup, MeasurementBatch};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Encode one field group as a single line (no trailing newline)
pub fn encode_group(
    group: &FieldGroup,
    tags: &BTreeMap<String, String>,
    timestamp_ns: i64,
) -> String {
    let mut line = escape_measurement(group.measurement());

    // An empty tag key or value makes the whole line unparseable
    for (key, value) in tags.iter().filter(|(k, v)| !k.is_empty() && !v.is_empty()) {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    for (i, (key, value)) in group.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        // Writing to a String cannot fail
        let _ = write!(line, "{}", value);
    }

    line.push(' ');
    line.push_str(&timestamp_ns.to_string());
    line
}

/// One line per field group, in batch order
pub fn encode_lines(batch: &MeasurementBatch) -> Vec<String> {
    batch.groups.iter().map(|g| encode_group(g, &batch.tags, batch.timestamp_ns)).collect()
}

/// Newline-terminated payload holding the whole batch
pub fn encode_batch(batch: &MeasurementBatch) -> String {
    let mut payload = String::new();
    for line in encode_lines(batch) {
        payload.push_str(&line);
        payload.push('\n');
    }
    payload
}

/// Measurement names escape commas and spaces
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys escape commas, equals signs and spaces
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}
