// 🧾 Source Records - Uniform field lookup over heterogeneous inputs
//
// Records arrive as key/value maps, CSV rows or nested JSON documents.
// Downstream code (templates, key derivation) only asks for a field by
// name and never cares which shape it came from.

use crate::entities::LocalKey;
use crate::error::{Result, SyncError};
use anyhow::Context;
use csv::{ReaderBuilder, StringRecord};
use serde_json::{Map, Value};
use std::io;
use std::path::Path;
use std::sync::Arc;

pub trait FieldSource {
    /// Field value by name, None if the record has no such field
    fn get_field(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    Map(Map<String, Value>),
    /// CSV row; looked up by header name, or by column index without headers
    Row {
        headers: Option<Arc<StringRecord>>,
        values: StringRecord,
    },
    /// Nested document; names are `a/b/0` paths
    Structured(Value),
}

impl FieldSource for SourceRecord {
    fn get_field(&self, name: &str) -> Option<Value> {
        match self {
            SourceRecord::Map(map) => map.get(name).cloned(),
            SourceRecord::Row { headers, values } => {
                let column = match headers {
                    Some(headers) => headers.iter().position(|h| h == name),
                    None => name.parse::<usize>().ok(),
                }?;
                values.get(column).map(|v| Value::String(v.to_string()))
            }
            SourceRecord::Structured(doc) => {
                let mut current = doc;
                for segment in name.split('/') {
                    current = match current {
                        Value::Object(map) => map.get(segment)?,
                        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(current.clone())
            }
        }
    }
}

// ============================================================================
// CSV INPUT
// ============================================================================

/// Read every row of a CSV stream; headers are shared by all rows
pub fn read_csv<R: io::Read>(reader: R, has_headers: bool) -> Result<Vec<SourceRecord>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = if has_headers {
        Some(Arc::new(rdr.headers()?.clone()))
    } else {
        None
    };

    let mut records = Vec::new();
    for row in rdr.records() {
        records.push(SourceRecord::Row {
            headers: headers.clone(),
            values: row?,
        });
    }
    Ok(records)
}

pub fn read_csv_file(path: &Path, has_headers: bool) -> anyhow::Result<Vec<SourceRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    read_csv(file, has_headers).with_context(|| format!("Failed to parse CSV: {}", path.display()))
}

// ============================================================================
// TEMPLATES & KEYS
// ============================================================================

/// Replace every `{field}` in `template` with that field of `record`.
///
/// A `{` without a closing `}` is kept literally.
pub fn fill_template(template: &str, record: &impl FieldSource) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };

        let name = &after[..close];
        let value = record
            .get_field(name)
            .ok_or_else(|| SyncError::MissingField(name.to_string()))?;
        out.push_str(&value_text(&value));
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// LocalKey for records without a natural identifier: hash of the named fields
pub fn derive_key(record: &impl FieldSource, fields: &[&str]) -> Result<LocalKey> {
    let parts = fields
        .iter()
        .map(|name| {
            record
                .get_field(name)
                .map(|v| value_text(&v))
                .ok_or_else(|| SyncError::MissingField(name.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    Ok(LocalKey::derive(&parts))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STATIONS: &str = "\
station,sensor,value
Karlsruhe, T-100 ,21.5
Mannheim,H-7,
";

    #[test]
    fn test_csv_rows_by_header() {
        let records = read_csv(STATIONS.as_bytes(), true).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_field("station"), Some(json!("Karlsruhe")));
        assert_eq!(records[0].get_field("sensor"), Some(json!("T-100")));
        assert_eq!(records[1].get_field("value"), Some(json!("")));
        assert_eq!(records[0].get_field("missing"), None);
    }

    #[test]
    fn test_csv_rows_by_index_without_headers() {
        let records = read_csv("a,b\nc,d\n".as_bytes(), false).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get_field("1"), Some(json!("d")));
        assert_eq!(records[1].get_field("2"), None);
        assert_eq!(records[1].get_field("b"), None);
    }

    #[test]
    fn test_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.csv");
        std::fs::write(&path, STATIONS).unwrap();

        let records = read_csv_file(&path, true).unwrap();
        assert_eq!(records.len(), 2);

        let err = read_csv_file(&dir.path().join("nope.csv"), true).unwrap_err();
        assert!(err.to_string().starts_with("Failed to open file:"));
    }

    #[test]
    fn test_structured_paths() {
        let record = SourceRecord::Structured(json!({
            "station": {"name": "Karlsruhe", "sensors": [{"id": "T-100"}, {"id": "H-7"}]}
        }));

        assert_eq!(record.get_field("station/name"), Some(json!("Karlsruhe")));
        assert_eq!(record.get_field("station/sensors/1/id"), Some(json!("H-7")));
        assert_eq!(record.get_field("station/sensors/9/id"), None);
        assert_eq!(record.get_field("station/name/x"), None);
    }

    #[test]
    fn test_fill_template() {
        let mut map = Map::new();
        map.insert("station".to_string(), json!("Karlsruhe"));
        map.insert("height".to_string(), json!(115));
        let record = SourceRecord::Map(map);

        assert_eq!(
            fill_template("{station} ({height} m)", &record).unwrap(),
            "Karlsruhe (115 m)"
        );
        assert_eq!(fill_template("no placeholders", &record).unwrap(), "no placeholders");
        assert_eq!(fill_template("open {brace", &record).unwrap(), "open {brace");
        assert!(matches!(
            fill_template("{station}-{sensor}", &record),
            Err(SyncError::MissingField(f)) if f == "sensor"
        ));
    }

    #[test]
    fn test_derive_key_is_stable_across_shapes() {
        let rows = read_csv(STATIONS.as_bytes(), true).unwrap();
        let doc = SourceRecord::Structured(json!({"station": "Karlsruhe", "sensor": "T-100"}));

        let from_row = derive_key(&rows[0], &["station", "sensor"]).unwrap();
        let from_doc = derive_key(&doc, &["station", "sensor"]).unwrap();
        assert_eq!(from_row, from_doc);
        assert_ne!(from_row, derive_key(&rows[1], &["station", "sensor"]).unwrap());
        assert!(derive_key(&doc, &["station", "value"]).is_err());
    }
}
