// 📈 Observations - Timestamped data points bound for a channel
//
// An Observation only knows WHERE it goes (DestinationRef) and WHAT it
// carries. Which of its optional fields actually reach the catalog is
// decided by the batch it lands in (see batcher.rs).

use crate::entities::catalog::{CatalogEntity, EntityId, EntityKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// DESTINATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    Channel,
    MultiChannel,
}

/// Resolved reference to the channel an observation belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationRef {
    pub kind: DestinationKind,
    pub id: EntityId,
}

impl DestinationRef {
    pub fn channel(id: impl Into<String>) -> Self {
        DestinationRef {
            kind: DestinationKind::Channel,
            id: EntityId::new(id),
        }
    }

    pub fn multi_channel(id: impl Into<String>) -> Self {
        DestinationRef {
            kind: DestinationKind::MultiChannel,
            id: EntityId::new(id),
        }
    }

    /// Destination for a persisted Channel / MultiChannel, None otherwise
    pub fn from_entity(entity: &CatalogEntity) -> Option<Self> {
        let kind = match entity.kind() {
            EntityKind::Channel => DestinationKind::Channel,
            EntityKind::MultiChannel => DestinationKind::MultiChannel,
            _ => return None,
        };
        let id = entity.id.clone()?;
        Some(DestinationRef { kind, id })
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DestinationKind::Channel => write!(f, "Channel({})", self.id),
            DestinationKind::MultiChannel => write!(f, "MultiChannel({})", self.id),
        }
    }
}

// ============================================================================
// TIME VALUES
// ============================================================================

/// Instant or closed interval, serialized as ISO 8601 (`start/end` for intervals)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeValue {
    Instant(DateTime<Utc>),
    Interval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl TimeValue {
    pub fn to_iso(&self) -> String {
        match self {
            TimeValue::Instant(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            TimeValue::Interval { start, end } => format!(
                "{}/{}",
                start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                end.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            ),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.to_iso())
    }
}

// ============================================================================
// RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ObservationResult {
    /// Single value, for Channels
    Scalar(Value),
    /// Fixed-size tuple, for MultiChannels
    Tuple(Vec<Value>),
}

impl ObservationResult {
    pub fn to_value(&self) -> Value {
        match self {
            ObservationResult::Scalar(v) => v.clone(),
            ObservationResult::Tuple(values) => Value::Array(values.clone()),
        }
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub destination: Option<DestinationRef>,
    pub phenomenon_time: Option<TimeValue>,
    pub result: ObservationResult,
    pub result_time: Option<TimeValue>,
    pub valid_time: Option<TimeValue>,
    pub result_quality: Option<Value>,
    pub parameters: Option<Map<String, Value>>,
}

impl Observation {
    pub fn new(phenomenon_time: TimeValue, result: ObservationResult) -> Self {
        Observation {
            destination: None,
            phenomenon_time: Some(phenomenon_time),
            result,
            result_time: None,
            valid_time: None,
            result_quality: None,
            parameters: None,
        }
    }

    /// Shorthand for a scalar observation at an instant
    pub fn scalar(at: DateTime<Utc>, value: Value) -> Self {
        Self::new(TimeValue::Instant(at), ObservationResult::Scalar(value))
    }

    pub fn for_destination(mut self, destination: DestinationRef) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_result_time(mut self, t: TimeValue) -> Self {
        self.result_time = Some(t);
        self
    }

    pub fn with_valid_time(mut self, t: TimeValue) -> Self {
        self.valid_time = Some(t);
        self
    }

    pub fn with_result_quality(mut self, quality: Value) -> Self {
        self.result_quality = Some(quality);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }
}

// ============================================================================
// OBSERVATION FIELDS
// ============================================================================

/// Fields an observation may contribute to a bulk write.
/// Ordering is the column order of submitted items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObservationField {
    PhenomenonTime,
    Result,
    ResultTime,
    ValidTime,
    ResultQuality,
    Parameters,
}

impl ObservationField {
    pub fn wire_name(&self) -> &'static str {
        match self {
            ObservationField::PhenomenonTime => "phenomenonTime",
            ObservationField::Result => "result",
            ObservationField::ResultTime => "resultTime",
            ObservationField::ValidTime => "validTime",
            ObservationField::ResultQuality => "resultQuality",
            ObservationField::Parameters => "parameters",
        }
    }

    /// Is this field present on the observation?
    pub fn is_present(&self, obs: &Observation) -> bool {
        match self {
            ObservationField::PhenomenonTime => obs.phenomenon_time.is_some(),
            ObservationField::Result => true,
            ObservationField::ResultTime => obs.result_time.is_some(),
            ObservationField::ValidTime => obs.valid_time.is_some(),
            ObservationField::ResultQuality => obs.result_quality.is_some(),
            ObservationField::Parameters => obs.parameters.is_some(),
        }
    }

    /// Value of this field on the observation (Null when absent)
    pub fn extract(&self, obs: &Observation) -> Value {
        match self {
            ObservationField::PhenomenonTime => {
                obs.phenomenon_time.as_ref().map_or(Value::Null, TimeValue::to_value)
            }
            ObservationField::Result => obs.result.to_value(),
            ObservationField::ResultTime => {
                obs.result_time.as_ref().map_or(Value::Null, TimeValue::to_value)
            }
            ObservationField::ValidTime => {
                obs.valid_time.as_ref().map_or(Value::Null, TimeValue::to_value)
            }
            ObservationField::ResultQuality => obs.result_quality.clone().unwrap_or(Value::Null),
            ObservationField::Parameters => obs
                .parameters
                .clone()
                .map_or(Value::Null, Value::Object),
        }
    }
}

pub const ALL_OBSERVATION_FIELDS: [ObservationField; 6] = [
    ObservationField::PhenomenonTime,
    ObservationField::Result,
    ObservationField::ResultTime,
    ObservationField::ValidTime,
    ObservationField::ResultQuality,
    ObservationField::Parameters,
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_value_iso() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();

        assert_eq!(TimeValue::Instant(start).to_iso(), "2024-03-01T12:00:00Z");
        assert_eq!(
            TimeValue::Interval { start, end }.to_iso(),
            "2024-03-01T12:00:00Z/2024-03-01T13:00:00Z"
        );
    }

    #[test]
    fn test_destination_from_entity() {
        let unit = crate::entities::UnitOfMeasurement::new("degree Celsius", "°C", "ucum:Cel");
        let unsaved = CatalogEntity::channel("t", "temperature", unit);
        assert!(DestinationRef::from_entity(&unsaved).is_none());

        let saved = unsaved.with_id("42");
        assert_eq!(
            DestinationRef::from_entity(&saved),
            Some(DestinationRef::channel("42"))
        );

        let asset = CatalogEntity::asset("a", "b").with_id("1");
        assert!(DestinationRef::from_entity(&asset).is_none());
    }

    #[test]
    fn test_field_extraction() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let obs = Observation::scalar(at, serde_json::json!(21.5))
            .with_parameter("sensorState", serde_json::json!("ok"));

        assert!(ObservationField::Result.is_present(&obs));
        assert!(ObservationField::Parameters.is_present(&obs));
        assert!(!ObservationField::ResultTime.is_present(&obs));
        assert_eq!(ObservationField::ResultTime.extract(&obs), Value::Null);
        assert_eq!(
            ObservationField::PhenomenonTime.extract(&obs),
            serde_json::json!("2024-03-01T12:00:00Z")
        );
    }
}
