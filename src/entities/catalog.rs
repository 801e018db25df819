// 🗂️ Catalog Entities - The typed metadata hierarchy
//
// Identity lives in two places:
// - EntityId: assigned by the catalog, absent until persisted
// - LocalKey: assigned by the source system, stable across runs
//
// Everything else (name, description, properties, kind fields) is a VALUE
// that reconciliation may change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Catalog-assigned identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source-system identifier of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalKey(pub String);

impl LocalKey {
    pub fn new(key: impl Into<String>) -> Self {
        LocalKey(key.into())
    }

    /// Derive a stable key from ordered parts, for sources without natural ids.
    ///
    /// Parts are length-prefixed so ("ab", "c") and ("a", "bc") differ.
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        LocalKey(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalKey {
    fn from(s: &str) -> Self {
        LocalKey(s.to_string())
    }
}

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Asset,
    Sensor,
    ObservedProperty,
    FeatureOfInterest,
    Location,
    Channel,
    MultiChannel,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Asset,
        EntityKind::Sensor,
        EntityKind::ObservedProperty,
        EntityKind::FeatureOfInterest,
        EntityKind::Location,
        EntityKind::Channel,
        EntityKind::MultiChannel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Asset => "Asset",
            EntityKind::Sensor => "Sensor",
            EntityKind::ObservedProperty => "ObservedProperty",
            EntityKind::FeatureOfInterest => "FeatureOfInterest",
            EntityKind::Location => "Location",
            EntityKind::Channel => "Channel",
            EntityKind::MultiChannel => "MultiChannel",
        }
    }

    /// Can observations be attached to entities of this kind?
    pub fn is_destination(&self) -> bool {
        matches!(self, EntityKind::Channel | EntityKind::MultiChannel)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// KIND-SPECIFIC FIELDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnitOfMeasurement {
    pub name: String,
    pub symbol: String,
    pub definition: String,
}

impl UnitOfMeasurement {
    pub fn new(name: &str, symbol: &str, definition: &str) -> Self {
        UnitOfMeasurement {
            name: name.to_string(),
            symbol: symbol.to_string(),
            definition: definition.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntityDetails {
    Asset {
        location_ids: Vec<EntityId>,
    },
    Sensor {
        encoding_type: String,
        metadata: Value,
    },
    ObservedProperty {
        definition: String,
    },
    FeatureOfInterest {
        encoding_type: String,
        feature: Value,
    },
    Location {
        encoding_type: String,
        location: Value,
    },
    Channel {
        unit: UnitOfMeasurement,
        observation_type: String,
        asset_id: Option<EntityId>,
        sensor_id: Option<EntityId>,
        observed_property_id: Option<EntityId>,
    },
    MultiChannel {
        units: Vec<UnitOfMeasurement>,
        observation_types: Vec<String>,
        asset_id: Option<EntityId>,
        sensor_id: Option<EntityId>,
        observed_property_ids: Vec<EntityId>,
    },
}

impl EntityDetails {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDetails::Asset { .. } => EntityKind::Asset,
            EntityDetails::Sensor { .. } => EntityKind::Sensor,
            EntityDetails::ObservedProperty { .. } => EntityKind::ObservedProperty,
            EntityDetails::FeatureOfInterest { .. } => EntityKind::FeatureOfInterest,
            EntityDetails::Location { .. } => EntityKind::Location,
            EntityDetails::Channel { .. } => EntityKind::Channel,
            EntityDetails::MultiChannel { .. } => EntityKind::MultiChannel,
        }
    }
}

// ============================================================================
// CATALOG ENTITY
// ============================================================================

/// One persisted (or about to be persisted) object of the remote catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntity {
    /// Catalog identity, None until created
    pub id: Option<EntityId>,
    pub name: String,
    pub description: String,

    /// Free-form nested metadata
    #[serde(default)]
    pub properties: Map<String, Value>,

    pub details: EntityDetails,
}

impl CatalogEntity {
    pub fn new(name: &str, description: &str, details: EntityDetails) -> Self {
        CatalogEntity {
            id: None,
            name: name.to_string(),
            description: description.to_string(),
            properties: Map::new(),
            details,
        }
    }

    pub fn asset(name: &str, description: &str) -> Self {
        Self::new(
            name,
            description,
            EntityDetails::Asset {
                location_ids: Vec::new(),
            },
        )
    }

    pub fn sensor(name: &str, description: &str, encoding_type: &str, metadata: Value) -> Self {
        Self::new(
            name,
            description,
            EntityDetails::Sensor {
                encoding_type: encoding_type.to_string(),
                metadata,
            },
        )
    }

    pub fn observed_property(name: &str, description: &str, definition: &str) -> Self {
        Self::new(
            name,
            description,
            EntityDetails::ObservedProperty {
                definition: definition.to_string(),
            },
        )
    }

    pub fn feature_of_interest(name: &str, description: &str, feature: Value) -> Self {
        Self::new(
            name,
            description,
            EntityDetails::FeatureOfInterest {
                encoding_type: "application/geo+json".to_string(),
                feature,
            },
        )
    }

    pub fn location(name: &str, description: &str, location: Value) -> Self {
        Self::new(
            name,
            description,
            EntityDetails::Location {
                encoding_type: "application/geo+json".to_string(),
                location,
            },
        )
    }

    pub fn channel(name: &str, description: &str, unit: UnitOfMeasurement) -> Self {
        Self::new(
            name,
            description,
            EntityDetails::Channel {
                unit,
                observation_type: OBSERVATION_TYPE_MEASUREMENT.to_string(),
                asset_id: None,
                sensor_id: None,
                observed_property_id: None,
            },
        )
    }

    pub fn multi_channel(name: &str, description: &str, units: Vec<UnitOfMeasurement>) -> Self {
        let observation_types = vec![OBSERVATION_TYPE_MEASUREMENT.to_string(); units.len()];
        Self::new(
            name,
            description,
            EntityDetails::MultiChannel {
                units,
                observation_types,
                asset_id: None,
                sensor_id: None,
                observed_property_ids: Vec::new(),
            },
        )
    }

    /// Builder pattern: set catalog id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(EntityId::new(id));
        self
    }

    /// Builder pattern: add one property
    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// Builder pattern: link an Asset to a Location (ignored for other kinds)
    pub fn with_location(mut self, location_id: EntityId) -> Self {
        if let EntityDetails::Asset { location_ids } = &mut self.details {
            if !location_ids.contains(&location_id) {
                location_ids.push(location_id);
            }
        }
        self
    }

    /// Builder pattern: set the observed property of a Channel, or append
    /// the next slot's observed property of a MultiChannel
    pub fn with_observed_property(mut self, property_id: EntityId) -> Self {
        match &mut self.details {
            EntityDetails::Channel {
                observed_property_id,
                ..
            } => *observed_property_id = Some(property_id),
            EntityDetails::MultiChannel {
                observed_property_ids,
                ..
            } => observed_property_ids.push(property_id),
            _ => {}
        }
        self
    }

    /// Builder pattern: set the asset and sensor a channel belongs to
    pub fn with_source(mut self, asset: EntityId, sensor: EntityId) -> Self {
        match &mut self.details {
            EntityDetails::Channel {
                asset_id,
                sensor_id,
                ..
            }
            | EntityDetails::MultiChannel {
                asset_id,
                sensor_id,
                ..
            } => {
                *asset_id = Some(asset);
                *sensor_id = Some(sensor);
            }
            _ => {}
        }
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.details.kind()
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Look up a property by `a/b/c` path
    pub fn property_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/');
        let first = segments.next()?;
        let mut current = self.properties.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

pub const OBSERVATION_TYPE_MEASUREMENT: &str =
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_local_key_derive_is_stable() {
        let k1 = LocalKey::derive(&["station-7", "temperature"]);
        let k2 = LocalKey::derive(&["station-7", "temperature"]);
        assert_eq!(k1, k2);
        assert_eq!(k1.as_str().len(), 64, "SHA-256 hex digest");
    }

    #[test]
    fn test_local_key_derive_respects_part_boundaries() {
        assert_ne!(LocalKey::derive(&["ab", "c"]), LocalKey::derive(&["a", "bc"]));
    }

    #[test]
    fn test_kind_follows_details() {
        assert_eq!(CatalogEntity::asset("a", "b").kind(), EntityKind::Asset);
        assert_eq!(
            CatalogEntity::location("l", "d", json!({"type": "Point"})).kind(),
            EntityKind::Location
        );
        assert!(EntityKind::MultiChannel.is_destination());
        assert!(!EntityKind::Sensor.is_destination());
    }

    #[test]
    fn test_with_location_only_applies_to_assets() {
        let asset = CatalogEntity::asset("a", "b")
            .with_location(EntityId::new("7"))
            .with_location(EntityId::new("7"));
        assert_eq!(
            asset.details,
            EntityDetails::Asset {
                location_ids: vec![EntityId::new("7")]
            }
        );

        let prop = CatalogEntity::observed_property("p", "d", "urn:x")
            .with_location(EntityId::new("7"));
        assert_eq!(prop.kind(), EntityKind::ObservedProperty);
    }

    #[test]
    fn test_property_path() {
        let entity = CatalogEntity::asset("a", "b")
            .with_property("source", json!({"ids": ["x", "y"], "system": "csv"}));

        assert_eq!(entity.property_path("source/system"), Some(&json!("csv")));
        assert_eq!(entity.property_path("source/ids/1"), Some(&json!("y")));
        assert_eq!(entity.property_path("source/missing"), None);
        assert_eq!(entity.property_path("nothing"), None);
    }
}
