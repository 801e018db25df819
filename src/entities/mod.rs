// Entity Models
//
// Catalog metadata (assets, sensors, observed properties, features of
// interest, locations, channels) and the observations that stream into
// channels.

pub mod catalog;
pub mod observation;

pub use catalog::{
    CatalogEntity, EntityDetails, EntityId, EntityKind, LocalKey, UnitOfMeasurement,
    OBSERVATION_TYPE_MEASUREMENT,
};
pub use observation::{
    DestinationKind, DestinationRef, Observation, ObservationField, ObservationResult, TimeValue,
    ALL_OBSERVATION_FIELDS,
};
