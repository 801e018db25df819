// ⚖️ Reconciler - Find, create or merge-update one catalog entity
//
// State machine per call:
//
//   CACHED  ──────────────────────────────▶ RECONCILE
//   QUERY ──▶ 0 matches ──▶ CREATE
//         ──▶ 1 match   ──▶ RECONCILE
//         ──▶ >1        ──▶ FATAL (ConsistencyError)
//
// RECONCILE computes a kind-specific diff and only writes when something
// actually differs, so repeating a call with an unchanged desired entity
// and the previous result as `cached` issues zero writes.

use crate::cache::EntityCache;
use crate::catalog::{CatalogClient, QueryRequest};
use crate::context::RunContext;
use crate::entities::{CatalogEntity, EntityDetails, EntityId, EntityKind, LocalKey};
use crate::error::{Result, SyncError};
use crate::governor::{DryRunGovernor, WriteCounts};
use crate::journal::RunJournal;
use crate::merge::{merge_properties, values_equivalent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Authoritative entity after reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub entity: CatalogEntity,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Outcome counters per entity kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub per_kind: BTreeMap<EntityKind, KindStats>,
}

impl ReconcileStats {
    fn record(&mut self, kind: EntityKind, outcome: Outcome) {
        let stats = self.per_kind.entry(kind).or_default();
        match outcome {
            Outcome::Created => stats.created += 1,
            Outcome::Updated => stats.updated += 1,
            Outcome::Unchanged => stats.unchanged += 1,
        }
    }

    pub fn for_kind(&self, kind: EntityKind) -> KindStats {
        self.per_kind.get(&kind).copied().unwrap_or_default()
    }

    pub fn total(&self) -> KindStats {
        self.per_kind.values().fold(KindStats::default(), |acc, s| KindStats {
            created: acc.created + s.created,
            updated: acc.updated + s.updated,
            unchanged: acc.unchanged + s.unchanged,
        })
    }

    pub fn summary(&self) -> String {
        let total = self.total();
        format!(
            "Reconciled {} entities: {} created, {} updated, {} unchanged",
            total.created + total.updated + total.unchanged,
            total.created,
            total.updated,
            total.unchanged
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler<'a, C: CatalogClient + ?Sized> {
    governor: DryRunGovernor<'a, C>,
    merge_depth: usize,
    location_merge_depth: usize,
    stats: ReconcileStats,
}

impl<'a, C: CatalogClient + ?Sized> Reconciler<'a, C> {
    pub fn new(client: &'a C, ctx: &RunContext) -> Self {
        Reconciler {
            governor: DryRunGovernor::new(client, ctx),
            merge_depth: ctx.config.merge_depth,
            location_merge_depth: ctx.config.location_merge_depth,
            stats: ReconcileStats::default(),
        }
    }

    pub fn with_journal(mut self, journal: &'a RunJournal) -> Self {
        self.governor = self.governor.with_journal(journal);
        self
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    pub fn write_counts(&self) -> &WriteCounts {
        self.governor.counts()
    }

    /// Find-or-create-or-update `desired`.
    ///
    /// `cached` is the entity a previous call returned for the same record;
    /// when given, no query is issued. `filter` must identify at most one
    /// remote entity of `desired`'s kind.
    pub fn reconcile(
        &mut self,
        filter: &str,
        desired: CatalogEntity,
        cached: Option<CatalogEntity>,
    ) -> Result<Reconciled> {
        let existing = match cached {
            Some(entity) => {
                debug!(kind = %desired.kind(), name = %desired.name, "cached, skipping query");
                Some(entity)
            }
            None => self.find_unique(desired.kind(), filter)?,
        };

        let reconciled = match existing {
            Some(entity) => self.update_if_changed(entity, &desired)?,
            None => self.create(desired)?,
        };
        self.stats.record(reconciled.entity.kind(), reconciled.outcome);
        Ok(reconciled)
    }

    /// Cache-aware reconcile: cached entities skip the query, tombstoned
    /// keys skip straight to create. The result is cached under `key`.
    pub fn reconcile_cached(
        &mut self,
        cache: &mut EntityCache,
        key: &LocalKey,
        filter: &str,
        desired: CatalogEntity,
    ) -> Result<Reconciled> {
        if cache.kind() != desired.kind() {
            warn!(cache = %cache.kind(), desired = %desired.kind(), "reconciling against a cache of another kind");
        }

        let reconciled = if let Some(cached) = cache.get(key).cloned() {
            self.reconcile(filter, desired, Some(cached))?
        } else if cache.is_tombstone(key) {
            debug!(kind = %desired.kind(), key = %key, "known absent, creating without query");
            let created = self.create(desired)?;
            self.stats.record(created.entity.kind(), created.outcome);
            created
        } else {
            self.reconcile(filter, desired, None)?
        };

        cache.insert(key.clone(), reconciled.entity.clone());
        Ok(reconciled)
    }

    /// Remote lookup expecting zero or one match
    fn find_unique(&self, kind: EntityKind, filter: &str) -> Result<Option<CatalogEntity>> {
        let request = QueryRequest::new(kind).with_filter(filter).with_page_size(2);
        let page = self.governor.client().query(&request)?;

        match page.entities.len() {
            0 => Ok(None),
            1 => Ok(page.entities.into_iter().next()),
            matches => Err(SyncError::Consistency {
                kind,
                filter: filter.to_string(),
                matches,
            }),
        }
    }

    fn create(&mut self, mut desired: CatalogEntity) -> Result<Reconciled> {
        self.governor.create(&mut desired)?;
        Ok(Reconciled {
            entity: desired,
            outcome: Outcome::Created,
        })
    }

    fn update_if_changed(
        &mut self,
        mut existing: CatalogEntity,
        desired: &CatalogEntity,
    ) -> Result<Reconciled> {
        let depth = match desired.kind() {
            EntityKind::Location => self.location_merge_depth,
            _ => self.merge_depth,
        };

        if !apply_desired(&mut existing, desired, depth) {
            return Ok(Reconciled {
                entity: existing,
                outcome: Outcome::Unchanged,
            });
        }

        self.governor.update(&existing)?;
        Ok(Reconciled {
            entity: existing,
            outcome: Outcome::Updated,
        })
    }
}

// ============================================================================
// DIFF
// ============================================================================

/// Bring `existing` in line with `desired`, returning true if anything changed.
///
/// Shared fields are overwritten on difference, the property bag is merged
/// (never losing keys), kind fields follow the per-kind rules below.
pub fn apply_desired(existing: &mut CatalogEntity, desired: &CatalogEntity, merge_depth: usize) -> bool {
    let mut changed = false;

    if existing.name != desired.name {
        existing.name = desired.name.clone();
        changed = true;
    }
    if existing.description != desired.description {
        existing.description = desired.description.clone();
        changed = true;
    }
    changed |= merge_properties(&mut existing.properties, &desired.properties, merge_depth);
    changed |= apply_details(&mut existing.details, &desired.details);

    changed
}

fn apply_details(existing: &mut EntityDetails, desired: &EntityDetails) -> bool {
    let mut changed = false;

    match (existing, desired) {
        (
            EntityDetails::Asset { location_ids },
            EntityDetails::Asset {
                location_ids: wanted,
            },
        ) => {
            // Attach or replace, never clear
            if !wanted.is_empty() && !same_set(location_ids, wanted) {
                *location_ids = wanted.clone();
                changed = true;
            }
        }
        (
            EntityDetails::Sensor {
                encoding_type,
                metadata,
            },
            EntityDetails::Sensor {
                encoding_type: want_encoding,
                metadata: want_metadata,
            },
        ) => {
            changed |= set_if_different(encoding_type, want_encoding);
            changed |= set_value_if_different(metadata, want_metadata);
        }
        (
            EntityDetails::ObservedProperty { definition },
            EntityDetails::ObservedProperty {
                definition: want_definition,
            },
        ) => {
            changed |= set_if_different(definition, want_definition);
        }
        (
            EntityDetails::FeatureOfInterest {
                encoding_type,
                feature,
            },
            EntityDetails::FeatureOfInterest {
                encoding_type: want_encoding,
                feature: want_feature,
            },
        ) => {
            changed |= set_if_different(encoding_type, want_encoding);
            changed |= set_value_if_different(feature, want_feature);
        }
        (
            EntityDetails::Location {
                encoding_type,
                location,
            },
            EntityDetails::Location {
                encoding_type: want_encoding,
                location: want_location,
            },
        ) => {
            changed |= set_if_different(encoding_type, want_encoding);
            changed |= set_value_if_different(location, want_location);
        }
        (
            EntityDetails::Channel {
                unit,
                observation_type,
                asset_id,
                sensor_id,
                observed_property_id,
            },
            EntityDetails::Channel {
                unit: want_unit,
                observation_type: want_type,
                asset_id: want_asset,
                sensor_id: want_sensor,
                observed_property_id: want_property,
            },
        ) => {
            changed |= set_if_different(unit, want_unit);
            changed |= set_if_different(observation_type, want_type);
            changed |= set_link_if_different(asset_id, want_asset);
            changed |= set_link_if_different(sensor_id, want_sensor);
            changed |= set_link_if_different(observed_property_id, want_property);
        }
        (
            EntityDetails::MultiChannel {
                units,
                observation_types,
                asset_id,
                sensor_id,
                observed_property_ids,
            },
            EntityDetails::MultiChannel {
                units: want_units,
                observation_types: want_types,
                asset_id: want_asset,
                sensor_id: want_sensor,
                observed_property_ids: want_properties,
            },
        ) => {
            changed |= set_if_different(units, want_units);
            changed |= set_if_different(observation_types, want_types);
            changed |= set_link_if_different(asset_id, want_asset);
            changed |= set_link_if_different(sensor_id, want_sensor);
            // Slot order matters for multi channels
            if !want_properties.is_empty() && observed_property_ids != want_properties {
                *observed_property_ids = want_properties.clone();
                changed = true;
            }
        }
        (existing, desired) => {
            warn!(
                existing = %existing.kind(),
                desired = %desired.kind(),
                "kind mismatch while reconciling, kind fields left untouched"
            );
        }
    }

    changed
}

fn set_if_different<T: PartialEq + Clone>(current: &mut T, wanted: &T) -> bool {
    if current != wanted {
        *current = wanted.clone();
        return true;
    }
    false
}

fn set_value_if_different(current: &mut serde_json::Value, wanted: &serde_json::Value) -> bool {
    if !values_equivalent(current, wanted) {
        *current = wanted.clone();
        return true;
    }
    false
}

/// A link is only changed when the desired side names one
fn set_link_if_different(current: &mut Option<EntityId>, wanted: &Option<EntityId>) -> bool {
    match wanted {
        Some(id) if current.as_ref() != Some(id) => {
            *current = Some(id.clone());
            true
        }
        _ => false,
    }
}

fn same_set(a: &[EntityId], b: &[EntityId]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

// ============================================================================
// TESTS
// ============================================================================
