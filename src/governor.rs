// 🚦 Dry-Run Governor - Single gate for every catalog write
//
// Reconciler and ObservationBatcher never call create/update/bulk_write on
// the client directly; they go through here. In dry-run mode the write is
// logged and skipped, but counters move exactly as if it had happened, so
// a dry run reports what a real run would do. Reads bypass the governor.

use crate::catalog::{BulkItem, CatalogClient};
use crate::context::RunContext;
use crate::entities::{CatalogEntity, EntityId};
use crate::error::Result;
use crate::journal::{JournalEvent, RunJournal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Token returned for every item of a suppressed bulk write
pub const DRY_RUN_TOKEN: &str = "dry-run";

/// Writes performed (or that would have been performed)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCounts {
    pub created: usize,
    pub updated: usize,
    pub bulk_writes: usize,
    pub observations_submitted: usize,
}

pub struct DryRunGovernor<'a, C: CatalogClient + ?Sized> {
    client: &'a C,
    run_id: Uuid,
    dry_run: bool,
    journal: Option<&'a RunJournal>,
    counts: WriteCounts,
}

impl<'a, C: CatalogClient + ?Sized> DryRunGovernor<'a, C> {
    pub fn new(client: &'a C, ctx: &RunContext) -> Self {
        DryRunGovernor {
            client,
            run_id: ctx.run_id,
            dry_run: ctx.dry_run(),
            journal: None,
            counts: WriteCounts::default(),
        }
    }

    /// Builder pattern: journal every write
    pub fn with_journal(mut self, journal: &'a RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn counts(&self) -> &WriteCounts {
        &self.counts
    }

    /// The wrapped client, for read paths
    pub fn client(&self) -> &'a C {
        self.client
    }

    /// Persist a new entity and store the assigned id on it.
    ///
    /// Dry run: no remote call, the entity gets a synthetic `dry-run:<uuid>` id
    /// so observations can still be routed to it.
    pub fn create(&mut self, entity: &mut CatalogEntity) -> Result<()> {
        let id = if self.dry_run {
            let id = EntityId::new(format!("dry-run:{}", Uuid::new_v4()));
            info!(kind = %entity.kind(), name = %entity.name, "dry run: skipping create");
            id
        } else {
            let id = self.client.create(entity)?;
            debug!(kind = %entity.kind(), name = %entity.name, id = %id, "created");
            id
        };

        entity.id = Some(id.clone());
        self.counts.created += 1;
        self.journal(
            "created",
            entity.kind().as_str(),
            id.as_str(),
            serde_json::to_value(&*entity)?,
        );
        Ok(())
    }

    pub fn update(&mut self, entity: &CatalogEntity) -> Result<()> {
        if self.dry_run {
            info!(kind = %entity.kind(), name = %entity.name, "dry run: skipping update");
        } else {
            self.client.update(entity)?;
            debug!(kind = %entity.kind(), name = %entity.name, "updated");
        }

        self.counts.updated += 1;
        let id = entity.id.as_ref().map(EntityId::as_str).unwrap_or_default();
        self.journal(
            "updated",
            entity.kind().as_str(),
            id,
            serde_json::to_value(entity)?,
        );
        Ok(())
    }

    /// Submit observations; dry run answers every item with a success token
    pub fn bulk_write(&mut self, items: &[BulkItem]) -> Result<Vec<String>> {
        let tokens = if self.dry_run {
            info!(items = items.len(), "dry run: skipping bulk write");
            vec![DRY_RUN_TOKEN.to_string(); items.len()]
        } else {
            self.client.bulk_write(items)?
        };

        self.counts.bulk_writes += 1;
        self.counts.observations_submitted += items.len();
        self.journal(
            "bulk_write",
            "Observation",
            "",
            serde_json::json!({ "items": items.len() }),
        );
        Ok(tokens)
    }

    fn journal(&self, event_type: &str, kind: &str, entity_id: &str, data: serde_json::Value) {
        let Some(journal) = self.journal else {
            return;
        };
        let event = JournalEvent::new(self.run_id, event_type, kind, entity_id, data, self.dry_run);
        if let Err(e) = journal.record(&event) {
            warn!(error = %e, event_type, "failed to journal write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::SyncConfig;
    use crate::entities::{DestinationRef, EntityKind};
    use serde_json::Map;

    fn items(n: usize) -> Vec<BulkItem> {
        (0..n)
            .map(|_| BulkItem {
                destination: DestinationRef::channel("1"),
                fields: Map::new(),
            })
            .collect()
    }

    #[test]
    fn test_live_create_assigns_remote_id() {
        let catalog = MemoryCatalog::new();
        let ctx = RunContext::default();
        let mut governor = DryRunGovernor::new(&catalog, &ctx);

        let mut asset = CatalogEntity::asset("Pump", "main pump");
        governor.create(&mut asset).unwrap();

        assert_eq!(asset.id, Some(EntityId::new("1")));
        assert_eq!(catalog.calls().creates, 1);
        assert_eq!(governor.counts().created, 1);
    }

    #[test]
    fn test_dry_run_suppresses_writes_but_counts() {
        let catalog = MemoryCatalog::new();
        let ctx = RunContext::new(SyncConfig::default().with_dry_run(true));
        let mut governor = DryRunGovernor::new(&catalog, &ctx);

        let mut asset = CatalogEntity::asset("Pump", "main pump");
        governor.create(&mut asset).unwrap();
        governor.update(&asset).unwrap();
        let tokens = governor.bulk_write(&items(3)).unwrap();

        assert!(asset.id.unwrap().as_str().starts_with("dry-run:"));
        assert_eq!(tokens, vec![DRY_RUN_TOKEN; 3]);
        assert_eq!(catalog.calls().writes(), 0);
        assert!(catalog.entities(EntityKind::Asset).is_empty());
        assert_eq!(
            governor.counts(),
            &WriteCounts {
                created: 1,
                updated: 1,
                bulk_writes: 1,
                observations_submitted: 3
            }
        );
    }

    #[test]
    fn test_remote_failure_does_not_count() {
        let catalog = MemoryCatalog::new();
        catalog.fail_next_call("timeout");
        let ctx = RunContext::default();
        let mut governor = DryRunGovernor::new(&catalog, &ctx);

        let mut asset = CatalogEntity::asset("Pump", "main pump");
        assert!(governor.create(&mut asset).is_err());
        assert!(asset.id.is_none());
        assert_eq!(governor.counts().created, 0);
    }

    #[test]
    fn test_writes_are_journaled() {
        let catalog = MemoryCatalog::new();
        let journal = RunJournal::open_in_memory().unwrap();
        let ctx = RunContext::new(SyncConfig::default().with_dry_run(true));
        let mut governor = DryRunGovernor::new(&catalog, &ctx).with_journal(&journal);

        let mut sensor = CatalogEntity::sensor("s", "d", "application/pdf", serde_json::json!("x"));
        governor.create(&mut sensor).unwrap();
        governor.bulk_write(&items(2)).unwrap();

        let events = journal.events_for_run(ctx.run_id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "created");
        assert_eq!(events[0].entity_kind, "Sensor");
        assert!(events[0].dry_run);
        assert_eq!(events[1].data["items"], 2);
    }
}
