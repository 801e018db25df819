// Catalog Sync - Core Library
// Reconciliation and batched-write core for syncing source records into a
// remote sensor catalog. Format parsers, fetchers and schedulers call in here.

pub mod error;
pub mod config;
pub mod logging;
pub mod context;
pub mod journal;        // SQLite audit trail of writes
pub mod entities;       // Catalog entity + observation models
pub mod merge;          // Type-aware property merge
pub mod catalog;        // CatalogClient seam + in-memory catalog
pub mod cache;          // Run-scoped entity cache
pub mod governor;       // Dry-run write gate
pub mod reconciler;     // Find / create / update state machine
pub mod batcher;        // Observation batching + bulk flush
pub mod deleter;        // Parallel bulk delete
pub mod record;         // Source record field lookup

// Re-export commonly used types
pub use error::{Result, SyncError};
pub use config::SyncConfig;
pub use logging::{init_logging, init_logging_from_config};
pub use context::RunContext;
pub use journal::{JournalEvent, RunJournal};
pub use entities::{
    CatalogEntity, EntityDetails, EntityId, EntityKind, LocalKey, UnitOfMeasurement,
    DestinationKind, DestinationRef, Observation, ObservationField, ObservationResult, TimeValue,
};
pub use merge::{merge_properties, values_equivalent, DEFAULT_MERGE_DEPTH, LOCATION_MERGE_DEPTH};
pub use catalog::{
    BulkItem, CatalogClient, MemoryCatalog, Page, QueryRequest,
    for_each_page, query_all, is_error_token,
};
pub use cache::{EntityCache, KeyExtractor};
pub use governor::{DryRunGovernor, WriteCounts, DRY_RUN_TOKEN};
pub use reconciler::{Outcome, Reconciled, Reconciler, ReconcileStats, KindStats};
pub use batcher::{FlushReport, ObservationBatcher};
pub use deleter::{BulkDeleter, DeleteReport};
pub use record::{FieldSource, SourceRecord, fill_template, derive_key, read_csv, read_csv_file};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const READINGS: &str = "\
station,sensor,minute,value
KA-01,T-100,0,21.5
KA-01,T-100,1,21.7
KA-02,T-100,0,19.0
";

    /// CSV rows through reconcile, batching and the journal, run twice
    #[test]
    fn test_full_sync_run_is_idempotent() {
        let catalog = MemoryCatalog::new();
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::default();
        config.journal_path = Some(dir.path().join("journal.db"));

        for run in 0..2 {
            let ctx = RunContext::new(config.clone());
            let journal = ctx.open_journal().unwrap().unwrap();

            let mut assets =
                EntityCache::from_context(EntityKind::Asset, KeyExtractor::property("localKey"), &ctx);
            assets.load(&catalog, None, &[], &[]).unwrap();
            let mut channels =
                EntityCache::from_context(EntityKind::Channel, KeyExtractor::property("localKey"), &ctx);
            channels.load(&catalog, None, &[], &[]).unwrap();

            let mut reconciler = Reconciler::new(&catalog, &ctx).with_journal(&journal);
            let mut batcher = ObservationBatcher::new(&catalog, &ctx).with_journal(&journal);

            for record in read_csv(READINGS.as_bytes(), true).unwrap() {
                let station = fill_template("{station}", &record).unwrap();
                let asset_key = LocalKey::new(station.as_str());
                let asset = reconciler
                    .reconcile_cached(
                        &mut assets,
                        &asset_key,
                        &format!("properties/localKey eq '{station}'"),
                        CatalogEntity::asset(&station, "weather station")
                            .with_property("localKey", json!(station)),
                    )
                    .unwrap();

                let channel_key = derive_key(&record, &["station", "sensor"]).unwrap();
                let name = fill_template("{station} {sensor}", &record).unwrap();
                let channel = reconciler
                    .reconcile_cached(
                        &mut channels,
                        &channel_key,
                        &format!("properties/localKey eq '{channel_key}'"),
                        CatalogEntity::channel(
                            &name,
                            "air temperature",
                            UnitOfMeasurement::new("degree Celsius", "°C", "ucum:Cel"),
                        )
                        .with_property("localKey", json!(channel_key.as_str()))
                        .with_property("asset", json!(asset.entity.id.as_ref().map(EntityId::as_str))),
                    )
                    .unwrap();

                let minute: i64 = fill_template("{minute}", &record).unwrap().parse().unwrap();
                let value: f64 = fill_template("{value}", &record).unwrap().parse().unwrap();
                let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::minutes(minute);
                let destination = DestinationRef::from_entity(&channel.entity).unwrap();
                batcher
                    .add_observation(Observation::scalar(at, json!(value)).for_destination(destination))
                    .unwrap();
            }

            let report = batcher.flush().unwrap();
            assert_eq!(report.inserted, 3);

            let totals = reconciler.stats().total();
            if run == 0 {
                assert_eq!(totals.created, 4, "two stations, two channels");
            } else {
                assert_eq!(totals.created, 0);
                assert_eq!(totals.updated, 0);
            }

            journal
                .finish_run(ctx.run_id, &serde_json::to_value(reconciler.stats()).unwrap())
                .unwrap();
            assert!(journal.run_summary(ctx.run_id).unwrap().is_some());
        }

        assert_eq!(catalog.entities(EntityKind::Asset).len(), 2);
        assert_eq!(catalog.entities(EntityKind::Channel).len(), 2);
        assert_eq!(catalog.calls().bulk_writes, 2);
    }
}
