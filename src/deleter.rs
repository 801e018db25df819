// 🧹 Bulk Deleter - Remove many catalog entities with bounded parallelism
//
// Deletes run on a dedicated rayon pool of `parallelism` threads; the
// calling thread blocks until the pool has drained the list. One failed
// delete never stops the others; failures are logged and counted.

use crate::catalog::{query_all, CatalogClient, QueryRequest};
use crate::context::RunContext;
use crate::entities::{CatalogEntity, EntityKind};
use crate::error::{Result, SyncError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct BulkDeleter<'a, C: CatalogClient + Sync + ?Sized> {
    client: &'a C,
    parallelism: usize,
}

impl<'a, C: CatalogClient + Sync + ?Sized> BulkDeleter<'a, C> {
    /// Sequential deleter
    pub fn new(client: &'a C) -> Self {
        BulkDeleter {
            client,
            parallelism: 1,
        }
    }

    /// Deleter using the run's configured `delete_parallelism`
    pub fn from_context(client: &'a C, ctx: &RunContext) -> Self {
        BulkDeleter {
            client,
            parallelism: ctx.config.delete_parallelism,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Delete every entity with the configured parallelism
    pub fn delete_all(&self, entities: &[CatalogEntity]) -> Result<DeleteReport> {
        self.delete(entities, self.parallelism)
    }

    /// Delete every entity. `parallelism` <= 1 runs on the calling thread.
    ///
    /// Only a failure to start the worker pool is an error; individual
    /// delete failures are counted in the report.
    pub fn delete(&self, entities: &[CatalogEntity], parallelism: usize) -> Result<DeleteReport> {
        let outcomes: Vec<bool> = if parallelism <= 1 || entities.len() <= 1 {
            entities.iter().map(|e| self.delete_one(e)).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(parallelism.min(entities.len()))
                .build()
                .map_err(|e| SyncError::WorkerPool(e.to_string()))?;

            pool.install(|| entities.par_iter().map(|e| self.delete_one(e)).collect())
        };
        let failed = outcomes.iter().filter(|deleted| !**deleted).count();

        let report = DeleteReport {
            requested: entities.len(),
            deleted: entities.len() - failed,
            failed,
        };
        info!(
            requested = report.requested,
            deleted = report.deleted,
            failed = report.failed,
            parallelism,
            "bulk delete finished"
        );
        Ok(report)
    }

    /// Page through every `kind` entity matching `filter` and delete them all
    pub fn delete_matching(
        &self,
        kind: EntityKind,
        filter: Option<&str>,
        parallelism: usize,
    ) -> Result<DeleteReport> {
        let mut request = QueryRequest::new(kind);
        if let Some(filter) = filter {
            request = request.with_filter(filter);
        }
        let entities = query_all(self.client, &request)?;
        self.delete(&entities, parallelism)
    }

    fn delete_one(&self, entity: &CatalogEntity) -> bool {
        match self.client.delete(entity) {
            Ok(()) => true,
            Err(e) => {
                let id = entity.id.as_ref().map(|id| id.as_str()).unwrap_or("<unsaved>");
                warn!(kind = %entity.kind(), id, error = %e, "delete failed");
                false
            }
        }
    }
}
