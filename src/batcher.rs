// 📦 Observation Batcher - Group observations per destination, submit in bulk
//
// Observations accumulate in per-destination batches, kept in the order
// destinations were first seen. flush() submits everything in ONE bulk
// write and then clears all batches, whatever the outcome.
//
// Each batch fixes its field set from its first observation; later
// observations are serialized against that set (absent fields go out as
// null, extra fields are dropped).

use crate::catalog::{is_error_token, BulkItem, CatalogClient};
use crate::context::RunContext;
use crate::entities::{
    DestinationKind, DestinationRef, Observation, ObservationField, ObservationResult,
    ALL_OBSERVATION_FIELDS,
};
use crate::error::{Result, SyncError};
use crate::governor::{DryRunGovernor, WriteCounts};
use crate::journal::RunJournal;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Outcome of one flush (or the running total of many)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub submitted: usize,
    pub inserted: usize,
    pub failed: usize,
    /// First per-item error token, as a sample
    pub first_error: Option<String>,
}

impl FlushReport {
    fn absorb(&mut self, other: &FlushReport) {
        self.submitted += other.submitted;
        self.inserted += other.inserted;
        self.failed += other.failed;
        if self.first_error.is_none() {
            self.first_error = other.first_error.clone();
        }
    }
}

#[derive(Debug)]
struct Batch {
    destination: DestinationRef,
    fields: BTreeSet<ObservationField>,
    observations: Vec<Observation>,
}

impl Batch {
    fn new(destination: DestinationRef, first: &Observation) -> Self {
        let fields = ALL_OBSERVATION_FIELDS
            .iter()
            .copied()
            .filter(|f| f.is_present(first))
            .collect();

        Batch {
            destination,
            fields,
            observations: Vec::new(),
        }
    }

    fn to_items(&self) -> impl Iterator<Item = BulkItem> + '_ {
        self.observations.iter().map(|obs| {
            let mut fields = Map::new();
            for field in &self.fields {
                fields.insert(field.wire_name().to_string(), field.extract(obs));
            }
            BulkItem {
                destination: self.destination.clone(),
                fields,
            }
        })
    }
}

pub struct ObservationBatcher<'a, C: CatalogClient + ?Sized> {
    governor: DryRunGovernor<'a, C>,
    flush_threshold: usize,
    batches: Vec<Batch>,
    index: HashMap<DestinationRef, usize>,
    last: Option<usize>,
    pending: usize,
    totals: FlushReport,
}

impl<'a, C: CatalogClient + ?Sized> ObservationBatcher<'a, C> {
    pub fn new(client: &'a C, ctx: &RunContext) -> Self {
        ObservationBatcher {
            governor: DryRunGovernor::new(client, ctx),
            flush_threshold: ctx.config.flush_threshold,
            batches: Vec::new(),
            index: HashMap::new(),
            last: None,
            pending: 0,
            totals: FlushReport::default(),
        }
    }

    pub fn with_journal(mut self, journal: &'a RunJournal) -> Self {
        self.governor = self.governor.with_journal(journal);
        self
    }

    /// Observations waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Sum of every flush so far
    pub fn totals(&self) -> &FlushReport {
        &self.totals
    }

    pub fn write_counts(&self) -> &WriteCounts {
        self.governor.counts()
    }

    pub fn add_observation(&mut self, obs: Observation) -> Result<()> {
        let destination = obs.destination.clone().ok_or(SyncError::MissingDestination)?;

        if destination.kind == DestinationKind::Channel {
            if let ObservationResult::Tuple(values) = &obs.result {
                return Err(SyncError::InvalidObservation(format!(
                    "{}-value tuple result for single-valued {}",
                    values.len(),
                    destination
                )));
            }
        }

        let slot = match self.last {
            Some(i) if self.batches[i].destination == destination => i,
            _ => match self.index.get(&destination) {
                Some(&i) => i,
                None => {
                    debug!(destination = %destination, "new batch");
                    self.batches.push(Batch::new(destination.clone(), &obs));
                    let i = self.batches.len() - 1;
                    self.index.insert(destination, i);
                    i
                }
            },
        };

        self.batches[slot].observations.push(obs);
        self.last = Some(slot);
        self.pending += 1;
        Ok(())
    }

    /// Flush once the pending count reaches the configured threshold (0 disables)
    pub fn flush_if_full(&mut self) -> Result<Option<FlushReport>> {
        if self.flush_threshold == 0 || self.pending < self.flush_threshold {
            return Ok(None);
        }
        self.flush().map(Some)
    }

    /// Submit every pending observation in one bulk write.
    ///
    /// Per-item failures are counted in the report, not returned as errors.
    /// A failing transport call is returned, and the batches are gone either way.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let batches = std::mem::take(&mut self.batches);
        self.index.clear();
        self.last = None;
        self.pending = 0;

        let items: Vec<BulkItem> = batches.iter().flat_map(Batch::to_items).collect();
        if items.is_empty() {
            return Ok(FlushReport::default());
        }

        let tokens = self.governor.bulk_write(&items)?;

        let mut report = FlushReport {
            submitted: items.len(),
            ..FlushReport::default()
        };
        for token in tokens.iter().filter(|t| is_error_token(t)) {
            report.failed += 1;
            if report.first_error.is_none() {
                report.first_error = Some(token.clone());
            }
        }
        // Items without an answer are not known to be stored
        if tokens.len() < items.len() {
            let missing = items.len() - tokens.len();
            warn!(
                missing,
                submitted = items.len(),
                "bulk write answered fewer items than submitted"
            );
            report.failed += missing;
            if report.first_error.is_none() {
                report.first_error = Some(format!("{missing} items without a response token"));
            }
        } else if tokens.len() > items.len() {
            warn!(
                tokens = tokens.len(),
                submitted = items.len(),
                "bulk write answered more items than submitted"
            );
        }
        report.failed = report.failed.min(report.submitted);
        report.inserted = report.submitted - report.failed;

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                submitted = report.submitted,
                first_error = report.first_error.as_deref().unwrap_or_default(),
                "bulk write had failing items"
            );
        }
        info!(
            destinations = batches.len(),
            submitted = report.submitted,
            inserted = report.inserted,
            "flushed observations"
        );

        self.totals.absorb(&report);
        Ok(report)
    }
}
