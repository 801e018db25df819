// 🧪 Memory Catalog - In-process CatalogClient
//
// Used by the test suites and for offline runs. Counts every remote call
// so callers can assert on write traffic, and lets tests script failures.
//
// Filters understand a minimal form:
//   name eq 'Pump 7' and properties/source/id eq 'A-17'
// Paths: id, name, description, properties/<a>/<b>...
// Literals: quoted strings ('' escapes a quote) or JSON scalars.

use crate::catalog::{BulkItem, CatalogClient, Page, QueryRequest};
use crate::entities::{CatalogEntity, EntityId, EntityKind};
use crate::merge::values_equivalent;
use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Number of remote calls received, by operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub queries: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub bulk_writes: usize,
}

impl CallLog {
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes + self.bulk_writes
    }
}

#[derive(Default)]
struct MemoryState {
    entities: BTreeMap<EntityKind, Vec<CatalogEntity>>,
    next_id: u64,
    calls: CallLog,
    updated: Vec<CatalogEntity>,
    bulk_requests: Vec<Vec<BulkItem>>,
    scripted_bulk: VecDeque<Vec<String>>,
    failing_deletes: HashSet<EntityId>,
    fail_next: Option<String>,
}

pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
    delete_delay: Option<Duration>,
    deletes_in_flight: AtomicUsize,
    peak_deletes_in_flight: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        MemoryCatalog {
            state: Mutex::new(MemoryState::default()),
            delete_delay: None,
            deletes_in_flight: AtomicUsize::new(0),
            peak_deletes_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every delete take `delay`, to observe worker parallelism
    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // TEST CONTROLS
    // ========================================================================

    /// Store an entity directly (no call is counted). Keeps an existing id.
    pub fn seed(&self, mut entity: CatalogEntity) -> EntityId {
        let mut state = self.state();
        let id = match entity.id.clone() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                EntityId::new(state.next_id.to_string())
            }
        };
        entity.id = Some(id.clone());
        state.entities.entry(entity.kind()).or_default().push(entity);
        id
    }

    /// Next bulk write answers with exactly these tokens
    pub fn script_bulk_response(&self, tokens: Vec<String>) {
        self.state().scripted_bulk.push_back(tokens);
    }

    /// Deleting this entity will fail
    pub fn fail_delete(&self, id: EntityId) {
        self.state().failing_deletes.insert(id);
    }

    /// The next remote call of any kind fails with `message`
    pub fn fail_next_call(&self, message: &str) {
        self.state().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> CallLog {
        self.state().calls.clone()
    }

    pub fn reset_calls(&self) {
        let mut state = self.state();
        state.calls = CallLog::default();
        state.updated.clear();
        state.bulk_requests.clear();
    }

    /// Every entity sent through update(), in call order
    pub fn updated_entities(&self) -> Vec<CatalogEntity> {
        self.state().updated.clone()
    }

    /// Every bulk write request, in call order
    pub fn bulk_requests(&self) -> Vec<Vec<BulkItem>> {
        self.state().bulk_requests.clone()
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<CatalogEntity> {
        self.state().entities.get(&kind).cloned().unwrap_or_default()
    }

    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<CatalogEntity> {
        self.state()
            .entities
            .get(&kind)?
            .iter()
            .find(|e| e.id.as_ref() == Some(id))
            .cloned()
    }

    pub fn peak_parallel_deletes(&self) -> usize {
        self.peak_deletes_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn take_failure(state: &mut MemoryState) -> Result<()> {
    match state.fail_next.take() {
        Some(message) => Err(anyhow!(message)),
        None => Ok(()),
    }
}

impl CatalogClient for MemoryCatalog {
    fn query(&self, request: &QueryRequest) -> Result<Page> {
        let mut state = self.state();
        state.calls.queries += 1;
        take_failure(&mut state)?;

        let clauses = match &request.filter {
            Some(filter) => parse_filter(filter)?,
            None => Vec::new(),
        };

        let matching: Vec<&CatalogEntity> = state
            .entities
            .get(&request.kind)
            .map(|all| {
                all.iter()
                    .filter(|e| clauses.iter().all(|c| c.matches(e)))
                    .collect()
            })
            .unwrap_or_default();

        let end = (request.skip + request.page_size).min(matching.len());
        let entities = matching
            .get(request.skip..end)
            .map(|page| page.iter().map(|e| (*e).clone()).collect())
            .unwrap_or_default();
        let next_skip = (end < matching.len()).then_some(end);

        Ok(Page {
            entities,
            next_skip,
        })
    }

    fn create(&self, entity: &CatalogEntity) -> Result<EntityId> {
        let mut state = self.state();
        state.calls.creates += 1;
        take_failure(&mut state)?;

        state.next_id += 1;
        let id = EntityId::new(state.next_id.to_string());
        let mut stored = entity.clone();
        stored.id = Some(id.clone());
        state.entities.entry(entity.kind()).or_default().push(stored);
        Ok(id)
    }

    fn update(&self, entity: &CatalogEntity) -> Result<()> {
        let mut state = self.state();
        state.calls.updates += 1;
        take_failure(&mut state)?;

        let id = entity
            .id
            .clone()
            .ok_or_else(|| anyhow!("cannot update {} without id", entity.kind()))?;
        let slot = state
            .entities
            .get_mut(&entity.kind())
            .and_then(|all| all.iter_mut().find(|e| e.id.as_ref() == Some(&id)))
            .ok_or_else(|| anyhow!("{} {} not found", entity.kind(), id))?;
        *slot = entity.clone();
        state.updated.push(entity.clone());
        Ok(())
    }

    fn delete(&self, entity: &CatalogEntity) -> Result<()> {
        {
            let mut state = self.state();
            state.calls.deletes += 1;
            take_failure(&mut state)?;
        }

        let in_flight = self.deletes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_deletes_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.delete_delay {
            std::thread::sleep(delay);
        }
        self.deletes_in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state();
        let id = entity
            .id
            .clone()
            .ok_or_else(|| anyhow!("cannot delete {} without id", entity.kind()))?;
        if state.failing_deletes.contains(&id) {
            bail!("delete of {} {} rejected", entity.kind(), id);
        }
        if let Some(all) = state.entities.get_mut(&entity.kind()) {
            all.retain(|e| e.id.as_ref() != Some(&id));
        }
        Ok(())
    }

    fn bulk_write(&self, items: &[BulkItem]) -> Result<Vec<String>> {
        let mut state = self.state();
        state.calls.bulk_writes += 1;
        take_failure(&mut state)?;

        state.bulk_requests.push(items.to_vec());
        if let Some(tokens) = state.scripted_bulk.pop_front() {
            return Ok(tokens);
        }

        let base = state.next_id;
        state.next_id += items.len() as u64;
        Ok((1..=items.len() as u64)
            .map(|n| format!("Observations({})", base + n))
            .collect())
    }
}

// ============================================================================
// FILTERS
// ============================================================================

struct Clause {
    path: String,
    literal: Value,
}

impl Clause {
    fn matches(&self, entity: &CatalogEntity) -> bool {
        let actual = match self.path.as_str() {
            "id" => entity.id.as_ref().map(|id| Value::String(id.0.clone())),
            "name" => Some(Value::String(entity.name.clone())),
            "description" => Some(Value::String(entity.description.clone())),
            path => path
                .strip_prefix("properties/")
                .and_then(|p| entity.property_path(p))
                .cloned(),
        };
        actual.is_some_and(|v| values_equivalent(&v, &self.literal))
    }
}

fn parse_filter(filter: &str) -> Result<Vec<Clause>> {
    filter
        .split(" and ")
        .map(|clause| {
            let (path, literal) = clause
                .split_once(" eq ")
                .ok_or_else(|| anyhow!("unsupported filter clause: {clause}"))?;
            Ok(Clause {
                path: path.trim().to_string(),
                literal: parse_literal(literal.trim())?,
            })
        })
        .collect()
}

fn parse_literal(text: &str) -> Result<Value> {
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Ok(Value::String(inner.replace("''", "'")));
    }
    serde_json::from_str(text).map_err(|e| anyhow!("bad filter literal {text}: {e}"))
}
