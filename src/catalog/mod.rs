// 🌐 Catalog Client - The seam to the remote catalog service
//
// Everything the core needs from the remote side fits in five calls.
// Transport errors come back as anyhow::Error and are passed through
// untouched; retry/backoff belongs to whoever implements this trait.

pub mod memory;

use crate::entities::{CatalogEntity, DestinationRef, EntityId, EntityKind};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use memory::{CallLog, MemoryCatalog};

/// Default page size for bulk loads
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Token prefix the bulk endpoint uses for per-item failures
pub const BULK_ERROR_PREFIX: &str = "error";

// ============================================================================
// REQUESTS
// ============================================================================

/// Filtered, paged lookup of one entity kind.
///
/// `filter` is an opaque predicate in the catalog's own query language;
/// the core only assembles and forwards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: EntityKind,
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub page_size: usize,
    pub skip: usize,
}

impl QueryRequest {
    pub fn new(kind: EntityKind) -> Self {
        QueryRequest {
            kind,
            filter: None,
            select: Vec::new(),
            expand: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            skip: 0,
        }
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    pub fn with_select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_expand(mut self, fields: &[&str]) -> Self {
        self.expand = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn at(&self, skip: usize) -> Self {
        let mut next = self.clone();
        next.skip = skip;
        next
    }
}

/// One page of query results
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entities: Vec<CatalogEntity>,
    /// Offset of the next page, None on the last page
    pub next_skip: Option<usize>,
}

/// One observation row of a bulk write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub destination: DestinationRef,
    pub fields: Map<String, Value>,
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

pub trait CatalogClient {
    fn query(&self, request: &QueryRequest) -> Result<Page>;

    /// Persist a new entity, returning the id the catalog assigned
    fn create(&self, entity: &CatalogEntity) -> Result<EntityId>;

    fn update(&self, entity: &CatalogEntity) -> Result<()>;

    fn delete(&self, entity: &CatalogEntity) -> Result<()>;

    /// Submit observations in order. Returns one token per item, in the
    /// same order; tokens starting with `error` are per-item failures.
    fn bulk_write(&self, items: &[BulkItem]) -> Result<Vec<String>>;
}

/// Walk every page of a query, handing each page to `visit`.
/// Returns the number of entities seen.
pub fn for_each_page<C, F>(client: &C, request: &QueryRequest, mut visit: F) -> Result<usize>
where
    C: CatalogClient + ?Sized,
    F: FnMut(Vec<CatalogEntity>),
{
    let mut seen = 0;
    let mut current = request.clone();

    loop {
        let page = client.query(&current)?;
        seen += page.entities.len();
        let next = page.next_skip;
        visit(page.entities);

        match next {
            Some(skip) if skip > current.skip => current = request.at(skip),
            _ => break,
        }
    }

    Ok(seen)
}

/// Collect every page of a query
pub fn query_all<C>(client: &C, request: &QueryRequest) -> Result<Vec<CatalogEntity>>
where
    C: CatalogClient + ?Sized,
{
    let mut all = Vec::new();
    for_each_page(client, request, |page| all.extend(page))?;
    Ok(all)
}

/// Does this bulk-write token denote a failed item?
pub fn is_error_token(token: &str) -> bool {
    token.starts_with(BULK_ERROR_PREFIX)
}
