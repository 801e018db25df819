// 🗃️ Entity Cache - Run-scoped registry of what the catalog already holds
//
// One cache per entity kind per run. Filled by paged bulk loads, then
// consulted before any per-record remote lookup:
//
//   get(key) = Some(entity)  → known, never re-queried this run
//   is_tombstone(key)        → looked up before, confirmed absent
//   contains_key(key) false  → never looked up
//
// No eviction: the cache lives exactly as long as the run.

use crate::catalog::{for_each_page, CatalogClient, QueryRequest, DEFAULT_PAGE_SIZE};
use crate::context::RunContext;
use crate::entities::{CatalogEntity, EntityKind, LocalKey};
use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

// ============================================================================
// KEY EXTRACTION
// ============================================================================

/// How to read an entity's LocalKey back from its catalog representation
#[derive(Debug, Clone)]
pub enum KeyExtractor {
    /// Property at an `a/b/c` path (string or number values)
    Property(String),
    /// The entity name is the key
    Name,
    /// The catalog id is the key
    Id,
    Function(fn(&CatalogEntity) -> Option<LocalKey>),
}

impl KeyExtractor {
    pub fn property(path: &str) -> Self {
        KeyExtractor::Property(path.to_string())
    }

    pub fn extract(&self, entity: &CatalogEntity) -> Option<LocalKey> {
        match self {
            KeyExtractor::Property(path) => match entity.property_path(path)? {
                Value::String(s) if !s.is_empty() => Some(LocalKey::new(s.as_str())),
                Value::Number(n) => Some(LocalKey::new(n.to_string())),
                _ => None,
            },
            KeyExtractor::Name => {
                (!entity.name.is_empty()).then(|| LocalKey::new(entity.name.as_str()))
            }
            KeyExtractor::Id => entity.id.as_ref().map(|id| LocalKey::new(id.as_str())),
            KeyExtractor::Function(f) => f(entity),
        }
    }
}

// ============================================================================
// ENTITY CACHE
// ============================================================================

pub struct EntityCache {
    kind: EntityKind,
    extractor: KeyExtractor,
    page_size: usize,
    /// None = tombstone
    by_key: HashMap<LocalKey, Option<CatalogEntity>>,
    by_name: HashMap<String, CatalogEntity>,
}

impl EntityCache {
    pub fn new(kind: EntityKind, extractor: KeyExtractor) -> Self {
        EntityCache {
            kind,
            extractor,
            page_size: DEFAULT_PAGE_SIZE,
            by_key: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Cache paging with the run's configured `page_size`
    pub fn from_context(kind: EntityKind, extractor: KeyExtractor, ctx: &RunContext) -> Self {
        Self::new(kind, extractor).with_page_size(ctx.config.page_size)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn extractor(&self) -> &KeyExtractor {
        &self.extractor
    }

    /// Page through every matching entity and index it.
    ///
    /// Returns how many loaded entities had a usable LocalKey. Entities
    /// without one are still reachable by name. When a key repeats, the
    /// entity loaded last wins.
    pub fn load<C>(
        &mut self,
        client: &C,
        filter: Option<&str>,
        select: &[&str],
        expand: &[&str],
    ) -> Result<usize>
    where
        C: CatalogClient + ?Sized,
    {
        let mut request = QueryRequest::new(self.kind)
            .with_select(select)
            .with_expand(expand)
            .with_page_size(self.page_size);
        if let Some(filter) = filter {
            request = request.with_filter(filter);
        }

        let mut keyed = 0;
        let mut duplicates = 0;
        let mut seen_this_load = std::collections::HashSet::new();

        let total = for_each_page(client, &request, |page| {
            for entity in page {
                match self.extractor.extract(&entity) {
                    Some(key) => {
                        keyed += 1;
                        if !seen_this_load.insert(key.clone()) {
                            duplicates += 1;
                        }
                        self.insert(key, entity);
                    }
                    None => self.index_name(entity),
                }
            }
        })?;

        if duplicates > 0 {
            warn!(kind = %self.kind, duplicates, "duplicate local keys during cache load, last loaded wins");
        }
        debug!(kind = %self.kind, total, keyed, "cache loaded");
        Ok(keyed)
    }

    // ========================================================================
    // LOOKUPS (never remote)
    // ========================================================================

    pub fn get(&self, key: &LocalKey) -> Option<&CatalogEntity> {
        self.by_key.get(key).and_then(Option::as_ref)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&CatalogEntity> {
        self.by_name.get(name)
    }

    /// True once the key was resolved this run, either to an entity or a tombstone
    pub fn contains_key(&self, key: &LocalKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn is_tombstone(&self, key: &LocalKey) -> bool {
        matches!(self.by_key.get(key), Some(None))
    }

    pub fn len(&self) -> usize {
        self.by_key.values().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstones(&self) -> usize {
        self.by_key.values().filter(|e| e.is_none()).count()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Remember that `key` does not exist remotely
    pub fn register_null(&mut self, key: LocalKey) {
        self.by_key.insert(key, None);
    }

    /// Cache an entity under the key its extractor yields
    pub fn add(&mut self, entity: CatalogEntity) -> Option<LocalKey> {
        match self.extractor.extract(&entity) {
            Some(key) => {
                self.insert(key.clone(), entity);
                Some(key)
            }
            None => {
                self.index_name(entity);
                None
            }
        }
    }

    /// Cache an entity under an explicit key (replaces entity or tombstone)
    pub fn insert(&mut self, key: LocalKey, entity: CatalogEntity) {
        if let Some(Some(previous)) = self.by_key.get(&key) {
            // Renamed: drop the old name only if it still points at this entity
            if previous.name != entity.name
                && self
                    .by_name
                    .get(&previous.name)
                    .is_some_and(|named| same_entity(named, previous))
            {
                let stale = previous.name.clone();
                self.by_name.remove(&stale);
            }
        }
        self.by_name.insert(entity.name.clone(), entity.clone());
        self.by_key.insert(key, Some(entity));
    }

    fn index_name(&mut self, entity: CatalogEntity) {
        self.by_name.insert(entity.name.clone(), entity);
    }
}

fn same_entity(a: &CatalogEntity, b: &CatalogEntity) -> bool {
    match (&a.id, &b.id) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use serde_json::json;

    fn keyed_asset(name: &str, key: &str) -> CatalogEntity {
        CatalogEntity::asset(name, "test asset").with_property("localKey", json!(key))
    }

    fn loaded_cache(catalog: &MemoryCatalog) -> EntityCache {
        let mut cache = EntityCache::new(EntityKind::Asset, KeyExtractor::property("localKey"));
        cache.load(catalog, None, &[], &[]).unwrap();
        cache
    }

    #[test]
    fn test_load_then_get_without_remote_calls() {
        let catalog = MemoryCatalog::new();
        for key in ["A", "B", "C"] {
            catalog.seed(keyed_asset(&format!("asset {key}"), key));
        }

        let cache = loaded_cache(&catalog);
        let calls_after_load = catalog.calls();

        let b = cache.get(&LocalKey::new("B")).unwrap();
        assert_eq!(b.name, "asset B");
        assert_eq!(cache.len(), 3);
        assert_eq!(catalog.calls(), calls_after_load, "get must not hit the catalog");
    }

    #[test]
    fn test_load_returns_keyed_count_and_indexes_unkeyed_by_name() {
        let catalog = MemoryCatalog::new();
        catalog.seed(keyed_asset("one", "1"));
        catalog.seed(CatalogEntity::asset("orphan", "no key"));

        let mut cache = EntityCache::new(EntityKind::Asset, KeyExtractor::property("localKey"));
        let keyed = cache.load(&catalog, None, &["id", "name"], &[]).unwrap();

        assert_eq!(keyed, 1);
        assert!(cache.get_by_name("orphan").is_some());
        assert!(cache.get_by_name("one").is_some());
    }

    #[test]
    fn test_load_pages_through_everything() {
        let catalog = MemoryCatalog::new();
        for i in 0..25 {
            catalog.seed(keyed_asset(&format!("asset {i}"), &i.to_string()));
        }

        let mut cache = EntityCache::new(EntityKind::Asset, KeyExtractor::property("localKey"))
            .with_page_size(10);
        assert_eq!(cache.load(&catalog, None, &[], &[]).unwrap(), 25);
        assert_eq!(catalog.calls().queries, 3);
    }

    #[test]
    fn test_load_with_filter() {
        let catalog = MemoryCatalog::new();
        catalog.seed(keyed_asset("north", "N").with_property("site", json!("x")));
        catalog.seed(keyed_asset("south", "S").with_property("site", json!("y")));

        let mut cache = EntityCache::new(EntityKind::Asset, KeyExtractor::property("localKey"));
        let keyed = cache
            .load(&catalog, Some("properties/site eq 'x'"), &[], &[])
            .unwrap();

        assert_eq!(keyed, 1);
        assert!(cache.contains_key(&LocalKey::new("N")));
        assert!(!cache.contains_key(&LocalKey::new("S")));
    }

    #[test]
    fn test_from_context_uses_configured_page_size() {
        let catalog = MemoryCatalog::new();
        for i in 0..5 {
            catalog.seed(keyed_asset(&format!("asset {i}"), &i.to_string()));
        }
        let mut config = crate::config::SyncConfig::default();
        config.page_size = 2;
        let ctx = RunContext::new(config);

        let mut cache =
            EntityCache::from_context(EntityKind::Asset, KeyExtractor::property("localKey"), &ctx);
        assert_eq!(cache.load(&catalog, None, &[], &[]).unwrap(), 5);
        assert_eq!(catalog.calls().queries, 3);
    }

    #[test]
    fn test_duplicate_keys_last_loaded_wins() {
        let catalog = MemoryCatalog::new();
        catalog.seed(keyed_asset("first", "DUP"));
        catalog.seed(keyed_asset("second", "DUP"));

        let cache = loaded_cache(&catalog);
        assert_eq!(cache.get(&LocalKey::new("DUP")).unwrap().name, "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tombstones() {
        let mut cache = EntityCache::new(EntityKind::Sensor, KeyExtractor::Name);
        let key = LocalKey::new("missing");

        assert!(!cache.contains_key(&key));
        cache.register_null(key.clone());
        assert!(cache.contains_key(&key));
        assert!(cache.is_tombstone(&key));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.tombstones(), 1);

        // A later create replaces the tombstone
        let sensor = CatalogEntity::sensor("missing", "d", "text/plain", json!(null)).with_id("5");
        assert_eq!(cache.add(sensor), Some(key.clone()));
        assert!(!cache.is_tombstone(&key));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_rename_drops_stale_name_index() {
        let mut cache = EntityCache::new(EntityKind::Asset, KeyExtractor::property("localKey"));
        cache.add(keyed_asset("old name", "K"));
        cache.add(keyed_asset("new name", "K"));

        assert!(cache.get_by_name("old name").is_none());
        assert!(cache.get_by_name("new name").is_some());
    }

    #[test]
    fn test_rename_keeps_name_claimed_by_other_entity() {
        let mut cache = EntityCache::new(EntityKind::Asset, KeyExtractor::property("localKey"));
        cache.add(keyed_asset("pump", "K").with_id("1"));
        // An unkeyed entity takes over the name
        cache.add(CatalogEntity::asset("pump", "no key").with_id("2"));
        cache.add(keyed_asset("pump renamed", "K").with_id("1"));

        let named = cache.get_by_name("pump").unwrap();
        assert_eq!(named.id, Some(crate::entities::EntityId::new("2")));
        assert!(cache.get_by_name("pump renamed").is_some());
    }

    #[test]
    fn test_key_extractors() {
        let entity = CatalogEntity::asset("Pump", "d")
            .with_id("77")
            .with_property("ext", json!({"code": 12}));

        assert_eq!(
            KeyExtractor::property("ext/code").extract(&entity),
            Some(LocalKey::new("12"))
        );
        assert_eq!(KeyExtractor::Name.extract(&entity), Some(LocalKey::new("Pump")));
        assert_eq!(KeyExtractor::Id.extract(&entity), Some(LocalKey::new("77")));
        assert_eq!(KeyExtractor::property("ext").extract(&entity), None);

        fn upper(e: &CatalogEntity) -> Option<LocalKey> {
            Some(LocalKey::new(e.name.to_uppercase()))
        }
        assert_eq!(
            KeyExtractor::Function(upper).extract(&entity),
            Some(LocalKey::new("PUMP"))
        );
    }
}
