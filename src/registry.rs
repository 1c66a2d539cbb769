use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::RegistryError;

static GLOBAL: OnceLock<EngineRegistry> = OnceLock::new();

/// Keyed store of live engine handles, safe for concurrent use from any mix
/// of threads and tasks.
///
/// Prefer constructing an instance and passing it to the collaborators that
/// need it; [`EngineRegistry::global`] exists for hosts that want one
/// process-wide cache.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: DashMap<String, Arc<Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: DashMap::new(),
        }
    }

    /// Process-wide default instance, constructed once on first access.
    pub fn global() -> &'static EngineRegistry {
        GLOBAL.get_or_init(EngineRegistry::new)
    }

    /// Caches `engine` under `id`. A concurrent `put` on the same id is
    /// last-writer-wins; the displaced handle is returned so the caller can
    /// destroy or repark it (the registry never destroys handles itself).
    ///
    /// Empty identifiers are rejected; everything else is accepted as-is.
    pub fn put(&self, id: &str, engine: Arc<Engine>) -> Result<Option<Arc<Engine>>, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyEngineId);
        }
        let displaced = self.engines.insert(id.to_string(), engine);
        if displaced.is_some() {
            warn!(engine = %id, "overwrote cached engine handle");
        } else {
            debug!(engine = %id, "cached engine handle");
        }
        Ok(displaced)
    }

    /// Never fails on unknown ids.
    pub fn get(&self, id: &str) -> Option<Arc<Engine>> {
        self.engines.get(id).map(|entry| entry.value().clone())
    }

    /// Presence check. No atomicity is promised across a `contains` followed
    /// by a `get`; racing writers may interleave.
    pub fn contains(&self, id: &str) -> bool {
        self.engines.contains_key(id)
    }

    /// Removes the handle for `id`, transferring ownership to the caller.
    pub fn remove(&self, id: &str) -> Option<Arc<Engine>> {
        let removed = self.engines.remove(id).map(|(_, engine)| engine);
        if removed.is_some() {
            debug!(engine = %id, "removed cached engine handle");
        }
        removed
    }

    /// Drops every entry without destroying the engines. Callers that own
    /// engine lifecycle should use [`EngineRegistry::clear_with`] instead,
    /// otherwise still-running engines leak.
    pub fn clear(&self) {
        self.engines.clear();
        debug!("engine registry cleared");
    }

    /// Removes every entry, handing each one to `release` so the caller can
    /// destroy or repark it.
    pub fn clear_with<F>(&self, mut release: F)
    where
        F: FnMut(&str, Arc<Engine>),
    {
        let ids: Vec<String> = self.engines.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((id, engine)) = self.engines.remove(&id) {
                release(&id, engine);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(id: &str) -> Arc<Engine> {
        Arc::new(Engine::new(id))
    }

    #[test]
    fn put_then_get_returns_same_handle() {
        let registry = EngineRegistry::new();
        let handle = engine("engine-1");
        registry.put("engine-1", handle.clone()).unwrap();

        let got = registry.get("engine-1").expect("cached handle");
        assert!(Arc::ptr_eq(&handle, &got));
    }

    #[test]
    fn unknown_id_is_absent() {
        let registry = EngineRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
        assert!(registry.remove("nope").is_none());
    }

    #[test]
    fn remove_transfers_ownership() {
        let registry = EngineRegistry::new();
        let handle = engine("engine-1");
        registry.put("engine-1", handle.clone()).unwrap();

        let removed = registry.remove("engine-1").expect("removed handle");
        assert!(Arc::ptr_eq(&handle, &removed));
        assert!(registry.get("engine-1").is_none());
        assert!(!registry.contains("engine-1"));
    }

    #[test]
    fn overwrite_returns_displaced_handle() {
        let registry = EngineRegistry::new();
        let first = engine("engine-1");
        let second = engine("engine-1");
        registry.put("engine-1", first.clone()).unwrap();

        let displaced = registry
            .put("engine-1", second.clone())
            .unwrap()
            .expect("displaced handle");
        assert!(Arc::ptr_eq(&first, &displaced));

        let got = registry.get("engine-1").unwrap();
        assert!(Arc::ptr_eq(&second, &got));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = EngineRegistry::new();
        assert!(matches!(
            registry.put("", engine("x")),
            Err(RegistryError::EmptyEngineId)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_empties_registry() {
        let registry = EngineRegistry::new();
        for i in 0..3 {
            let id = format!("engine-{i}");
            registry.put(&id, engine(&id)).unwrap();
        }

        registry.clear();
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_with_hands_back_every_entry() {
        let registry = EngineRegistry::new();
        registry.put("a", engine("a")).unwrap();
        registry.put("b", engine("b")).unwrap();

        let mut released = Vec::new();
        registry.clear_with(|id, handle| released.push((id.to_string(), handle)));

        released.sort_by(|x, y| x.0.cmp(&y.0));
        let ids: Vec<&str> = released.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn global_is_one_instance() {
        let first = EngineRegistry::global();
        let second = EngineRegistry::global();
        assert!(std::ptr::eq(first, second));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_puts_all_land() {
        let registry = Arc::new(EngineRegistry::new());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("engine-{i}");
                registry.put(&id, Arc::new(Engine::new(id.clone()))).unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len(), 16);
        for i in 0..16 {
            assert!(registry.contains(&format!("engine-{i}")));
        }
    }

    #[test]
    fn cache_reuse_scenario() {
        let registry = EngineRegistry::new();
        let handle = engine("engine-1");

        registry.put("engine-1", handle.clone()).unwrap();
        assert!(registry.contains("engine-1"));
        assert!(Arc::ptr_eq(&registry.get("engine-1").unwrap(), &handle));

        let removed = registry.remove("engine-1").unwrap();
        assert!(Arc::ptr_eq(&removed, &handle));
        assert!(!registry.contains("engine-1"));
    }
}
