//! Identity cache
//!
//! Maps a pod identity to the engine resources provisioned for it. The cache
//! only saves store round trips on repeated setup calls; the metadata store
//! stays authoritative and is always read before anything is deleted.

use std::sync::Arc;

use dashmap::DashMap;

use crate::api::SetupResult;
use crate::store::PodIdentity;

/// Shared handle; clones see the same entries
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    entries: Arc<DashMap<PodIdentity, SetupResult>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &PodIdentity) -> Option<SetupResult> {
        self.entries.get(identity).map(|r| r.clone())
    }

    pub fn insert(&self, identity: PodIdentity, result: SetupResult) {
        self.entries.insert(identity, result);
    }

    pub fn invalidate(&self, identity: &PodIdentity) -> Option<SetupResult> {
        self.entries.remove(identity).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(sandbox: &str) -> SetupResult {
        SetupResult {
            sandbox_id: sandbox.to_string(),
            endpoint_id: format!("ep-{}", sandbox),
            network_info: None,
        }
    }

    #[test]
    fn test_insert_get_invalidate() {
        let cache = IdentityCache::new();
        let id = PodIdentity::new("web-0", "default");

        assert!(cache.get(&id).is_none());
        cache.insert(id.clone(), result("sb-1"));
        assert_eq!(cache.get(&id).unwrap().sandbox_id, "sb-1");

        let removed = cache.invalidate(&id).unwrap();
        assert_eq!(removed.endpoint_id, "ep-sb-1");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = IdentityCache::new();
        let other = cache.clone();
        other.insert(PodIdentity::new("a", "ns"), result("sb-2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = IdentityCache::new();
        let b = IdentityCache::new();
        a.insert(PodIdentity::new("a", "ns"), result("sb-3"));
        assert!(b.is_empty());
    }
}
