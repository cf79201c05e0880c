use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::NetworkInfo;

/// Key prefix shared by every pod network record
pub const RECORD_PREFIX: &str = "cni";

/// Identity of a workload: pod name plus namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
}

impl PodIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Structured store key: `(prefix, pod name, pod namespace)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub prefix: String,
    pub name: String,
    pub namespace: String,
}

impl StoreKey {
    pub fn for_pod(identity: &PodIdentity) -> Self {
        Self {
            prefix: RECORD_PREFIX.to_string(),
            name: identity.name.clone(),
            namespace: identity.namespace.clone(),
        }
    }

    /// Key segments, outermost first
    pub fn segments(&self) -> [&str; 3] {
        [&self.prefix, &self.name, &self.namespace]
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.prefix, self.name, self.namespace)
    }
}

/// Durable record of the network resources provisioned for one pod.
///
/// `version` and `exists` are owned by the store: they are never part of the
/// serialized body and are refreshed on every successful read or write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodNetworkRecord {
    pub pod_name: String,
    pub pod_namespace: String,
    pub infra_container_id: String,
    #[serde(default)]
    pub sandbox_id: String,
    #[serde(default)]
    pub endpoint_id: String,
    /// Opaque sandbox payload, reported back by the active pods listing
    #[serde(default)]
    pub sandbox_config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_info: Option<NetworkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip)]
    pub version: u64,
    #[serde(skip)]
    pub exists: bool,
}

impl PodNetworkRecord {
    /// A fresh, unprovisioned record that has never touched the store
    pub fn new(identity: &PodIdentity, infra_container_id: impl Into<String>) -> Self {
        Self {
            pod_name: identity.name.clone(),
            pod_namespace: identity.namespace.clone(),
            infra_container_id: infra_container_id.into(),
            sandbox_id: String::new(),
            endpoint_id: String::new(),
            sandbox_config: serde_json::Value::Null,
            network_info: None,
            created_at: None,
            version: 0,
            exists: false,
        }
    }

    pub fn identity(&self) -> PodIdentity {
        PodIdentity::new(&self.pod_name, &self.pod_namespace)
    }

    pub fn key(&self) -> StoreKey {
        StoreKey::for_pod(&self.identity())
    }

    /// Both engine identifiers are present
    pub fn is_provisioned(&self) -> bool {
        !self.sandbox_id.is_empty() && !self.endpoint_id.is_empty()
    }

    /// Exactly one identifier is present. Such a record must never be persisted.
    pub fn is_half_provisioned(&self) -> bool {
        self.sandbox_id.is_empty() != self.endpoint_id.is_empty()
    }

    /// Same pod, same container, same engine resources. Store metadata is ignored.
    pub fn is_equivalent(&self, other: &PodNetworkRecord) -> bool {
        self.pod_name == other.pod_name
            && self.pod_namespace == other.pod_namespace
            && self.infra_container_id == other.infra_container_id
            && self.sandbox_id == other.sandbox_id
            && self.endpoint_id == other.endpoint_id
    }

    pub(crate) fn mark_stored(&mut self, version: u64) {
        self.version = version;
        self.exists = true;
    }

    /// Take over the store position of `current` (or of no record at all),
    /// so the next write replaces whatever is stored now.
    pub fn rebase_onto(&mut self, current: Option<&PodNetworkRecord>) {
        match current {
            Some(stored) => {
                self.version = stored.version;
                self.exists = stored.exists;
            }
            None => {
                self.version = 0;
                self.exists = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PodNetworkRecord {
        PodNetworkRecord::new(&PodIdentity::new("web-0", "default"), "infra-1")
    }

    #[test]
    fn test_key_shape() {
        let key = record().key();
        assert_eq!(key.segments(), ["cni", "web-0", "default"]);
        assert_eq!(key.to_string(), "cni/web-0/default");
    }

    #[test]
    fn test_provisioning_states() {
        let mut rec = record();
        assert!(!rec.is_provisioned());
        assert!(!rec.is_half_provisioned());

        rec.sandbox_id = "sb-1".to_string();
        assert!(rec.is_half_provisioned());

        rec.endpoint_id = "ep-1".to_string();
        assert!(rec.is_provisioned());
        assert!(!rec.is_half_provisioned());
    }

    #[test]
    fn test_store_metadata_not_serialized() {
        let mut rec = record();
        rec.mark_stored(7);

        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("version"));
        assert!(!json.contains("exists"));

        let back: PodNetworkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 0);
        assert!(!back.exists);
    }

    #[test]
    fn test_equivalence_ignores_version() {
        let mut a = record();
        a.sandbox_id = "sb".to_string();
        a.endpoint_id = "ep".to_string();
        let mut b = a.clone();
        b.mark_stored(3);
        assert!(a.is_equivalent(&b));

        b.endpoint_id = "other".to_string();
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn test_rebase_takes_store_position() {
        let mut stored = record();
        stored.mark_stored(4);

        let mut rec = record();
        rec.sandbox_id = "sb-1".to_string();
        rec.rebase_onto(Some(&stored));
        assert_eq!((rec.version, rec.exists), (4, true));
        assert_eq!(rec.sandbox_id, "sb-1");

        rec.rebase_onto(None);
        assert_eq!((rec.version, rec.exists), (0, false));
    }
}
