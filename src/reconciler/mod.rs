//! Active-workload reconciler
//!
//! Answers "which sandboxes are live on this node" by joining the pods the
//! cluster has scheduled here with the records in the metadata store. Pods
//! without a record are simply not provisioned yet.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ActiveSandboxes;
use crate::cluster::{ClusterError, WorkloadLister};
use crate::store::{MetadataStore, StoreKey};

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error("Failed to list node workloads: {0}")]
    Cluster(#[from] ClusterError),
}

pub struct ActiveWorkloadReconciler {
    store: Arc<dyn MetadataStore>,
    lister: Arc<dyn WorkloadLister>,
}

impl ActiveWorkloadReconciler {
    pub fn new(store: Arc<dyn MetadataStore>, lister: Arc<dyn WorkloadLister>) -> Self {
        Self { store, lister }
    }

    /// Sandbox id to stored sandbox configuration, for every running pod on
    /// this node that has a provisioned record.
    pub async fn list_active(&self) -> Result<ActiveSandboxes, ReconcilerError> {
        let workloads = self.lister.list_node_workloads().await?;

        let lookups: Vec<_> = workloads
            .iter()
            .filter(|w| w.needs_pod_network())
            .map(|workload| {
                let key = StoreKey::for_pod(&workload.identity());
                async move {
                    let result = self.store.get(&key).await;
                    (key, result)
                }
            })
            .collect();

        let mut active = ActiveSandboxes::new();
        for (key, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(record) if record.is_provisioned() => {
                    active.insert(record.sandbox_id, record.sandbox_config);
                }
                Ok(record) if record.is_half_provisioned() => warn!(
                    "Record {} names sandbox {:?} and endpoint {:?}; only one exists, skipping",
                    key, record.sandbox_id, record.endpoint_id
                ),
                Ok(_) => debug!("Record {} is not provisioned, skipping", key),
                Err(e) if e.is_not_found() => debug!("No record for {}", key),
                Err(e) => warn!("Failed to read record {}: {}", key, e),
            }
        }

        info!(
            "Active sandboxes: {} of {} scheduled pods",
            active.len(),
            workloads.len()
        );
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{workload, StaticLister};
    use crate::store::{MemoryStore, PodIdentity, PodNetworkRecord, StoreError};
    use async_trait::async_trait;

    async fn seed(store: &MemoryStore, name: &str, sandbox: &str) {
        let mut rec = PodNetworkRecord::new(&PodIdentity::new(name, "default"), "infra");
        rec.sandbox_id = sandbox.to_string();
        rec.endpoint_id = format!("ep-{}", sandbox);
        rec.sandbox_config = serde_json::json!({ "container_id": name });
        store.put_atomic(&mut rec).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_active_filters() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "running", "sb-run").await;
        seed(&store, "host-net", "sb-host").await;
        seed(&store, "pending", "sb-pending").await;

        let lister = Arc::new(StaticLister::new(vec![
            workload("running", "Running", false),
            workload("host-net", "Running", true),
            workload("pending", "Pending", false),
            workload("unprovisioned", "Running", false),
        ]));

        let reconciler = ActiveWorkloadReconciler::new(store, lister);
        let active = reconciler.list_active().await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(
            active.get("sb-run"),
            Some(&serde_json::json!({ "container_id": "running" }))
        );
    }

    #[tokio::test]
    async fn test_half_provisioned_record_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut rec = PodNetworkRecord::new(&PodIdentity::new("web-0", "default"), "infra");
        rec.sandbox_id = "sb-orphan".to_string();
        store.put_atomic(&mut rec).await.unwrap();
        seed(&store, "web-1", "sb-1").await;

        let lister = Arc::new(StaticLister::new(vec![
            workload("web-0", "Running", false),
            workload("web-1", "Running", false),
        ]));
        let active = ActiveWorkloadReconciler::new(store, lister)
            .list_active()
            .await
            .unwrap();

        assert_eq!(active.len(), 1);
        assert!(active.contains_key("sb-1"));
    }

    #[tokio::test]
    async fn test_lister_failure_is_an_error() {
        let lister = Arc::new(StaticLister::new(vec![]));
        lister.set_failing(true);
        let reconciler = ActiveWorkloadReconciler::new(Arc::new(MemoryStore::new()), lister);

        assert!(matches!(
            reconciler.list_active().await,
            Err(ReconcilerError::Cluster(_))
        ));
    }

    /// Store that fails reads for one pod
    struct FlakyStore {
        inner: MemoryStore,
        broken: String,
    }

    #[async_trait]
    impl MetadataStore for FlakyStore {
        async fn get(&self, key: &StoreKey) -> Result<PodNetworkRecord, StoreError> {
            if key.name == self.broken {
                return Err(StoreError::Task("disk on fire".to_string()));
            }
            self.inner.get(key).await
        }

        async fn put_atomic(&self, record: &mut PodNetworkRecord) -> Result<(), StoreError> {
            self.inner.put_atomic(record).await
        }

        async fn delete_atomic(&self, record: &PodNetworkRecord) -> Result<(), StoreError> {
            self.inner.delete_atomic(record).await
        }

        async fn list(&self) -> Result<Vec<PodNetworkRecord>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_store_error_does_not_abort_enumeration() {
        let inner = MemoryStore::new();
        seed(&inner, "a", "sb-a").await;
        seed(&inner, "b", "sb-b").await;
        let store = Arc::new(FlakyStore {
            inner,
            broken: "a".to_string(),
        });
        let lister = Arc::new(StaticLister::new(vec![
            workload("a", "Running", false),
            workload("b", "Running", false),
        ]));

        let active = ActiveWorkloadReconciler::new(store, lister)
            .list_active()
            .await
            .unwrap();
        assert_eq!(active.keys().collect::<Vec<_>>(), vec!["sb-b"]);
    }
}
