//! Cluster workload listing
//!
//! The reconciler needs to know which pods the cluster has scheduled onto
//! this node. [`WorkloadLister`] hides where that answer comes from;
//! [`KubeWorkloadLister`] asks the Kubernetes API server.

pub mod kube;

pub use kube::{KubeConfig, KubeWorkloadLister};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::PodIdentity;

/// Phase reported for a pod that has not started yet
pub const PHASE_PENDING: &str = "Pending";

/// A pod scheduled onto this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub host_network: bool,
    /// Pod phase as reported by the cluster ("Pending", "Running", ...)
    #[serde(default)]
    pub phase: String,
}

impl Workload {
    pub fn identity(&self) -> PodIdentity {
        PodIdentity::new(&self.name, &self.namespace)
    }

    /// Whether this pod should own a sandbox managed by us
    pub fn needs_pod_network(&self) -> bool {
        !self.host_network && self.phase != PHASE_PENDING
    }
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to read credentials: {0}")]
    Credentials(String),
}

#[async_trait]
pub trait WorkloadLister: Send + Sync {
    /// Pods currently scheduled to this node
    async fn list_node_workloads(&self) -> Result<Vec<Workload>, ClusterError>;
}


#[cfg(test)]
mod tests {
    use super::mock::workload;

    #[test]
    fn test_needs_pod_network() {
        assert!(workload("a", "Running", false).needs_pod_network());
        assert!(workload("a", "Succeeded", false).needs_pod_network());
        assert!(!workload("a", "Pending", false).needs_pod_network());
        assert!(!workload("a", "Running", true).needs_pod_network());
    }
}
