use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client};
use serde::Deserialize;
use tracing::debug;

use super::{ClusterError, Workload, WorkloadLister};

/// Service account files mounted into every in-cluster pod
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Connection settings for the API server
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// API server base URL (e.g., "https://10.96.0.1:443")
    pub api_url: String,

    /// Node whose pods are listed
    pub node_name: String,

    /// Bearer token file, re-read on every request so rotated tokens are picked up
    pub token_path: Option<PathBuf>,

    /// Extra CA bundle (PEM) trusted for the API server
    pub ca_path: Option<PathBuf>,

    pub timeout: Duration,
}

impl KubeConfig {
    /// Settings for a daemon running inside the cluster
    pub fn in_cluster(node_name: impl Into<String>) -> Self {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .unwrap_or_else(|_| "kubernetes.default.svc".to_string());
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        Self {
            api_url: format!("https://{}:{}", host, port),
            node_name: node_name.into(),
            token_path: Some(PathBuf::from(SERVICE_ACCOUNT_TOKEN)),
            ca_path: Some(PathBuf::from(SERVICE_ACCOUNT_CA)),
            timeout: Duration::from_secs(10),
        }
    }
}

// Minimal slice of the PodList schema

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMeta {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    host_network: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

impl From<Pod> for Workload {
    fn from(pod: Pod) -> Self {
        Workload {
            name: pod.metadata.name,
            namespace: pod.metadata.namespace,
            host_network: pod.spec.host_network,
            phase: pod.status.phase,
        }
    }
}

/// Lists this node's pods through the Kubernetes REST API
pub struct KubeWorkloadLister {
    client: Client,
    config: KubeConfig,
}

impl KubeWorkloadLister {
    pub fn new(config: KubeConfig) -> Result<Self, ClusterError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(ca_path) = config.ca_path.as_ref().filter(|p| p.exists()) {
            let pem = std::fs::read(ca_path)
                .map_err(|e| ClusterError::Credentials(format!("{}: {}", ca_path.display(), e)))?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ClusterError::Credentials(format!("{}: {}", ca_path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| ClusterError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn pods_url(&self) -> String {
        format!(
            "{}/api/v1/pods?fieldSelector=spec.nodeName%3D{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.node_name
        )
    }

    async fn bearer_token(&self) -> Result<Option<String>, ClusterError> {
        let Some(path) = self.config.token_path.as_ref() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let token = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ClusterError::Credentials(format!("{}: {}", path.display(), e)))?;
        Ok(Some(token.trim().to_string()))
    }
}

#[async_trait]
impl WorkloadLister for KubeWorkloadLister {
    async fn list_node_workloads(&self) -> Result<Vec<Workload>, ClusterError> {
        let url = self.pods_url();
        debug!("Listing pods: {}", url);

        let mut req = self.client.get(&url);
        if let Some(token) = self.bearer_token().await? {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ClusterError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClusterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let pods: PodList = response
            .json()
            .await
            .map_err(|e| ClusterError::Parse(e.to_string()))?;
        Ok(pods.items.into_iter().map(Workload::from).collect())
    }
}
