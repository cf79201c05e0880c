//! Request and response payloads exchanged with the CNI plugin

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::engine::NetworkInfo;
use crate::store::PodIdentity;

pub const ADD_POD_URL: &str = "/AddPod";
pub const DEL_POD_URL: &str = "/DelPod";
pub const ACTIVE_PODS_URL: &str = "/ActivePods";

/// Socket the plugin dials by default
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/cniserver.sock";

/// Interface name used when the runtime does not provide one
pub const DEFAULT_IF_NAME: &str = "eth1";

/// Well-known CNI_ARGS keys set by the kubelet
pub mod keys {
    pub const POD_NAME: &str = "K8S_POD_NAME";
    pub const POD_NAMESPACE: &str = "K8S_POD_NAMESPACE";
    pub const POD_INFRA_CONTAINER_ID: &str = "K8S_POD_INFRA_CONTAINER_ID";
}

/// Network configuration handed to the plugin on stdin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetConf {
    #[serde(default, rename = "cniVersion")]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub plugin_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Body of `/AddPod` and `/DelPod`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CniInfo {
    #[serde(alias = "ContainerID")]
    pub container_id: String,
    #[serde(alias = "NetNS")]
    pub netns: String,
    #[serde(default, alias = "IfName")]
    pub if_name: String,
    #[serde(default, alias = "NetConf")]
    pub net_conf: NetConf,
    #[serde(default, alias = "Metadata")]
    pub metadata: HashMap<String, String>,
}

impl CniInfo {
    pub fn effective_if_name(&self) -> &str {
        if self.if_name.is_empty() {
            DEFAULT_IF_NAME
        } else {
            &self.if_name
        }
    }

    pub fn pod_metadata(&self) -> PodMetadata {
        PodMetadata::from_map(&self.metadata)
    }
}

/// Recognized pod metadata plus whatever else the runtime passed along
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodMetadata {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub infra_container_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl PodMetadata {
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut meta = PodMetadata::default();
        for (key, value) in map {
            let value = Some(value.clone()).filter(|v| !v.is_empty());
            match key.as_str() {
                keys::POD_NAME => meta.name = value,
                keys::POD_NAMESPACE => meta.namespace = value,
                keys::POD_INFRA_CONTAINER_ID => meta.infra_container_id = value,
                _ => {
                    meta.extra
                        .insert(key.clone(), value.unwrap_or_default());
                }
            }
        }
        meta
    }

    /// Pod identity, if both name and namespace are present
    pub fn identity(&self) -> Option<PodIdentity> {
        match (&self.name, &self.namespace) {
            (Some(name), Some(namespace)) => Some(PodIdentity::new(name, namespace)),
            _ => None,
        }
    }
}

/// Response of a successful setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupResult {
    pub sandbox_id: String,
    pub endpoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_info: Option<NetworkInfo>,
}

/// Response of `/ActivePods`: sandbox id to its stored configuration
pub type ActiveSandboxes = BTreeMap<String, serde_json::Value>;

/// Error body returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
