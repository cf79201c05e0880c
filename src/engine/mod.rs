//! Remote network engine client
//!
//! The engine owns sandboxes (network namespaces) and endpoints (attachment
//! points on a logical network). The orchestrator only ever talks to it
//! through [`NetworkEngine`], so tests can substitute [`mock::MockEngine`].

pub mod http;

pub use http::HttpEngineClient;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// Sandbox creation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    pub container_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(default)]
    pub use_default_sandbox: bool,
    /// The namespace is created by the container runtime, the engine adopts it
    #[serde(default)]
    pub use_external_key: bool,
}

/// Endpoint creation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub network_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub my_aliases: Vec<String>,
}

/// Interface details reported once an endpoint joins a sandbox
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Engine-side handle for the sandbox namespace
    #[serde(default)]
    pub sandbox_key: String,
    #[serde(default)]
    pub interfaces: Vec<InterfaceInfo>,
    #[serde(default)]
    pub ips: Vec<IpConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub sandbox: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpConfig {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

/// One remote call in the setup or teardown workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineStep {
    CreateSandbox,
    CreateEndpoint,
    Attach,
    Detach,
    DeleteEndpoint,
    DeleteSandbox,
}

impl fmt::Display for EngineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStep::CreateSandbox => "create-sandbox",
            EngineStep::CreateEndpoint => "create-endpoint",
            EngineStep::Attach => "attach",
            EngineStep::Detach => "detach",
            EngineStep::DeleteEndpoint => "delete-endpoint",
            EngineStep::DeleteSandbox => "delete-sandbox",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("Engine error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Trait for abstraction (allows mocking in tests)
// ============================================================================

/// Resource API of the remote network engine.
///
/// Deletes and detaches must tolerate resources that are already gone so a
/// retried teardown can resume where it stopped.
#[async_trait]
pub trait NetworkEngine: Send + Sync {
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<String, EngineError>;

    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<(), EngineError>;

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<String, EngineError>;

    async fn delete_endpoint(&self, endpoint_id: &str) -> Result<(), EngineError>;

    async fn attach(&self, endpoint_id: &str, sandbox_id: &str)
        -> Result<NetworkInfo, EngineError>;

    async fn detach(&self, endpoint_id: &str, sandbox_id: &str) -> Result<(), EngineError>;
}

// ============================================================================
// Mock implementation for testing (no I/O)
// ============================================================================
