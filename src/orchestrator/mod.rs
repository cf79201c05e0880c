//! Pod network orchestrator
//!
//! Drives the setup and teardown workflows for a pod:
//!
//! ```text
//! setup:    create-sandbox -> create-endpoint -> attach -> persist record
//! teardown: read record -> detach -> delete-endpoint -> delete-sandbox -> delete record
//! ```
//!
//! Setup is idempotent per pod identity. Teardown attempts every step even when
//! earlier ones fail and keeps the record until all of them succeed, so a
//! retried teardown resumes where the previous one stopped.

pub mod error;

pub use error::{CreatedResource, PodNetworkError, StepFailure};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::{CniInfo, SetupResult};
use crate::cache::IdentityCache;
use crate::engine::{EndpointSpec, EngineError, EngineStep, NetworkEngine, SandboxSpec};
use crate::locks::IdentityLocks;
use crate::store::{MetadataStore, PodIdentity, PodNetworkRecord, StoreError, StoreKey};

/// Default timeout for a single engine call
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on every engine call
    pub remote_timeout: Duration,

    /// How many times a store write that hit a version conflict is re-read
    /// and retried. Applies to the setup record write and the teardown
    /// delete. A record provisioned concurrently for other resources is
    /// never overwritten, whatever this is set to.
    pub conflict_retries: u32,

    /// Undo completed setup steps when a later one fails
    pub rollback_on_failure: bool,

    /// Network new endpoints are created on
    pub network_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            conflict_retries: 3,
            rollback_on_failure: false,
            network_name: "default".to_string(),
        }
    }
}

pub struct PodNetworkOrchestrator {
    store: Arc<dyn MetadataStore>,
    engine: Arc<dyn NetworkEngine>,
    cache: IdentityCache,
    locks: IdentityLocks,
    config: OrchestratorConfig,
}

impl PodNetworkOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        engine: Arc<dyn NetworkEngine>,
        cache: IdentityCache,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            cache,
            locks: IdentityLocks::new(),
            config,
        }
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Provision a sandbox and an endpoint for the pod and record them
    pub async fn setup(&self, request: &CniInfo) -> Result<SetupResult, PodNetworkError> {
        let identity = request_identity(request)?;
        if request.container_id.is_empty() {
            return Err(PodNetworkError::Validation("containerID empty".to_string()));
        }
        if let Some(infra) = request.pod_metadata().infra_container_id {
            if infra != request.container_id {
                return Err(PodNetworkError::Validation(format!(
                    "K8S_POD_INFRA_CONTAINER_ID {} does not match containerID {}",
                    infra, request.container_id
                )));
            }
        }
        validate_netns(&request.netns).await?;

        let _guard = self.locks.acquire(&identity).await;

        if let Some(cached) = self.cache.get(&identity) {
            debug!("Setup for {} served from identity cache", identity);
            return Ok(cached);
        }

        let key = StoreKey::for_pod(&identity);
        let mut record = match self.store.get(&key).await {
            Ok(existing) if existing.is_provisioned() => {
                debug!("Setup for {} already provisioned", identity);
                let result = result_from(&existing);
                self.cache.insert(identity, result.clone());
                return Ok(result);
            }
            // Unprovisioned leftover: provision on top of it, keeping its version
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => PodNetworkRecord::new(&identity, &request.container_id),
            Err(e) => return Err(e.into()),
        };
        record.infra_container_id = request.container_id.clone();

        info!(
            "Setting up network for pod {} (container {}, netns {}, interface {})",
            identity,
            request.container_id,
            request.netns,
            request.effective_if_name()
        );

        let sandbox_spec = SandboxSpec {
            container_id: request.container_id.clone(),
            host_name: identity.name.clone(),
            use_external_key: true,
            ..Default::default()
        };
        let sandbox_id = self
            .remote(EngineStep::CreateSandbox, self.engine.create_sandbox(&sandbox_spec))
            .await
            .map_err(|source| PodNetworkError::RemoteCall {
                step: EngineStep::CreateSandbox,
                source,
            })?;
        let mut created = vec![CreatedResource::Sandbox(sandbox_id.clone())];

        let endpoint_spec = EndpointSpec {
            name: endpoint_name(&identity, &request.container_id),
            network_name: self.config.network_name.clone(),
            my_aliases: vec![identity.name.clone()],
        };
        let endpoint_id = match self
            .remote(EngineStep::CreateEndpoint, self.engine.create_endpoint(&endpoint_spec))
            .await
        {
            Ok(id) => id,
            Err(source) => {
                return Err(self
                    .abort_setup(&identity, EngineStep::CreateEndpoint, source, created)
                    .await)
            }
        };
        created.push(CreatedResource::Endpoint(endpoint_id.clone()));

        let network_info = match self
            .remote(EngineStep::Attach, self.engine.attach(&endpoint_id, &sandbox_id))
            .await
        {
            Ok(info) => info,
            Err(source) => {
                return Err(self
                    .abort_setup(&identity, EngineStep::Attach, source, created)
                    .await)
            }
        };

        record.sandbox_id = sandbox_id;
        record.endpoint_id = endpoint_id;
        record.sandbox_config = serde_json::to_value(&sandbox_spec)
            .map_err(|e| PodNetworkError::Store(e.into()))?;
        record.network_info = Some(network_info);
        record.created_at = Some(chrono::Utc::now());
        if !record.is_provisioned() {
            return Err(PodNetworkError::Validation(format!(
                "refusing to persist half-provisioned record {}",
                key
            )));
        }
        if let Err(source) = self.persist_setup(&key, &mut record).await {
            warn!(
                "Failed to record {}; sandbox {} and endpoint {} are not recorded: {}",
                key, record.sandbox_id, record.endpoint_id, source
            );
            let (created, compensation_failures) = self.compensate(&identity, created).await;
            return Err(PodNetworkError::Unrecorded {
                source,
                created,
                compensation_failures,
            });
        }

        let result = result_from(&record);
        self.cache.insert(identity.clone(), result.clone());
        info!(
            "Pod {} attached: sandbox={}, endpoint={}",
            identity, result.sandbox_id, result.endpoint_id
        );
        Ok(result)
    }

    /// Write the provisioned record. On a conflict the stored record is
    /// re-read: an equivalent one is adopted, an unprovisioned or missing one
    /// is overwritten on the next attempt, a provisioned one for other
    /// resources wins.
    async fn persist_setup(
        &self,
        key: &StoreKey,
        record: &mut PodNetworkRecord,
    ) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            let conflict = match self.store.put_atomic(record).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() => e,
                Err(e) => return Err(e),
            };

            let current = match self.store.get(key).await {
                Ok(current) => Some(current),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            match current {
                Some(competing) if competing.is_equivalent(record) => {
                    debug!("Concurrent writer recorded the same resources for {}", key);
                    *record = competing;
                    return Ok(());
                }
                Some(competing) if competing.is_provisioned() => {
                    return Err(StoreError::Conflict(format!(
                        "{} was provisioned concurrently with sandbox {}",
                        key, competing.sandbox_id
                    )));
                }
                _ if attempt >= self.config.conflict_retries => return Err(conflict),
                current => {
                    attempt += 1;
                    debug!("Write of {} conflicted, retry {}", key, attempt);
                    record.rebase_onto(current.as_ref());
                }
            }
        }
    }

    /// Turn a mid-setup failure into a partial-setup error, undoing the
    /// completed steps first when rollback is enabled.
    async fn abort_setup(
        &self,
        identity: &PodIdentity,
        failed_step: EngineStep,
        source: EngineError,
        created: Vec<CreatedResource>,
    ) -> PodNetworkError {
        warn!("Setup for {} failed at {}: {}", identity, failed_step, source);
        let (created, compensation_failures) = self.compensate(identity, created).await;
        PodNetworkError::PartialSetup {
            failed_step,
            source,
            created,
            compensation_failures,
        }
    }

    /// Delete created resources newest first when rollback is enabled.
    /// Returns what is still in place and the deletions that failed.
    async fn compensate(
        &self,
        identity: &PodIdentity,
        mut created: Vec<CreatedResource>,
    ) -> (Vec<CreatedResource>, Vec<StepFailure>) {
        let mut failures = Vec::new();
        if !self.config.rollback_on_failure {
            return (created, failures);
        }

        let mut remaining = Vec::new();
        while let Some(resource) = created.pop() {
            let (step, outcome) = match &resource {
                CreatedResource::Endpoint(id) => (
                    EngineStep::DeleteEndpoint,
                    self.remote(EngineStep::DeleteEndpoint, self.engine.delete_endpoint(id))
                        .await,
                ),
                CreatedResource::Sandbox(id) => (
                    EngineStep::DeleteSandbox,
                    self.remote(EngineStep::DeleteSandbox, self.engine.delete_sandbox(id))
                        .await,
                ),
            };
            match outcome {
                Ok(()) => debug!("Rolled back {} for {}", resource, identity),
                Err(e) => {
                    warn!("Rollback of {} for {} failed: {}", resource, identity, e);
                    failures.push(StepFailure::new(step, &e));
                    remaining.push(resource);
                }
            }
        }
        remaining.reverse();
        (remaining, failures)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release the pod's endpoint and sandbox and forget the record
    pub async fn teardown(&self, request: &CniInfo) -> Result<(), PodNetworkError> {
        let identity = request_identity(request)?;
        let _guard = self.locks.acquire(&identity).await;

        let key = StoreKey::for_pod(&identity);
        let record = match self.store.get(&key).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                return Err(PodNetworkError::NotFound(format!(
                    "no network record for pod {}",
                    identity
                )))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Tearing down network for pod {}: sandbox={}, endpoint={}",
            identity, record.sandbox_id, record.endpoint_id
        );

        let failures = self.release(&record).await;
        if !failures.is_empty() {
            warn!(
                "Teardown for {} incomplete, keeping record: {} step(s) failed",
                identity,
                failures.len()
            );
            return Err(PodNetworkError::Teardown { failures });
        }

        // The engine resources are gone whether or not the record goes too
        self.cache.invalidate(&identity);
        self.remove_record(&key, record).await?;
        info!("Pod {} network removed", identity);
        Ok(())
    }

    /// Run every teardown step, collecting the failures
    async fn release(&self, record: &PodNetworkRecord) -> Vec<StepFailure> {
        let sandbox_id = record.sandbox_id.as_str();
        let endpoint_id = record.endpoint_id.as_str();
        let mut failures = Vec::new();

        if !sandbox_id.is_empty() && !endpoint_id.is_empty() {
            if let Err(e) = self
                .remote(EngineStep::Detach, self.engine.detach(endpoint_id, sandbox_id))
                .await
            {
                warn!("Detach {} from {} failed: {}", endpoint_id, sandbox_id, e);
                failures.push(StepFailure::new(EngineStep::Detach, &e));
            }
        }

        if !endpoint_id.is_empty() {
            if let Err(e) = self
                .remote(EngineStep::DeleteEndpoint, self.engine.delete_endpoint(endpoint_id))
                .await
            {
                warn!("Delete endpoint {} failed: {}", endpoint_id, e);
                failures.push(StepFailure::new(EngineStep::DeleteEndpoint, &e));
            }
        }

        if !sandbox_id.is_empty() {
            if let Err(e) = self
                .remote(EngineStep::DeleteSandbox, self.engine.delete_sandbox(sandbox_id))
                .await
            {
                warn!("Delete sandbox {} failed: {}", sandbox_id, e);
                failures.push(StepFailure::new(EngineStep::DeleteSandbox, &e));
            }
        }

        failures
    }

    /// Delete the record, re-reading on conflict as long as it still names
    /// the resources that were just released.
    async fn remove_record(
        &self,
        key: &StoreKey,
        released: PodNetworkRecord,
    ) -> Result<(), PodNetworkError> {
        let mut current = released.clone();
        let mut attempt = 0;
        loop {
            match self.store.delete_atomic(&current).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    debug!("Delete of {} conflicted, retry {}", key, attempt);
                    current = match self.store.get(key).await {
                        Ok(record) => record,
                        Err(e) if e.is_not_found() => return Ok(()),
                        Err(e) => return Err(e.into()),
                    };
                    if !current.is_equivalent(&released) {
                        return Err(PodNetworkError::Conflict(format!(
                            "{} now names sandbox {}, not the released {}",
                            key, current.sandbox_id, released.sandbox_id
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Read the stored record for a pod, bypassing the cache
    pub async fn lookup(
        &self,
        identity: &PodIdentity,
    ) -> Result<Option<PodNetworkRecord>, PodNetworkError> {
        match self.store.get(&StoreKey::for_pod(identity)).await {
            Ok(record) => {
                if record.is_provisioned() {
                    self.cache.insert(identity.clone(), result_from(&record));
                }
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remote<T>(
        &self,
        step: EngineStep,
        call: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Engine call {} timed out after {:?}",
                    step, self.config.remote_timeout
                );
                Err(EngineError::Timeout(self.config.remote_timeout))
            }
        }
    }
}

fn request_identity(request: &CniInfo) -> Result<PodIdentity, PodNetworkError> {
    request.pod_metadata().identity().ok_or_else(|| {
        PodNetworkError::Validation(
            "pod name and namespace are required (K8S_POD_NAME, K8S_POD_NAMESPACE)".to_string(),
        )
    })
}

async fn validate_netns(netns: &str) -> Result<(), PodNetworkError> {
    if netns.is_empty() {
        return Err(PodNetworkError::Validation(
            "network namespace not present".to_string(),
        ));
    }
    tokio::fs::metadata(netns).await.map_err(|e| {
        PodNetworkError::Validation(format!("network namespace {} is not reachable: {}", netns, e))
    })?;
    Ok(())
}

fn endpoint_name(identity: &PodIdentity, container_id: &str) -> String {
    let short: String = container_id.chars().take(12).collect();
    format!("{}-{}-{}", identity.namespace, identity.name, short)
}

fn result_from(record: &PodNetworkRecord) -> SetupResult {
    SetupResult {
        sandbox_id: record.sandbox_id.clone(),
        endpoint_id: record.endpoint_id.clone(),
        network_info: record.network_info.clone(),
    }
}
