// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexGIS.
//
// PlexGIS is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexGIS is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexGIS. If not, see <https://www.gnu.org/licenses/>.

//! Control plane service
//!
//! ## Purpose
//! `ControlPlane` is the single entry point for the run lifecycle: admission
//! against the registry and tenant quotas, claim and execution through the
//! tier coordinator, progress and terminal recording in the ledger, and
//! convergence of external completion notifications.
//!
//! ## Design
//! The service owns no state of its own. Every lifecycle guarantee lives in
//! the ledger (atomic admission, exactly-one claim, monotonic progress,
//! first-wins terminal writes); this layer sequences the calls and translates
//! between the registry, tier, and ledger vocabularies.
//!
//! ## Behavior
//! - `enqueue` admits and leaves the run PENDING for a worker.
//! - `execute_inline` admits, claims, executes, and returns the terminal run
//!   in one call. Execution failures are recorded on the run and returned as
//!   a FAILED run, not as an `Err`.
//! - Execution runs under the run's own tenant scope no matter which context
//!   claimed it, so a cross-tenant worker claim never widens visibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use plexgis_common::{ExecutionTier, RequestContext};
use plexgis_ledger::{
    ProcessRun, RunError, RunErrorKind, RunFilter, RunOutput, RunStatistics, RunStatus, RunStore,
};
use plexgis_registry::{
    ProcessDefinition, ProcessRegistry, ReferenceProbe, RegistryError, RegistryResult,
};
use plexgis_tiers::{progress_channel, Coordinator, ExecutionOutcome, TierError};

use crate::config::ControlPlaneConfig;
use crate::error::{ControlError, ControlResult};
use crate::object_store::ObjectStore;

/// First transient-retry delay
const RETRY_INITIAL_BACKOFF_MS: u64 = 200;

/// Transient-retry delay ceiling
const RETRY_MAX_BACKOFF_MS: u64 = 5_000;

/// A request to run a process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Process definition to execute
    pub process_id: String,

    /// Input document, validated against the definition's input schema
    pub input: Value,

    /// Claim ordering hint, higher first
    #[serde(default)]
    pub priority: i32,
}

impl RunRequest {
    /// Create a request with default priority
    pub fn new(process_id: &str, input: Value) -> Self {
        Self {
            process_id: process_id.to_string(),
            input,
            priority: 0,
        }
    }

    /// Set the claim ordering hint (builder pattern)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Provider-delivered completion message for an external job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionNotification {
    /// Job id issued by the external service at submission
    pub external_job_id: String,

    /// Output document on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure message; presence marks the notification as a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a completion notification did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The run transitioned to a terminal state
    Applied,
    /// The run was already terminal; nothing changed
    AlreadyTerminal,
    /// No run references the external job id
    Unknown,
}

/// Control plane over registry, ledger, tiers, and object storage
pub struct ControlPlane {
    registry: Arc<ProcessRegistry>,
    store: Arc<dyn RunStore>,
    coordinator: Arc<Coordinator>,
    objects: Arc<dyn ObjectStore>,
    config: ControlPlaneConfig,
}

impl ControlPlane {
    /// Create the service
    pub fn new(
        registry: Arc<ProcessRegistry>,
        store: Arc<dyn RunStore>,
        coordinator: Arc<Coordinator>,
        objects: Arc<dyn ObjectStore>,
        config: ControlPlaneConfig,
    ) -> Self {
        Self {
            registry,
            store,
            coordinator,
            objects,
            config,
        }
    }

    /// Service configuration
    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    /// Admit a request and leave the run PENDING for background execution
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id(), process_id = %request.process_id))]
    pub async fn enqueue(
        &self,
        ctx: &RequestContext,
        request: &RunRequest,
    ) -> ControlResult<ProcessRun> {
        let run = self.admit(ctx, request).await?;
        info!(
            run_id = %run.id,
            tier = %run.tier,
            priority = run.priority,
            "enqueued run"
        );
        Ok(run)
    }

    /// Admit, claim, and execute a request in one call
    ///
    /// ## Returns
    /// The terminal run. Execution failures are recorded on the run and
    /// returned as a FAILED run; `Err` is reserved for admission,
    /// validation, and claim problems where no execution was attempted.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id(), process_id = %request.process_id))]
    pub async fn execute_inline(
        &self,
        ctx: &RequestContext,
        request: &RunRequest,
    ) -> ControlResult<ProcessRun> {
        let admitted = self.admit(ctx, request).await?;
        let claimed = self.store.claim_by_id(ctx, &admitted.id).await?;
        self.execute_claimed(claimed).await
    }

    /// Claim the next eligible PENDING run, or `None` when the queue is empty
    pub async fn dequeue(&self, ctx: &RequestContext) -> ControlResult<Option<ProcessRun>> {
        Ok(self.store.claim_next(ctx).await?)
    }

    /// Execute an already-claimed RUNNING run to its conclusion
    ///
    /// Tier selection happens here, at claim time, against live capability
    /// and health. Transient tier errors are retried under the same claim up
    /// to `max_transient_retries`; all other errors are terminal for the run.
    /// An async-external submission returns the run still RUNNING with its
    /// external job id attached.
    pub async fn execute_claimed(&self, run: ProcessRun) -> ControlResult<ProcessRun> {
        let run_ctx = run_scope(&run)?;
        let definition = self.registry.get(&run_ctx, &run.process_id).await?;

        let mut run = run;
        match self.coordinator.select_tier(&definition).await {
            Ok(tier) => {
                if tier != run.tier {
                    let estimate = cost_estimate_for(&definition, tier, &run.input);
                    run = self
                        .store
                        .update_tier(&run_ctx, &run.id, tier, estimate)
                        .await?;
                    debug!(run_id = %run.id, tier = %tier, "moved run off its provisional tier");
                }
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "no tier available at claim time");
                let failed = self
                    .store
                    .record_failure(&run_ctx, &run.id, run_error_from(&e))
                    .await?;
                return Ok(failed);
            }
        }

        let (progress_tx, mut progress_rx) = progress_channel();
        let forwarder = {
            let store = self.store.clone();
            let fwd_ctx = run_ctx.clone();
            let run_id = run.id.clone();
            tokio::spawn(async move {
                while let Some(percent) = progress_rx.recv().await {
                    if let Err(e) = store.record_progress(&fwd_ctx, &run_id, percent).await {
                        warn!(run_id = %run_id, error = %e, "failed to record progress");
                    }
                }
            })
        };

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            match self.coordinator.execute(&run, progress_tx.clone()).await {
                Ok(outcome) => break Ok(outcome),
                Err(e) if e.is_transient() && attempt <= self.config.max_transient_retries => {
                    warn!(
                        run_id = %run.id,
                        attempt = attempt,
                        error = %e,
                        "transient tier failure, retrying under the same claim"
                    );
                    run = self.store.increment_retry(&run_ctx, &run.id).await?;
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(e) => break Err(e),
            }
        };
        drop(progress_tx);
        // All senders are gone once execute returns, so the forwarder drains
        // and exits; awaiting it orders progress writes before the terminal
        // write.
        let _ = forwarder.await;

        match outcome {
            Ok(ExecutionOutcome::Completed { output }) => {
                let stored = self.finalize_output(&run, output).await?;
                let finished = self.store.record_completion(&run_ctx, &run.id, stored).await?;
                info!(
                    run_id = %finished.id,
                    tier = %finished.tier,
                    duration_ms = finished.duration_ms().unwrap_or(0),
                    "run succeeded"
                );
                Ok(finished)
            }
            Ok(ExecutionOutcome::Submitted { external_job_id }) => {
                let submitted = self
                    .store
                    .set_external_job(&run_ctx, &run.id, &external_job_id)
                    .await?;
                info!(
                    run_id = %submitted.id,
                    external_job_id = %external_job_id,
                    "run submitted to external service"
                );
                Ok(submitted)
            }
            Err(e) => {
                warn!(run_id = %run.id, tier = %run.tier, error = %e, "run failed");
                let failed = self
                    .store
                    .record_failure(&run_ctx, &run.id, run_error_from(&e))
                    .await?;
                Ok(failed)
            }
        }
    }

    /// Record a progress observation for a RUNNING run
    pub async fn record_progress(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        percent: u8,
    ) -> ControlResult<ProcessRun> {
        Ok(self.store.record_progress(ctx, run_id, percent).await?)
    }

    /// Record successful completion, spilling oversized outputs
    ///
    /// Idempotent: a run that is already terminal is returned unchanged and
    /// nothing is written to the object store.
    pub async fn record_completion(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        output: Value,
    ) -> ControlResult<ProcessRun> {
        let run = self
            .store
            .get(ctx, run_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(run_id.to_string()))?;
        if run.is_terminal() {
            return Ok(run);
        }
        let stored = self.finalize_output(&run, output).await?;
        Ok(self.store.record_completion(ctx, run_id, stored).await?)
    }

    /// Record failure of a RUNNING run
    pub async fn record_failure(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        kind: RunErrorKind,
        message: &str,
    ) -> ControlResult<ProcessRun> {
        Ok(self
            .store
            .record_failure(ctx, run_id, RunError::new(kind, message))
            .await?)
    }

    /// Cancel a PENDING or RUNNING run
    ///
    /// For a run already executing, the tier's best-effort cancellation is
    /// invoked after the ledger transition; a remote completion that landed
    /// first would already have won, and later notifications are absorbed.
    ///
    /// ## Errors
    /// `InvalidState` when the run is already terminal, `NotFound` when the
    /// id is unknown or invisible to the caller.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn cancel_run(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        reason: &str,
    ) -> ControlResult<ProcessRun> {
        let existing = self
            .store
            .get(ctx, run_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(run_id.to_string()))?;

        let cancelled = self.store.cancel(ctx, run_id, reason).await?;

        // The pre-cancel row still carries the external job id the ledger
        // clears, so remote cancellation uses it.
        if existing.status == RunStatus::Running {
            let remote = self.coordinator.cancel(&existing).await;
            debug!(run_id = %run_id, acknowledged = remote, "tier cancellation requested");
        }

        info!(run_id = %run_id, reason = %reason, "cancelled run");
        Ok(cancelled)
    }

    /// Fetch one run; `None` when unknown or invisible to the caller
    pub async fn get_run(
        &self,
        ctx: &RequestContext,
        run_id: &str,
    ) -> ControlResult<Option<ProcessRun>> {
        Ok(self.store.get(ctx, run_id).await?)
    }

    /// Resolve a run's output document, reading through the object store
    /// for spilled outputs
    pub async fn fetch_output(
        &self,
        ctx: &RequestContext,
        run_id: &str,
    ) -> ControlResult<Option<Value>> {
        let run = self
            .store
            .get(ctx, run_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(run_id.to_string()))?;
        match run.output {
            None => Ok(None),
            Some(RunOutput::Inline { value }) => Ok(Some(value)),
            Some(RunOutput::Stored { key, .. }) => {
                let bytes = self.objects.get(&key).await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
        }
    }

    /// List runs newest-first with a total match count
    pub async fn query_runs(
        &self,
        ctx: &RequestContext,
        filter: &RunFilter,
    ) -> ControlResult<(Vec<ProcessRun>, i64)> {
        Ok(self.store.query(ctx, filter).await?)
    }

    /// Aggregate statistics, optionally restricted to one tenant
    pub async fn statistics(
        &self,
        ctx: &RequestContext,
        tenant_id: Option<&str>,
    ) -> ControlResult<RunStatistics> {
        Ok(self.store.statistics(ctx, tenant_id).await?)
    }

    /// Converge an external completion notification onto the ledger
    ///
    /// Duplicates and unknown ids are absorbed and logged, never surfaced as
    /// errors; polling and notifications race onto the same idempotent
    /// recording path, so whichever lands first wins. Webhook adapters run
    /// this under the internal context; the external job id is the
    /// notification's only credential.
    #[instrument(skip(self, ctx, notification), fields(external_job_id = %notification.external_job_id))]
    pub async fn handle_completion_notification(
        &self,
        ctx: &RequestContext,
        notification: CompletionNotification,
    ) -> ControlResult<NotificationOutcome> {
        let Some(run) = self
            .store
            .find_by_external_id(&notification.external_job_id)
            .await?
        else {
            warn!(
                external_job_id = %notification.external_job_id,
                "notification for unknown external job"
            );
            return Ok(NotificationOutcome::Unknown);
        };

        if run.is_terminal() {
            debug!(
                run_id = %run.id,
                status = %run.status,
                "notification for terminal run absorbed"
            );
            return Ok(NotificationOutcome::AlreadyTerminal);
        }

        match notification.error {
            Some(message) => {
                self.store
                    .record_failure(
                        ctx,
                        &run.id,
                        RunError::new(RunErrorKind::Execution, &message),
                    )
                    .await?;
            }
            None => {
                let output = notification.result.unwrap_or(Value::Null);
                let stored = self.finalize_output(&run, output).await?;
                self.store.record_completion(ctx, &run.id, stored).await?;
            }
        }

        info!(run_id = %run.id, "applied completion notification");
        Ok(NotificationOutcome::Applied)
    }

    /// Flag terminal runs completed before `older_than` as archived
    ///
    /// Archived runs stay in the ledger (they are never deleted) but drop
    /// out of queries unless the filter asks for them.
    ///
    /// ## Errors
    /// `Forbidden` for contexts that are neither admin nor internal.
    pub async fn archive_runs(
        &self,
        ctx: &RequestContext,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> ControlResult<u64> {
        require_operator(ctx, "archival")?;
        let archived = self.store.archive_older_than(older_than).await?;
        info!(archived = archived, "archived terminal runs");
        Ok(archived)
    }

    /// Fail RUNNING runs whose claim outlived `max_running_age`
    ///
    /// Recovers runs orphaned by a dead worker. Async-external runs are
    /// exempt; their lifetime belongs to the remote service.
    ///
    /// ## Errors
    /// `Forbidden` for contexts that are neither admin nor internal.
    pub async fn reclaim_stale(
        &self,
        ctx: &RequestContext,
        max_running_age: Duration,
    ) -> ControlResult<Vec<ProcessRun>> {
        require_operator(ctx, "stale-run reclaim")?;
        let reclaimed = self.store.reclaim_stale(max_running_age).await?;
        if !reclaimed.is_empty() {
            warn!(reclaimed = reclaimed.len(), "reclaimed stale runs");
        }
        Ok(reclaimed)
    }

    /// Validate a request against the registry and insert the run atomically
    /// with the tenant's quota checks
    async fn admit(
        &self,
        ctx: &RequestContext,
        request: &RunRequest,
    ) -> ControlResult<ProcessRun> {
        let definition = self.registry.get(ctx, &request.process_id).await?;
        if !definition.enabled {
            return Err(ControlError::Validation(format!(
                "process {} is disabled",
                definition.id
            )));
        }
        definition
            .input_schema
            .validate_value(&request.input)
            .map_err(ControlError::Validation)?;

        let estimate = cost_estimate_for(&definition, definition.default_tier, &request.input);
        let run = ProcessRun::new(ctx, &definition.id, definition.operation, request.input.clone())
            .with_priority(request.priority)
            .with_tier(definition.default_tier)
            .with_cost_estimate(estimate);

        let quota = self.config.quota_for(ctx.tenant_id());
        Ok(self.store.admit_insert(ctx, run, quota).await?)
    }

    /// Store an output inline or spill it to the object store by size
    async fn finalize_output(&self, run: &ProcessRun, output: Value) -> ControlResult<RunOutput> {
        let bytes = serde_json::to_vec(&output)?;
        if bytes.len() <= self.config.output_inline_max_bytes {
            return Ok(RunOutput::Inline { value: output });
        }
        let key = format!("runs/{}/{}.json", run.tenant_id, run.id);
        let size_bytes = bytes.len() as u64;
        self.objects.put(&key, bytes).await?;
        debug!(run_id = %run.id, key = %key, size_bytes = size_bytes, "spilled run output");
        Ok(RunOutput::Stored { key, size_bytes })
    }
}

/// Answers the registry's open-run probe from the ledger
///
/// Lives here rather than on `ControlPlane` so the registry can hold the
/// probe without a reference cycle back through the service.
pub struct LedgerReferenceProbe {
    store: Arc<dyn RunStore>,
}

impl LedgerReferenceProbe {
    /// Create a probe over the run ledger
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ReferenceProbe for LedgerReferenceProbe {
    async fn has_open_runs(
        &self,
        ctx: &RequestContext,
        process_id: &str,
    ) -> RegistryResult<bool> {
        for status in [RunStatus::Pending, RunStatus::Running] {
            let filter = RunFilter {
                process_id: Some(process_id.to_string()),
                status: Some(status),
                limit: Some(1),
                ..RunFilter::default()
            };
            let (_, total) = self
                .store
                .query(ctx, &filter)
                .await
                .map_err(|e| RegistryError::Backend(e.to_string()))?;
            if total > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Tenant-scoped context for ledger and registry access on behalf of a run
fn run_scope(run: &ProcessRun) -> ControlResult<RequestContext> {
    RequestContext::new(run.tenant_id.clone(), run.namespace.clone())
        .map_err(|e| ControlError::Validation(e.to_string()))
}

/// Cost estimate from the definition's per-tier rate and the input size
fn cost_estimate_for(definition: &ProcessDefinition, tier: ExecutionTier, input: &Value) -> f64 {
    let size = serde_json::to_vec(input).map(|b| b.len()).unwrap_or(0);
    definition.cost_rate(tier) * (size as f64 / 1024.0)
}

/// Translate a tier failure into the ledger's error record
fn run_error_from(err: &TierError) -> RunError {
    let kind = match err {
        TierError::InvalidInput(_) | TierError::Unsupported { .. } => RunErrorKind::Validation,
        TierError::Execution { .. } | TierError::Unavailable(_) => RunErrorKind::Execution,
        TierError::Cancelled => RunErrorKind::Cancelled,
        TierError::Backend(_) => RunErrorKind::Internal,
    };
    RunError::new(kind, &err.to_string())
}

/// Exponential backoff with a ceiling, first attempt shortest
fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as i32;
    let millis = (RETRY_INITIAL_BACKOFF_MS as f64 * 2.0_f64.powi(exponent)) as u64;
    Duration::from_millis(millis.min(RETRY_MAX_BACKOFF_MS))
}

/// Require an admin or internal context for maintenance operations
fn require_operator(ctx: &RequestContext, operation: &str) -> ControlResult<()> {
    if ctx.is_admin() || ctx.is_internal() {
        return Ok(());
    }
    Err(ControlError::Forbidden(format!(
        "{} requires an admin or internal context",
        operation
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexgis_ledger::{MemoryRunStore, TenantQuota};
    use plexgis_registry::{builtin_definitions, install_builtins, MemoryDefinitionStore};
    use plexgis_tiers::{
        CloudBatchExecutor, InMemoryBatchClient, InProcessExecutor, PostgisExecutor, TierExecutor,
    };
    use serde_json::json;

    fn test_ctx() -> RequestContext {
        RequestContext::new("acme".to_string(), "default".to_string()).unwrap()
    }

    async fn create_test_control(
        config: ControlPlaneConfig,
    ) -> (
        Arc<ControlPlane>,
        Arc<MemoryRunStore>,
        Arc<InMemoryBatchClient>,
    ) {
        let store = Arc::new(MemoryRunStore::new());
        let batch = Arc::new(InMemoryBatchClient::new());

        let registry = Arc::new(
            ProcessRegistry::new(Arc::new(MemoryDefinitionStore::new()))
                .with_reference_probe(Arc::new(LedgerReferenceProbe::new(store.clone()))),
        );
        install_builtins(&registry, &test_ctx()).await.unwrap();

        let executors: Vec<Arc<dyn TierExecutor>> = vec![
            Arc::new(InProcessExecutor::new()),
            Arc::new(PostgisExecutor::unconfigured()),
            Arc::new(CloudBatchExecutor::new(batch.clone())),
        ];
        let coordinator = Arc::new(Coordinator::new(executors));

        let control = Arc::new(ControlPlane::new(
            registry,
            store.clone(),
            coordinator,
            Arc::new(crate::object_store::MemoryObjectStore::new()),
            config,
        ));
        (control, store, batch)
    }

    fn buffer_request() -> RunRequest {
        RunRequest::new(
            "buffer",
            json!({"geometry": "LINESTRING(0 0, 10 0)", "distance": 2.0}),
        )
    }

    #[tokio::test]
    async fn test_enqueue_leaves_run_pending() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let run = control.enqueue(&ctx, &buffer_request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.tier, ExecutionTier::InProcess);
        assert!(run.cost_estimate > 0.0);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_process_is_not_found() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let err = control
            .enqueue(&ctx, &RunRequest::new("no-such-process", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_schema_violation() {
        let (control, store, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        // distance is required by the buffer schema
        let err = control
            .enqueue(
                &ctx,
                &RunRequest::new("buffer", json!({"geometry": "POINT(0 0)"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        let (runs, total) = store.query(&ctx, &RunFilter::default()).await.unwrap();
        assert!(runs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_disabled_process() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let mut definition = builtin_definitions()
            .into_iter()
            .find(|d| d.id == "buffer")
            .unwrap();
        definition.enabled = false;
        control.registry.register(&ctx, definition).await.unwrap();

        let err = control.enqueue(&ctx, &buffer_request()).await.unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_admission_denied_at_quota() {
        let config = ControlPlaneConfig::default().with_tenant_quota(
            "acme",
            TenantQuota {
                max_concurrent: 1,
                ..TenantQuota::default()
            },
        );
        let (control, _, _) = create_test_control(config).await;
        let ctx = test_ctx();

        control.enqueue(&ctx, &buffer_request()).await.unwrap();
        let err = control.enqueue(&ctx, &buffer_request()).await.unwrap_err();
        assert!(
            matches!(err, ControlError::AdmissionDenied { ref tenant_id, .. } if tenant_id == "acme")
        );
    }

    #[tokio::test]
    async fn test_execute_inline_buffer_succeeds() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let run = control
            .execute_inline(&ctx, &buffer_request())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.progress, 100);

        let output = control.fetch_output(&ctx, &run.id).await.unwrap().unwrap();
        let area = output["area"].as_f64().unwrap();
        // Straight segment capsule: 2 d L + pi d^2, polygonal arcs a touch
        // under the analytic value.
        let expected = 2.0 * 2.0 * 10.0 + std::f64::consts::PI * 4.0;
        assert!(
            (area - expected).abs() / expected < 0.01,
            "area {} vs expected {}",
            area,
            expected
        );
    }

    #[tokio::test]
    async fn test_execute_inline_records_bad_geometry_as_failed() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let run = control
            .execute_inline(
                &ctx,
                &RunRequest::new(
                    "buffer",
                    json!({"geometry": "not a geometry", "distance": 1.0}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let error = run.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_spatial_join_fails_without_capable_tier() {
        // The in-process tier refuses spatial joins and the database tier is
        // unconfigured, so a join-only preference list has nowhere to go.
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let mut definition = builtin_definitions()
            .into_iter()
            .find(|d| d.id == "spatial_join")
            .unwrap();
        definition.supported_tiers = vec![ExecutionTier::InProcess, ExecutionTier::Postgis];
        definition.default_tier = ExecutionTier::InProcess;
        control.registry.register(&ctx, definition).await.unwrap();

        let run = control
            .execute_inline(
                &ctx,
                &RunRequest::new(
                    "spatial_join",
                    json!({
                        "left": ["POINT(0 0)"],
                        "right": ["POINT(0 0)"],
                        "predicate": "INTERSECTS"
                    }),
                ),
            )
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().kind, RunErrorKind::Execution);
    }

    #[tokio::test]
    async fn test_cloud_batch_submission_stays_running() {
        let (control, _, batch) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let mut definition = builtin_definitions()
            .into_iter()
            .find(|d| d.id == "buffer")
            .unwrap();
        definition.supported_tiers = vec![ExecutionTier::CloudBatch];
        definition.default_tier = ExecutionTier::CloudBatch;
        control.registry.register(&ctx, definition).await.unwrap();

        let run = control
            .execute_inline(&ctx, &buffer_request())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        let external_id = run.external_job_id.clone().unwrap();
        assert_eq!(batch.submitted_ids().await, vec![external_id]);
    }

    #[tokio::test]
    async fn test_notification_applies_once_first_wins() {
        let (control, store, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let mut definition = builtin_definitions()
            .into_iter()
            .find(|d| d.id == "buffer")
            .unwrap();
        definition.supported_tiers = vec![ExecutionTier::CloudBatch];
        definition.default_tier = ExecutionTier::CloudBatch;
        control.registry.register(&ctx, definition).await.unwrap();

        let run = control
            .execute_inline(&ctx, &buffer_request())
            .await
            .unwrap();
        let external_id = run.external_job_id.clone().unwrap();

        let internal = RequestContext::internal();
        let first = control
            .handle_completion_notification(
                &internal,
                CompletionNotification {
                    external_job_id: external_id.clone(),
                    result: Some(json!({"area": 1.0})),
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(first, NotificationOutcome::Applied);

        let second = control
            .handle_completion_notification(
                &internal,
                CompletionNotification {
                    external_job_id: external_id,
                    result: Some(json!({"area": 999.0})),
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(second, NotificationOutcome::AlreadyTerminal);

        let stored = store.get(&ctx, &run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        match stored.output.unwrap() {
            RunOutput::Inline { value } => assert_eq!(value["area"], json!(1.0)),
            other => panic!("expected inline output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_for_unknown_job_absorbed() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let internal = RequestContext::internal();

        let outcome = control
            .handle_completion_notification(
                &internal,
                CompletionNotification {
                    external_job_id: "never-issued".to_string(),
                    result: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, NotificationOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_large_output_spills_to_object_store() {
        let config = ControlPlaneConfig {
            output_inline_max_bytes: 64,
            ..ControlPlaneConfig::default()
        };
        let (control, store, _) = create_test_control(config).await;
        let ctx = test_ctx();

        let run = control
            .execute_inline(&ctx, &buffer_request())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);

        let stored = store.get(&ctx, &run.id).await.unwrap().unwrap();
        match stored.output.clone().unwrap() {
            RunOutput::Stored { key, size_bytes } => {
                assert_eq!(key, format!("runs/acme/{}.json", run.id));
                assert!(size_bytes > 64);
            }
            other => panic!("expected spilled output, got {:?}", other),
        }

        // Reads resolve through the object store transparently.
        let output = control.fetch_output(&ctx, &run.id).await.unwrap().unwrap();
        assert!(output["area"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_cancel_pending_then_terminal_is_invalid_state() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let run = control.enqueue(&ctx, &buffer_request()).await.unwrap();
        let cancelled = control
            .cancel_run(&ctx, &run.id, "operator request")
            .await
            .unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);

        let err = control
            .cancel_run(&ctx, &run.id, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_reference_probe_sees_open_runs() {
        let (control, store, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let probe = LedgerReferenceProbe::new(store.clone());
        assert!(!probe.has_open_runs(&ctx, "buffer").await.unwrap());

        let run = control.enqueue(&ctx, &buffer_request()).await.unwrap();
        assert!(probe.has_open_runs(&ctx, "buffer").await.unwrap());

        control.cancel_run(&ctx, &run.id, "test").await.unwrap();
        assert!(!probe.has_open_runs(&ctx, "buffer").await.unwrap());
    }

    #[tokio::test]
    async fn test_archive_requires_operator_context() {
        let (control, _, _) = create_test_control(ControlPlaneConfig::default()).await;
        let ctx = test_ctx();

        let err = control
            .archive_runs(&ctx, chrono::Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Forbidden(_)));

        let internal = RequestContext::internal();
        assert_eq!(control.archive_runs(&internal, chrono::Utc::now()).await.unwrap(), 0);
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(200));
        assert_eq!(retry_backoff(2), Duration::from_millis(400));
        assert_eq!(retry_backoff(3), Duration::from_millis(800));
        assert_eq!(retry_backoff(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_run_error_kinds() {
        let err = run_error_from(&TierError::InvalidInput("x".to_string()));
        assert_eq!(err.kind, RunErrorKind::Validation);

        let err = run_error_from(&TierError::Cancelled);
        assert_eq!(err.kind, RunErrorKind::Cancelled);

        let err = run_error_from(&TierError::Backend("x".to_string()));
        assert_eq!(err.kind, RunErrorKind::Internal);
    }
}
