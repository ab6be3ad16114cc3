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

//! Asynchronous external execution tier
//!
//! ## Purpose
//! Hands runs to an external batch service and returns immediately; the
//! run's remaining lifetime is observed through polling and inbound
//! completion notifications, both of which converge on the ledger's
//! idempotent terminal recording.
//!
//! ## Design
//! - `BatchClient` is the only provider seam: `submit`, `get_status`,
//!   `cancel`. Deployments implement it against their batch service; tests
//!   and local runs use [`InMemoryBatchClient`] with programmable status
//!   transitions.
//! - The executor always reports capable and healthy: feasibility is the
//!   remote system's call, surfaced later as a failed status.
//! - Remote cancel is best-effort and races remote completion; whichever
//!   terminal write reaches the ledger first wins.

use async_trait::async_trait;
use plexgis_common::{ExecutionTier, SpatialOperation};
use plexgis_ledger::ProcessRun;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::{TierError, TierResult};
use crate::executor::{ExecutionOutcome, ProgressSender, TierExecutor};

/// Remote job state as reported by the batch service
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalJobStatus {
    /// Accepted, not started
    Queued,
    /// In flight with a coarse progress estimate
    Running {
        /// Remote progress, 0-100
        progress: u8,
    },
    /// Finished with an output document
    Succeeded {
        /// Output document
        output: Value,
    },
    /// Finished unsuccessfully
    Failed {
        /// Remote failure detail
        message: String,
    },
}

impl ExternalJobStatus {
    /// Whether the remote job can change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Provider seam for the external batch service
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Submit a serialized job payload
    ///
    /// ## Returns
    /// The job id assigned by the external service.
    async fn submit(&self, payload: Value) -> TierResult<String>;

    /// Fetch the current status of a submitted job
    ///
    /// ## Errors
    /// `Backend` when the id is unknown to the service.
    async fn get_status(&self, external_job_id: &str) -> TierResult<ExternalJobStatus>;

    /// Request cancellation of a submitted job
    ///
    /// ## Returns
    /// `true` when the service accepted the cancellation; `false` when the
    /// job already finished.
    async fn cancel(&self, external_job_id: &str) -> TierResult<bool>;
}

/// In-memory batch service with programmable transitions
///
/// Jobs enter `Queued` on submit and move only when a test (or local
/// harness) drives them through [`advance`](InMemoryBatchClient::advance),
/// [`complete`](InMemoryBatchClient::complete), or
/// [`fail`](InMemoryBatchClient::fail).
pub struct InMemoryBatchClient {
    jobs: Arc<RwLock<HashMap<String, ExternalJobStatus>>>,
    reject_submissions: AtomicBool,
}

impl InMemoryBatchClient {
    /// Create an empty service
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            reject_submissions: AtomicBool::new(false),
        }
    }

    /// Make subsequent submissions fail with a backend error
    pub fn set_reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    /// Move a job to `Running` with the given progress
    pub async fn advance(&self, external_job_id: &str, progress: u8) {
        let mut jobs = self.jobs.write().await;
        if let Some(status) = jobs.get_mut(external_job_id) {
            if !status.is_terminal() {
                *status = ExternalJobStatus::Running {
                    progress: progress.min(100),
                };
            }
        }
    }

    /// Move a job to `Succeeded`; later transitions are ignored
    pub async fn complete(&self, external_job_id: &str, output: Value) {
        let mut jobs = self.jobs.write().await;
        if let Some(status) = jobs.get_mut(external_job_id) {
            if !status.is_terminal() {
                *status = ExternalJobStatus::Succeeded { output };
            }
        }
    }

    /// Move a job to `Failed`; later transitions are ignored
    pub async fn fail(&self, external_job_id: &str, message: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(status) = jobs.get_mut(external_job_id) {
            if !status.is_terminal() {
                *status = ExternalJobStatus::Failed {
                    message: message.to_string(),
                };
            }
        }
    }

    /// Ids of every job the service has accepted
    pub async fn submitted_ids(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }
}

impl Default for InMemoryBatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchClient for InMemoryBatchClient {
    async fn submit(&self, _payload: Value) -> TierResult<String> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(TierError::Backend(
                "batch service rejected submission".to_string(),
            ));
        }
        let id = Ulid::new().to_string();
        self.jobs
            .write()
            .await
            .insert(id.clone(), ExternalJobStatus::Queued);
        Ok(id)
    }

    async fn get_status(&self, external_job_id: &str) -> TierResult<ExternalJobStatus> {
        self.jobs
            .read()
            .await
            .get(external_job_id)
            .cloned()
            .ok_or_else(|| {
                TierError::Backend(format!("unknown external job: {}", external_job_id))
            })
    }

    async fn cancel(&self, external_job_id: &str) -> TierResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(external_job_id) {
            Some(status) if !status.is_terminal() => {
                *status = ExternalJobStatus::Failed {
                    message: "cancelled by caller".to_string(),
                };
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }
}

/// Executor delegating to the external batch service
pub struct CloudBatchExecutor {
    client: Arc<dyn BatchClient>,
}

impl CloudBatchExecutor {
    /// Create the executor over a provider client
    pub fn new(client: Arc<dyn BatchClient>) -> Self {
        Self { client }
    }

    /// Current remote status of a submitted run
    ///
    /// ## Errors
    /// `InvalidInput` when the run has no external job id yet.
    pub async fn poll(&self, run: &ProcessRun) -> TierResult<ExternalJobStatus> {
        let external_job_id = run.external_job_id.as_deref().ok_or_else(|| {
            TierError::InvalidInput(format!("run {} has no external job id", run.id))
        })?;
        self.client.get_status(external_job_id).await
    }
}

#[async_trait]
impl TierExecutor for CloudBatchExecutor {
    fn tier(&self) -> ExecutionTier {
        ExecutionTier::CloudBatch
    }

    async fn can_execute(&self, _operation: SpatialOperation) -> bool {
        // Feasibility is deferred to the remote service.
        true
    }

    async fn execute(
        &self,
        run: &ProcessRun,
        _progress: ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        let payload = json!({
            "run_id": run.id,
            "tenant_id": run.tenant_id,
            "process_id": run.process_id,
            "operation": run.operation.to_string(),
            "input": run.input,
        });
        let external_job_id = self.client.submit(payload).await?;
        info!(run_id = %run.id, external_job_id = %external_job_id, "submitted to batch service");
        Ok(ExecutionOutcome::Submitted { external_job_id })
    }

    async fn cancel(&self, run: &ProcessRun) -> bool {
        let Some(external_job_id) = run.external_job_id.as_deref() else {
            return false;
        };
        match self.client.cancel(external_job_id).await {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(run_id = %run.id, error = %e, "remote cancel failed");
                false
            }
        }
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::progress_channel;
    use plexgis_common::RequestContext;

    fn test_run(input: Value) -> ProcessRun {
        let ctx = RequestContext::new("tenant-a".to_string(), "default".to_string()).unwrap();
        ProcessRun::new(&ctx, "buffer", SpatialOperation::Buffer, input)
            .with_tier(ExecutionTier::CloudBatch)
    }

    fn create_test_executor() -> (CloudBatchExecutor, Arc<InMemoryBatchClient>) {
        let client = Arc::new(InMemoryBatchClient::new());
        (CloudBatchExecutor::new(client.clone()), client)
    }

    #[tokio::test]
    async fn test_execute_submits_and_returns_immediately() {
        let (executor, client) = create_test_executor();
        let run = test_run(json!({"geometry": "POINT(0 0)", "distance": 1.0}));

        let (tx, _rx) = progress_channel();
        let outcome = executor.execute(&run, tx).await.unwrap();
        let ExecutionOutcome::Submitted { external_job_id } = outcome else {
            panic!("expected submitted outcome");
        };

        assert_eq!(
            client.get_status(&external_job_id).await.unwrap(),
            ExternalJobStatus::Queued
        );
        assert_eq!(client.submitted_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_programmed_transitions() {
        let client = InMemoryBatchClient::new();
        let id = client.submit(json!({})).await.unwrap();

        client.advance(&id, 40).await;
        assert_eq!(
            client.get_status(&id).await.unwrap(),
            ExternalJobStatus::Running { progress: 40 }
        );

        client.complete(&id, json!({"geometry": "POINT(1 1)"})).await;
        assert!(client.get_status(&id).await.unwrap().is_terminal());

        // Terminal states are sticky.
        client.fail(&id, "too late").await;
        assert!(matches!(
            client.get_status(&id).await.unwrap(),
            ExternalJobStatus::Succeeded { .. }
        ));
    }

    #[tokio::test]
    async fn test_rejected_submission_is_backend_error() {
        let (executor, client) = create_test_executor();
        client.set_reject_submissions(true);
        let run = test_run(json!({"geometry": "POINT(0 0)", "distance": 1.0}));

        let (tx, _rx) = progress_channel();
        let result = executor.execute(&run, tx).await;
        assert!(matches!(result, Err(TierError::Backend(_))));
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_cancel_requires_external_id() {
        let (executor, client) = create_test_executor();
        let mut run = test_run(json!({"geometry": "POINT(0 0)", "distance": 1.0}));
        assert!(!executor.cancel(&run).await);

        let id = client.submit(json!({})).await.unwrap();
        run.external_job_id = Some(id.clone());
        assert!(executor.cancel(&run).await);

        // Already finished on the remote side: cancel is refused.
        assert!(!executor.cancel(&run).await);
    }

    #[tokio::test]
    async fn test_poll_reports_remote_status() {
        let (executor, client) = create_test_executor();
        let mut run = test_run(json!({"geometry": "POINT(0 0)", "distance": 1.0}));
        assert!(matches!(
            executor.poll(&run).await,
            Err(TierError::InvalidInput(_))
        ));

        let id = client.submit(json!({})).await.unwrap();
        run.external_job_id = Some(id.clone());
        assert_eq!(
            executor.poll(&run).await.unwrap(),
            ExternalJobStatus::Queued
        );

        client.fail(&id, "out of memory").await;
        assert!(matches!(
            executor.poll(&run).await.unwrap(),
            ExternalJobStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_status_is_backend_error() {
        let client = InMemoryBatchClient::new();
        assert!(matches!(
            client.get_status("no-such-job").await,
            Err(TierError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_always_capable_and_healthy() {
        let (executor, _) = create_test_executor();
        assert_eq!(executor.tier(), ExecutionTier::CloudBatch);
        assert!(executor.healthy().await);
        for op in SpatialOperation::all() {
            assert!(executor.can_execute(*op).await);
        }
    }
}
