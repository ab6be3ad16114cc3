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

//! Background run execution
//!
//! ## Purpose
//! `RunWorker` turns enqueued runs into finished ones: it loops on
//! `Dequeue`, executes each claim through the control plane, and backs off
//! when the store misbehaves. `ExternalPoller` walks RUNNING async-external
//! runs and folds the provider's status into the ledger, converging with
//! inbound notifications on the same idempotent recording path.
//!
//! ## Design
//! Workers are stateless; any number may run against one ledger because the
//! claim itself is the only synchronization. Both loops stop through a
//! `tokio::sync::Notify` observed inside `tokio::select!`.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use plexgis_common::{ExecutionTier, RequestContext};
use plexgis_ledger::{RunErrorKind, RunFilter, RunStatus};
use plexgis_tiers::{CloudBatchExecutor, ExternalJobStatus};

use crate::error::ControlResult;
use crate::service::ControlPlane;

/// First delay after a failed worker iteration
const ERROR_BACKOFF_BASE_MS: u64 = 100;

/// Ceiling for the failure backoff
const ERROR_BACKOFF_MAX_MS: u64 = 5_000;

/// RUNNING async-external runs examined per poll sweep
const POLL_PAGE_SIZE: i64 = 100;

/// Claims and executes PENDING runs in the background
pub struct RunWorker {
    /// Control plane the worker claims from
    control: Arc<ControlPlane>,

    /// Claim poll interval when the queue is empty
    poll_interval: Duration,

    /// Shutdown signal
    shutdown: Arc<Notify>,
}

impl RunWorker {
    /// Create a worker; nothing runs until [`start`](RunWorker::start)
    pub fn new(control: Arc<ControlPlane>, poll_interval: Duration) -> Self {
        Self {
            control,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the worker loop on the runtime
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            worker.run_loop().await;
        })
    }

    /// Stop the worker loop
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    async fn run_loop(&self) {
        let ctx = RequestContext::internal();
        let mut failures: u32 = 0;
        let mut delay = self.poll_interval;
        info!("run worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match self.run_once(&ctx).await {
                        Ok(true) => {
                            failures = 0;
                            // Drain the queue before sleeping again.
                            delay = Duration::ZERO;
                        }
                        Ok(false) => {
                            failures = 0;
                            delay = self.poll_interval;
                        }
                        Err(e) => {
                            failures += 1;
                            delay = error_backoff(failures);
                            error!(error = %e, failures = failures, "worker iteration failed");
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }
        info!("run worker stopped");
    }

    /// Claim and execute at most one run
    ///
    /// ## Returns
    /// Whether a run was claimed; `false` means the queue was empty.
    async fn run_once(&self, ctx: &RequestContext) -> ControlResult<bool> {
        let Some(run) = self.control.dequeue(ctx).await? else {
            return Ok(false);
        };
        debug!(run_id = %run.id, tier = %run.tier, "worker claimed run");
        let finished = self.control.execute_claimed(run).await?;
        debug!(run_id = %finished.id, status = %finished.status, "worker finished run");
        Ok(true)
    }
}

/// Folds external batch job status into the ledger
pub struct ExternalPoller {
    /// Control plane holding the ledger
    control: Arc<ControlPlane>,

    /// Executor owning the provider client
    executor: Arc<CloudBatchExecutor>,

    /// Sweep interval
    poll_interval: Duration,

    /// Shutdown signal
    shutdown: Arc<Notify>,
}

impl ExternalPoller {
    /// Create a poller; nothing runs until [`start`](ExternalPoller::start)
    pub fn new(
        control: Arc<ControlPlane>,
        executor: Arc<CloudBatchExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            control,
            executor,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the poll loop on the runtime
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move {
            poller.run_loop().await;
        })
    }

    /// Stop the poll loop
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    async fn run_loop(&self) {
        let ctx = RequestContext::internal();
        let mut interval = tokio::time::interval(self.poll_interval);
        info!("external status poller started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(&ctx).await {
                        error!(error = %e, "external status sweep failed");
                    }
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }
        info!("external status poller stopped");
    }

    /// Sweep RUNNING async-external runs once
    ///
    /// ## Returns
    /// How many runs reached a terminal state in this sweep.
    pub async fn poll_once(&self, ctx: &RequestContext) -> ControlResult<usize> {
        let filter = RunFilter {
            status: Some(RunStatus::Running),
            tier: Some(ExecutionTier::CloudBatch),
            limit: Some(POLL_PAGE_SIZE),
            ..RunFilter::default()
        };
        let (runs, _) = self.control.query_runs(ctx, &filter).await?;

        let mut resolved = 0;
        for run in runs {
            // Claimed but not yet submitted; the executing worker owns it.
            if run.external_job_id.is_none() {
                continue;
            }
            match self.executor.poll(&run).await {
                Ok(ExternalJobStatus::Queued) => {}
                Ok(ExternalJobStatus::Running { progress }) => {
                    if let Err(e) = self.control.record_progress(ctx, &run.id, progress).await {
                        warn!(run_id = %run.id, error = %e, "failed to record polled progress");
                    }
                }
                Ok(ExternalJobStatus::Succeeded { output }) => {
                    self.control.record_completion(ctx, &run.id, output).await?;
                    info!(run_id = %run.id, "external job succeeded");
                    resolved += 1;
                }
                Ok(ExternalJobStatus::Failed { message }) => {
                    self.control
                        .record_failure(ctx, &run.id, RunErrorKind::Execution, &message)
                        .await?;
                    info!(run_id = %run.id, "external job failed");
                    resolved += 1;
                }
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "external status poll error");
                }
            }
        }
        Ok(resolved)
    }
}

/// Exponential backoff with jitter for consecutive worker failures
fn error_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(8) as i32;
    let base = (ERROR_BACKOFF_BASE_MS as f64 * 2.0_f64.powi(exponent)) as u64;
    let capped = base.min(ERROR_BACKOFF_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}
