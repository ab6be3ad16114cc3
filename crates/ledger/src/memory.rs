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

//! In-memory run ledger
//!
//! ## Purpose
//! HashMap-backed `RunStore` for tests and single-process deployments.
//!
//! ## Design Decisions
//! Every mutating method takes the single write lock for its whole critical
//! section, so admission counting plus insert, and candidate selection plus
//! claim, are atomic exactly like their SQL counterparts.
//!
//! ## Limitations
//! - Not persistent (ledger lost on restart)
//! - Not shared across processes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plexgis_common::{ExecutionTier, RequestContext};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{LedgerError, LedgerResult};
use crate::store::RunStore;
use crate::types::{
    ProcessRun, RunError, RunErrorKind, RunFilter, RunOutput, RunStatistics, RunStatus,
    TenantQuota,
};

/// In-memory `RunStore` implementation
#[derive(Clone)]
pub struct MemoryRunStore {
    runs: Arc<RwLock<HashMap<String, ProcessRun>>>,
}

impl MemoryRunStore {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn can_view(ctx: &RequestContext, run: &ProcessRun) -> bool {
        ctx.can_access_tenant(&run.tenant_id)
    }

    fn tenant_scope<'a>(ctx: &'a RequestContext, filter: &'a RunFilter) -> Option<&'a str> {
        if ctx.is_admin() || ctx.is_internal() {
            filter.tenant_id.as_deref()
        } else {
            Some(ctx.tenant_id())
        }
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn admit_insert(
        &self,
        ctx: &RequestContext,
        run: ProcessRun,
        quota: &TenantQuota,
    ) -> LedgerResult<ProcessRun> {
        if !ctx.can_access_tenant(&run.tenant_id) {
            return Err(LedgerError::InvalidUpdate(format!(
                "context for tenant {} cannot submit runs for tenant {}",
                ctx.tenant_id(),
                run.tenant_id
            )));
        }
        let mut runs = self.runs.write().await;
        let now = Utc::now();
        let window_start = now - chrono::Duration::seconds(quota.window_secs);
        let rate_start = now - chrono::Duration::seconds(quota.rate_window_secs);

        let mut concurrent = 0i64;
        let mut in_window = 0i64;
        let mut in_rate_window = 0i64;
        for existing in runs.values().filter(|r| r.tenant_id == run.tenant_id) {
            if matches!(existing.status, RunStatus::Pending | RunStatus::Running) {
                concurrent += 1;
            }
            if existing.submitted_at >= window_start {
                in_window += 1;
            }
            if existing.submitted_at >= rate_start {
                in_rate_window += 1;
            }
        }

        if concurrent >= quota.max_concurrent {
            return Err(LedgerError::AdmissionDenied {
                tenant_id: run.tenant_id.clone(),
                reason: format!("concurrent runs at limit ({})", quota.max_concurrent),
            });
        }
        if in_window >= quota.max_per_window {
            return Err(LedgerError::AdmissionDenied {
                tenant_id: run.tenant_id.clone(),
                reason: format!(
                    "submissions in {}s window at limit ({})",
                    quota.window_secs, quota.max_per_window
                ),
            });
        }
        if in_rate_window >= quota.rate_limit {
            return Err(LedgerError::AdmissionDenied {
                tenant_id: run.tenant_id.clone(),
                reason: format!(
                    "rate limit reached ({}/{}s)",
                    quota.rate_limit, quota.rate_window_secs
                ),
            });
        }

        runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn claim_next(&self, ctx: &RequestContext) -> LedgerResult<Option<ProcessRun>> {
        let mut runs = self.runs.write().await;
        let cross_tenant = ctx.is_admin() || ctx.is_internal();
        let candidate = runs
            .values()
            .filter(|r| r.status == RunStatus::Pending && !r.archived)
            .filter(|r| cross_tenant || r.tenant_id == ctx.tenant_id())
            .min_by_key(|r| (Reverse(r.priority), r.submitted_at, r.id.clone()))
            .map(|r| r.id.clone());

        match candidate {
            Some(id) => {
                // get_mut on a key just selected under the same write lock
                let run = runs
                    .get_mut(&id)
                    .ok_or_else(|| LedgerError::ConcurrencyConflict(id.clone()))?;
                run.status = RunStatus::Running;
                run.started_at = Some(Utc::now());
                Ok(Some(run.clone()))
            }
            None => Ok(None),
        }
    }

    async fn claim_by_id(&self, ctx: &RequestContext, run_id: &str) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        match run.status {
            RunStatus::Pending => {
                run.status = RunStatus::Running;
                run.started_at = Some(Utc::now());
                Ok(run.clone())
            }
            RunStatus::Running => Err(LedgerError::ConcurrencyConflict(run_id.to_string())),
            terminal => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: terminal.to_string(),
                to: RunStatus::Running.to_string(),
            }),
        }
    }

    async fn record_progress(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        progress: u8,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        if run.status == RunStatus::Running {
            let clamped = progress.min(100);
            if clamped > run.progress {
                run.progress = clamped;
            }
        }
        Ok(run.clone())
    }

    async fn record_completion(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        output: RunOutput,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        match run.status {
            RunStatus::Running => {
                run.status = RunStatus::Succeeded;
                run.output = Some(output);
                run.error = None;
                run.progress = 100;
                run.completed_at = Some(Utc::now());
                Ok(run.clone())
            }
            RunStatus::Pending => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Succeeded.to_string(),
            }),
            _ => Ok(run.clone()),
        }
    }

    async fn record_failure(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        error: RunError,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        match run.status {
            RunStatus::Running => {
                run.status = RunStatus::Failed;
                run.error = Some(error);
                run.output = None;
                run.completed_at = Some(Utc::now());
                Ok(run.clone())
            }
            RunStatus::Pending => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Failed.to_string(),
            }),
            _ => Ok(run.clone()),
        }
    }

    async fn cancel(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        reason: &str,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        match run.status {
            RunStatus::Pending | RunStatus::Running => {
                run.status = RunStatus::Cancelled;
                run.error = Some(RunError::new(RunErrorKind::Cancelled, reason));
                run.output = None;
                run.external_job_id = None;
                run.completed_at = Some(Utc::now());
                Ok(run.clone())
            }
            terminal => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: terminal.to_string(),
                to: RunStatus::Cancelled.to_string(),
            }),
        }
    }

    async fn update_tier(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        tier: ExecutionTier,
        cost_estimate: f64,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Running {
            return Err(LedgerError::InvalidUpdate(format!(
                "tier of run {} can only change while RUNNING, status is {}",
                run_id, run.status
            )));
        }
        run.tier = tier;
        run.cost_estimate = cost_estimate;
        Ok(run.clone())
    }

    async fn set_external_job(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        external_job_id: &str,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Running || run.tier != ExecutionTier::CloudBatch {
            return Err(LedgerError::InvalidUpdate(format!(
                "external job id requires a RUNNING CLOUD_BATCH run, run {} is {} on {}",
                run_id, run.status, run.tier
            )));
        }
        run.external_job_id = Some(external_job_id.to_string());
        Ok(run.clone())
    }

    async fn increment_retry(
        &self,
        ctx: &RequestContext,
        run_id: &str,
    ) -> LedgerResult<ProcessRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Running {
            return Err(LedgerError::InvalidUpdate(format!(
                "retry counter of run {} can only change while RUNNING",
                run_id
            )));
        }
        run.retry_count += 1;
        Ok(run.clone())
    }

    async fn get(&self, ctx: &RequestContext, run_id: &str) -> LedgerResult<Option<ProcessRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(run_id)
            .filter(|r| Self::can_view(ctx, r))
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        external_job_id: &str,
    ) -> LedgerResult<Option<ProcessRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .find(|r| r.external_job_id.as_deref() == Some(external_job_id))
            .cloned())
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        filter: &RunFilter,
    ) -> LedgerResult<(Vec<ProcessRun>, i64)> {
        let runs = self.runs.read().await;
        let tenant = Self::tenant_scope(ctx, filter);
        let mut matched: Vec<ProcessRun> = runs
            .values()
            .filter(|r| tenant.map_or(true, |t| r.tenant_id == t))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let total = matched.len() as i64;

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let mut page: Vec<ProcessRun> = matched.into_iter().skip(offset).collect();
        if let Some(limit) = filter.limit {
            page.truncate(limit.max(0) as usize);
        }
        Ok((page, total))
    }

    async fn statistics(
        &self,
        ctx: &RequestContext,
        tenant_id: Option<&str>,
    ) -> LedgerResult<RunStatistics> {
        let runs = self.runs.read().await;
        let scope = if ctx.is_admin() || ctx.is_internal() {
            tenant_id
        } else {
            Some(ctx.tenant_id())
        };

        let mut stats = RunStatistics::default();
        let mut duration_sum = 0.0;
        let mut duration_count = 0u64;
        for run in runs
            .values()
            .filter(|r| scope.map_or(true, |t| r.tenant_id == t))
        {
            stats.total += 1;
            *stats.by_status.entry(run.status.to_string()).or_insert(0) += 1;
            *stats.by_tier.entry(run.tier.to_string()).or_insert(0) += 1;
            stats.total_cost_estimate += run.cost_estimate;
            if let Some(ms) = run.duration_ms() {
                duration_sum += ms as f64;
                duration_count += 1;
            }
        }
        if duration_count > 0 {
            stats.avg_duration_ms = Some(duration_sum / duration_count as f64);
        }
        Ok(stats)
    }

    async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let mut runs = self.runs.write().await;
        let mut archived = 0u64;
        for run in runs.values_mut() {
            if run.status.is_terminal()
                && !run.archived
                && run.completed_at.is_some_and(|at| at < cutoff)
            {
                run.archived = true;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn reclaim_stale(&self, max_running_age: Duration) -> LedgerResult<Vec<ProcessRun>> {
        let age = chrono::Duration::from_std(max_running_age)
            .map_err(|e| LedgerError::InvalidUpdate(e.to_string()))?;
        let threshold = Utc::now() - age;

        let mut runs = self.runs.write().await;
        let mut reclaimed = Vec::new();
        for run in runs.values_mut() {
            if run.status == RunStatus::Running
                && run.tier != ExecutionTier::CloudBatch
                && run.started_at.is_some_and(|at| at < threshold)
            {
                run.status = RunStatus::Failed;
                run.error = Some(RunError::new(
                    RunErrorKind::Timeout,
                    "run exceeded max running age",
                ));
                run.completed_at = Some(Utc::now());
                reclaimed.push(run.clone());
            }
        }
        Ok(reclaimed)
    }
}
