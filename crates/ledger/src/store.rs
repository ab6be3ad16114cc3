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

//! Run ledger storage contract
//!
//! ## Purpose
//! The `RunStore` trait is the concurrency boundary of the control plane.
//! Every guarantee the system makes about claims, quotas, and terminal
//! writes is a guarantee about one of these methods:
//!
//! - `admit_insert` checks quota counters and inserts the run in one atomic
//!   step. Counters are derived from ledger rows inside that same step, so
//!   admission never races a concurrent insert into overshoot.
//! - `claim_next`/`claim_by_id` move PENDING to RUNNING such that no two
//!   callers can claim the same run. Implementations use storage-level
//!   atomicity (a guarded UPDATE, a single write lock), never cooperation
//!   between workers.
//! - `record_completion`/`record_failure` are idempotent: the first terminal
//!   write wins and later calls return the stored run unchanged.
//!
//! ## Tenancy
//! Non-admin contexts see only their own tenant. Lookups for another
//! tenant's run answer as if the run did not exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plexgis_common::{ExecutionTier, RequestContext};
use std::time::Duration;

use crate::error::LedgerResult;
use crate::types::{
    ProcessRun, RunError, RunFilter, RunOutput, RunStatistics, TenantQuota,
};

/// Durable, concurrency-safe run ledger
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Atomically check admission quotas and insert a PENDING run
    ///
    /// All three limits (concurrent, window, rate) are evaluated from ledger
    /// counts in the same atomic step as the insert.
    ///
    /// ## Errors
    /// `AdmissionDenied` naming the violated limit when any counter is at
    /// its quota.
    async fn admit_insert(
        &self,
        ctx: &RequestContext,
        run: ProcessRun,
        quota: &TenantQuota,
    ) -> LedgerResult<ProcessRun>;

    /// Claim the next PENDING run, moving it to RUNNING
    ///
    /// Ordering: priority descending, then submission time, then id.
    /// Admin and internal contexts claim across tenants; others only their
    /// own. Returns `None` when nothing is claimable.
    async fn claim_next(&self, ctx: &RequestContext) -> LedgerResult<Option<ProcessRun>>;

    /// Claim one specific PENDING run
    ///
    /// ## Errors
    /// - `RunNotFound` when the id is unknown or invisible to the caller
    /// - `ConcurrencyConflict` when another worker holds the claim
    /// - `InvalidTransition` when the run is already terminal
    async fn claim_by_id(&self, ctx: &RequestContext, run_id: &str) -> LedgerResult<ProcessRun>;

    /// Record a progress observation
    ///
    /// Progress is monotonic: stale or non-increasing values are discarded
    /// without error, and observations against terminal runs are no-ops.
    /// Values above 100 are clamped.
    async fn record_progress(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        progress: u8,
    ) -> LedgerResult<ProcessRun>;

    /// Record successful completion of a RUNNING run
    ///
    /// Idempotent: a run that is already terminal is returned unchanged, no
    /// matter which terminal state it reached first.
    ///
    /// ## Errors
    /// `InvalidTransition` when the run is still PENDING.
    async fn record_completion(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        output: RunOutput,
    ) -> LedgerResult<ProcessRun>;

    /// Record failure of a RUNNING run; idempotence mirrors
    /// [`record_completion`](RunStore::record_completion)
    async fn record_failure(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        error: RunError,
    ) -> LedgerResult<ProcessRun>;

    /// Cancel a PENDING or RUNNING run
    ///
    /// Clears any external job id and records a CANCELLED error with the
    /// given reason.
    ///
    /// ## Errors
    /// `InvalidTransition` when the run is already terminal.
    async fn cancel(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        reason: &str,
    ) -> LedgerResult<ProcessRun>;

    /// Overwrite the tier and cost estimate of a RUNNING run
    ///
    /// Used by the claim-time tier selection when it lands somewhere other
    /// than the provisional tier recorded at admission.
    async fn update_tier(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        tier: ExecutionTier,
        cost_estimate: f64,
    ) -> LedgerResult<ProcessRun>;

    /// Attach the external service job id to a RUNNING CLOUD_BATCH run
    ///
    /// ## Errors
    /// `InvalidUpdate` when the run is not RUNNING on the CLOUD_BATCH tier.
    async fn set_external_job(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        external_job_id: &str,
    ) -> LedgerResult<ProcessRun>;

    /// Bump the transient retry counter of a RUNNING run
    async fn increment_retry(&self, ctx: &RequestContext, run_id: &str)
        -> LedgerResult<ProcessRun>;

    /// Fetch one run; `None` when unknown or invisible to the caller
    async fn get(&self, ctx: &RequestContext, run_id: &str) -> LedgerResult<Option<ProcessRun>>;

    /// Resolve a run by its external service job id
    async fn find_by_external_id(
        &self,
        external_job_id: &str,
    ) -> LedgerResult<Option<ProcessRun>>;

    /// List runs newest-first
    ///
    /// ## Returns
    /// The matching page and the total match count before pagination.
    async fn query(
        &self,
        ctx: &RequestContext,
        filter: &RunFilter,
    ) -> LedgerResult<(Vec<ProcessRun>, i64)>;

    /// Aggregate statistics, optionally restricted to one tenant
    async fn statistics(
        &self,
        ctx: &RequestContext,
        tenant_id: Option<&str>,
    ) -> LedgerResult<RunStatistics>;

    /// Mark terminal runs completed before `cutoff` as archived
    ///
    /// ## Returns
    /// The number of rows newly archived.
    async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64>;

    /// Fail RUNNING runs whose claim is older than `max_running_age`
    ///
    /// CLOUD_BATCH runs are exempt: their lifetime is owned by the external
    /// service and resolved by polling or notification.
    ///
    /// ## Returns
    /// The runs that were transitioned to FAILED with a TIMEOUT error.
    async fn reclaim_stale(&self, max_running_age: Duration) -> LedgerResult<Vec<ProcessRun>>;
}
