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

//! SQLite-backed run ledger
//!
//! ## Purpose
//! Durable `RunStore` suitable for single-node deployments and for proving
//! out the SQL shapes a PostgreSQL port reuses unchanged.
//!
//! ## Design Decisions
//! - Admission runs inside one `BEGIN IMMEDIATE` transaction: the write
//!   lock taken up front serializes the quota counts with the insert, so
//!   two racing submissions cannot both pass a nearly-full quota.
//! - Claims are one guarded `UPDATE ... WHERE status = 'PENDING'` with a
//!   nested candidate SELECT and `RETURNING *`. A run claimed by another
//!   worker between candidate selection and the update simply fails the
//!   guard, so exactly one claimer wins without any cross-worker lock.
//! - Terminal writes guard on `status = 'RUNNING'`; a miss falls back to a
//!   read that classifies the situation (idempotent replay, premature
//!   completion, unknown id) instead of guessing.
//! - Timestamps are stored as epoch milliseconds in BIGINT columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plexgis_common::{ExecutionTier, RequestContext, SpatialOperation};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use std::time::Duration;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::store::RunStore;
use crate::types::{
    ProcessRun, RunError, RunErrorKind, RunFilter, RunOutput, RunStatistics, RunStatus,
    TenantQuota,
};

const INSERT_RUN: &str = r#"
INSERT INTO process_runs
    (id, tenant_id, namespace, process_id, operation, status, tier, priority,
     input, output, error, progress, retry_count, cost_estimate,
     external_job_id, submitted_at, started_at, completed_at, archived)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// SQLite-based run ledger
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: Pool<Sqlite>,
}

impl SqliteRunStore {
    /// Create a ledger over an existing pool, creating the schema if needed
    pub async fn new(pool: Pool<Sqlite>) -> LedgerResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS process_runs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                process_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                status TEXT NOT NULL,
                tier TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                cost_estimate REAL NOT NULL DEFAULT 0,
                external_job_id TEXT,
                submitted_at BIGINT NOT NULL,
                started_at BIGINT,
                completed_at BIGINT,
                archived INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // Claim candidate scans and status listings
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_process_runs_claim \
             ON process_runs(tenant_id, status, submitted_at)",
        )
        .execute(&pool)
        .await?;

        // Completion notification lookups
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_process_runs_external \
             ON process_runs(external_job_id) \
             WHERE external_job_id IS NOT NULL",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Create a ledger over a fresh in-memory database (for testing)
    ///
    /// The pool is pinned to a single connection: every connection to
    /// `sqlite::memory:` sees its own database.
    pub async fn in_memory() -> LedgerResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new(pool).await
    }

    fn cross_tenant(ctx: &RequestContext) -> bool {
        ctx.is_admin() || ctx.is_internal()
    }

    fn tenant_guard(cross_tenant: bool) -> &'static str {
        if cross_tenant {
            ""
        } else {
            " AND tenant_id = ?"
        }
    }

    fn from_millis(ms: i64) -> LedgerResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| LedgerError::Serialization(format!("timestamp out of range: {}", ms)))
    }

    fn row_to_run(row: &SqliteRow) -> LedgerResult<ProcessRun> {
        let output: Option<String> = row.get("output");
        let error: Option<String> = row.get("error");
        let started_at: Option<i64> = row.get("started_at");
        let completed_at: Option<i64> = row.get("completed_at");

        Ok(ProcessRun {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            namespace: row.get("namespace"),
            process_id: row.get("process_id"),
            operation: SpatialOperation::from_string(&row.get::<String, _>("operation"))?,
            status: RunStatus::from_string(&row.get::<String, _>("status"))?,
            tier: ExecutionTier::from_string(&row.get::<String, _>("tier"))?,
            priority: row.get("priority"),
            input: serde_json::from_str(&row.get::<String, _>("input"))?,
            output: output.as_deref().map(serde_json::from_str).transpose()?,
            error: error.as_deref().map(serde_json::from_str).transpose()?,
            progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
            retry_count: row.get("retry_count"),
            cost_estimate: row.get("cost_estimate"),
            external_job_id: row.get("external_job_id"),
            submitted_at: Self::from_millis(row.get("submitted_at"))?,
            started_at: started_at.map(Self::from_millis).transpose()?,
            completed_at: completed_at.map(Self::from_millis).transpose()?,
            archived: row.get("archived"),
        })
    }

    async fn insert_run(conn: &mut SqliteConnection, run: &ProcessRun) -> LedgerResult<()> {
        let output = run
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error = run.error.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(INSERT_RUN)
            .bind(&run.id)
            .bind(&run.tenant_id)
            .bind(&run.namespace)
            .bind(&run.process_id)
            .bind(run.operation.to_string())
            .bind(run.status.to_string())
            .bind(run.tier.to_string())
            .bind(run.priority)
            .bind(serde_json::to_string(&run.input)?)
            .bind(output)
            .bind(error)
            .bind(run.progress as i64)
            .bind(run.retry_count)
            .bind(run.cost_estimate)
            .bind(&run.external_job_id)
            .bind(run.submitted_at.timestamp_millis())
            .bind(run.started_at.map(|t| t.timestamp_millis()))
            .bind(run.completed_at.map(|t| t.timestamp_millis()))
            .bind(run.archived)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn count_where(
        conn: &mut SqliteConnection,
        sql: &str,
        tenant_id: &str,
        since_millis: Option<i64>,
    ) -> LedgerResult<i64> {
        let mut query = sqlx::query(sql).bind(tenant_id);
        if let Some(since) = since_millis {
            query = query.bind(since);
        }
        Ok(query.fetch_one(&mut *conn).await?.get("cnt"))
    }

    /// Quota counting and insert, run inside an open IMMEDIATE transaction
    async fn admit_in_txn(
        conn: &mut SqliteConnection,
        run: &ProcessRun,
        quota: &TenantQuota,
    ) -> LedgerResult<()> {
        let now = Utc::now().timestamp_millis();

        let concurrent = Self::count_where(
            conn,
            "SELECT COUNT(*) AS cnt FROM process_runs \
             WHERE tenant_id = ? AND status IN ('PENDING', 'RUNNING')",
            &run.tenant_id,
            None,
        )
        .await?;
        if concurrent >= quota.max_concurrent {
            return Err(LedgerError::AdmissionDenied {
                tenant_id: run.tenant_id.clone(),
                reason: format!("concurrent runs at limit ({})", quota.max_concurrent),
            });
        }

        let in_window = Self::count_where(
            conn,
            "SELECT COUNT(*) AS cnt FROM process_runs \
             WHERE tenant_id = ? AND submitted_at >= ?",
            &run.tenant_id,
            Some(now - quota.window_secs * 1000),
        )
        .await?;
        if in_window >= quota.max_per_window {
            return Err(LedgerError::AdmissionDenied {
                tenant_id: run.tenant_id.clone(),
                reason: format!(
                    "submissions in {}s window at limit ({})",
                    quota.window_secs, quota.max_per_window
                ),
            });
        }

        let in_rate_window = Self::count_where(
            conn,
            "SELECT COUNT(*) AS cnt FROM process_runs \
             WHERE tenant_id = ? AND submitted_at >= ?",
            &run.tenant_id,
            Some(now - quota.rate_window_secs * 1000),
        )
        .await?;
        if in_rate_window >= quota.rate_limit {
            return Err(LedgerError::AdmissionDenied {
                tenant_id: run.tenant_id.clone(),
                reason: format!(
                    "rate limit reached ({}/{}s)",
                    quota.rate_limit, quota.rate_window_secs
                ),
            });
        }

        Self::insert_run(conn, run).await
    }

    /// Re-read a run after a guarded update missed, to classify the miss
    async fn classify_miss(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        attempted: RunStatus,
    ) -> LedgerError {
        match self.get(ctx, run_id).await {
            Ok(Some(run)) => LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: attempted.to_string(),
            },
            Ok(None) => LedgerError::RunNotFound(run_id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
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

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        match Self::admit_in_txn(&mut conn, &run, quota).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(run)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %rollback, "Rollback after failed admission");
                }
                Err(e)
            }
        }
    }

    async fn claim_next(&self, ctx: &RequestContext) -> LedgerResult<Option<ProcessRun>> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs SET status = 'RUNNING', started_at = ? \
             WHERE id = ( \
                 SELECT id FROM process_runs \
                 WHERE status = 'PENDING' AND archived = 0{} \
                 ORDER BY priority DESC, submitted_at ASC, id ASC \
                 LIMIT 1 \
             ) AND status = 'PENDING' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql).bind(Utc::now().timestamp_millis());
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        match query.fetch_optional(&self.pool).await? {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn claim_by_id(&self, ctx: &RequestContext, run_id: &str) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs SET status = 'RUNNING', started_at = ? \
             WHERE id = ?{} AND status = 'PENDING' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql)
            .bind(Utc::now().timestamp_millis())
            .bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        match self.get(ctx, run_id).await? {
            Some(run) if run.status == RunStatus::Running => {
                Err(LedgerError::ConcurrencyConflict(run_id.to_string()))
            }
            Some(run) => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Running.to_string(),
            }),
            None => Err(LedgerError::RunNotFound(run_id.to_string())),
        }
    }

    async fn record_progress(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        progress: u8,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let clamped = progress.min(100) as i64;
        let sql = format!(
            "UPDATE process_runs SET progress = ? \
             WHERE id = ?{} AND status = 'RUNNING' AND progress < ? \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql).bind(clamped).bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.bind(clamped).fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        // Stale observation or terminal run; answer with the current row.
        self.get(ctx, run_id)
            .await?
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))
    }

    async fn record_completion(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        output: RunOutput,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs \
             SET status = 'SUCCEEDED', output = ?, error = NULL, progress = 100, \
                 completed_at = ? \
             WHERE id = ?{} AND status = 'RUNNING' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql)
            .bind(serde_json::to_string(&output)?)
            .bind(Utc::now().timestamp_millis())
            .bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        match self.get(ctx, run_id).await? {
            Some(run) if run.is_terminal() => Ok(run),
            Some(run) => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Succeeded.to_string(),
            }),
            None => Err(LedgerError::RunNotFound(run_id.to_string())),
        }
    }

    async fn record_failure(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        error: RunError,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs \
             SET status = 'FAILED', error = ?, output = NULL, completed_at = ? \
             WHERE id = ?{} AND status = 'RUNNING' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql)
            .bind(serde_json::to_string(&error)?)
            .bind(Utc::now().timestamp_millis())
            .bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        match self.get(ctx, run_id).await? {
            Some(run) if run.is_terminal() => Ok(run),
            Some(run) => Err(LedgerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Failed.to_string(),
            }),
            None => Err(LedgerError::RunNotFound(run_id.to_string())),
        }
    }

    async fn cancel(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        reason: &str,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let error = RunError::new(RunErrorKind::Cancelled, reason);
        let sql = format!(
            "UPDATE process_runs \
             SET status = 'CANCELLED', error = ?, output = NULL, \
                 external_job_id = NULL, completed_at = ? \
             WHERE id = ?{} AND status IN ('PENDING', 'RUNNING') \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql)
            .bind(serde_json::to_string(&error)?)
            .bind(Utc::now().timestamp_millis())
            .bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        Err(self.classify_miss(ctx, run_id, RunStatus::Cancelled).await)
    }

    async fn update_tier(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        tier: ExecutionTier,
        cost_estimate: f64,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs SET tier = ?, cost_estimate = ? \
             WHERE id = ?{} AND status = 'RUNNING' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql)
            .bind(tier.to_string())
            .bind(cost_estimate)
            .bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        match self.get(ctx, run_id).await? {
            Some(run) => Err(LedgerError::InvalidUpdate(format!(
                "tier of run {} can only change while RUNNING, status is {}",
                run_id, run.status
            ))),
            None => Err(LedgerError::RunNotFound(run_id.to_string())),
        }
    }

    async fn set_external_job(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        external_job_id: &str,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs SET external_job_id = ? \
             WHERE id = ?{} AND status = 'RUNNING' AND tier = 'CLOUD_BATCH' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql).bind(external_job_id).bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        match self.get(ctx, run_id).await? {
            Some(run) => Err(LedgerError::InvalidUpdate(format!(
                "external job id requires a RUNNING CLOUD_BATCH run, run {} is {} on {}",
                run_id, run.status, run.tier
            ))),
            None => Err(LedgerError::RunNotFound(run_id.to_string())),
        }
    }

    async fn increment_retry(
        &self,
        ctx: &RequestContext,
        run_id: &str,
    ) -> LedgerResult<ProcessRun> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "UPDATE process_runs SET retry_count = retry_count + 1 \
             WHERE id = ?{} AND status = 'RUNNING' \
             RETURNING *",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql).bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        if let Some(row) = query.fetch_optional(&self.pool).await? {
            return Self::row_to_run(&row);
        }
        match self.get(ctx, run_id).await? {
            Some(run) => Err(LedgerError::InvalidUpdate(format!(
                "retry counter of run {} can only change while RUNNING, status is {}",
                run_id, run.status
            ))),
            None => Err(LedgerError::RunNotFound(run_id.to_string())),
        }
    }

    async fn get(&self, ctx: &RequestContext, run_id: &str) -> LedgerResult<Option<ProcessRun>> {
        let cross = Self::cross_tenant(ctx);
        let sql = format!(
            "SELECT * FROM process_runs WHERE id = ?{}",
            Self::tenant_guard(cross)
        );
        let mut query = sqlx::query(&sql).bind(run_id);
        if !cross {
            query = query.bind(ctx.tenant_id());
        }
        match query.fetch_optional(&self.pool).await? {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_external_id(
        &self,
        external_job_id: &str,
    ) -> LedgerResult<Option<ProcessRun>> {
        let row = sqlx::query("SELECT * FROM process_runs WHERE external_job_id = ?")
            .bind(external_job_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        filter: &RunFilter,
    ) -> LedgerResult<(Vec<ProcessRun>, i64)> {
        let tenant = if Self::cross_tenant(ctx) {
            filter.tenant_id.clone()
        } else {
            Some(ctx.tenant_id().to_string())
        };

        let mut conditions = String::from("WHERE 1 = 1");
        if tenant.is_some() {
            conditions.push_str(" AND tenant_id = ?");
        }
        if filter.status.is_some() {
            conditions.push_str(" AND status = ?");
        }
        if filter.process_id.is_some() {
            conditions.push_str(" AND process_id = ?");
        }
        if filter.tier.is_some() {
            conditions.push_str(" AND tier = ?");
        }
        if filter.submitted_after.is_some() {
            conditions.push_str(" AND submitted_at >= ?");
        }
        if filter.submitted_before.is_some() {
            conditions.push_str(" AND submitted_at < ?");
        }
        if !filter.include_archived {
            conditions.push_str(" AND archived = 0");
        }

        fn bind_filters<'q>(
            mut query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
            tenant: &Option<String>,
            filter: &RunFilter,
        ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
            if let Some(t) = tenant {
                query = query.bind(t.clone());
            }
            if let Some(status) = filter.status {
                query = query.bind(status.to_string());
            }
            if let Some(process_id) = &filter.process_id {
                query = query.bind(process_id.clone());
            }
            if let Some(tier) = filter.tier {
                query = query.bind(tier.to_string());
            }
            if let Some(after) = filter.submitted_after {
                query = query.bind(after.timestamp_millis());
            }
            if let Some(before) = filter.submitted_before {
                query = query.bind(before.timestamp_millis());
            }
            query
        }

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM process_runs {}", conditions);
        let total: i64 = bind_filters(sqlx::query(&count_sql), &tenant, filter)
            .fetch_one(&self.pool)
            .await?
            .get("cnt");

        let page_sql = format!(
            "SELECT * FROM process_runs {} \
             ORDER BY submitted_at DESC, id DESC LIMIT ? OFFSET ?",
            conditions
        );
        let rows = bind_filters(sqlx::query(&page_sql), &tenant, filter)
            .bind(filter.limit.unwrap_or(i64::MAX).max(0))
            .bind(filter.offset.unwrap_or(0).max(0))
            .fetch_all(&self.pool)
            .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            runs.push(Self::row_to_run(row)?);
        }
        Ok((runs, total))
    }

    async fn statistics(
        &self,
        ctx: &RequestContext,
        tenant_id: Option<&str>,
    ) -> LedgerResult<RunStatistics> {
        let scope = if Self::cross_tenant(ctx) {
            tenant_id.map(|t| t.to_string())
        } else {
            Some(ctx.tenant_id().to_string())
        };
        let guard = if scope.is_some() {
            " WHERE tenant_id = ?"
        } else {
            ""
        };

        let mut stats = RunStatistics::default();

        let totals_sql = format!(
            "SELECT COUNT(*) AS cnt, COALESCE(SUM(cost_estimate), 0.0) AS cost \
             FROM process_runs{}",
            guard
        );
        let mut totals = sqlx::query(&totals_sql);
        if let Some(t) = &scope {
            totals = totals.bind(t.clone());
        }
        let row = totals.fetch_one(&self.pool).await?;
        stats.total = row.get("cnt");
        stats.total_cost_estimate = row.get("cost");

        let by_status_sql = format!(
            "SELECT status, COUNT(*) AS cnt FROM process_runs{} GROUP BY status",
            guard
        );
        let mut by_status = sqlx::query(&by_status_sql);
        if let Some(t) = &scope {
            by_status = by_status.bind(t.clone());
        }
        for row in by_status.fetch_all(&self.pool).await? {
            stats
                .by_status
                .insert(row.get::<String, _>("status"), row.get("cnt"));
        }

        let by_tier_sql = format!(
            "SELECT tier, COUNT(*) AS cnt FROM process_runs{} GROUP BY tier",
            guard
        );
        let mut by_tier = sqlx::query(&by_tier_sql);
        if let Some(t) = &scope {
            by_tier = by_tier.bind(t.clone());
        }
        for row in by_tier.fetch_all(&self.pool).await? {
            stats
                .by_tier
                .insert(row.get::<String, _>("tier"), row.get("cnt"));
        }

        let avg_sql = format!(
            "SELECT AVG(completed_at - started_at) AS avg_ms FROM process_runs{}{}",
            guard,
            if scope.is_some() {
                " AND started_at IS NOT NULL AND completed_at IS NOT NULL"
            } else {
                " WHERE started_at IS NOT NULL AND completed_at IS NOT NULL"
            }
        );
        let mut avg = sqlx::query(&avg_sql);
        if let Some(t) = &scope {
            avg = avg.bind(t.clone());
        }
        stats.avg_duration_ms = avg.fetch_one(&self.pool).await?.get("avg_ms");

        Ok(stats)
    }

    async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query(
            "UPDATE process_runs SET archived = 1 \
             WHERE archived = 0 \
               AND status IN ('SUCCEEDED', 'FAILED', 'CANCELLED') \
               AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reclaim_stale(&self, max_running_age: Duration) -> LedgerResult<Vec<ProcessRun>> {
        let threshold = Utc::now().timestamp_millis() - max_running_age.as_millis() as i64;
        let error = RunError::new(RunErrorKind::Timeout, "run exceeded max running age");
        let rows = sqlx::query(
            "UPDATE process_runs \
             SET status = 'FAILED', error = ?, completed_at = ? \
             WHERE status = 'RUNNING' AND tier != 'CLOUD_BATCH' \
               AND started_at IS NOT NULL AND started_at < ? \
             RETURNING *",
        )
        .bind(serde_json::to_string(&error)?)
        .bind(Utc::now().timestamp_millis())
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in &rows {
            reclaimed.push(Self::row_to_run(row)?);
        }
        Ok(reclaimed)
    }
}
