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

//! Process run model
//!
//! ## Purpose
//! `ProcessRun` is the ledger row for one submitted job: who submitted it,
//! what it runs, where it stands in its lifecycle, and what it produced.
//! Status transitions form a small fixed machine; terminal states are sinks.
//!
//! ## Lifecycle
//! ```text
//! PENDING --> RUNNING --> SUCCEEDED
//!    |           |------> FAILED
//!    |           '------> CANCELLED
//!    '-------------------> CANCELLED
//! ```

use chrono::{DateTime, Utc};
use plexgis_common::{ExecutionTier, RequestContext, SpatialOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use ulid::Ulid;

use crate::error::LedgerError;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Admitted, waiting for a worker claim
    Pending,
    /// Claimed by a worker (or submitted to an external service)
    Running,
    /// Finished with an output
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl RunStatus {
    /// Parse status from string (for SQL storage)
    pub fn from_string(s: &str) -> Result<Self, LedgerError> {
        match s.to_uppercase().as_str() {
            "PENDING" | "ACCEPTED" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" | "SUCCESSFUL" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" | "DISMISSED" => Ok(Self::Cancelled),
            _ => Err(LedgerError::Serialization(format!(
                "Unknown run status: {}",
                s
            ))),
        }
    }

    /// Whether the status is a sink
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `to`
    pub fn can_transition(&self, to: RunStatus) -> bool {
        match (self, to) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Cancelled) => true,
            (Self::Running, Self::Succeeded) => true,
            (Self::Running, Self::Failed) => true,
            (Self::Running, Self::Cancelled) => true,
            _ => false,
        }
    }

    /// All statuses
    pub fn all() -> &'static [RunStatus] {
        &[
            Self::Pending,
            Self::Running,
            Self::Succeeded,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Category of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunErrorKind {
    /// Input rejected before execution
    Validation,
    /// Execution failed on a tier
    Execution,
    /// Exceeded its allowed running time
    Timeout,
    /// Cancelled by the submitter or an operator
    Cancelled,
    /// Control plane fault
    Internal,
}

impl RunErrorKind {
    /// Parse kind from string (for SQL storage)
    pub fn from_string(s: &str) -> Result<Self, LedgerError> {
        match s.to_uppercase().as_str() {
            "VALIDATION" => Ok(Self::Validation),
            "EXECUTION" => Ok(Self::Execution),
            "TIMEOUT" => Ok(Self::Timeout),
            "CANCELLED" => Ok(Self::Cancelled),
            "INTERNAL" => Ok(Self::Internal),
            _ => Err(LedgerError::Serialization(format!(
                "Unknown run error kind: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "VALIDATION",
            Self::Execution => "EXECUTION",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Terminal error recorded on a failed or cancelled run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    /// Failure category
    pub kind: RunErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl RunError {
    /// Create an error record
    pub fn new(kind: RunErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

/// Output of a succeeded run
///
/// Large outputs are spilled to the object store and referenced by key so
/// ledger rows stay small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutput {
    /// Output stored inline in the ledger row
    Inline {
        /// The output document
        value: Value,
    },
    /// Output spilled to the object store
    Stored {
        /// Object store key
        key: String,
        /// Serialized size
        size_bytes: u64,
    },
}

/// One ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRun {
    /// ULID, globally unique and sortable by creation time
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Namespace within the tenant
    pub namespace: String,

    /// Process definition id this run executes
    pub process_id: String,

    /// Spatial operation, denormalized from the definition at admission
    pub operation: SpatialOperation,

    /// Lifecycle status
    pub status: RunStatus,

    /// Execution tier: the definition's default at admission, overwritten by
    /// the claim-time selection
    pub tier: ExecutionTier,

    /// Claim ordering hint, higher first
    #[serde(default)]
    pub priority: i32,

    /// Submitted input document
    pub input: Value,

    /// Present exactly when status is SUCCEEDED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,

    /// Present exactly when status is FAILED or CANCELLED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,

    /// Completion percentage, monotonically non-decreasing
    #[serde(default)]
    pub progress: u8,

    /// Transient retries consumed within the current claim
    #[serde(default)]
    pub retry_count: i32,

    /// Estimated cost at the assigned tier
    #[serde(default)]
    pub cost_estimate: f64,

    /// External service job id, present only while a CLOUD_BATCH run is
    /// RUNNING or after it finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,

    /// When the run was admitted
    pub submitted_at: DateTime<Utc>,

    /// When a worker claimed the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Excluded from claims and default listings
    #[serde(default)]
    pub archived: bool,
}

impl ProcessRun {
    /// Create a pending run for the caller's tenant
    pub fn new(
        ctx: &RequestContext,
        process_id: &str,
        operation: SpatialOperation,
        input: Value,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            tenant_id: ctx.tenant_id().to_string(),
            namespace: ctx.namespace().to_string(),
            process_id: process_id.to_string(),
            operation,
            status: RunStatus::Pending,
            tier: ExecutionTier::InProcess,
            priority: 0,
            input,
            output: None,
            error: None,
            progress: 0,
            retry_count: 0,
            cost_estimate: 0.0,
            external_job_id: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            archived: false,
        }
    }

    /// Set the claim ordering hint
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the provisional tier
    pub fn with_tier(mut self, tier: ExecutionTier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the admission cost estimate
    pub fn with_cost_estimate(mut self, cost_estimate: f64) -> Self {
        self.cost_estimate = cost_estimate;
        self
    }

    /// Whether the run has reached a sink status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock execution duration, when both endpoints are known
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Filter for run listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    /// Restrict to one tenant (forced to the caller's tenant for
    /// non-admin contexts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Restrict to one status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,

    /// Restrict to one process definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,

    /// Restrict to one execution tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ExecutionTier>,

    /// Submitted at or after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_after: Option<DateTime<Utc>>,

    /// Submitted strictly before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_before: Option<DateTime<Utc>>,

    /// Include archived rows
    #[serde(default)]
    pub include_archived: bool,

    /// Page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    /// Page offset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl RunFilter {
    /// Whether a run passes the non-tenant, non-pagination predicates
    pub fn matches(&self, run: &ProcessRun) -> bool {
        if !self.include_archived && run.archived {
            return false;
        }
        if let Some(status) = self.status {
            if run.status != status {
                return false;
            }
        }
        if let Some(process_id) = &self.process_id {
            if &run.process_id != process_id {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if run.tier != tier {
                return false;
            }
        }
        if let Some(after) = self.submitted_after {
            if run.submitted_at < after {
                return false;
            }
        }
        if let Some(before) = self.submitted_before {
            if run.submitted_at >= before {
                return false;
            }
        }
        true
    }
}

/// Aggregate ledger statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Total runs in scope
    pub total: i64,

    /// Run counts keyed by status wire string
    pub by_status: HashMap<String, i64>,

    /// Run counts keyed by tier wire string
    pub by_tier: HashMap<String, i64>,

    /// Mean start-to-completion duration over finished runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,

    /// Sum of cost estimates
    pub total_cost_estimate: f64,
}

/// Per-tenant admission limits
///
/// All counters derive from ledger rows at admission time; there is no
/// separate counter state to drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantQuota {
    /// Max PENDING plus RUNNING runs at once
    pub max_concurrent: i64,

    /// Max submissions inside the accounting window
    pub max_per_window: i64,

    /// Accounting window length in seconds
    pub window_secs: i64,

    /// Max submissions inside the rate window
    pub rate_limit: i64,

    /// Rate window length in seconds
    pub rate_window_secs: i64,
}

impl Default for TenantQuota {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_per_window: 500,
            window_secs: 86_400,
            rate_limit: 60,
            rate_window_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_ctx() -> RequestContext {
        RequestContext::new("acme".to_string(), "default".to_string()).unwrap()
    }

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Pending.can_transition(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition(RunStatus::Cancelled));
        assert!(!RunStatus::Pending.can_transition(RunStatus::Succeeded));
        assert!(!RunStatus::Pending.can_transition(RunStatus::Failed));

        assert!(RunStatus::Running.can_transition(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition(RunStatus::Failed));
        assert!(RunStatus::Running.can_transition(RunStatus::Cancelled));
        assert!(!RunStatus::Running.can_transition(RunStatus::Pending));
    }

    #[test]
    fn test_terminal_statuses_are_sinks() {
        for from in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Cancelled] {
            assert!(from.is_terminal());
            for to in RunStatus::all() {
                assert!(!from.can_transition(*to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_status_from_string_aliases() {
        assert_eq!(RunStatus::from_string("accepted").unwrap(), RunStatus::Pending);
        assert_eq!(
            RunStatus::from_string("DISMISSED").unwrap(),
            RunStatus::Cancelled
        );
        assert_eq!(
            RunStatus::from_string("successful").unwrap(),
            RunStatus::Succeeded
        );
        assert!(RunStatus::from_string("PAUSED").is_err());
    }

    #[test]
    fn test_status_display_roundtrip() {
        for status in RunStatus::all() {
            assert_eq!(RunStatus::from_string(&status.to_string()).unwrap(), *status);
        }
    }

    #[test]
    fn test_new_run_defaults() {
        let run = ProcessRun::new(
            &test_ctx(),
            "buffer",
            SpatialOperation::Buffer,
            json!({"geometry": "POINT(0 0)", "distance": 1.0}),
        );
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.tenant_id, "acme");
        assert_eq!(run.progress, 0);
        assert!(run.output.is_none());
        assert!(run.error.is_none());
        assert!(run.external_job_id.is_none());
        assert!(!run.archived);
        assert!(run.duration_ms().is_none());
    }

    #[test]
    fn test_run_ids_are_unique_and_sortable() {
        let ctx = test_ctx();
        let a = ProcessRun::new(&ctx, "buffer", SpatialOperation::Buffer, json!({}));
        let b = ProcessRun::new(&ctx, "buffer", SpatialOperation::Buffer, json!({}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 26);
    }

    #[test]
    fn test_duration_ms() {
        let mut run = ProcessRun::new(&test_ctx(), "buffer", SpatialOperation::Buffer, json!({}));
        let start = Utc::now();
        run.started_at = Some(start);
        run.completed_at = Some(start + chrono::Duration::milliseconds(250));
        assert_eq!(run.duration_ms(), Some(250));
    }

    #[test]
    fn test_output_serde_tagging() {
        let inline = RunOutput::Inline {
            value: json!({"geometry": "POINT(1 1)"}),
        };
        let encoded = serde_json::to_value(&inline).unwrap();
        assert_eq!(encoded["kind"], "inline");

        let stored = RunOutput::Stored {
            key: "runs/abc/output.json".to_string(),
            size_bytes: 70_000,
        };
        let encoded = serde_json::to_value(&stored).unwrap();
        assert_eq!(encoded["kind"], "stored");
        let decoded: RunOutput = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, stored);
    }

    #[test]
    fn test_filter_matches() {
        let mut run = ProcessRun::new(
            &test_ctx(),
            "buffer",
            SpatialOperation::Buffer,
            json!({}),
        );
        run.status = RunStatus::Running;
        run.tier = ExecutionTier::Postgis;

        let filter = RunFilter {
            status: Some(RunStatus::Running),
            tier: Some(ExecutionTier::Postgis),
            ..Default::default()
        };
        assert!(filter.matches(&run));

        let filter = RunFilter {
            status: Some(RunStatus::Pending),
            ..Default::default()
        };
        assert!(!filter.matches(&run));

        run.archived = true;
        assert!(!RunFilter::default().matches(&run));
        let filter = RunFilter {
            include_archived: true,
            ..Default::default()
        };
        assert!(filter.matches(&run));
    }
}
