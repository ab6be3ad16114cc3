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

//! Uniform executor contract for all execution tiers

use async_trait::async_trait;
use plexgis_common::{ExecutionTier, SpatialOperation};
use plexgis_ledger::ProcessRun;
use serde_json::Value;

use crate::error::TierResult;

/// Progress observations, 0-100, emitted zero or more times before the
/// terminal result
///
/// Unbounded so a synchronous CPU-bound executor never blocks on the channel;
/// the consumer folds observations into the ledger, which discards stale
/// values anyway.
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<u8>;

/// Create a progress channel pair
pub fn progress_channel() -> (ProgressSender, tokio::sync::mpsc::UnboundedReceiver<u8>) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Terminal result of one tier execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The run finished here; `output` validates against the definition's
    /// output schema
    Completed {
        /// Output document
        output: Value,
    },
    /// The run was accepted by an external service; completion arrives later
    /// via polling or notification
    Submitted {
        /// Job id assigned by the external service
        external_job_id: String,
    },
}

/// One execution tier
///
/// Implementations are stateless with respect to runs: all lifecycle
/// bookkeeping goes through the ledger, executors only transform input to
/// outcome. Trait objects behind `Arc<dyn TierExecutor>` so the coordinator
/// never names a concrete tier type.
#[async_trait]
pub trait TierExecutor: Send + Sync {
    /// Which tier this executor realizes
    fn tier(&self) -> ExecutionTier;

    /// Capability check, consulted before any claim is routed here
    ///
    /// Tiers with external prerequisites (a live database session) fold
    /// those into the answer; a tier answering `false` is skipped during
    /// selection, never retried.
    async fn can_execute(&self, operation: SpatialOperation) -> bool;

    /// Execute a claimed run
    ///
    /// `progress` may be fed zero or more times with values in 0-100 before
    /// the terminal result. Invalid input or unsupported operations yield a
    /// typed error, never a panic.
    async fn execute(
        &self,
        run: &ProcessRun,
        progress: ProgressSender,
    ) -> TierResult<ExecutionOutcome>;

    /// Best-effort cancellation of a running execution
    ///
    /// ## Returns
    /// `true` when a cancellation signal was delivered (flag raised or remote
    /// cancel accepted); `false` when there was nothing to signal.
    async fn cancel(&self, run: &ProcessRun) -> bool;

    /// Liveness signal, consulted together with [`can_execute`](TierExecutor::can_execute)
    async fn healthy(&self) -> bool;
}
