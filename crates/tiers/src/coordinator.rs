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

//! Tier selection and execution dispatch
//!
//! ## Purpose
//! Holds the configured tier executors as trait objects and walks a
//! definition's tier preference list to find the first executor that is
//! both capable of the operation and currently healthy. Never names a
//! concrete tier type.
//!
//! ## Design
//! - A tier reporting incapable before execution is skipped, never retried.
//! - A tier failing during execution is terminal for that run; re-routing
//!   is a caller decision, not the coordinator's.
//! - Construction runs the geometry engine initialization explicitly, so
//!   no executor ever races lazy global state.

use async_trait::async_trait;
use plexgis_common::ExecutionTier;
use plexgis_ledger::ProcessRun;
use plexgis_registry::{ProcessDefinition, TierHealthSource};
use std::sync::Arc;
use tracing::debug;

use crate::error::{TierError, TierResult};
use crate::executor::{ExecutionOutcome, ProgressSender, TierExecutor};

/// Routes runs to the cheapest capable, healthy tier
pub struct Coordinator {
    executors: Vec<Arc<dyn TierExecutor>>,
}

impl Coordinator {
    /// Create a coordinator over the deployment's executors
    ///
    /// Initializes the geometry runtime before any executor accepts work;
    /// the call is idempotent, so repeated construction is safe.
    pub fn new(executors: Vec<Arc<dyn TierExecutor>>) -> Self {
        plexgis_geometry::initialize();
        Self { executors }
    }

    /// Executor registered for a tier, when the deployment configured one
    pub fn executor(&self, tier: ExecutionTier) -> Option<&Arc<dyn TierExecutor>> {
        self.executors.iter().find(|e| e.tier() == tier)
    }

    /// First tier in the definition's preference order that is capable of
    /// the operation and healthy
    ///
    /// ## Errors
    /// `Unavailable` when no supported tier qualifies.
    pub async fn select_tier(
        &self,
        definition: &ProcessDefinition,
    ) -> TierResult<ExecutionTier> {
        for tier in &definition.supported_tiers {
            let Some(executor) = self.executor(*tier) else {
                debug!(tier = %tier, process_id = %definition.id, "tier has no executor");
                continue;
            };
            if executor.can_execute(definition.operation).await && executor.healthy().await {
                return Ok(*tier);
            }
            debug!(
                tier = %tier,
                operation = %definition.operation,
                "tier skipped: incapable or unhealthy"
            );
        }
        Err(TierError::Unavailable(definition.operation))
    }

    /// Execute a claimed run on the tier recorded on it
    pub async fn execute(
        &self,
        run: &ProcessRun,
        progress: ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        let executor = self
            .executor(run.tier)
            .ok_or(TierError::Unavailable(run.operation))?;
        executor.execute(run, progress).await
    }

    /// Best-effort cancellation on the run's tier
    pub async fn cancel(&self, run: &ProcessRun) -> bool {
        match self.executor(run.tier) {
            Some(executor) => executor.cancel(run).await,
            None => false,
        }
    }

    /// Liveness of one tier; unconfigured tiers are unhealthy
    pub async fn healthy(&self, tier: ExecutionTier) -> bool {
        match self.executor(tier) {
            Some(executor) => executor.healthy().await,
            None => false,
        }
    }
}

#[async_trait]
impl TierHealthSource for Coordinator {
    async fn healthy_tiers(&self) -> Vec<ExecutionTier> {
        let mut tiers = Vec::new();
        for executor in &self.executors {
            if executor.healthy().await {
                tiers.push(executor.tier());
            }
        }
        tiers
    }
}
