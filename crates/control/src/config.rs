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

//! Control plane configuration

use plexgis_ledger::TenantQuota;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

/// Control plane configuration
///
/// ## Design
/// One default [`TenantQuota`] applies to every tenant unless an override
/// is registered for it. Quota values live here rather than in the ledger
/// so operators can change them without touching run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Quota applied to tenants without an override
    pub quota: TenantQuota,

    /// Per-tenant quota overrides
    #[serde(default)]
    pub tenant_quotas: HashMap<String, TenantQuota>,

    /// Largest output stored inline in the ledger row; anything bigger is
    /// spilled to the object store
    pub output_inline_max_bytes: usize,

    /// Worker claim poll interval when the queue is empty
    pub worker_poll_interval_ms: u64,

    /// External batch status poll interval
    pub poller_interval_ms: u64,

    /// Extra execution attempts allowed after a transient tier failure
    pub max_transient_retries: u32,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            quota: TenantQuota::default(),
            tenant_quotas: HashMap::new(),
            output_inline_max_bytes: 64 * 1024,
            worker_poll_interval_ms: 500,
            poller_interval_ms: 2_000,
            max_transient_retries: 2,
        }
    }
}

impl ControlPlaneConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_quota = TenantQuota::default();
        Self {
            quota: TenantQuota {
                max_concurrent: env::var("PLEXGIS_MAX_CONCURRENT_PER_TENANT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_quota.max_concurrent),
                max_per_window: env::var("PLEXGIS_MAX_PER_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_quota.max_per_window),
                window_secs: env::var("PLEXGIS_WINDOW_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_quota.window_secs),
                rate_limit: env::var("PLEXGIS_RATE_LIMIT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_quota.rate_limit),
                rate_window_secs: env::var("PLEXGIS_RATE_WINDOW_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_quota.rate_window_secs),
            },
            tenant_quotas: HashMap::new(),
            output_inline_max_bytes: env::var("PLEXGIS_OUTPUT_INLINE_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.output_inline_max_bytes),
            worker_poll_interval_ms: env::var("PLEXGIS_WORKER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.worker_poll_interval_ms),
            poller_interval_ms: env::var("PLEXGIS_POLLER_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poller_interval_ms),
            max_transient_retries: env::var("PLEXGIS_MAX_TRANSIENT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_transient_retries),
        }
    }

    /// Register a per-tenant quota override (builder pattern)
    pub fn with_tenant_quota(mut self, tenant_id: &str, quota: TenantQuota) -> Self {
        self.tenant_quotas.insert(tenant_id.to_string(), quota);
        self
    }

    /// Quota for a tenant, falling back to the default
    pub fn quota_for(&self, tenant_id: &str) -> &TenantQuota {
        self.tenant_quotas.get(tenant_id).unwrap_or(&self.quota)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_quota(&self.quota)?;
        for (tenant_id, quota) in &self.tenant_quotas {
            validate_quota(quota)
                .map_err(|e| format!("quota override for tenant {}: {}", tenant_id, e))?;
        }

        if self.output_inline_max_bytes == 0 {
            return Err("output_inline_max_bytes must be at least 1".to_string());
        }
        if self.worker_poll_interval_ms == 0 {
            return Err("worker_poll_interval_ms must be at least 1".to_string());
        }
        if self.poller_interval_ms == 0 {
            return Err("poller_interval_ms must be at least 1".to_string());
        }

        Ok(())
    }
}

fn validate_quota(quota: &TenantQuota) -> Result<(), String> {
    if quota.max_concurrent < 1 {
        return Err("max_concurrent must be at least 1".to_string());
    }
    if quota.max_per_window < 1 {
        return Err("max_per_window must be at least 1".to_string());
    }
    if quota.window_secs < 1 {
        return Err("window_secs must be at least 1".to_string());
    }
    if quota.rate_limit < 1 {
        return Err("rate_limit must be at least 1".to_string());
    }
    if quota.rate_window_secs < 1 {
        return Err("rate_window_secs must be at least 1".to_string());
    }
    Ok(())
}
