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

//! Control plane error types
//!
//! ## Purpose
//! One error vocabulary over the registry, ledger, and tier layers so
//! callers of [`ControlPlane`](crate::service::ControlPlane) see a single
//! enum regardless of which layer refused the request.

use plexgis_common::{ExecutionTier, SpatialOperation};
use plexgis_ledger::LedgerError;
use plexgis_registry::RegistryError;
use plexgis_tiers::TierError;
use thiserror::Error;

/// Result type for control plane operations
pub type ControlResult<T> = Result<T, ControlError>;

/// Control plane errors
#[derive(Debug, Error)]
pub enum ControlError {
    /// Admission refused by quota or rate limit
    #[error("Admission denied for tenant {tenant_id}: {reason}")]
    AdmissionDenied {
        /// Tenant whose quota refused the run
        tenant_id: String,
        /// Which limit refused it
        reason: String,
    },

    /// Request rejected before any state changed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Process definition or run not found (or not visible to the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with the run's lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller's context lacks the required privilege
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No configured tier can take the operation right now
    #[error("No available tier for operation {0}")]
    TierUnavailable(SpatialOperation),

    /// Execution failed on a tier
    #[error("Execution failed on {tier}: {message}")]
    Execution {
        /// Tier that failed
        tier: ExecutionTier,
        /// Failure detail
        message: String,
    },

    /// Lost a claim race or the row changed underneath an update
    #[error("Concurrency conflict on run {0}")]
    ConcurrencyConflict(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage or external service failure
    #[error("Control backend error: {0}")]
    Backend(String),
}

impl From<LedgerError> for ControlError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RunNotFound(id) => ControlError::NotFound(id),
            LedgerError::AdmissionDenied { tenant_id, reason } => {
                ControlError::AdmissionDenied { tenant_id, reason }
            }
            LedgerError::InvalidTransition { run_id, from, to } => {
                ControlError::InvalidState(format!("run {}: {} -> {}", run_id, from, to))
            }
            LedgerError::ConcurrencyConflict(id) => ControlError::ConcurrencyConflict(id),
            LedgerError::InvalidUpdate(msg) => ControlError::InvalidState(msg),
            LedgerError::Serialization(msg) => ControlError::Serialization(msg),
            LedgerError::Backend(msg) => ControlError::Backend(msg),
        }
    }
}

impl From<RegistryError> for ControlError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ControlError::NotFound(id),
            RegistryError::Validation(msg) => ControlError::Validation(msg),
            RegistryError::Serialization(msg) => ControlError::Serialization(msg),
            RegistryError::Backend(msg) => ControlError::Backend(msg),
        }
    }
}

impl From<TierError> for ControlError {
    fn from(err: TierError) -> Self {
        match err {
            TierError::Unsupported { tier, operation } => ControlError::Validation(format!(
                "operation {} is not supported on tier {}",
                operation, tier
            )),
            TierError::Unavailable(operation) => ControlError::TierUnavailable(operation),
            TierError::InvalidInput(msg) => ControlError::Validation(msg),
            TierError::Execution { tier, message } => ControlError::Execution { tier, message },
            TierError::Cancelled => ControlError::InvalidState("execution cancelled".to_string()),
            TierError::Backend(msg) => ControlError::Backend(msg),
        }
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        ControlError::Backend(err.to_string())
    }
}
