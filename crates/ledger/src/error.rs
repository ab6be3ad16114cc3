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

//! Ledger error types

use thiserror::Error;

/// Result alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors produced by the run ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Run id not found (or not visible to the caller's tenant)
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Admission refused by quota or rate limit
    #[error("Admission denied for tenant {tenant_id}: {reason}")]
    AdmissionDenied {
        /// Tenant whose quota refused the run
        tenant_id: String,
        /// Which limit refused it
        reason: String,
    },

    /// Illegal lifecycle transition
    #[error("Invalid transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        /// Run being transitioned
        run_id: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Lost a claim race or the row changed underneath an update
    #[error("Concurrency conflict on run {0}")]
    ConcurrencyConflict(String),

    /// Update rejected for reasons other than lifecycle state
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend failure
    #[error("Ledger backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Backend(e.to_string())
    }
}

impl From<plexgis_common::VocabularyError> for LedgerError {
    fn from(e: plexgis_common::VocabularyError) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
