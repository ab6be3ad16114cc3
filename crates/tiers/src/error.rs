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

//! Error types for tier execution

use plexgis_common::{ExecutionTier, SpatialOperation};
use plexgis_geometry::GeometryError;
use thiserror::Error;

/// Result type for tier operations
pub type TierResult<T> = Result<T, TierError>;

/// Tier execution errors
#[derive(Error, Debug)]
pub enum TierError {
    /// Operation not in the tier's allow-list
    #[error("Operation {operation} is not supported on tier {tier}")]
    Unsupported {
        tier: ExecutionTier,
        operation: SpatialOperation,
    },

    /// No configured tier can take the operation right now
    #[error("No available tier for operation {0}")]
    Unavailable(SpatialOperation),

    /// Run input rejected before any work started
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Execution started and failed
    #[error("Execution failed on {tier}: {message}")]
    Execution {
        tier: ExecutionTier,
        message: String,
    },

    /// Cancellation flag observed at a checkpoint
    #[error("Execution cancelled")]
    Cancelled,

    /// Database or external service failure
    #[error("Tier backend error: {0}")]
    Backend(String),
}

impl TierError {
    /// Whether a retry under the same claim could plausibly succeed
    ///
    /// Backend faults (connection drops, submission timeouts) are transient;
    /// everything else is deterministic for a given input.
    pub fn is_transient(&self) -> bool {
        matches!(self, TierError::Backend(_))
    }
}

impl From<GeometryError> for TierError {
    fn from(err: GeometryError) -> Self {
        match err {
            GeometryError::Parse(msg) => TierError::InvalidInput(msg),
            GeometryError::InvalidParameter(msg) => TierError::InvalidInput(msg),
            GeometryError::UnsupportedGeometry { .. } => TierError::InvalidInput(err.to_string()),
            GeometryError::Serialization(msg) => TierError::Execution {
                tier: ExecutionTier::InProcess,
                message: msg,
            },
        }
    }
}

impl From<sqlx::Error> for TierError {
    fn from(err: sqlx::Error) -> Self {
        TierError::Backend(err.to_string())
    }
}
