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

//! Registry error types

use thiserror::Error;

/// Result alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors produced by the process definition registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Process definition not found
    #[error("Process definition not found: {0}")]
    NotFound(String),

    /// Definition failed validation
    #[error("Invalid process definition: {0}")]
    Validation(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend failure
    #[error("Registry backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        RegistryError::Backend(e.to_string())
    }
}

impl From<plexgis_common::VocabularyError> for RegistryError {
    fn from(e: plexgis_common::VocabularyError) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}
