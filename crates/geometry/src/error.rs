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

//! Geometry error types

use thiserror::Error;

/// Result type for geometry operations
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Geometry errors
#[derive(Error, Debug)]
pub enum GeometryError {
    /// Input could not be parsed as WKT or GeoJSON
    #[error("Geometry parse error: {0}")]
    Parse(String),

    /// Geometry type is not valid for the requested operation
    #[error("Unsupported geometry for {operation}: {geometry}")]
    UnsupportedGeometry { operation: String, geometry: String },

    /// Numeric parameter out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Output could not be serialized
    #[error("Geometry serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GeometryError {
    fn from(err: serde_json::Error) -> Self {
        GeometryError::Serialization(err.to_string())
    }
}
