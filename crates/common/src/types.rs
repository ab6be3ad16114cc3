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

//! Execution vocabulary shared across the control plane
//!
//! ## Purpose
//! The tier and spatial-operation enums spoken by process definitions, the
//! job ledger, the coordinator, and the tier executors. Wire strings are
//! SCREAMING_SNAKE_CASE and stable; SQL columns store them via
//! `from_string`/`Display`, never via enum discriminants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vocabulary parse errors
#[derive(Debug, thiserror::Error)]
pub enum VocabularyError {
    /// Unknown execution tier name
    #[error("Unknown execution tier: {0}")]
    UnknownTier(String),

    /// Unknown spatial operation name
    #[error("Unknown spatial operation: {0}")]
    UnknownOperation(String),
}

/// Execution tier for a spatial operation
///
/// ## Design
/// One of three strategies with very different latency/cost envelopes:
/// - `InProcess`: synchronous geometry engine inside the worker process
/// - `Postgis`: pushdown to the database's native spatial engine
/// - `CloudBatch`: asynchronous submission to an external compute service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionTier {
    /// Geometry engine inside the worker process
    InProcess,

    /// Pushdown to the database's spatial engine
    Postgis,

    /// External asynchronous batch service
    CloudBatch,
}

impl ExecutionTier {
    /// Parse tier from string (for SQL storage)
    pub fn from_string(s: &str) -> Result<Self, VocabularyError> {
        match s.to_uppercase().as_str() {
            "IN_PROCESS" | "INPROCESS" => Ok(Self::InProcess),
            "POSTGIS" | "DATABASE" => Ok(Self::Postgis),
            "CLOUD_BATCH" | "CLOUDBATCH" => Ok(Self::CloudBatch),
            _ => Err(VocabularyError::UnknownTier(s.to_string())),
        }
    }

    /// All tiers, in the default preference order for cheap local operations
    pub fn all() -> &'static [ExecutionTier] {
        &[Self::InProcess, Self::Postgis, Self::CloudBatch]
    }
}

impl fmt::Display for ExecutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProcess => "IN_PROCESS",
            Self::Postgis => "POSTGIS",
            Self::CloudBatch => "CLOUD_BATCH",
        };
        write!(f, "{}", s)
    }
}

/// Spatial operation vocabulary
///
/// ## Design
/// The finite operation set the control plane can route. A process definition
/// names exactly one operation; executors advertise support per operation
/// through `can_execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialOperation {
    /// Buffer a geometry by a distance
    Buffer,

    /// Intersection of two geometries
    Intersection,

    /// Union of two geometries
    Union,

    /// Difference of two geometries
    Difference,

    /// Convex hull of a geometry
    ConvexHull,

    /// Centroid of a geometry
    Centroid,

    /// Douglas-Peucker simplification
    Simplify,

    /// Pairwise spatial join of two geometry collections
    SpatialJoin,
}

impl SpatialOperation {
    /// Parse operation from string (for SQL storage)
    pub fn from_string(s: &str) -> Result<Self, VocabularyError> {
        match s.to_uppercase().as_str() {
            "BUFFER" => Ok(Self::Buffer),
            "INTERSECTION" => Ok(Self::Intersection),
            "UNION" => Ok(Self::Union),
            "DIFFERENCE" => Ok(Self::Difference),
            "CONVEX_HULL" | "CONVEXHULL" => Ok(Self::ConvexHull),
            "CENTROID" => Ok(Self::Centroid),
            "SIMPLIFY" => Ok(Self::Simplify),
            "SPATIAL_JOIN" | "SPATIALJOIN" => Ok(Self::SpatialJoin),
            _ => Err(VocabularyError::UnknownOperation(s.to_string())),
        }
    }

    /// All operations
    pub fn all() -> &'static [SpatialOperation] {
        &[
            Self::Buffer,
            Self::Intersection,
            Self::Union,
            Self::Difference,
            Self::ConvexHull,
            Self::Centroid,
            Self::Simplify,
            Self::SpatialJoin,
        ]
    }

    /// Whether the operation consumes two geometry inputs
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Intersection | Self::Union | Self::Difference | Self::SpatialJoin
        )
    }
}

impl fmt::Display for SpatialOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buffer => "BUFFER",
            Self::Intersection => "INTERSECTION",
            Self::Union => "UNION",
            Self::Difference => "DIFFERENCE",
            Self::ConvexHull => "CONVEX_HULL",
            Self::Centroid => "CENTROID",
            Self::Simplify => "SIMPLIFY",
            Self::SpatialJoin => "SPATIAL_JOIN",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_string() {
        assert_eq!(
            ExecutionTier::from_string("IN_PROCESS").unwrap(),
            ExecutionTier::InProcess
        );
        assert_eq!(
            ExecutionTier::from_string("inprocess").unwrap(),
            ExecutionTier::InProcess
        );
        assert_eq!(
            ExecutionTier::from_string("database").unwrap(),
            ExecutionTier::Postgis
        );
        assert_eq!(
            ExecutionTier::from_string("CLOUD_BATCH").unwrap(),
            ExecutionTier::CloudBatch
        );
        assert!(ExecutionTier::from_string("MAINFRAME").is_err());
    }

    #[test]
    fn test_tier_display_roundtrip() {
        for tier in ExecutionTier::all() {
            let s = tier.to_string();
            assert_eq!(ExecutionTier::from_string(&s).unwrap(), *tier);
        }
    }

    #[test]
    fn test_operation_from_string() {
        assert_eq!(
            SpatialOperation::from_string("buffer").unwrap(),
            SpatialOperation::Buffer
        );
        assert_eq!(
            SpatialOperation::from_string("CONVEXHULL").unwrap(),
            SpatialOperation::ConvexHull
        );
        assert!(SpatialOperation::from_string("TELEPORT").is_err());
    }

    #[test]
    fn test_operation_display_roundtrip() {
        for op in SpatialOperation::all() {
            let s = op.to_string();
            assert_eq!(SpatialOperation::from_string(&s).unwrap(), *op);
        }
    }

    #[test]
    fn test_binary_operations() {
        assert!(SpatialOperation::Intersection.is_binary());
        assert!(SpatialOperation::Union.is_binary());
        assert!(SpatialOperation::Difference.is_binary());
        assert!(SpatialOperation::SpatialJoin.is_binary());
        assert!(!SpatialOperation::Buffer.is_binary());
        assert!(!SpatialOperation::Centroid.is_binary());
        assert!(!SpatialOperation::ConvexHull.is_binary());
        assert!(!SpatialOperation::Simplify.is_binary());
    }
}
