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

//! In-process execution tier
//!
//! ## Purpose
//! Runs spatial operations synchronously inside the worker process through
//! `plexgis-geometry`. CPU-bound and allocation-light, so it is the cheapest
//! tier and first in preference order for everything it supports.
//!
//! ## Design
//! - **Allow-list**: every operation except `SPATIAL_JOIN`, which needs a
//!   set-oriented engine.
//! - **Cancellation**: cooperative. `cancel` raises a per-run flag that the
//!   pipeline re-checks between its parse, compute, and serialize
//!   checkpoints; a raised flag surfaces as `TierError::Cancelled`.
//! - **Progress**: one observation after each checkpoint (10/60/90); the
//!   terminal recording sets 100.

use async_trait::async_trait;
use plexgis_common::{ExecutionTier, SpatialOperation};
use plexgis_geometry::{ops, parse_geometry_value, serialize_geometry, Geometry, GeometryFormat};
use plexgis_ledger::ProcessRun;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{TierError, TierResult};
use crate::executor::{ExecutionOutcome, ProgressSender, TierExecutor};

/// Synchronous executor over the local geometry engine
pub struct InProcessExecutor {
    /// Run ids flagged for cooperative cancellation
    cancelled: Arc<RwLock<HashSet<String>>>,
}

impl InProcessExecutor {
    /// Create the executor
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    fn supports(operation: SpatialOperation) -> bool {
        !matches!(operation, SpatialOperation::SpatialJoin)
    }

    async fn checkpoint(&self, run_id: &str) -> TierResult<()> {
        if self.cancelled.read().await.contains(run_id) {
            debug!(run_id = %run_id, "cancellation flag observed");
            return Err(TierError::Cancelled);
        }
        Ok(())
    }

    async fn run_pipeline(
        &self,
        run: &ProcessRun,
        progress: &ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        if !Self::supports(run.operation) {
            return Err(TierError::Unsupported {
                tier: ExecutionTier::InProcess,
                operation: run.operation,
            });
        }

        self.checkpoint(&run.id).await?;
        let geometry = parse_geometry_value(require_field(&run.input, "geometry")?)?;
        let format = output_format(&run.input)?;
        let _ = progress.send(10);

        self.checkpoint(&run.id).await?;
        let computed = compute(run.operation, &geometry, &run.input)?;
        let _ = progress.send(60);

        self.checkpoint(&run.id).await?;
        let serialized = serialize_geometry(&computed, format)?;
        let area = ops::unsigned_area(&computed);
        let _ = progress.send(90);

        Ok(ExecutionOutcome::Completed {
            output: json!({
                "geometry": serialized,
                "format": format.to_string(),
                "area": area,
            }),
        })
    }
}

impl Default for InProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierExecutor for InProcessExecutor {
    fn tier(&self) -> ExecutionTier {
        ExecutionTier::InProcess
    }

    async fn can_execute(&self, operation: SpatialOperation) -> bool {
        Self::supports(operation)
    }

    async fn execute(
        &self,
        run: &ProcessRun,
        progress: ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        let result = self.run_pipeline(run, &progress).await;
        // Flag is per-execution; drop it so a re-submitted id starts clean.
        self.cancelled.write().await.remove(&run.id);
        result
    }

    async fn cancel(&self, run: &ProcessRun) -> bool {
        self.cancelled.write().await.insert(run.id.clone());
        true
    }

    async fn healthy(&self) -> bool {
        true
    }
}

fn require_field<'a>(input: &'a Value, field: &str) -> TierResult<&'a Value> {
    input
        .get(field)
        .ok_or_else(|| TierError::InvalidInput(format!("missing required field '{}'", field)))
}

fn require_number(input: &Value, field: &str) -> TierResult<f64> {
    require_field(input, field)?
        .as_f64()
        .ok_or_else(|| TierError::InvalidInput(format!("field '{}' must be a number", field)))
}

fn output_format(input: &Value) -> TierResult<GeometryFormat> {
    match input.get("format").and_then(Value::as_str) {
        Some(s) => Ok(GeometryFormat::from_string(s)?),
        None => Ok(GeometryFormat::default()),
    }
}

fn compute(
    operation: SpatialOperation,
    geometry: &Geometry<f64>,
    input: &Value,
) -> TierResult<Geometry<f64>> {
    match operation {
        SpatialOperation::Buffer => {
            let distance = require_number(input, "distance")?;
            let segments = input
                .get("segments")
                .and_then(Value::as_u64)
                .unwrap_or(8) as usize;
            Ok(ops::buffer(geometry, distance, segments)?)
        }
        SpatialOperation::Intersection => {
            let other = parse_geometry_value(require_field(input, "other")?)?;
            Ok(ops::intersection(geometry, &other)?)
        }
        SpatialOperation::Union => {
            let other = parse_geometry_value(require_field(input, "other")?)?;
            Ok(ops::union(geometry, &other)?)
        }
        SpatialOperation::Difference => {
            let other = parse_geometry_value(require_field(input, "other")?)?;
            Ok(ops::difference(geometry, &other)?)
        }
        SpatialOperation::ConvexHull => Ok(ops::convex_hull(geometry)?),
        SpatialOperation::Centroid => Ok(ops::centroid(geometry)?),
        SpatialOperation::Simplify => {
            let tolerance = require_number(input, "tolerance")?;
            Ok(ops::simplify(geometry, tolerance)?)
        }
        SpatialOperation::SpatialJoin => Err(TierError::Unsupported {
            tier: ExecutionTier::InProcess,
            operation,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::progress_channel;
    use plexgis_common::RequestContext;

    fn test_ctx() -> RequestContext {
        RequestContext::new("tenant-a".to_string(), "default".to_string()).unwrap()
    }

    fn test_run(operation: SpatialOperation, input: Value) -> ProcessRun {
        ProcessRun::new(&test_ctx(), "proc", operation, input)
            .with_tier(ExecutionTier::InProcess)
    }

    async fn execute(run: &ProcessRun) -> (TierResult<ExecutionOutcome>, Vec<u8>) {
        let executor = InProcessExecutor::new();
        let (tx, mut rx) = progress_channel();
        let result = executor.execute(run, tx).await;
        let mut observed = Vec::new();
        while let Ok(v) = rx.try_recv() {
            observed.push(v);
        }
        (result, observed)
    }

    #[tokio::test]
    async fn test_buffer_line_string_area() {
        // Straight segment of length 10 buffered by 2: two half-disc caps
        // plus the 4x10 band, slightly under the analytic 52.57 because arcs
        // are polygonal.
        let run = test_run(
            SpatialOperation::Buffer,
            json!({"geometry": "LINESTRING(0 0, 10 0)", "distance": 2.0}),
        );
        let (result, progress) = execute(&run).await;
        let outcome = result.unwrap();
        let ExecutionOutcome::Completed { output } = outcome else {
            panic!("expected completed outcome");
        };

        let area = output.get("area").and_then(Value::as_f64).unwrap();
        let expected = 2.0 * 2.0 * 10.0 + std::f64::consts::PI * 4.0;
        assert!((area - expected).abs() < expected * 0.01, "area {}", area);

        let wkt = output.get("geometry").and_then(Value::as_str).unwrap();
        assert!(wkt.starts_with("POLYGON") || wkt.starts_with("MULTIPOLYGON"));
        assert_eq!(output.get("format").and_then(Value::as_str), Some("WKT"));
        assert_eq!(progress, vec![10, 60, 90]);
    }

    #[tokio::test]
    async fn test_centroid_as_geojson() {
        let run = test_run(
            SpatialOperation::Centroid,
            json!({
                "geometry": "POLYGON((0 0, 4 0, 4 4, 0 4, 0 0))",
                "format": "GEOJSON",
            }),
        );
        let (result, _) = execute(&run).await;
        let ExecutionOutcome::Completed { output } = result.unwrap() else {
            panic!("expected completed outcome");
        };
        let geometry = output.get("geometry").unwrap();
        assert_eq!(geometry.get("type").and_then(Value::as_str), Some("Point"));
        assert_eq!(geometry.get("coordinates").unwrap(), &json!([2.0, 2.0]));
        assert_eq!(output.get("format").and_then(Value::as_str), Some("GEOJSON"));
    }

    #[tokio::test]
    async fn test_intersection_of_overlapping_squares() {
        let run = test_run(
            SpatialOperation::Intersection,
            json!({
                "geometry": "POLYGON((0 0, 4 0, 4 4, 0 4, 0 0))",
                "other": "POLYGON((2 2, 6 2, 6 6, 2 6, 2 2))",
            }),
        );
        let (result, _) = execute(&run).await;
        let ExecutionOutcome::Completed { output } = result.unwrap() else {
            panic!("expected completed outcome");
        };
        let area = output.get("area").and_then(Value::as_f64).unwrap();
        assert!((area - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_simplify_requires_tolerance() {
        let run = test_run(
            SpatialOperation::Simplify,
            json!({"geometry": "LINESTRING(0 0, 1 0.01, 2 0)"}),
        );
        let (result, _) = execute(&run).await;
        assert!(matches!(result, Err(TierError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_spatial_join_is_not_supported() {
        let executor = InProcessExecutor::new();
        assert!(!executor.can_execute(SpatialOperation::SpatialJoin).await);
        for op in SpatialOperation::all() {
            if *op != SpatialOperation::SpatialJoin {
                assert!(executor.can_execute(*op).await);
            }
        }

        let run = test_run(SpatialOperation::SpatialJoin, json!({"left": [], "right": []}));
        let (result, _) = execute(&run).await;
        assert!(matches!(result, Err(TierError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_invalid_wkt_is_typed_failure() {
        let run = test_run(
            SpatialOperation::Buffer,
            json!({"geometry": "POLYGON((broken", "distance": 1.0}),
        );
        let (result, _) = execute(&run).await;
        assert!(matches!(result, Err(TierError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_missing_geometry_is_typed_failure() {
        let run = test_run(SpatialOperation::ConvexHull, json!({}));
        let (result, _) = execute(&run).await;
        assert!(matches!(result, Err(TierError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_cancel_flag_observed_at_first_checkpoint() {
        let executor = InProcessExecutor::new();
        let run = test_run(
            SpatialOperation::Buffer,
            json!({"geometry": "POINT(0 0)", "distance": 1.0}),
        );
        assert!(executor.cancel(&run).await);

        let (tx, _rx) = progress_channel();
        let result = executor.execute(&run, tx).await;
        assert!(matches!(result, Err(TierError::Cancelled)));

        // Flag is consumed by the attempt; a fresh execution runs normally.
        let (tx, _rx) = progress_channel();
        let result = executor.execute(&run, tx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_tier_and_health() {
        let executor = InProcessExecutor::new();
        assert_eq!(executor.tier(), ExecutionTier::InProcess);
        assert!(executor.healthy().await);
    }
}
