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

//! Database-pushdown execution tier
//!
//! ## Purpose
//! Delegates spatial computation to PostGIS through parameterized `ST_*`
//! SQL over a `sqlx::PgPool`. Inputs are normalized to canonical WKT on the
//! client so the SQL side always binds plain text, never interpolated
//! geometry.
//!
//! ## Design
//! - Single-expression operations run as one `SELECT` returning the encoded
//!   result, an `ST_IsEmpty` flag, and `ST_Area`. Empty results are
//!   zero-area successes, not errors.
//! - `SPATIAL_JOIN` is an application-level loop: pair enumeration in Rust,
//!   the `ST_Intersects` predicate per pair in SQL.
//! - `can_execute` requires a live session: a configured pool that answers
//!   `SELECT 1`.
//! - Cancellation is cooperative like the in-process tier: the flag is
//!   checked before the query and between join pairs.

use async_trait::async_trait;
use plexgis_common::{ExecutionTier, SpatialOperation};
use plexgis_geometry::{parse_geometry_value, serialize_geometry, GeometryFormat};
use plexgis_ledger::ProcessRun;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{TierError, TierResult};
use crate::executor::{ExecutionOutcome, ProgressSender, TierExecutor};

/// Executor pushing spatial SQL down to PostGIS
pub struct PostgisExecutor {
    pool: Option<PgPool>,
    cancelled: Arc<RwLock<HashSet<String>>>,
}

impl PostgisExecutor {
    /// Create an executor over a connected pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Some(pool),
            cancelled: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Create an executor with no database session
    ///
    /// Reports unhealthy and incapable until a deployment provides a pool;
    /// lets the tier appear in preference lists without being selectable.
    pub fn unconfigured() -> Self {
        Self {
            pool: None,
            cancelled: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// PostGIS expression template for single-expression operations
    ///
    /// `None` for `SPATIAL_JOIN`, which runs as an application-level loop.
    fn expression_sql(operation: SpatialOperation) -> Option<&'static str> {
        match operation {
            SpatialOperation::Buffer => Some("ST_Buffer(ST_GeomFromText($1), $2, $3)"),
            SpatialOperation::Intersection => {
                Some("ST_Intersection(ST_GeomFromText($1), ST_GeomFromText($2))")
            }
            SpatialOperation::Union => Some("ST_Union(ST_GeomFromText($1), ST_GeomFromText($2))"),
            SpatialOperation::Difference => {
                Some("ST_Difference(ST_GeomFromText($1), ST_GeomFromText($2))")
            }
            SpatialOperation::ConvexHull => Some("ST_ConvexHull(ST_GeomFromText($1))"),
            SpatialOperation::Centroid => Some("ST_Centroid(ST_GeomFromText($1))"),
            SpatialOperation::Simplify => Some("ST_Simplify(ST_GeomFromText($1), $2)"),
            SpatialOperation::SpatialJoin => None,
        }
    }

    async fn checkpoint(&self, run_id: &str) -> TierResult<()> {
        if self.cancelled.read().await.contains(run_id) {
            debug!(run_id = %run_id, "cancellation flag observed");
            return Err(TierError::Cancelled);
        }
        Ok(())
    }

    async fn run_expression(
        &self,
        pool: &PgPool,
        run: &ProcessRun,
        progress: &ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        let format = output_format(&run.input)?;
        let encoder = match format {
            GeometryFormat::Wkt => "ST_AsText",
            GeometryFormat::GeoJson => "ST_AsGeoJSON",
        };
        let expression = Self::expression_sql(run.operation).ok_or(TierError::Unsupported {
            tier: ExecutionTier::Postgis,
            operation: run.operation,
        })?;
        let sql = format!(
            "SELECT {encoder}(g) AS encoded, ST_IsEmpty(g) AS empty, ST_Area(g) AS area \
             FROM (SELECT {expression} AS g) AS result"
        );

        let wkt = canonical_wkt(require_field(&run.input, "geometry")?)?;
        let _ = progress.send(10);
        self.checkpoint(&run.id).await?;

        let mut query = sqlx::query(&sql).bind(wkt);
        match run.operation {
            SpatialOperation::Buffer => {
                let distance = require_number(&run.input, "distance")?;
                let segments = run
                    .input
                    .get("segments")
                    .and_then(Value::as_u64)
                    .unwrap_or(8) as i32;
                query = query.bind(distance).bind(segments);
            }
            SpatialOperation::Intersection
            | SpatialOperation::Union
            | SpatialOperation::Difference => {
                let other = canonical_wkt(require_field(&run.input, "other")?)?;
                query = query.bind(other);
            }
            SpatialOperation::Simplify => {
                let tolerance = require_number(&run.input, "tolerance")?;
                query = query.bind(tolerance);
            }
            _ => {}
        }

        let row = query.fetch_one(pool).await?;
        let encoded: String = row.get("encoded");
        let empty: bool = row.get("empty");
        let area: f64 = row.get("area");
        let _ = progress.send(80);

        if empty {
            debug!(run_id = %run.id, operation = %run.operation, "empty geometry result");
        }
        let geometry = match format {
            GeometryFormat::Wkt => Value::String(encoded),
            GeometryFormat::GeoJson => serde_json::from_str(&encoded).map_err(|e| {
                TierError::Execution {
                    tier: ExecutionTier::Postgis,
                    message: format!("invalid GeoJSON from database: {}", e),
                }
            })?,
        };

        Ok(ExecutionOutcome::Completed {
            output: json!({
                "geometry": geometry,
                "format": format.to_string(),
                "area": if empty { 0.0 } else { area },
            }),
        })
    }

    /// Pairwise join: enumeration here, the predicate in SQL
    async fn run_spatial_join(
        &self,
        pool: &PgPool,
        run: &ProcessRun,
        progress: &ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        let left = geometry_list(&run.input, "left")?;
        let right = geometry_list(&run.input, "right")?;
        if let Some(predicate) = run.input.get("predicate").and_then(Value::as_str) {
            if !predicate.eq_ignore_ascii_case("INTERSECTS") {
                return Err(TierError::InvalidInput(format!(
                    "unsupported join predicate: {}",
                    predicate
                )));
            }
        }
        let _ = progress.send(10);

        let mut pairs = Vec::new();
        for (i, left_wkt) in left.iter().enumerate() {
            self.checkpoint(&run.id).await?;
            for (j, right_wkt) in right.iter().enumerate() {
                let row = sqlx::query(
                    "SELECT ST_Intersects(ST_GeomFromText($1), ST_GeomFromText($2)) AS hit",
                )
                .bind(left_wkt)
                .bind(right_wkt)
                .fetch_one(pool)
                .await?;
                if row.get::<bool, _>("hit") {
                    pairs.push(json!({"left": i, "right": j}));
                }
            }
            let done = 10 + ((i + 1) * 80 / left.len()) as u8;
            let _ = progress.send(done);
        }

        let match_count = pairs.len();
        Ok(ExecutionOutcome::Completed {
            output: json!({
                "pairs": pairs,
                "left_count": left.len(),
                "right_count": right.len(),
                "match_count": match_count,
            }),
        })
    }
}

#[async_trait]
impl TierExecutor for PostgisExecutor {
    fn tier(&self) -> ExecutionTier {
        ExecutionTier::Postgis
    }

    async fn can_execute(&self, _operation: SpatialOperation) -> bool {
        // Every vocabulary operation has a pushdown; capability hinges on
        // the session being alive.
        self.healthy().await
    }

    async fn execute(
        &self,
        run: &ProcessRun,
        progress: ProgressSender,
    ) -> TierResult<ExecutionOutcome> {
        let result = match &self.pool {
            Some(pool) if run.operation == SpatialOperation::SpatialJoin => {
                self.run_spatial_join(pool, run, &progress).await
            }
            Some(pool) => self.run_expression(pool, run, &progress).await,
            None => Err(TierError::Backend(
                "no database session configured".to_string(),
            )),
        };
        self.cancelled.write().await.remove(&run.id);
        result
    }

    async fn cancel(&self, run: &ProcessRun) -> bool {
        self.cancelled.write().await.insert(run.id.clone());
        true
    }

    async fn healthy(&self) -> bool {
        match &self.pool {
            Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            None => false,
        }
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

/// Normalize any accepted geometry encoding to canonical WKT for binding
fn canonical_wkt(value: &Value) -> TierResult<String> {
    let geometry = parse_geometry_value(value)?;
    match serialize_geometry(&geometry, GeometryFormat::Wkt)? {
        Value::String(wkt) => Ok(wkt),
        other => Err(TierError::Backend(format!(
            "unexpected WKT serialization: {}",
            other
        ))),
    }
}

fn geometry_list(input: &Value, field: &str) -> TierResult<Vec<String>> {
    let items = require_field(input, field)?
        .as_array()
        .ok_or_else(|| TierError::InvalidInput(format!("field '{}' must be an array", field)))?;
    items.iter().map(canonical_wkt).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::progress_channel;
    use plexgis_common::RequestContext;

    fn test_run(operation: SpatialOperation, input: Value) -> ProcessRun {
        let ctx = RequestContext::new("tenant-a".to_string(), "default".to_string()).unwrap();
        ProcessRun::new(&ctx, "proc", operation, input).with_tier(ExecutionTier::Postgis)
    }

    #[tokio::test]
    async fn test_unconfigured_is_unhealthy_and_incapable() {
        let executor = PostgisExecutor::unconfigured();
        assert!(!executor.healthy().await);
        for op in SpatialOperation::all() {
            assert!(!executor.can_execute(*op).await);
        }
    }

    #[tokio::test]
    async fn test_unconfigured_execute_is_backend_error() {
        let executor = PostgisExecutor::unconfigured();
        let run = test_run(
            SpatialOperation::Buffer,
            json!({"geometry": "POINT(0 0)", "distance": 1.0}),
        );
        let (tx, _rx) = progress_channel();
        let result = executor.execute(&run, tx).await;
        assert!(matches!(result, Err(TierError::Backend(_))));
    }

    #[test]
    fn test_every_expression_operation_has_sql() {
        for op in SpatialOperation::all() {
            let sql = PostgisExecutor::expression_sql(*op);
            if *op == SpatialOperation::SpatialJoin {
                assert!(sql.is_none());
            } else {
                let sql = sql.unwrap();
                assert!(sql.starts_with("ST_"), "{}: {}", op, sql);
                assert!(sql.contains("$1"));
            }
        }
    }

    #[test]
    fn test_buffer_sql_takes_quadrant_segments() {
        let sql = PostgisExecutor::expression_sql(SpatialOperation::Buffer).unwrap();
        assert!(sql.contains("ST_Buffer"));
        assert!(sql.contains("$3"));
    }

    #[test]
    fn test_canonical_wkt_normalizes_geojson() {
        let wkt = canonical_wkt(&json!({"type": "Point", "coordinates": [1.0, 2.0]})).unwrap();
        assert_eq!(wkt, "POINT(1 2)");
    }

    #[test]
    fn test_canonical_wkt_rejects_garbage() {
        assert!(matches!(
            canonical_wkt(&json!("not a geometry")),
            Err(TierError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_raises_flag() {
        let executor = PostgisExecutor::unconfigured();
        let run = test_run(
            SpatialOperation::Centroid,
            json!({"geometry": "POINT(0 0)"}),
        );
        assert!(executor.cancel(&run).await);
        assert!(executor.cancelled.read().await.contains(&run.id));
    }

    #[test]
    fn test_tier_is_postgis() {
        assert_eq!(
            PostgisExecutor::unconfigured().tier(),
            ExecutionTier::Postgis
        );
    }
}
