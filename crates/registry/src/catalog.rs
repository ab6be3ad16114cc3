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

//! Built-in process catalog
//!
//! ## Purpose
//! The default catalog of spatial processes a fresh deployment offers.
//! Tier preference encodes the cost ladder: in-process first for operations
//! the local engine supports, PostGIS as the general fallback, cloud batch
//! for operations that scale past a single worker.

use plexgis_common::{ExecutionTier, RequestContext, SpatialOperation};

use crate::error::RegistryResult;
use crate::registry::ProcessRegistry;
use crate::types::{ProcessDefinition, SchemaNode};

const RATE_IN_PROCESS: f64 = 0.001;
const RATE_POSTGIS: f64 = 0.005;
const RATE_CLOUD_BATCH: f64 = 0.05;

fn format_schema() -> SchemaNode {
    SchemaNode::string()
        .with_enum(vec!["WKT", "GEOJSON"])
        .with_description("Output encoding, WKT when omitted")
}

fn geometry_output() -> SchemaNode {
    SchemaNode::object(
        vec![
            ("geometry", SchemaNode::geometry()),
            ("format", SchemaNode::string()),
            ("area", SchemaNode::number().with_minimum(0.0)),
        ],
        vec!["geometry"],
    )
}

fn with_rates(def: ProcessDefinition) -> ProcessDefinition {
    let tiers = def.supported_tiers.clone();
    tiers.into_iter().fold(def, |d, tier| {
        let rate = match tier {
            ExecutionTier::InProcess => RATE_IN_PROCESS,
            ExecutionTier::Postgis => RATE_POSTGIS,
            ExecutionTier::CloudBatch => RATE_CLOUD_BATCH,
        };
        d.with_cost_rate(tier, rate)
    })
}

fn unary_overlay(
    id: &str,
    display_name: &str,
    operation: SpatialOperation,
    tiers: Vec<ExecutionTier>,
    extra: Vec<(&str, SchemaNode)>,
    extra_required: Vec<&str>,
) -> ProcessDefinition {
    let mut properties = vec![("geometry", SchemaNode::geometry()), ("format", format_schema())];
    properties.extend(extra);
    let mut required = vec!["geometry"];
    required.extend(extra_required);
    with_rates(ProcessDefinition::new(
        id,
        display_name,
        operation,
        SchemaNode::object(properties, required),
        geometry_output(),
        tiers,
    ))
}

fn binary_overlay(
    id: &str,
    display_name: &str,
    operation: SpatialOperation,
) -> ProcessDefinition {
    with_rates(ProcessDefinition::new(
        id,
        display_name,
        operation,
        SchemaNode::object(
            vec![
                ("geometry", SchemaNode::geometry()),
                ("other", SchemaNode::geometry()),
                ("format", format_schema()),
            ],
            vec!["geometry", "other"],
        ),
        geometry_output(),
        vec![
            ExecutionTier::InProcess,
            ExecutionTier::Postgis,
            ExecutionTier::CloudBatch,
        ],
    ))
}

/// The built-in process definitions
pub fn builtin_definitions() -> Vec<ProcessDefinition> {
    let all_tiers = vec![
        ExecutionTier::InProcess,
        ExecutionTier::Postgis,
        ExecutionTier::CloudBatch,
    ];
    let local_tiers = vec![ExecutionTier::InProcess, ExecutionTier::Postgis];

    vec![
        unary_overlay(
            "buffer",
            "Buffer",
            SpatialOperation::Buffer,
            all_tiers.clone(),
            vec![
                (
                    "distance",
                    SchemaNode::number()
                        .with_minimum(0.0)
                        .with_description("Buffer distance in coordinate units"),
                ),
                (
                    "segments",
                    SchemaNode::integer()
                        .with_minimum(1.0)
                        .with_maximum(64.0)
                        .with_description("Arc approximation points per quarter circle"),
                ),
            ],
            vec!["distance"],
        )
        .with_description("Buffer a geometry by a distance")
        .with_keywords(vec!["dilate", "grow", "offset"]),
        binary_overlay("intersection", "Intersection", SpatialOperation::Intersection)
            .with_description("Intersection of two geometries")
            .with_keywords(vec!["overlay", "clip"]),
        binary_overlay("union", "Union", SpatialOperation::Union)
            .with_description("Union of two geometries")
            .with_keywords(vec!["overlay", "merge", "dissolve"]),
        binary_overlay("difference", "Difference", SpatialOperation::Difference)
            .with_description("Difference of two geometries")
            .with_keywords(vec!["overlay", "erase"]),
        unary_overlay(
            "convex_hull",
            "Convex Hull",
            SpatialOperation::ConvexHull,
            local_tiers.clone(),
            vec![],
            vec![],
        )
        .with_description("Convex hull of a geometry")
        .with_keywords(vec!["hull", "envelope"]),
        unary_overlay(
            "centroid",
            "Centroid",
            SpatialOperation::Centroid,
            local_tiers.clone(),
            vec![],
            vec![],
        )
        .with_description("Centroid of a geometry")
        .with_keywords(vec!["center", "point"]),
        unary_overlay(
            "simplify",
            "Simplify",
            SpatialOperation::Simplify,
            local_tiers,
            vec![(
                "tolerance",
                SchemaNode::number()
                    .with_minimum(0.0)
                    .with_description("Douglas-Peucker tolerance in coordinate units"),
            )],
            vec!["tolerance"],
        )
        .with_description("Douglas-Peucker simplification")
        .with_keywords(vec!["generalize", "reduce"]),
        with_rates(ProcessDefinition::new(
            "spatial_join",
            "Spatial Join",
            SpatialOperation::SpatialJoin,
            SchemaNode::object(
                vec![
                    ("left", SchemaNode::array(SchemaNode::geometry())),
                    ("right", SchemaNode::array(SchemaNode::geometry())),
                    (
                        "predicate",
                        SchemaNode::string().with_enum(vec!["INTERSECTS"]),
                    ),
                ],
                vec!["left", "right"],
            ),
            SchemaNode::object(
                vec![
                    (
                        "pairs",
                        SchemaNode::array(SchemaNode::object(
                            vec![
                                ("left", SchemaNode::integer()),
                                ("right", SchemaNode::integer()),
                            ],
                            vec!["left", "right"],
                        )),
                    ),
                    ("left_count", SchemaNode::integer()),
                    ("right_count", SchemaNode::integer()),
                    ("match_count", SchemaNode::integer()),
                ],
                vec!["pairs"],
            ),
            vec![ExecutionTier::Postgis, ExecutionTier::CloudBatch],
        ))
        .with_description("Pairwise spatial join of two geometry collections")
        .with_keywords(vec!["join", "intersects", "relate"]),
    ]
}

/// Register every built-in definition for the caller's tenant
pub async fn install_builtins(
    registry: &ProcessRegistry,
    ctx: &RequestContext,
) -> RegistryResult<usize> {
    let definitions = builtin_definitions();
    let count = definitions.len();
    for definition in definitions {
        registry.register(ctx, definition).await?;
    }
    Ok(count)
}
