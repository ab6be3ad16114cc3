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

//! WKT and GeoJSON codecs
//!
//! ## Purpose
//! Parses job input geometries (WKT strings or GeoJSON values) into `geo`
//! types and serializes results back in the caller's requested format.
//! Detection is cheap: a JSON object or a string starting with `{` is GeoJSON,
//! anything else is treated as WKT.

use geo::{Geometry, GeometryCollection};
use serde_json::Value;
use std::fmt;
use wkt::{ToWkt, TryFromWkt};

use crate::error::{GeometryError, GeometryResult};

/// Serialization format for geometry outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryFormat {
    /// Well-known text
    #[default]
    Wkt,

    /// GeoJSON geometry object
    GeoJson,
}

impl GeometryFormat {
    /// Parse format from string (job input `format` field)
    pub fn from_string(s: &str) -> GeometryResult<Self> {
        match s.to_uppercase().as_str() {
            "WKT" => Ok(Self::Wkt),
            "GEOJSON" | "GEO_JSON" | "JSON" => Ok(Self::GeoJson),
            _ => Err(GeometryError::InvalidParameter(format!(
                "unknown geometry format: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for GeometryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Wkt => "WKT",
            Self::GeoJson => "GEOJSON",
        };
        write!(f, "{}", s)
    }
}

/// Parse a geometry from a JSON input value.
///
/// Accepts a WKT string, a GeoJSON string, or a GeoJSON object (Geometry,
/// Feature, or FeatureCollection; collections flatten to a
/// GeometryCollection).
pub fn parse_geometry_value(value: &Value) -> GeometryResult<Geometry<f64>> {
    match value {
        Value::String(s) => parse_geometry_str(s),
        Value::Object(_) => parse_geojson_value(value.clone()),
        other => Err(GeometryError::Parse(format!(
            "geometry must be a WKT string or GeoJSON object, got {}",
            json_type_name(other)
        ))),
    }
}

/// Parse a geometry from a string, detecting WKT vs GeoJSON.
pub fn parse_geometry_str(s: &str) -> GeometryResult<Geometry<f64>> {
    let trimmed = s.trim_start();
    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| GeometryError::Parse(format!("invalid GeoJSON: {}", e)))?;
        parse_geojson_value(value)
    } else {
        parse_wkt(s)
    }
}

/// Parse a WKT string.
pub fn parse_wkt(s: &str) -> GeometryResult<Geometry<f64>> {
    Geometry::try_from_wkt_str(s).map_err(|e| GeometryError::Parse(format!("invalid WKT: {}", e)))
}

fn parse_geojson_value(value: Value) -> GeometryResult<Geometry<f64>> {
    let gj = geojson::GeoJson::from_json_value(value)
        .map_err(|e| GeometryError::Parse(format!("invalid GeoJSON: {}", e)))?;
    match gj {
        geojson::GeoJson::Geometry(g) => Geometry::try_from(g)
            .map_err(|e| GeometryError::Parse(format!("invalid GeoJSON geometry: {}", e))),
        geojson::GeoJson::Feature(f) => {
            let g = f.geometry.ok_or_else(|| {
                GeometryError::Parse("GeoJSON feature has no geometry".to_string())
            })?;
            Geometry::try_from(g)
                .map_err(|e| GeometryError::Parse(format!("invalid GeoJSON geometry: {}", e)))
        }
        geojson::GeoJson::FeatureCollection(fc) => {
            let mut geometries = Vec::new();
            for feature in fc.features {
                if let Some(g) = feature.geometry {
                    geometries.push(Geometry::try_from(g).map_err(|e| {
                        GeometryError::Parse(format!("invalid GeoJSON geometry: {}", e))
                    })?);
                }
            }
            Ok(Geometry::GeometryCollection(GeometryCollection::from(
                geometries,
            )))
        }
    }
}

/// Serialize a geometry to the requested output format.
///
/// WKT yields a JSON string value; GeoJSON yields a geometry object.
pub fn serialize_geometry(
    geometry: &Geometry<f64>,
    format: GeometryFormat,
) -> GeometryResult<Value> {
    match format {
        GeometryFormat::Wkt => Ok(Value::String(geometry.wkt_string())),
        GeometryFormat::GeoJson => {
            let value = geojson::Value::from(geometry);
            let gj = geojson::Geometry::new(value);
            Ok(serde_json::to_value(&gj)?)
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
