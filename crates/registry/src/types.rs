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

//! Process definition model
//!
//! ## Purpose
//! A `ProcessDefinition` describes one registered geoprocessing capability:
//! which spatial operation it performs, the schema its inputs must satisfy,
//! which execution tiers may run it (in preference order), and per-tier cost
//! rates used for estimates at admission time.
//!
//! ## Design Decisions
//! Input/output schemas use a small self-contained schema dialect
//! (`SchemaNode`) instead of full JSON Schema: the control plane validates
//! inputs at admission, so the dialect covers exactly what admission needs
//! (types, required fields, numeric ranges, enums, and a first-class
//! `geometry` type accepting WKT strings or GeoJSON objects).

use chrono::{DateTime, Utc};
use plexgis_common::{ExecutionTier, SpatialOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{RegistryError, RegistryResult};

/// Schema value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// UTF-8 string
    String,
    /// Floating point number
    Number,
    /// Whole number
    Integer,
    /// Boolean flag
    Boolean,
    /// Nested object with named properties
    Object,
    /// Homogeneous list
    Array,
    /// Spatial geometry: a WKT string or a GeoJSON object
    Geometry,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Geometry => "geometry",
        };
        write!(f, "{}", s)
    }
}

/// One node of an input/output schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// Value type
    #[serde(rename = "type")]
    pub kind: SchemaType,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Named properties (object schemas)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, SchemaNode>>,

    /// Required property names (object schemas)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Element schema (array schemas)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,

    /// Inclusive lower bound (number/integer schemas)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound (number/integer schemas)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Allowed values (string schemas)
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl SchemaNode {
    fn leaf(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            properties: None,
            required: Vec::new(),
            items: None,
            minimum: None,
            maximum: None,
            enum_values: None,
        }
    }

    /// Geometry schema node
    pub fn geometry() -> Self {
        Self::leaf(SchemaType::Geometry)
    }

    /// String schema node
    pub fn string() -> Self {
        Self::leaf(SchemaType::String)
    }

    /// Number schema node
    pub fn number() -> Self {
        Self::leaf(SchemaType::Number)
    }

    /// Integer schema node
    pub fn integer() -> Self {
        Self::leaf(SchemaType::Integer)
    }

    /// Boolean schema node
    pub fn boolean() -> Self {
        Self::leaf(SchemaType::Boolean)
    }

    /// Array schema node with the given element schema
    pub fn array(items: SchemaNode) -> Self {
        let mut node = Self::leaf(SchemaType::Array);
        node.items = Some(Box::new(items));
        node
    }

    /// Object schema node with named properties and required keys
    pub fn object(properties: Vec<(&str, SchemaNode)>, required: Vec<&str>) -> Self {
        let mut node = Self::leaf(SchemaType::Object);
        node.properties = Some(
            properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        node.required = required.into_iter().map(|s| s.to_string()).collect();
        node
    }

    /// Set description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Set inclusive minimum
    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Set inclusive maximum
    pub fn with_maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    /// Restrict a string schema to the given values
    pub fn with_enum(mut self, values: Vec<&str>) -> Self {
        self.enum_values = Some(values.into_iter().map(|s| s.to_string()).collect());
        self
    }

    /// Check the schema itself is well-formed
    pub fn validate_structure(&self) -> Result<(), String> {
        self.validate_structure_at("$")
    }

    fn validate_structure_at(&self, path: &str) -> Result<(), String> {
        match self.kind {
            SchemaType::Object => {
                let properties = self
                    .properties
                    .as_ref()
                    .ok_or_else(|| format!("{}: object schema requires properties", path))?;
                for key in &self.required {
                    if !properties.contains_key(key) {
                        return Err(format!(
                            "{}: required field '{}' has no property schema",
                            path, key
                        ));
                    }
                }
                for (key, child) in properties {
                    child.validate_structure_at(&format!("{}.{}", path, key))?;
                }
            }
            SchemaType::Array => {
                let items = self
                    .items
                    .as_ref()
                    .ok_or_else(|| format!("{}: array schema requires items", path))?;
                items.validate_structure_at(&format!("{}[]", path))?;
            }
            _ => {
                if self.properties.is_some() {
                    return Err(format!("{}: properties only apply to object schemas", path));
                }
                if self.items.is_some() {
                    return Err(format!("{}: items only apply to array schemas", path));
                }
            }
        }
        if self.enum_values.is_some() && self.kind != SchemaType::String {
            return Err(format!("{}: enum only applies to string schemas", path));
        }
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(format!("{}: minimum {} exceeds maximum {}", path, min, max));
            }
        }
        Ok(())
    }

    /// Validate a JSON value against this schema
    ///
    /// ## Returns
    /// The path and reason of the first violation, if any. Unknown object
    /// fields are tolerated.
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        self.validate_value_at(value, "$")
    }

    fn validate_value_at(&self, value: &Value, path: &str) -> Result<(), String> {
        match self.kind {
            SchemaType::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("{}: expected string", path))?;
                if let Some(allowed) = &self.enum_values {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(format!(
                            "{}: '{}' is not one of {:?}",
                            path, s, allowed
                        ));
                    }
                }
            }
            SchemaType::Number => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("{}: expected number", path))?;
                self.check_range(n, path)?;
            }
            SchemaType::Integer => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| format!("{}: expected integer", path))?;
                self.check_range(n as f64, path)?;
            }
            SchemaType::Boolean => {
                value
                    .as_bool()
                    .ok_or_else(|| format!("{}: expected boolean", path))?;
            }
            SchemaType::Geometry => {
                if !value.is_string() && !value.is_object() {
                    return Err(format!(
                        "{}: expected a WKT string or GeoJSON object",
                        path
                    ));
                }
            }
            SchemaType::Object => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("{}: expected object", path))?;
                for key in &self.required {
                    if !obj.contains_key(key) {
                        return Err(format!("{}: missing required field '{}'", path, key));
                    }
                }
                if let Some(properties) = &self.properties {
                    for (key, child) in obj {
                        if let Some(schema) = properties.get(key) {
                            schema.validate_value_at(child, &format!("{}.{}", path, key))?;
                        }
                    }
                }
            }
            SchemaType::Array => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| format!("{}: expected array", path))?;
                if let Some(items) = &self.items {
                    for (i, child) in arr.iter().enumerate() {
                        items.validate_value_at(child, &format!("{}[{}]", path, i))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_range(&self, n: f64, path: &str) -> Result<(), String> {
        if let Some(min) = self.minimum {
            if n < min {
                return Err(format!("{}: {} is below minimum {}", path, n, min));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                return Err(format!("{}: {} is above maximum {}", path, n, max));
            }
        }
        Ok(())
    }
}

/// A registered geoprocessing capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Stable identifier within a tenant/namespace, e.g. "buffer"
    pub id: String,

    /// Human-readable name
    pub display_name: String,

    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Spatial operation this process performs
    pub operation: SpatialOperation,

    /// Schema submitted inputs must satisfy
    pub input_schema: SchemaNode,

    /// Schema of the produced output
    pub output_schema: SchemaNode,

    /// Whether new submissions are accepted
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Tiers that may run this process, in preference order
    pub supported_tiers: Vec<ExecutionTier>,

    /// Tier assumed at admission before the claim-time selection
    pub default_tier: ExecutionTier,

    /// Cost rate per input kilobyte, by tier
    #[serde(default)]
    pub cost_rates: HashMap<ExecutionTier, f64>,

    /// Search keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Bumped on every update
    #[serde(default)]
    pub version: i64,

    /// When the definition was first registered
    pub created_at: DateTime<Utc>,

    /// When the definition was last updated
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ProcessDefinition {
    /// Create a definition with defaults: enabled, first supported tier as
    /// default, version 0
    pub fn new(
        id: &str,
        display_name: &str,
        operation: SpatialOperation,
        input_schema: SchemaNode,
        output_schema: SchemaNode,
        supported_tiers: Vec<ExecutionTier>,
    ) -> Self {
        let now = Utc::now();
        let default_tier = supported_tiers
            .first()
            .copied()
            .unwrap_or(ExecutionTier::InProcess);
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            description: None,
            operation,
            input_schema,
            output_schema,
            enabled: true,
            supported_tiers,
            default_tier,
            cost_rates: HashMap::new(),
            keywords: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Set search keywords
    pub fn with_keywords(mut self, keywords: Vec<&str>) -> Self {
        self.keywords = keywords.into_iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set the cost rate for one tier
    pub fn with_cost_rate(mut self, tier: ExecutionTier, rate: f64) -> Self {
        self.cost_rates.insert(tier, rate);
        self
    }

    /// Cost rate for a tier, zero when unset
    pub fn cost_rate(&self, tier: ExecutionTier) -> f64 {
        self.cost_rates.get(&tier).copied().unwrap_or(0.0)
    }

    /// Validate the definition before registration
    pub fn validate(&self) -> RegistryResult<()> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::Validation(
                "process id must not be empty".to_string(),
            ));
        }
        if self.display_name.trim().is_empty() {
            return Err(RegistryError::Validation(
                "display name must not be empty".to_string(),
            ));
        }
        if self.supported_tiers.is_empty() {
            return Err(RegistryError::Validation(format!(
                "process '{}' must support at least one tier",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for tier in &self.supported_tiers {
            if !seen.insert(*tier) {
                return Err(RegistryError::Validation(format!(
                    "process '{}' lists tier {} more than once",
                    self.id, tier
                )));
            }
        }
        if !self.supported_tiers.contains(&self.default_tier) {
            return Err(RegistryError::Validation(format!(
                "process '{}' default tier {} is not among its supported tiers",
                self.id, self.default_tier
            )));
        }
        for (tier, rate) in &self.cost_rates {
            if !rate.is_finite() || *rate < 0.0 {
                return Err(RegistryError::Validation(format!(
                    "process '{}' cost rate for {} must be non-negative",
                    self.id, tier
                )));
            }
        }
        self.input_schema
            .validate_structure()
            .map_err(|e| RegistryError::Validation(format!("input_schema {}", e)))?;
        self.output_schema
            .validate_structure()
            .map_err(|e| RegistryError::Validation(format!("output_schema {}", e)))?;
        Ok(())
    }
}

/// Filter for definition listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionFilter {
    /// Substring match against id, display name, and keywords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,

    /// Restrict to one spatial operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<SpatialOperation>,

    /// Exclude disabled definitions
    #[serde(default)]
    pub enabled_only: bool,

    /// Page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    /// Page offset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl DefinitionFilter {
    /// Whether a definition passes the non-pagination predicates
    pub fn matches(&self, definition: &ProcessDefinition) -> bool {
        if self.enabled_only && !definition.enabled {
            return false;
        }
        if let Some(op) = self.operation {
            if definition.operation != op {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            let kw = keyword.to_lowercase();
            let hit = definition.id.to_lowercase().contains(&kw)
                || definition.display_name.to_lowercase().contains(&kw)
                || definition
                    .keywords
                    .iter()
                    .any(|k| k.to_lowercase().contains(&kw));
            if !hit {
                return false;
            }
        }
        true
    }
}
