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

//! # PlexGIS Process Registry
//!
//! ## Purpose
//! Registered geoprocessing capabilities: what each process does, the schema
//! its inputs must satisfy, which execution tiers may run it, and what a run
//! is estimated to cost per tier.
//!
//! ## Architecture Context
//! Admission consults the registry before any run is persisted: disabled or
//! unknown processes are rejected, inputs are validated against the stored
//! schema, and the definition's default tier seeds the run's provisional
//! placement. The claim-time tier selection re-reads the definition, so
//! registry updates between submission and execution take effect.
//!
//! ## Design Decisions
//! - Definitions are tenant/namespace scoped; ids collide freely across
//!   tenants.
//! - Unregistering a definition that open runs still reference disables it
//!   instead of deleting it.
//! - Storage is pluggable (`DefinitionStore`): in-memory for tests, SQLite
//!   for single-node deployments.

pub mod catalog;
pub mod error;
pub mod registry;
pub mod sql;
pub mod store;
pub mod types;

pub use catalog::{builtin_definitions, install_builtins};
pub use error::{RegistryError, RegistryResult};
pub use registry::{ProcessRegistry, ReferenceProbe, TierHealthSource, UnregisterOutcome};
pub use sql::SqliteDefinitionStore;
pub use store::{DefinitionStore, MemoryDefinitionStore};
pub use types::{DefinitionFilter, ProcessDefinition, SchemaNode, SchemaType};
