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

//! # PlexGIS Common
//!
//! ## Purpose
//! Shared vocabulary for the PlexGIS geoprocessing control plane: the
//! request-scoped [`RequestContext`] that carries tenant isolation through
//! every call chain, and the [`ExecutionTier`] / [`SpatialOperation`] enums
//! spoken by the registry, the job ledger, and the tier executors.
//!
//! ## Architecture Context
//! This crate sits at the bottom of the workspace; every other PlexGIS crate
//! depends on it and nothing here depends on storage or executors. Keep it
//! free of I/O.
//!
//! ## Design Decisions
//! - **Tenant Isolation**: tenant_id is REQUIRED for all operations; only
//!   internal/admin contexts may cross tenant boundaries
//! - **Stable wire strings**: tiers, operations, and statuses round-trip
//!   through SQL columns as SCREAMING_SNAKE_CASE strings via
//!   `from_string`/`Display`, never via enum discriminants

pub mod request_context;
pub mod types;

pub use request_context::{RequestContext, RequestContextError};
pub use types::{ExecutionTier, SpatialOperation, VocabularyError};
