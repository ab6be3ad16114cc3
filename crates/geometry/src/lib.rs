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

//! # PlexGIS Geometry
//!
//! ## Purpose
//! The geometry capability the in-process execution tier wraps: WKT/GeoJSON
//! codecs plus thin wrappers over the `geo` algorithm crate (boolean overlays,
//! convex hull, centroid, Douglas-Peucker simplification, buffering). The
//! control plane treats geometry as an external capability; this crate is the
//! adapter, not an algorithm library.
//!
//! ## Architecture Context
//! Used by the in-process tier executor and by the database tier for input
//! normalization. Nothing here performs I/O and nothing here knows about
//! tenants, runs, or tiers.
//!
//! ## Design Decisions
//! - **Wrap, don't reimplement**: overlay/hull/centroid/simplify delegate to
//!   `geo`; buffering is composed from capsule unions over `geo`'s boolean ops
//! - **Explicit initialization**: [`initialize`] replaces the hidden one-time
//!   library setup of classic geometry stacks; the tier coordinator calls it
//!   before any executor accepts work
//! - **Typed failures**: invalid input or an unsupported geometry/operation
//!   pairing yields a [`GeometryError`], never a panic

pub mod error;
pub mod init;
pub mod ops;
pub mod parse;

pub use error::{GeometryError, GeometryResult};
pub use init::{initialize, is_initialized};
pub use parse::{parse_geometry_str, parse_geometry_value, serialize_geometry, GeometryFormat};

// Re-exported so executors can hold geometry values without a direct geo
// dependency.
pub use geo::{Geometry, LineString, MultiPolygon, Point, Polygon};
