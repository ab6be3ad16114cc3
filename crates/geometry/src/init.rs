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

//! Explicit geometry runtime initialization
//!
//! ## Purpose
//! Classic geometry stacks hide a one-time native-library setup behind the
//! first call. PlexGIS makes that an explicit bootstrap step owned by process
//! startup: the tier coordinator invokes [`initialize`] before any executor
//! accepts work, so readiness is a stated precondition rather than hidden
//! global state.

use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Initialize the geometry runtime. Idempotent; safe to call from multiple
/// components during bootstrap.
pub fn initialize() {
    INIT.call_once(|| {
        info!("geometry runtime initialized (WKT/GeoJSON codecs, overlay engine)");
    });
}

/// Whether [`initialize`] has completed.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
