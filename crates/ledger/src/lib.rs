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

//! # PlexGIS Run Ledger
//!
//! ## Purpose
//! The durable record of every submitted run and the concurrency backbone of
//! the control plane. The ledger is where four guarantees live:
//!
//! 1. **Admission is atomic with insertion.** Quota counters are derived
//!    from ledger rows inside the same transaction that inserts the new run,
//!    so concurrent submissions cannot overshoot a tenant's limits.
//! 2. **Claims happen exactly once.** Moving a run from PENDING to RUNNING
//!    is a storage-level conditional update; racing workers cannot both win.
//! 3. **Terminal states are sinks.** The first terminal write (success,
//!    failure, or cancellation) decides the run; later completion or failure
//!    reports are idempotent no-ops returning the stored outcome.
//! 4. **Progress is monotonic.** Out-of-order progress observations are
//!    silently discarded.
//!
//! ## Architecture Context
//! The control plane's submission, worker, and notification paths all speak
//! to the same `RunStore`. Backends: in-memory for tests, SQLite for
//! single-node deployments; the SQL shapes are portable to PostgreSQL.

pub mod error;
pub mod memory;
pub mod sql;
pub mod store;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use memory::MemoryRunStore;
pub use sql::SqliteRunStore;
pub use store::RunStore;
pub use types::{
    ProcessRun, RunError, RunErrorKind, RunFilter, RunOutput, RunStatistics, RunStatus,
    TenantQuota,
};
