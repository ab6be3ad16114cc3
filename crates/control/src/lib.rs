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

//! # PlexGIS Control Plane
//!
//! ## Purpose
//! The orchestration layer over the registry, the run ledger, and the tier
//! executors. `ControlPlane` owns the run lifecycle end to end:
//!
//! - **Admission**: schema validation against the process definition, then
//!   quota and rate checks atomic with the ledger insert.
//! - **Execution**: claim-time tier selection, progress forwarding, retry of
//!   transient tier faults under the same claim, first-wins terminal
//!   recording. Oversized outputs spill to the [`ObjectStore`] seam.
//! - **Async completion**: `RunWorker` drives queued runs, `ExternalPoller`
//!   and completion notifications converge external jobs onto the same
//!   idempotent recording path.
//! - **Maintenance**: archival (terminal runs are flagged, never deleted)
//!   and stale-claim reclaim, both operator-gated.
//!
//! ## Architecture Context
//! Everything stateful lives below this crate: the ledger holds run state,
//! the registry holds definitions, executors hold tier resources. The
//! control plane sequences them and is therefore freely replicable; any
//! number of processes can run workers against one ledger.

pub mod config;
pub mod error;
pub mod object_store;
pub mod service;
pub mod worker;

pub use config::ControlPlaneConfig;
pub use error::{ControlError, ControlResult};
pub use object_store::{FilesystemObjectStore, MemoryObjectStore, ObjectStore};
pub use service::{
    CompletionNotification, ControlPlane, LedgerReferenceProbe, NotificationOutcome, RunRequest,
};
pub use worker::{ExternalPoller, RunWorker};
