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

//! # PlexGIS Tiers
//!
//! Execution tiers behind one [`TierExecutor`] contract, plus the
//! [`Coordinator`] that walks a definition's tier preference list:
//!
//! - [`InProcessExecutor`]: synchronous local geometry engine, all
//!   operations except the spatial join
//! - [`PostgisExecutor`]: parameterized `ST_*` pushdown over a Postgres
//!   pool, all operations, needs a live session
//! - [`CloudBatchExecutor`]: submit-and-return over the [`BatchClient`]
//!   provider seam; completion arrives via polling or notification

pub mod cloudbatch;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod inprocess;
pub mod postgis;

pub use cloudbatch::{BatchClient, CloudBatchExecutor, ExternalJobStatus, InMemoryBatchClient};
pub use coordinator::Coordinator;
pub use error::{TierError, TierResult};
pub use executor::{progress_channel, ExecutionOutcome, ProgressSender, TierExecutor};
pub use inprocess::InProcessExecutor;
pub use postgis::PostgisExecutor;
