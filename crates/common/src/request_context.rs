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

//! Request Context (Go-style context.Context)
//!
//! ## Purpose
//! Provides request-scoped context similar to Go's context.Context.
//! Carries tenant isolation, tracing, and request metadata through the call chain.
//!
//! ## Design Philosophy
//! - **Tenant Isolation**: tenant_id is REQUIRED for all operations
//! - **Tracing**: request_id and correlation_id for distributed tracing
//! - **Extensible**: metadata map for additional context
//! - **Immutable**: Context should be passed by reference, not mutated

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use ulid::Ulid;

/// Request context carried through every control-plane call
///
/// ## Purpose
/// Carries tenant isolation, tracing, and request metadata through the call
/// chain. Every ledger, registry, and control-plane operation takes one as its
/// first argument.
///
/// ## Usage Pattern
/// ```rust
/// use plexgis_common::RequestContext;
///
/// let ctx = RequestContext::new("tenant-123".to_string(), "production".to_string()).unwrap();
/// assert_eq!(ctx.tenant_id(), "tenant-123");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant ID (REQUIRED for all operations)
    pub tenant_id: String,

    /// Namespace within tenant (can be empty)
    pub namespace: String,

    /// User ID (from the API layer, optional)
    pub user_id: Option<String>,

    /// Request ID (for tracing)
    pub request_id: String,

    /// Correlation ID (for distributed tracing)
    pub correlation_id: Option<String>,

    /// Request timestamp
    pub timestamp: DateTime<Utc>,

    /// Metadata (extensible key-value pairs)
    pub metadata: HashMap<String, String>,

    /// Admin flag
    ///
    /// When true, the caller may bypass tenant filtering for administrative
    /// operations such as cross-tenant queries, archival, and reclaim sweeps.
    pub admin: bool,

    /// Internal flag (for system operations)
    ///
    /// When true, this is an internal system operation (worker loops, pollers,
    /// notification handlers). Internal operations bypass tenant filtering.
    pub internal: bool,
}

impl RequestContext {
    /// Create a new RequestContext with required tenant_id and namespace
    ///
    /// ## Arguments
    /// * `tenant_id` - Tenant identifier (must not be empty)
    /// * `namespace` - Namespace identifier (can be empty)
    ///
    /// ## Returns
    /// New RequestContext or `RequestContextError::MissingTenantId` when the
    /// tenant is empty.
    pub fn new(tenant_id: String, namespace: String) -> Result<Self, RequestContextError> {
        if tenant_id.is_empty() {
            return Err(RequestContextError::MissingTenantId);
        }

        Ok(Self {
            tenant_id,
            namespace,
            user_id: None,
            request_id: Ulid::new().to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            admin: false,
            internal: false,
        })
    }

    /// Create a RequestContext for internal/system operations
    ///
    /// ## Purpose
    /// Worker loops, the external-status poller, and completion-notification
    /// handling run under this context. It bypasses tenant filtering.
    pub fn internal() -> Self {
        Self {
            tenant_id: "internal".to_string(),
            namespace: "system".to_string(),
            user_id: None,
            request_id: Ulid::new().to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            admin: true,
            internal: true,
        }
    }

    /// Set namespace (builder pattern)
    pub fn with_namespace(mut self, namespace: String) -> Self {
        self.namespace = namespace;
        self
    }

    /// Set user_id (builder pattern)
    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set correlation_id (builder pattern)
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add metadata (builder pattern)
    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Set admin flag (builder pattern)
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Check if context has admin privileges
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Check if context is for internal operations
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Check whether this context may read or mutate data of the given tenant
    ///
    /// Admin and internal contexts cross tenant boundaries; everyone else is
    /// confined to their own tenant.
    pub fn can_access_tenant(&self, tenant_id: &str) -> bool {
        self.admin || self.internal || self.tenant_id == tenant_id
    }

    /// Get tenant_id
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Get namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get user_id
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Get request_id
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Get correlation_id
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Get metadata value
    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }

    /// Check if context has metadata key
    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }
}

/// RequestContext errors
#[derive(Debug, thiserror::Error)]
pub enum RequestContextError {
    /// Missing required tenant_id
    #[error("Missing required tenant_id in RequestContext")]
    MissingTenantId,
}
