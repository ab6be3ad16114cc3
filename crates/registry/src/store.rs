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

//! Definition storage abstraction
//!
//! ## Purpose
//! Persistence seam for process definitions. All methods are scoped by the
//! caller's tenant and namespace; two tenants can register the same process
//! id without collision.
//!
//! ## Design Decisions
//! Upserts bump the stored version and preserve the original registration
//! timestamp, so callers can detect definition changes between a run's
//! admission and its execution.

use async_trait::async_trait;
use chrono::Utc;
use plexgis_common::RequestContext;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{RegistryError, RegistryResult};
use crate::types::{DefinitionFilter, ProcessDefinition};

/// Storage backend for process definitions
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Insert or replace a definition, returning the stored copy
    async fn upsert(
        &self,
        ctx: &RequestContext,
        definition: ProcessDefinition,
    ) -> RegistryResult<ProcessDefinition>;

    /// Fetch one definition by id
    async fn get(&self, ctx: &RequestContext, id: &str) -> RegistryResult<ProcessDefinition>;

    /// List definitions matching a filter
    ///
    /// ## Returns
    /// The matching page and the total match count before pagination.
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &DefinitionFilter,
    ) -> RegistryResult<(Vec<ProcessDefinition>, i64)>;

    /// Delete a definition, returning whether it existed
    async fn remove(&self, ctx: &RequestContext, id: &str) -> RegistryResult<bool>;
}

/// Composite key scoping a definition to tenant and namespace
fn composite_key(tenant_id: &str, namespace: &str, id: &str) -> String {
    format!("{}:{}:{}", tenant_id, namespace, id)
}

/// In-memory definition store for tests and single-process deployments
#[derive(Clone)]
pub struct MemoryDefinitionStore {
    data: Arc<RwLock<HashMap<String, ProcessDefinition>>>,
}

impl MemoryDefinitionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn upsert(
        &self,
        ctx: &RequestContext,
        mut definition: ProcessDefinition,
    ) -> RegistryResult<ProcessDefinition> {
        let key = composite_key(ctx.tenant_id(), ctx.namespace(), &definition.id);
        let mut data = self.data.write().await;
        let now = Utc::now();
        match data.get(&key) {
            Some(existing) => {
                definition.version = existing.version + 1;
                definition.created_at = existing.created_at;
            }
            None => {
                definition.version = 1;
                definition.created_at = now;
            }
        }
        definition.updated_at = now;
        data.insert(key, definition.clone());
        Ok(definition)
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> RegistryResult<ProcessDefinition> {
        let key = composite_key(ctx.tenant_id(), ctx.namespace(), id);
        let data = self.data.read().await;
        data.get(&key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &DefinitionFilter,
    ) -> RegistryResult<(Vec<ProcessDefinition>, i64)> {
        let prefix = format!("{}:{}:", ctx.tenant_id(), ctx.namespace());
        let data = self.data.read().await;
        let mut matched: Vec<ProcessDefinition> = data
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, def)| def)
            .filter(|def| filter.matches(def))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        let total = matched.len() as i64;

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let mut page: Vec<ProcessDefinition> = matched.into_iter().skip(offset).collect();
        if let Some(limit) = filter.limit {
            page.truncate(limit.max(0) as usize);
        }
        Ok((page, total))
    }

    async fn remove(&self, ctx: &RequestContext, id: &str) -> RegistryResult<bool> {
        let key = composite_key(ctx.tenant_id(), ctx.namespace(), id);
        let mut data = self.data.write().await;
        Ok(data.remove(&key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaNode;
    use plexgis_common::{ExecutionTier, SpatialOperation};

    fn test_ctx(tenant: &str) -> RequestContext {
        RequestContext::new(tenant.to_string(), "default".to_string()).unwrap()
    }

    fn test_definition(id: &str) -> ProcessDefinition {
        ProcessDefinition::new(
            id,
            id,
            SpatialOperation::Buffer,
            SchemaNode::object(vec![("geometry", SchemaNode::geometry())], vec!["geometry"]),
            SchemaNode::geometry(),
            vec![ExecutionTier::InProcess],
        )
    }

    #[tokio::test]
    async fn test_upsert_bumps_version_and_preserves_created_at() {
        let store = MemoryDefinitionStore::new();
        let ctx = test_ctx("acme");

        let first = store.upsert(&ctx, test_definition("buffer")).await.unwrap();
        assert_eq!(first.version, 1);

        let second = store.upsert(&ctx, test_definition("buffer")).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_get_is_tenant_scoped() {
        let store = MemoryDefinitionStore::new();
        let acme = test_ctx("acme");
        let globex = test_ctx("globex");

        store.upsert(&acme, test_definition("buffer")).await.unwrap();
        assert!(store.get(&acme, "buffer").await.is_ok());
        assert!(matches!(
            store.get(&globex, "buffer").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = MemoryDefinitionStore::new();
        let ctx = test_ctx("acme");
        for id in ["buffer", "centroid", "union"] {
            store.upsert(&ctx, test_definition(id)).await.unwrap();
        }

        let (all, total) = store.list(&ctx, &DefinitionFilter::default()).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let filter = DefinitionFilter {
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let (page, total) = store.list(&ctx, &filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "centroid");
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryDefinitionStore::new();
        let ctx = test_ctx("acme");
        store.upsert(&ctx, test_definition("buffer")).await.unwrap();
        assert!(store.remove(&ctx, "buffer").await.unwrap());
        assert!(!store.remove(&ctx, "buffer").await.unwrap());
    }
}
