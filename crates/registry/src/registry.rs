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

//! Process registry
//!
//! ## Purpose
//! The control plane's view of registered geoprocessing capabilities:
//! validated registration, cached lookups, availability checks against live
//! tier health, and unregistration that degrades to disablement while runs
//! still reference the definition.
//!
//! ## Architecture Context
//! The registry does not know about executors or the run ledger directly.
//! It sees them through two narrow traits (`TierHealthSource`,
//! `ReferenceProbe`) that the control plane wires in, keeping this crate
//! free of circular dependencies.

use async_trait::async_trait;
use plexgis_common::{ExecutionTier, RequestContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::store::DefinitionStore;
use crate::types::{DefinitionFilter, ProcessDefinition};

/// Live tier health, answered by the executor coordinator
#[async_trait]
pub trait TierHealthSource: Send + Sync {
    /// Tiers currently able to accept work
    async fn healthy_tiers(&self) -> Vec<ExecutionTier>;
}

/// Answers whether any non-terminal runs still reference a definition
#[async_trait]
pub trait ReferenceProbe: Send + Sync {
    /// True when pending or running work references the process
    async fn has_open_runs(&self, ctx: &RequestContext, process_id: &str) -> RegistryResult<bool>;
}

/// Result of an unregistration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// Definition deleted
    Removed,
    /// Open runs still reference the definition; it was disabled instead
    Disabled,
}

/// Cached, validated registry over a [`DefinitionStore`]
pub struct ProcessRegistry {
    store: Arc<dyn DefinitionStore>,
    cache: RwLock<HashMap<String, ProcessDefinition>>,
    health: Option<Arc<dyn TierHealthSource>>,
    probe: Option<Arc<dyn ReferenceProbe>>,
}

impl ProcessRegistry {
    /// Create a registry without health or reference wiring
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            health: None,
            probe: None,
        }
    }

    /// Attach a tier health source
    pub fn with_health_source(mut self, health: Arc<dyn TierHealthSource>) -> Self {
        self.health = Some(health);
        self
    }

    /// Attach a run reference probe
    pub fn with_reference_probe(mut self, probe: Arc<dyn ReferenceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn cache_key(ctx: &RequestContext, id: &str) -> String {
        format!("{}:{}:{}", ctx.tenant_id(), ctx.namespace(), id)
    }

    /// Validate and register (or update) a definition
    pub async fn register(
        &self,
        ctx: &RequestContext,
        definition: ProcessDefinition,
    ) -> RegistryResult<ProcessDefinition> {
        definition.validate()?;
        let stored = self.store.upsert(ctx, definition).await?;
        info!(
            tenant_id = %ctx.tenant_id(),
            process_id = %stored.id,
            version = stored.version,
            "Registered process definition"
        );
        let mut cache = self.cache.write().await;
        cache.insert(Self::cache_key(ctx, &stored.id), stored.clone());
        Ok(stored)
    }

    /// Fetch a definition, read-through cached
    pub async fn get(&self, ctx: &RequestContext, id: &str) -> RegistryResult<ProcessDefinition> {
        {
            let cache = self.cache.read().await;
            if let Some(def) = cache.get(&Self::cache_key(ctx, id)) {
                return Ok(def.clone());
            }
        }
        let def = self.store.get(ctx, id).await?;
        let mut cache = self.cache.write().await;
        cache.insert(Self::cache_key(ctx, id), def.clone());
        Ok(def)
    }

    /// List definitions matching a filter
    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &DefinitionFilter,
    ) -> RegistryResult<(Vec<ProcessDefinition>, i64)> {
        self.store.list(ctx, filter).await
    }

    /// Unregister a definition
    ///
    /// When a reference probe is attached and reports open runs, the
    /// definition is disabled instead of deleted so those runs can still
    /// resolve it.
    pub async fn unregister(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> RegistryResult<UnregisterOutcome> {
        let definition = self.get(ctx, id).await?;

        if let Some(probe) = &self.probe {
            if probe.has_open_runs(ctx, id).await? {
                let mut disabled = definition;
                disabled.enabled = false;
                let stored = self.store.upsert(ctx, disabled).await?;
                let mut cache = self.cache.write().await;
                cache.insert(Self::cache_key(ctx, id), stored);
                warn!(
                    tenant_id = %ctx.tenant_id(),
                    process_id = %id,
                    "Open runs reference process; disabled instead of removing"
                );
                return Ok(UnregisterOutcome::Disabled);
            }
        }

        if !self.store.remove(ctx, id).await? {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        let mut cache = self.cache.write().await;
        cache.remove(&Self::cache_key(ctx, id));
        info!(tenant_id = %ctx.tenant_id(), process_id = %id, "Unregistered process definition");
        Ok(UnregisterOutcome::Removed)
    }

    /// Whether the process accepts submissions right now
    ///
    /// Requires the definition to be enabled and, when a health source is
    /// attached, at least one supported tier to be healthy.
    pub async fn is_available(&self, ctx: &RequestContext, id: &str) -> RegistryResult<bool> {
        let definition = self.get(ctx, id).await?;
        if !definition.enabled {
            return Ok(false);
        }
        match &self.health {
            Some(health) => {
                let healthy = health.healthy_tiers().await;
                let available = definition
                    .supported_tiers
                    .iter()
                    .any(|tier| healthy.contains(tier));
                if !available {
                    debug!(
                        process_id = %id,
                        "No healthy tier among supported tiers"
                    );
                }
                Ok(available)
            }
            None => Ok(true),
        }
    }

    /// Drop cached entries for the caller's tenant/namespace
    pub async fn reload(&self, ctx: &RequestContext) {
        let prefix = format!("{}:{}:", ctx.tenant_id(), ctx.namespace());
        let mut cache = self.cache.write().await;
        cache.retain(|key, _| !key.starts_with(&prefix));
    }
}
