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

//! SQLite-backed definition store
//!
//! ## Purpose
//! Persistent definition storage. The full definition is stored as a JSON
//! document; a few extracted columns (operation, enabled, search text)
//! support filtered listings without deserializing every row.
//!
//! ## Schema
//! ```sql
//! CREATE TABLE process_definitions (
//!     tenant_id TEXT NOT NULL,
//!     namespace TEXT NOT NULL,
//!     id TEXT NOT NULL,
//!     operation TEXT NOT NULL,
//!     enabled INTEGER NOT NULL,
//!     search_text TEXT NOT NULL,
//!     version BIGINT NOT NULL,
//!     definition TEXT NOT NULL,
//!     created_at BIGINT NOT NULL,
//!     updated_at BIGINT NOT NULL,
//!     PRIMARY KEY (tenant_id, namespace, id)
//! );
//! ```

use async_trait::async_trait;
use chrono::Utc;
use plexgis_common::RequestContext;
use sqlx::{Pool, Row, Sqlite};

use crate::error::RegistryResult;
use crate::store::DefinitionStore;
use crate::types::{DefinitionFilter, ProcessDefinition};
use crate::RegistryError;

/// SQLite-based definition store
#[derive(Clone)]
pub struct SqliteDefinitionStore {
    pool: Pool<Sqlite>,
}

impl SqliteDefinitionStore {
    /// Create a store over an existing pool, creating the schema if needed
    pub async fn new(pool: Pool<Sqlite>) -> RegistryResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS process_definitions (
                tenant_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                operation TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                search_text TEXT NOT NULL,
                version BIGINT NOT NULL,
                definition TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (tenant_id, namespace, id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Create a store over a fresh in-memory database (for testing)
    ///
    /// The pool is pinned to a single connection: every connection to
    /// `sqlite::memory:` sees its own database.
    pub async fn in_memory() -> RegistryResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new(pool).await
    }

    fn search_text(definition: &ProcessDefinition) -> String {
        format!(
            "{} {} {}",
            definition.id,
            definition.display_name,
            definition.keywords.join(" ")
        )
        .to_lowercase()
    }
}

#[async_trait]
impl DefinitionStore for SqliteDefinitionStore {
    async fn upsert(
        &self,
        ctx: &RequestContext,
        mut definition: ProcessDefinition,
    ) -> RegistryResult<ProcessDefinition> {
        let existing = sqlx::query(
            "SELECT definition FROM process_definitions \
             WHERE tenant_id = ? AND namespace = ? AND id = ?",
        )
        .bind(ctx.tenant_id())
        .bind(ctx.namespace())
        .bind(&definition.id)
        .fetch_optional(&self.pool)
        .await?;

        let now = Utc::now();
        match existing {
            Some(row) => {
                let stored: ProcessDefinition =
                    serde_json::from_str(&row.get::<String, _>("definition"))?;
                definition.version = stored.version + 1;
                definition.created_at = stored.created_at;
            }
            None => {
                definition.version = 1;
                definition.created_at = now;
            }
        }
        definition.updated_at = now;

        let json = serde_json::to_string(&definition)?;
        sqlx::query(
            r#"
            INSERT INTO process_definitions
                (tenant_id, namespace, id, operation, enabled, search_text,
                 version, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, namespace, id) DO UPDATE SET
                operation = excluded.operation,
                enabled = excluded.enabled,
                search_text = excluded.search_text,
                version = excluded.version,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(ctx.namespace())
        .bind(&definition.id)
        .bind(definition.operation.to_string())
        .bind(definition.enabled)
        .bind(Self::search_text(&definition))
        .bind(definition.version)
        .bind(&json)
        .bind(definition.created_at.timestamp_millis())
        .bind(definition.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(definition)
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> RegistryResult<ProcessDefinition> {
        let row = sqlx::query(
            "SELECT definition FROM process_definitions \
             WHERE tenant_id = ? AND namespace = ? AND id = ?",
        )
        .bind(ctx.tenant_id())
        .bind(ctx.namespace())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        Ok(serde_json::from_str(&row.get::<String, _>("definition"))?)
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &DefinitionFilter,
    ) -> RegistryResult<(Vec<ProcessDefinition>, i64)> {
        let mut conditions =
            String::from("WHERE tenant_id = ? AND namespace = ?");
        if filter.enabled_only {
            conditions.push_str(" AND enabled = 1");
        }
        if filter.operation.is_some() {
            conditions.push_str(" AND operation = ?");
        }
        if filter.keyword.is_some() {
            conditions.push_str(" AND search_text LIKE ?");
        }

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM process_definitions {}", conditions);
        let mut count_query = sqlx::query(&count_sql)
            .bind(ctx.tenant_id())
            .bind(ctx.namespace());
        if let Some(op) = filter.operation {
            count_query = count_query.bind(op.to_string());
        }
        if let Some(keyword) = &filter.keyword {
            count_query = count_query.bind(format!("%{}%", keyword.to_lowercase()));
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("cnt");

        let page_sql = format!(
            "SELECT definition FROM process_definitions {} ORDER BY id LIMIT ? OFFSET ?",
            conditions
        );
        let mut page_query = sqlx::query(&page_sql)
            .bind(ctx.tenant_id())
            .bind(ctx.namespace());
        if let Some(op) = filter.operation {
            page_query = page_query.bind(op.to_string());
        }
        if let Some(keyword) = &filter.keyword {
            page_query = page_query.bind(format!("%{}%", keyword.to_lowercase()));
        }
        let rows = page_query
            .bind(filter.limit.unwrap_or(i64::MAX).max(0))
            .bind(filter.offset.unwrap_or(0).max(0))
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            definitions.push(serde_json::from_str(&row.get::<String, _>("definition"))?);
        }
        Ok((definitions, total))
    }

    async fn remove(&self, ctx: &RequestContext, id: &str) -> RegistryResult<bool> {
        let result = sqlx::query(
            "DELETE FROM process_definitions \
             WHERE tenant_id = ? AND namespace = ? AND id = ?",
        )
        .bind(ctx.tenant_id())
        .bind(ctx.namespace())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
