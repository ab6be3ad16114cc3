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

//! Object storage seam for spilled run outputs
//!
//! ## Purpose
//! Outputs larger than `output_inline_max_bytes` live here instead of in the
//! ledger row; the row keeps a `Stored { key, size_bytes }` reference.
//!
//! ## Design
//! Keys are forward-slash paths owned by the control plane
//! (`runs/{tenant_id}/{run_id}.json`), so backends never invent structure.
//! The in-memory backend serves tests and single-process deployments; the
//! filesystem backend maps keys to paths under one root directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ControlError, ControlResult};

/// Byte storage for run outputs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, replacing any previous value
    async fn put(&self, key: &str, data: Vec<u8>) -> ControlResult<()>;

    /// Fetch the bytes stored under a key
    ///
    /// ## Errors
    /// `NotFound` when the key has never been written or was deleted.
    async fn get(&self, key: &str) -> ControlResult<Vec<u8>>;

    /// Remove a key; removing an absent key is a no-op
    async fn delete(&self, key: &str) -> ControlResult<()>;
}

/// In-memory object store
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether no object is stored
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// All stored keys, unordered
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> ControlResult<()> {
        validate_key(key)?;
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> ControlResult<Vec<u8>> {
        validate_key(key)?;
        let objects = self.objects.read().await;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> ControlResult<()> {
        validate_key(key)?;
        let mut objects = self.objects.write().await;
        objects.remove(key);
        Ok(())
    }
}

/// Filesystem object store rooted at one directory
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Create a store over `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key to a path strictly inside the root
    fn resolve(&self, key: &str) -> ControlResult<PathBuf> {
        validate_key(key)?;
        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(ControlError::Validation(format!(
                        "object key must be a relative path without traversal: {}",
                        key
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> ControlResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(key = %key, "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> ControlResult<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ControlError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> ControlResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_key(key: &str) -> ControlResult<()> {
    if key.is_empty() {
        return Err(ControlError::Validation(
            "object key cannot be empty".to_string(),
        ));
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(ControlError::Validation(format!(
            "object key must be a relative path without traversal: {}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_get_delete() {
        let store = MemoryObjectStore::new();
        store
            .put("runs/acme/run1.json", b"{\"area\":1.0}".to_vec())
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);

        let data = store.get("runs/acme/run1.json").await.unwrap();
        assert_eq!(data, b"{\"area\":1.0}");

        store.delete("runs/acme/run1.json").await.unwrap();
        assert!(store.is_empty().await);
        assert!(matches!(
            store.get("runs/acme/run1.json").await,
            Err(ControlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_put_replaces() {
        let store = MemoryObjectStore::new();
        store.put("k", b"one".to_vec()).await.unwrap();
        store.put("k", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"two");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_noop() {
        let store = MemoryObjectStore::new();
        assert!(store.delete("never-written").await.is_ok());
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let store = MemoryObjectStore::new();
        for key in ["", "/absolute", "runs/../../etc/passwd"] {
            assert!(
                matches!(
                    store.put(key, b"x".to_vec()).await,
                    Err(ControlError::Validation(_))
                ),
                "key {:?} should have been rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_filesystem_roundtrip() {
        let root = std::env::temp_dir().join(format!(
            "plexgis-objects-{}-{}",
            std::process::id(),
            unique_suffix()
        ));
        let store = FilesystemObjectStore::new(&root);

        store
            .put("runs/acme/run1.json", b"payload".to_vec())
            .await
            .unwrap();
        assert_eq!(store.get("runs/acme/run1.json").await.unwrap(), b"payload");

        store.delete("runs/acme/run1.json").await.unwrap();
        assert!(matches!(
            store.get("runs/acme/run1.json").await,
            Err(ControlError::NotFound(_))
        ));

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn test_filesystem_rejects_traversal() {
        let store = FilesystemObjectStore::new("/tmp/plexgis-never-created");
        assert!(matches!(
            store.get("../outside").await,
            Err(ControlError::Validation(_))
        ));
    }

    fn unique_suffix() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        format!("{:x}", nanos)
    }
}
