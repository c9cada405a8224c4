//! In-process backend holding objects in a sorted map.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::debug;

use bucketdemo_common::backend::{select_page, ListRequest, StorageBackend, WriteOptions};
use bucketdemo_common::{ObjectStat, StorageError};

use crate::compute_etag;

struct StoredObject {
    data: Bytes,
    stat: ObjectStat,
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::Permanent("memory backend lock poisoned".to_string())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let stat = ObjectStat::object(
            path,
            data.len() as u64,
            Utc::now(),
            compute_etag(&data),
            options.resolved_content_type(path),
            options.metadata.clone(),
        );
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(path.to_string(), StoredObject { data, stat });
        debug!(path = %path, "Memory put complete");
        Ok(())
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, StorageError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        let obj = objects
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let size = obj.data.len() as u64;
        let start = offset.min(size);
        let end = offset.saturating_add(len).min(size);
        Ok(obj.data.slice(start as usize..end as usize))
    }

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(path)
            .map(|obj| obj.stat.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn list_page(&self, request: &ListRequest) -> Result<Vec<ObjectStat>, StorageError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        let prefix = request.prefix.as_str();
        let start = match request.marker.as_deref() {
            Some(marker) if marker > prefix => marker,
            _ => prefix,
        };
        let candidates = objects
            .range::<str, _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(_, obj)| obj.stat.clone());
        Ok(select_page(candidates, request))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match self.objects.write().map_err(|_| poisoned())?.remove(path) {
            Some(_) => {
                debug!(path = %path, "Memory delete complete");
                Ok(())
            }
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }
}
