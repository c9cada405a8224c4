use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use chrono::Utc;

use crate::backend::{select_page, ListRequest, StorageBackend, WriteOptions};
use crate::error::StorageError;
use crate::stat::ObjectStat;

/// Minimal in-process backend with failure injection for unit tests.
#[derive(Default)]
pub struct FakeBackend {
    objects: Mutex<BTreeMap<String, (Bytes, WriteOptions)>>,
    /// Number of upcoming calls that fail with a transient error.
    pub transient_failures: AtomicU32,
    pub list_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn insert(&self, path: &str, data: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), (Bytes::from(data.to_string()), WriteOptions::new()));
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Transient("injected failure".into()));
        }
        Ok(())
    }

    fn stat_of(path: &str, data: &Bytes, options: &WriteOptions) -> ObjectStat {
        ObjectStat::object(
            path,
            data.len() as u64,
            Utc::now(),
            "etag",
            options.resolved_content_type(path),
            options.metadata.clone(),
        )
    }
}

#[async_trait::async_trait]
impl StorageBackend for FakeBackend {
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), (data, options.clone()));
        Ok(())
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, StorageError> {
        self.maybe_fail()?;
        let objects = self.objects.lock().unwrap();
        let (data, _) = objects
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(len) as usize).min(data.len());
        Ok(data.slice(start..end))
    }

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        self.maybe_fail()?;
        let objects = self.objects.lock().unwrap();
        let (data, options) = objects
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(Self::stat_of(path, data, options))
    }

    async fn list_page(&self, request: &ListRequest) -> Result<Vec<ObjectStat>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        let objects = self.objects.lock().unwrap();
        let stats = objects
            .iter()
            .map(|(path, (data, options))| Self::stat_of(path, data, options));
        Ok(select_page(stats, request))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.maybe_fail()?;
        match self.objects.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }
}
