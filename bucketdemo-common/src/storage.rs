//! Storage facade: every backend call goes through the retry policy.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{StorageBackend, WriteOptions};
use crate::error::StorageError;
use crate::listing::{BucketLister, ListOptions};
use crate::path::{join, split_bucket_path, split_file_path};
use crate::retry::{default_retry_params, RetryParams, RetryPolicy};
use crate::stat::ObjectStat;

const DEFAULT_READ_BLOCK_SIZE: u64 = 1024 * 1024;

/// Handle to a storage backend with default retry behaviour attached.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    retry_params: RetryParams,
    cancel: Option<CancellationToken>,
}

impl Storage {
    /// Uses the process-wide default retry params at the time of the call.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            retry_params: default_retry_params(),
            cancel: None,
        }
    }

    pub fn with_retry_params(mut self, params: RetryParams) -> Self {
        self.retry_params = params;
        self
    }

    /// Abort pending retry waits once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn retry_params(&self) -> &RetryParams {
        &self.retry_params
    }

    fn policy(&self, retry: Option<&RetryParams>) -> Result<RetryPolicy, StorageError> {
        let params = retry.unwrap_or(&self.retry_params).clone();
        params.validate()?;
        let policy = RetryPolicy::new(params);
        Ok(match &self.cancel {
            Some(token) => policy.with_cancellation(token.clone()),
            None => policy,
        })
    }

    /// Open a file for writing. Nothing reaches the backend until
    /// [`StorageWriter::close`].
    pub fn open_write(
        &self,
        path: &str,
        options: WriteOptions,
        retry: Option<RetryParams>,
    ) -> Result<StorageWriter, StorageError> {
        split_file_path(path)?;
        let policy = self.policy(retry.as_ref())?;
        Ok(StorageWriter {
            backend: Arc::clone(&self.backend),
            path: path.to_string(),
            options,
            policy,
            buffer: BytesMut::new(),
            committed: false,
        })
    }

    /// Open a file for reading. Fails with `NotFound` if the object is missing.
    pub async fn open_read(
        &self,
        path: &str,
        retry: Option<RetryParams>,
    ) -> Result<StorageReader, StorageError> {
        split_file_path(path)?;
        let policy = self.policy(retry.as_ref())?;
        let backend = &self.backend;
        let stat = policy.execute("stat", move || backend.stat(path)).await?;
        Ok(StorageReader {
            backend: Arc::clone(&self.backend),
            path: path.to_string(),
            policy,
            size: stat.size.unwrap_or(0),
            stat,
            position: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
            block_size: DEFAULT_READ_BLOCK_SIZE,
        })
    }

    pub async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        split_file_path(path)?;
        let policy = self.policy(None)?;
        let backend = &self.backend;
        policy.execute("stat", move || backend.stat(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        split_file_path(path)?;
        let policy = self.policy(None)?;
        let backend = &self.backend;
        policy.execute("delete", move || backend.delete(path)).await?;
        debug!(path = %path, "Deleted object");
        Ok(())
    }

    /// Start a lazy listing. Invalid options fail here, before any request
    /// reaches the backend.
    pub fn listbucket(&self, mut options: ListOptions) -> Result<BucketLister, StorageError> {
        // "/bkt" lists the whole bucket, never "/bkt2/..."
        let (bucket, prefix) = split_bucket_path(&options.prefix)?;
        let normalized = join(bucket, prefix);
        options.prefix = normalized;
        let policy = self.policy(options.retry_params.as_ref())?;
        BucketLister::new(Arc::clone(&self.backend), policy, options)
    }
}

/// A file opened for writing. Data is buffered and committed on `close`.
pub struct StorageWriter {
    backend: Arc<dyn StorageBackend>,
    path: String,
    options: WriteOptions,
    policy: RetryPolicy,
    buffer: BytesMut,
    committed: bool,
}

impl StorageWriter {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(data.as_ref());
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Commit the buffered content to the backend.
    pub async fn close(mut self) -> Result<(), StorageError> {
        self.committed = true;
        let data = std::mem::take(&mut self.buffer).freeze();
        let size = data.len();
        let backend = &self.backend;
        let path = self.path.as_str();
        let options = &self.options;
        self.policy
            .execute("write", move || backend.put(path, data.clone(), options))
            .await?;
        debug!(path = %self.path, size, "Closed file for writing");
        Ok(())
    }
}

impl Drop for StorageWriter {
    fn drop(&mut self) {
        if !self.committed {
            warn!(
                path = %self.path,
                buffered = self.buffer.len(),
                "Writer dropped without close; nothing written"
            );
        }
    }
}

/// A file opened for reading, fetched in byte-range blocks.
pub struct StorageReader {
    backend: Arc<dyn StorageBackend>,
    path: String,
    policy: RetryPolicy,
    stat: ObjectStat,
    size: u64,
    position: u64,
    buffer: Bytes,
    buffer_start: u64,
    block_size: u64,
}

impl StorageReader {
    pub fn stat(&self) -> &ObjectStat {
        &self.stat
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Set how many bytes each backend range read fetches.
    pub fn set_block_size(&mut self, block_size: u64) {
        self.block_size = block_size.max(1);
    }

    /// Move the read position. Positions past the end are allowed and read
    /// as empty; positions before the start are rejected.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StorageError> {
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size) + i128::from(delta),
        };
        if target < 0 {
            return Err(StorageError::Configuration(format!(
                "seek before start of {}",
                self.path
            )));
        }
        self.position = u64::try_from(target).unwrap_or(u64::MAX);
        Ok(self.position)
    }

    /// Read up to `n` bytes from the current position.
    pub async fn read(&mut self, n: usize) -> Result<Bytes, StorageError> {
        let mut out = BytesMut::with_capacity(n.min(self.remaining() as usize));
        while out.len() < n {
            self.fill().await?;
            let available = self.available();
            if available.is_empty() {
                break;
            }
            let take = (n - out.len()).min(available.len());
            out.extend_from_slice(&available[..take]);
            self.position += take as u64;
        }
        Ok(out.freeze())
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes, StorageError> {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        self.read(remaining).await
    }

    /// Read through the next `\n` (included), or to the end of the file.
    pub async fn readline(&mut self) -> Result<Bytes, StorageError> {
        let mut out = BytesMut::new();
        loop {
            self.fill().await?;
            let available = self.available();
            if available.is_empty() {
                break;
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(idx) => {
                    out.extend_from_slice(&available[..=idx]);
                    self.position += idx as u64 + 1;
                    break;
                }
                None => {
                    let len = available.len();
                    out.extend_from_slice(available);
                    self.position += len as u64;
                }
            }
        }
        Ok(out.freeze())
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    fn available(&self) -> &[u8] {
        let end = self.buffer_start + self.buffer.len() as u64;
        if self.position < self.buffer_start || self.position >= end {
            return &[];
        }
        &self.buffer[(self.position - self.buffer_start) as usize..]
    }

    async fn fill(&mut self) -> Result<(), StorageError> {
        if self.position >= self.size || !self.available().is_empty() {
            return Ok(());
        }
        let backend = &self.backend;
        let path = self.path.as_str();
        let (offset, len) = (self.position, self.block_size);
        let data = self
            .policy
            .execute("read", move || backend.read_range(path, offset, len))
            .await?;
        debug!(path = %self.path, offset, len = data.len(), "Fetched byte range");
        self.buffer_start = offset;
        self.buffer = data;
        Ok(())
    }
}
