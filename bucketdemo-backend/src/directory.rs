//! Local directory backend.
//!
//! Layout per bucket: `objects/<key>` holds the content and
//! `meta/<key>.json` the stored attributes, with keys percent-encoded so that
//! `bar` and `bar/1` can coexist. Writes go to a temp file, are fsynced and
//! then renamed into place.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;
use uuid::Uuid;

use bucketdemo_common::backend::{
    select_entries, ListRequest, PageEntry, StorageBackend, WriteOptions,
};
use bucketdemo_common::path::{join, split_bucket_path, split_file_path};
use bucketdemo_common::{ObjectStat, StorageError};

use crate::compute_etag;

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const TMP_DIR: &str = "tmp";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    etag: String,
    created: DateTime<Utc>,
}

pub struct DirectoryBackend {
    base_path: PathBuf,
}

impl DirectoryBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Data and sidecar locations for a `/bucket/key` path.
    fn locate(&self, path: &str) -> Result<(PathBuf, PathBuf, PathBuf), StorageError> {
        let (bucket, key) = split_file_path(path)?;
        let name = encode_key(key);
        let bucket_dir = self.bucket_dir(bucket);
        Ok((
            bucket_dir.join(OBJECTS_DIR).join(&name),
            bucket_dir.join(META_DIR).join(format!("{}.json", name)),
            bucket_dir.join(TMP_DIR),
        ))
    }

    async fn load_stat(
        &self,
        path: &str,
        data_path: &Path,
        meta_path: &Path,
    ) -> Result<ObjectStat, StorageError> {
        let fs_meta = tokio::fs::metadata(data_path)
            .await
            .map_err(|e| io_error(e, path))?;
        let sidecar = match tokio::fs::read(meta_path).await {
            Ok(raw) => serde_json::from_slice::<Sidecar>(&raw).ok(),
            Err(_) => None,
        };
        let stat = match sidecar {
            Some(s) => ObjectStat::object(
                path,
                fs_meta.len(),
                s.created,
                s.etag,
                s.content_type,
                s.metadata,
            ),
            None => {
                let created = fs_meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                ObjectStat::object(
                    path,
                    fs_meta.len(),
                    created,
                    "",
                    DEFAULT_CONTENT_TYPE,
                    BTreeMap::new(),
                )
            }
        };
        Ok(stat)
    }
}

fn entry_filename(entry: &(String, String)) -> &str {
    &entry.0
}

/// Percent-encode a key into a single file name. `.` and `..` are encoded
/// explicitly to prevent path traversal.
fn encode_key(key: &str) -> String {
    match key {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        other => urlencoding::encode(other).into_owned(),
    }
}

fn io_error(e: std::io::Error, path: &str) -> StorageError {
    match StorageError::from(e) {
        StorageError::NotFound(_) => StorageError::NotFound(path.to_string()),
        StorageError::PermissionDenied(msg) => {
            StorageError::PermissionDenied(format!("{}: {}", path, msg))
        }
        StorageError::Transient(msg) => StorageError::Transient(format!("{}: {}", path, msg)),
        StorageError::Permanent(msg) => StorageError::Permanent(format!("{}: {}", path, msg)),
        other => other,
    }
}

async fn write_atomic(
    tmp_dir: &Path,
    dest: &Path,
    data: &[u8],
    path: &str,
) -> Result<(), StorageError> {
    let tmp_path = tmp_dir.join(Uuid::new_v4().to_string());
    tokio::fs::write(&tmp_path, data)
        .await
        .map_err(|e| io_error(e, path))?;

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&tmp_path)
        .await
        .map_err(|e| io_error(e, path))?;
    file.sync_all().await.map_err(|e| io_error(e, path))?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .map_err(|e| io_error(e, path))
}

#[async_trait]
impl StorageBackend for DirectoryBackend {
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let (data_path, meta_path, tmp_dir) = self.locate(path)?;
        for dir in [data_path.parent(), meta_path.parent(), Some(tmp_dir.as_path())]
            .into_iter()
            .flatten()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error(e, path))?;
        }

        let sidecar = Sidecar {
            content_type: options.resolved_content_type(path),
            metadata: options.metadata.clone(),
            etag: compute_etag(&data),
            created: Utc::now(),
        };
        let sidecar = serde_json::to_vec(&sidecar)
            .map_err(|e| StorageError::Permanent(format!("{}: {}", path, e)))?;

        write_atomic(&tmp_dir, &data_path, &data, path).await?;
        write_atomic(&tmp_dir, &meta_path, &sidecar, path).await?;

        debug!(path = %path, size = data.len(), "Directory put complete");
        Ok(())
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, StorageError> {
        let (data_path, _, _) = self.locate(path)?;
        let mut file = tokio::fs::File::open(&data_path)
            .await
            .map_err(|e| io_error(e, path))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(e, path))?;
        let mut buf = Vec::new();
        file.take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| io_error(e, path))?;
        Ok(Bytes::from(buf))
    }

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError> {
        let (data_path, meta_path, _) = self.locate(path)?;
        self.load_stat(path, &data_path, &meta_path).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<Vec<ObjectStat>, StorageError> {
        let (bucket, _) = split_bucket_path(&request.prefix)?;
        let bucket_dir = self.bucket_dir(bucket);
        let objects_dir = bucket_dir.join(OBJECTS_DIR);

        let mut entries = match tokio::fs::read_dir(&objects_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e, &request.prefix)),
        };

        let marker = request.marker.as_deref();
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(e, &request.prefix))?
        {
            let file_name = entry.file_name();
            let Some(encoded) = file_name.to_str() else {
                continue;
            };
            let key = match urlencoding::decode(encoded) {
                Ok(key) => key.into_owned(),
                Err(_) => {
                    debug!(file = %encoded, "Skipping undecodable object file");
                    continue;
                }
            };
            let filename = join(bucket, &key);
            if !filename.starts_with(request.prefix.as_str()) {
                continue;
            }
            if marker.is_some_and(|m| filename.as_str() <= m) {
                continue;
            }
            names.push((filename, encoded.to_string()));
        }
        names.sort();

        // Pick the page on names, then stat only what is returned.
        let entries = select_entries(names, request, entry_filename);
        let meta_dir = bucket_dir.join(META_DIR);
        let mut stats = Vec::with_capacity(entries.len());
        for entry in entries {
            let (filename, encoded) = match entry {
                PageEntry::Object(pair) => pair,
                PageEntry::Directory(name) => {
                    stats.push(ObjectStat::directory(name));
                    continue;
                }
            };
            let data_path = objects_dir.join(&encoded);
            let meta_path = meta_dir.join(format!("{}.json", encoded));
            match self.load_stat(&filename, &data_path, &meta_path).await {
                Ok(stat) => stats.push(stat),
                // Deleted between read_dir and stat.
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let (data_path, meta_path, _) = self.locate(path)?;
        tokio::fs::remove_file(&data_path)
            .await
            .map_err(|e| io_error(e, path))?;
        if let Err(e) = tokio::fs::remove_file(&meta_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(io_error(e, path));
            }
        }
        debug!(path = %path, "Directory delete complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());

        let options = WriteOptions::new()
            .with_content_type("text/plain")
            .with_metadata("x-goog-meta-bar", "bar");
        backend
            .put("/bkt/test/subdir/file.txt", Bytes::from("hello world"), &options)
            .await
            .unwrap();

        let data = backend.read_range("/bkt/test/subdir/file.txt", 0, 5).await.unwrap();
        assert_eq!(&data[..], b"hello");

        let stat = backend.stat("/bkt/test/subdir/file.txt").await.unwrap();
        assert_eq!(stat.size, Some(11));
        assert_eq!(stat.content_type.as_deref(), Some("text/plain"));
        assert_eq!(stat.etag.as_deref(), Some(compute_etag(b"hello world").as_str()));

        backend.delete("/bkt/test/subdir/file.txt").await.unwrap();
        let err = backend.read_range("/bkt/test/subdir/file.txt", 0, 5).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(backend.delete("/bkt/test/subdir/file.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_file_and_nested_key_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());

        backend.put("/bkt/bar", Bytes::from("a"), &WriteOptions::new()).await.unwrap();
        backend.put("/bkt/bar/1", Bytes::from("bb"), &WriteOptions::new()).await.unwrap();

        assert_eq!(backend.stat("/bkt/bar").await.unwrap().size, Some(1));
        assert_eq!(backend.stat("/bkt/bar/1").await.unwrap().size, Some(2));
    }

    #[tokio::test]
    async fn test_dot_keys_stay_inside_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());

        backend.put("/bkt/..", Bytes::from("x"), &WriteOptions::new()).await.unwrap();
        let (data_path, _, _) = backend.locate("/bkt/..").unwrap();
        assert!(data_path.starts_with(dir.path().join("bkt").join(OBJECTS_DIR)));
        assert!(data_path.is_file());
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());
        let request = ListRequest {
            prefix: "/nobucket".to_string(),
            marker: None,
            delimiter: None,
            max_keys: 10,
        };
        assert!(backend.list_page(&request).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_page_stats_only_returned_entries() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());
        backend.put("/bkt/a", Bytes::from("x"), &WriteOptions::new()).await.unwrap();
        backend.put("/bkt/b", Bytes::from("y"), &WriteOptions::new()).await.unwrap();

        // Unreadable entry sorting after the first page.
        let looped = dir.path().join("bkt").join(OBJECTS_DIR).join("zloop");
        std::os::unix::fs::symlink(&looped, &looped).unwrap();

        let mut request = ListRequest {
            prefix: "/bkt/".to_string(),
            marker: None,
            delimiter: None,
            max_keys: 1,
        };
        let page = backend.list_page(&request).await.unwrap();
        let names: Vec<_> = page.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["/bkt/a"]);

        request.max_keys = 10;
        assert!(backend.list_page(&request).await.is_err());
    }
}
