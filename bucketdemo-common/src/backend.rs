use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::StorageError;
use crate::stat::ObjectStat;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Trait implemented by all storage backend adapters.
///
/// Paths are full `/bucket/key` strings that have already been validated by
/// [`crate::storage::Storage`]. Adapters perform a single attempt per call and
/// classify their failures through [`StorageError`]; retrying is the caller's
/// concern.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `data` at `path`, replacing any existing object.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Read up to `len` bytes starting at `offset`. Reads past the end are
    /// truncated, possibly to an empty buffer.
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, StorageError>;

    async fn stat(&self, path: &str) -> Result<ObjectStat, StorageError>;

    /// Return one page of a bucket listing.
    async fn list_page(&self, request: &ListRequest) -> Result<Vec<ObjectStat>, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Options attached to an object when it is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    /// Custom metadata headers, e.g. `x-goog-meta-foo`.
    pub metadata: BTreeMap<String, String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicit content type, or one guessed from the file name.
    pub fn resolved_content_type(&self, path: &str) -> String {
        match &self.content_type {
            Some(ct) => ct.clone(),
            None => mime_guess::from_path(path)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
        }
    }
}

/// A single `listbucket` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    /// Full path prefix, `/bucket` or `/bucket/partial-key`.
    pub prefix: String,
    /// Only entries strictly after this filename are returned.
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: usize,
}

/// One entry of a listing page: an object item, or a directory entry
/// synthesized from a delimiter.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEntry<T> {
    Object(T),
    Directory(String),
}

/// Select one page from `items`, which must be sorted by filename.
///
/// With a delimiter, every item whose remainder after the prefix contains
/// the delimiter collapses into a single directory entry named
/// `prefix + remainder[..=delimiter]`. Directory entries count toward
/// `max_keys` like objects do. A group at or before the marker has already
/// been returned and is skipped entirely.
///
/// Only names are inspected, so backends can pick a page before loading any
/// per-object attributes.
pub fn select_entries<T, I, F>(items: I, request: &ListRequest, filename: F) -> Vec<PageEntry<T>>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> &str,
{
    let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
    let marker = request.marker.as_deref();
    let mut page = Vec::new();
    let mut last_dir: Option<String> = None;

    for item in items {
        if page.len() >= request.max_keys {
            break;
        }
        let name = filename(&item);
        let Some(rest) = name.strip_prefix(request.prefix.as_str()) else {
            continue;
        };
        if marker.is_some_and(|m| name <= m) {
            continue;
        }

        let dir = delimiter.and_then(|delim| {
            rest.find(delim)
                .map(|idx| format!("{}{}", request.prefix, &rest[..idx + delim.len()]))
        });
        match dir {
            Some(dir) => {
                if marker.is_some_and(|m| dir.as_str() <= m)
                    || last_dir.as_deref() == Some(dir.as_str())
                {
                    continue;
                }
                last_dir = Some(dir.clone());
                page.push(PageEntry::Directory(dir));
            }
            None => page.push(PageEntry::Object(item)),
        }
    }

    page
}

/// [`select_entries`] over full stats, with directory entries turned into
/// [`ObjectStat::directory`].
pub fn select_page<I>(objects: I, request: &ListRequest) -> Vec<ObjectStat>
where
    I: IntoIterator<Item = ObjectStat>,
{
    select_entries(objects, request, stat_filename)
        .into_iter()
        .map(|entry| match entry {
            PageEntry::Object(stat) => stat,
            PageEntry::Directory(name) => ObjectStat::directory(name),
        })
        .collect()
}

fn stat_filename(stat: &ObjectStat) -> &str {
    &stat.filename
}
