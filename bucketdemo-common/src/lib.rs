pub mod backend;
pub mod error;
pub mod listing;
pub mod path;
pub mod retry;
pub mod stat;
pub mod storage;

#[cfg(test)]
mod testing;

pub use backend::{ListRequest, PageEntry, StorageBackend, WriteOptions};
pub use error::StorageError;
pub use listing::{BucketLister, ListOptions, ListingCursor, DEFAULT_PAGE_SIZE};
pub use retry::{default_retry_params, set_default_retry_params, RetryParams, RetryPolicy};
pub use stat::ObjectStat;
pub use storage::{Storage, StorageReader, StorageWriter};
