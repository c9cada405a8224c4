use std::sync::Arc;

use bucketdemo_common::Storage;

use crate::env::Environment;

/// Shared application state
pub struct AppState {
    pub storage: Storage,
    /// Bucket used when `BUCKET_NAME` is unset
    pub default_bucket: String,
    pub env: Arc<dyn Environment>,
}

impl AppState {
    pub fn new(storage: Storage, default_bucket: String, env: Arc<dyn Environment>) -> Self {
        Self {
            storage,
            default_bucket,
            env,
        }
    }
}
