pub mod directory;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use bucketdemo_common::StorageBackend;

pub use directory::DirectoryBackend;
pub use memory::MemoryBackend;

/// Backend selection as it appears in the `[backend]` config table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    #[default]
    Memory,
    Directory { path: PathBuf },
}

/// Construct a storage backend from its configuration.
pub fn from_config(config: &BackendConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendConfig::Directory { path } => {
            if !path.is_absolute() {
                bail!("directory backend path must be absolute: {}", path.display());
            }
            std::fs::create_dir_all(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Arc::new(DirectoryBackend::new(path)))
        }
    }
}

/// Content hash reported as the object's etag: the first 128 bits of its
/// SHA-256, hex encoded.
pub(crate) fn compute_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..16])
}
