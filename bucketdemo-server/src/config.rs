use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use bucketdemo_backend::BackendConfig;
use bucketdemo_common::RetryParams;
use bucketdemo_common::path::split_bucket_path;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BUCKET: &str = "app_default_bucket";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bucket used when `BUCKET_NAME` is not set.
    #[serde(default = "default_bucket")]
    pub default_bucket: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            default_bucket: default_bucket(),
            backend: BackendConfig::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Process-wide retry defaults, in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_delay: f64,
    pub max_delay: f64,
    pub backoff_factor: f64,
    pub max_retry_period: f64,
    pub min_retries: u32,
    pub max_retries: Option<u32>,
    pub attempt_timeout: Option<f64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: 0.2,
            max_delay: 5.0,
            backoff_factor: 2.0,
            max_retry_period: 15.0,
            min_retries: 0,
            max_retries: None,
            attempt_timeout: None,
        }
    }
}

impl RetrySettings {
    pub fn to_params(&self) -> anyhow::Result<RetryParams> {
        let mut params = RetryParams::new()
            .with_initial_delay(secs("initial_delay", self.initial_delay)?)
            .with_max_delay(secs("max_delay", self.max_delay)?)
            .with_backoff_factor(self.backoff_factor)
            .with_max_retry_period(secs("max_retry_period", self.max_retry_period)?)
            .with_min_retries(self.min_retries);
        if let Some(max) = self.max_retries {
            params = params.with_max_retries(max);
        }
        if let Some(timeout) = self.attempt_timeout {
            params = params.with_attempt_timeout(secs("attempt_timeout", timeout)?);
        }
        params.validate().context("Invalid [retry] settings")?;
        Ok(params)
    }
}

fn secs(name: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow::anyhow!("retry.{} = {}: {}", name, value, e))
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`ServerConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must not be 0");
        }
        if self.default_bucket.is_empty() {
            anyhow::bail!("default_bucket must not be empty");
        }
        split_bucket_path(&format!("/{}", self.default_bucket))
            .with_context(|| format!("Invalid default_bucket {:?}", self.default_bucket))?;
        self.retry.to_params()?;
        Ok(())
    }
}
