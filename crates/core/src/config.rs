use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::FileSystem;
use crate::backend::Backend;
use crate::backend::local::LocalBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::s3::S3Backend;
use crate::decorator::ContentTypeDecorator;

const CONFIG_FILE: &str = "blobfs.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Root of the filesystem inside the backend's key space.
    #[serde(default)]
    pub relative_address: String,
    /// Base for public URLs. Defaults to the backend's native URL.
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub listing_errors: ListingErrors,
    /// Embed creation/modification dates in `Content-Disposition` on write.
    #[serde(default = "default_stamp_dates")]
    pub stamp_dates: bool,
    pub backend: BackendConfig,
    /// File extension to MIME type, applied after each write.
    #[serde(default)]
    pub content_types: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    #[serde(rename = "local")]
    Local { path: String },
    #[serde(rename = "s3")]
    S3 {
        endpoint: String,
        region: String,
        bucket: String,
        access_key: String,
        secret_key: String,
    },
    #[serde(rename = "memory")]
    Memory,
}

/// What directory and file listings do when the backend fails mid-listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingErrors {
    /// Return the error to the caller.
    #[default]
    Surface,
    /// Log it and report an empty listing.
    Swallow,
}

fn default_stamp_dates() -> bool {
    true
}

impl FsConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            relative_address: String::new(),
            root_url: None,
            listing_errors: ListingErrors::default(),
            stamp_dates: default_stamp_dates(),
            backend,
            content_types: HashMap::new(),
        }
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blobfs")
            .join(CONFIG_FILE)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("config not found at {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub async fn open_backend(&self) -> Result<Arc<dyn Backend>> {
        match &self.backend {
            BackendConfig::Local { path } => Ok(Arc::new(LocalBackend::init(path)?)),
            BackendConfig::S3 {
                endpoint,
                region,
                bucket,
                access_key,
                secret_key,
            } => {
                let backend =
                    S3Backend::new(bucket, endpoint, region, access_key, secret_key).await?;
                Ok(Arc::new(backend))
            }
            BackendConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        }
    }

    /// Build the filesystem described by this config.
    pub async fn open(&self) -> Result<FileSystem> {
        let backend = self.open_backend().await?;
        let mut fs = FileSystem::new(backend, &self.relative_address, self.root_url.as_deref())
            .with_listing_errors(self.listing_errors)
            .with_date_stamping(self.stamp_dates);
        if !self.content_types.is_empty() {
            fs = fs.with_decorator(Arc::new(ContentTypeDecorator::from_extensions(
                &self.content_types,
            )));
        }
        Ok(fs)
    }
}
