use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Backend, ListEntry, ObjectMetadata, ObjectProperties, SEPARATOR, group_listing};

/// Object properties are kept as JSON files mirroring the key layout under
/// this directory at the backend root. It never shows up in listings.
const PROPS_DIR: &str = ".blobfs-props";

/// Objects stored as plain files below a root directory. Keys map onto
/// relative paths; directories appear and disappear with their contents.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        Ok(Self { root })
    }

    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create directory: {}", root.display()))?;
        Ok(Self { root })
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        if key.split(SEPARATOR).any(|segment| segment == "..") {
            anyhow::bail!("key escapes backend root: {key}");
        }
        Ok(self.root.join(key.trim_start_matches(SEPARATOR)))
    }

    fn props_path(&self, key: &str) -> Result<PathBuf> {
        if key.split(SEPARATOR).any(|segment| segment == "..") {
            anyhow::bail!("key escapes backend root: {key}");
        }
        let mut path = self
            .root
            .join(PROPS_DIR)
            .join(key.trim_start_matches(SEPARATOR))
            .into_os_string();
        path.push(".json");
        Ok(PathBuf::from(path))
    }

    async fn read_properties(&self, key: &str) -> Result<ObjectProperties> {
        let path = self.props_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("failed to parse properties: {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ObjectProperties::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read properties: {}", path.display()))
            }
        }
    }

    async fn write_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        let path = self.props_path(key)?;
        if properties.is_empty() {
            return remove_if_present(&path).await;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec(properties)?)
            .await
            .with_context(|| format!("failed to write properties: {}", path.display()))
    }

    async fn object_metadata(
        &self,
        key: &str,
        meta: &std::fs::Metadata,
    ) -> Result<ObjectMetadata> {
        let properties = self.read_properties(key).await?;
        let last_modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Ok(ObjectMetadata {
            length: meta.len(),
            last_modified,
            content_type: properties.content_type,
            content_disposition: properties.content_disposition,
        })
    }

    /// Remove now-empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_parents(start: Option<&Path>, stop: &Path) {
        let mut current = start.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == stop || !dir.starts_with(stop) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }

    /// Every object key below `dir_key`, depth first.
    async fn walk(&self, dir_key: &str) -> Result<Vec<(String, ObjectMetadata)>> {
        let mut found = Vec::new();
        let mut pending = vec![dir_key.to_string()];

        while let Some(current) = pending.pop() {
            let dir = self.full_path(&current)?;
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to list: {}", dir.display()));
                }
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if current.is_empty() && name == PROPS_DIR {
                    continue;
                }
                let key = join_key(&current, &name);
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(key);
                } else {
                    let metadata = self.object_metadata(&key, &meta).await?;
                    found.push((key, metadata));
                }
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Whether any file lives below `dir`. Stops at the first one found.
    async fn contains_objects(dir: &Path) -> Result<bool> {
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&current).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to list: {}", current.display()));
                }
            };
            while let Some(entry) = read_dir.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                } else {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn join_key(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}{SEPARATOR}{name}")
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to delete: {}", path.display())),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_path(key)?;
        Ok(tokio::fs::metadata(&full)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        let full = self.full_path(key)?;
        let data = tokio::fs::read(&full)
            .await
            .with_context(|| format!("failed to read: {}", full.display()))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &str, data: Bytes, properties: &ObjectProperties) -> Result<()> {
        let full = self.full_path(key)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &data)
            .await
            .with_context(|| format!("failed to write: {}", full.display()))?;
        self.write_properties(key, properties).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_path(key)?;
        if !full.is_file() {
            return Ok(());
        }
        tokio::fs::remove_file(&full)
            .await
            .with_context(|| format!("failed to delete: {}", full.display()))?;
        Self::prune_empty_parents(full.parent(), &self.root).await;

        let props = self.props_path(key)?;
        remove_if_present(&props).await?;
        Self::prune_empty_parents(props.parent(), &self.root.join(PROPS_DIR)).await;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ListEntry>> {
        let dir_key = match prefix.rfind(SEPARATOR) {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        debug!(prefix, dir = dir_key, recursive, "local list");

        if recursive {
            let objects = self.walk(dir_key).await?;
            return Ok(group_listing(prefix, true, limit, objects));
        }

        let dir = self.full_path(dir_key)?;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to list: {}", dir.display())),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if dir_key.is_empty() && name == PROPS_DIR {
                continue;
            }
            let key = join_key(dir_key, &name);
            if !key.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                // Directories left without files are not prefixes of any key.
                if Self::contains_objects(&entry.path()).await? {
                    entries.push(ListEntry::Prefix(format!("{key}{SEPARATOR}")));
                }
            } else {
                let metadata = self.object_metadata(&key, &meta).await?;
                entries.push(ListEntry::Object { key, metadata });
            }
        }

        entries.sort_by(|a, b| a.key().cmp(b.key()));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let full = self.full_path(key)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(self.object_metadata(key, &meta).await?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to stat: {}", full.display())),
        }
    }

    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        if !self.exists(key).await? {
            anyhow::bail!("object not found: {key}");
        }
        let mut merged = self.read_properties(key).await?;
        merged.merge(properties);
        self.write_properties(key, &merged).await
    }

    fn base_url(&self) -> Option<String> {
        self.root
            .is_absolute()
            .then(|| format!("file://{}", self.root.display()))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
