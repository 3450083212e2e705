use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{Backend, ListEntry, ObjectMetadata, ObjectProperties, group_listing};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    properties: ObjectProperties,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            length: self.data.len() as u64,
            last_modified: Some(self.last_modified),
            content_type: self.properties.content_type.clone(),
            content_disposition: self.properties.content_disposition.clone(),
        }
    }
}

/// Process-local backend. Keys live in a sorted map so listings come back in
/// the same order an object store would return them.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    base_url: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::default(),
            base_url: Some(base_url.into()),
        }
    }

    /// Store an object with an explicit native last-modified time.
    pub fn put_at(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        properties: ObjectProperties,
        last_modified: DateTime<Utc>,
    ) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                properties,
                last_modified,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        objects
            .get(key)
            .map(|o| o.data.clone())
            .with_context(|| format!("object not found: {key}"))
    }

    async fn write(&self, key: &str, data: Bytes, properties: &ObjectProperties) -> Result<()> {
        self.put_at(key, data, properties.clone(), Utc::now())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        objects.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ListEntry>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        let matching = objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| (k.clone(), o.metadata()));
        Ok(group_listing(prefix, recursive, limit, matching))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        Ok(objects.get(key).map(StoredObject::metadata))
    }

    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        let object = objects
            .get_mut(key)
            .with_context(|| format!("object not found: {key}"))?;
        object.properties.merge(properties);
        Ok(())
    }

    fn base_url(&self) -> Option<String> {
        self.base_url.clone()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
