pub mod local;
pub mod memory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key separator used by every backend.
pub const SEPARATOR: char = '/';

/// What a backend knows about a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub length: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    /// Raw `Content-Disposition` style value. See [`crate::metadata::ContentDisposition`].
    pub content_disposition: Option<String>,
}

/// Descriptive properties attached to an object on write or afterwards.
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
}

impl ObjectProperties {
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.content_disposition.is_none()
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &ObjectProperties) {
        if other.content_type.is_some() {
            self.content_type.clone_from(&other.content_type);
        }
        if other.content_disposition.is_some() {
            self.content_disposition
                .clone_from(&other.content_disposition);
        }
    }
}

/// One row of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// A stored object and whatever metadata the listing call returned.
    Object { key: String, metadata: ObjectMetadata },
    /// A common prefix one level below the listed prefix, ending in `/`.
    Prefix(String),
}

impl ListEntry {
    pub fn key(&self) -> &str {
        match self {
            ListEntry::Object { key, .. } => key,
            ListEntry::Prefix(prefix) => prefix,
        }
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self, ListEntry::Prefix(_))
    }
}

/// Returned by backends for operations they have no equivalent for.
#[derive(Debug, thiserror::Error)]
#[error("operation not supported by {backend} backend: {operation}")]
pub struct Unsupported {
    pub backend: &'static str,
    pub operation: &'static str,
}

/// Flat key-value object storage. Keys are opaque strings; `/` is only a
/// naming convention that `list` understands when grouping.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn read(&self, key: &str) -> Result<Bytes>;
    async fn write(&self, key: &str, data: Bytes, properties: &ObjectProperties) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix`. Non-recursive listings group keys
    /// below the next `/` into [`ListEntry::Prefix`] rows. `limit` bounds
    /// the number of rows returned.
    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ListEntry>>;

    /// Metadata for `key`, or `None` when no such object exists.
    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>>;

    async fn set_properties(&self, _key: &str, _properties: &ObjectProperties) -> Result<()> {
        Err(Unsupported {
            backend: self.name(),
            operation: "set_properties",
        }
        .into())
    }

    /// Whether `list` rows carry the same descriptive properties `head`
    /// returns. When false, callers that need them must `head` each row.
    fn listing_includes_properties(&self) -> bool {
        true
    }

    /// Whether `set_properties` changes an object without a second write of
    /// its contents. When false, properties should go along with `write`.
    fn updates_properties_in_place(&self) -> bool {
        true
    }

    /// Native URL of the container, when the backend has one.
    fn base_url(&self) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str;
}

/// Shared grouping for backends that enumerate keys themselves.
/// `objects` must be sorted by key; returns the rows a delimiter listing would.
pub(crate) fn group_listing<I>(
    prefix: &str,
    recursive: bool,
    limit: Option<usize>,
    objects: I,
) -> Vec<ListEntry>
where
    I: IntoIterator<Item = (String, ObjectMetadata)>,
{
    let limit = limit.unwrap_or(usize::MAX);
    let mut entries: Vec<ListEntry> = Vec::new();

    for (key, metadata) in objects {
        if entries.len() >= limit {
            break;
        }
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if !recursive {
            if let Some(idx) = rest.find(SEPARATOR) {
                let group = format!("{prefix}{}", &rest[..=idx]);
                if entries.last().map(ListEntry::key) != Some(group.as_str()) {
                    entries.push(ListEntry::Prefix(group));
                }
                continue;
            }
        }
        entries.push(ListEntry::Object { key, metadata });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects(keys: &[&str]) -> Vec<(String, ObjectMetadata)> {
        keys.iter()
            .map(|k| (k.to_string(), ObjectMetadata::default()))
            .collect()
    }

    #[test]
    fn grouping_collapses_nested_keys() {
        let rows = group_listing(
            "media/",
            false,
            None,
            objects(&["media/a.png", "media/x/1.png", "media/x/2.png", "media/y/3.png", "other/b"]),
        );
        let keys: Vec<_> = rows.iter().map(ListEntry::key).collect();
        assert_eq!(keys, vec!["media/a.png", "media/x/", "media/y/"]);
        assert!(rows[1].is_prefix());
    }

    #[test]
    fn recursive_listing_keeps_every_key() {
        let rows = group_listing("media/", true, None, objects(&["media/a", "media/x/1"]));
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.is_prefix()));
    }

    #[test]
    fn limit_bounds_rows() {
        let rows = group_listing("", true, Some(1), objects(&["a", "b", "c"]));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn properties_merge_keeps_unset_fields() {
        let mut props = ObjectProperties {
            content_type: Some("image/png".into()),
            content_disposition: Some("attachment".into()),
        };
        props.merge(&ObjectProperties {
            content_type: Some("image/jpeg".into()),
            content_disposition: None,
        });
        assert_eq!(props.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(props.content_disposition.as_deref(), Some("attachment"));
    }
}
