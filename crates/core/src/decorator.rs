//! Hooks that attach properties to written files.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::backend::{ObjectMetadata, ObjectProperties};

/// Attaches backend properties to a freshly written object. Runs after the
/// write has succeeded, or just before it on backends that cannot update
/// properties in place. An error is logged and the write stands.
pub trait PropertyDecorator: Send + Sync {
    /// Properties to apply to `key`, or `None` to leave the object as is.
    fn on_file_written(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Option<ObjectProperties>>;
}

type ContentTypeLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Sets `Content-Type` from a caller-supplied lookup on the key.
#[derive(Clone)]
pub struct ContentTypeDecorator {
    lookup: Arc<ContentTypeLookup>,
}

impl ContentTypeDecorator {
    pub fn new<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    /// Lookup by file extension. Keys may be given with or without the
    /// leading dot and are matched case-insensitively.
    pub fn from_extensions(map: &HashMap<String, String>) -> Self {
        let map: HashMap<String, String> = map
            .iter()
            .map(|(ext, mime)| {
                (
                    ext.trim_start_matches('.').to_ascii_lowercase(),
                    mime.clone(),
                )
            })
            .collect();
        Self::new(move |key| {
            let ext = Path::new(key).extension()?.to_str()?.to_ascii_lowercase();
            map.get(&ext).cloned()
        })
    }
}

impl std::fmt::Debug for ContentTypeDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTypeDecorator").finish_non_exhaustive()
    }
}

impl PropertyDecorator for ContentTypeDecorator {
    fn on_file_written(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Option<ObjectProperties>> {
        let Some(mime) = (self.lookup)(key) else {
            return Ok(None);
        };
        // Drop parameters such as `; charset=utf-8`.
        let mime = mime.split(';').next().unwrap_or_default().trim().to_string();
        if mime.is_empty() || metadata.content_type.as_deref() == Some(mime.as_str()) {
            return Ok(None);
        }
        Ok(Some(ObjectProperties {
            content_type: Some(mime),
            content_disposition: None,
        }))
    }
}
