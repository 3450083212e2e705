use std::collections::BTreeSet;
use std::io::{Cursor, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::backend::{Backend, ListEntry, ObjectMetadata, ObjectProperties, SEPARATOR};
use crate::config::ListingErrors;
use crate::decorator::PropertyDecorator;
use crate::error::{FsError, FsResult};
use crate::glob::{DEFAULT_FILTER, Glob};
use crate::metadata::{
    ContentDisposition, aggregate_last_modified, missing_timestamp, resolve_created,
    resolve_last_modified,
};
use crate::path::PathTranslator;

/// Deletes in flight during a recursive directory delete.
const DELETE_CONCURRENCY: usize = 16;

/// HEAD requests in flight while collecting directory member metadata.
const HEAD_CONCURRENCY: usize = 16;

/// Readable contents of a file.
pub type FileReader = Cursor<Bytes>;

/// Hierarchical view of a flat object store.
///
/// Holds no state besides its configuration: every call is translated and
/// sent to the backend, nothing is cached. Directories are key prefixes and
/// exist only while some object carries them.
pub struct FileSystem {
    backend: Arc<dyn Backend>,
    paths: PathTranslator,
    decorator: Option<Arc<dyn PropertyDecorator>>,
    listing_errors: ListingErrors,
    stamp_dates: bool,
}

impl FileSystem {
    /// `root_url` falls back to the backend's native URL. Without either,
    /// URLs are root-relative.
    pub fn new(backend: Arc<dyn Backend>, relative_address: &str, root_url: Option<&str>) -> Self {
        let base_url = root_url
            .map(str::to_string)
            .or_else(|| backend.base_url())
            .unwrap_or_default();
        debug!(
            backend = backend.name(),
            relative_address,
            base_url = %base_url,
            "filesystem created"
        );
        Self {
            paths: PathTranslator::new(relative_address, &base_url),
            backend,
            decorator: None,
            listing_errors: ListingErrors::default(),
            stamp_dates: true,
        }
    }

    pub fn with_decorator(mut self, decorator: Arc<dyn PropertyDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    pub fn with_listing_errors(mut self, policy: ListingErrors) -> Self {
        self.listing_errors = policy;
        self
    }

    pub fn with_date_stamping(mut self, enabled: bool) -> Self {
        self.stamp_dates = enabled;
        self
    }

    /// Separator used in logical paths. Defaults to the platform's.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.paths = self.paths.with_separator(separator);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Write `content` from its start.
    ///
    /// With `overwrite == false` an existing object fails the call with
    /// [`FsError::AlreadyExists`]. The check and the write are separate
    /// backend calls, so a concurrent writer can still slip in between.
    pub async fn add_file<R>(&self, path: &str, mut content: R, overwrite: bool) -> FsResult<()>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        content.seek(SeekFrom::Start(0)).await?;
        self.add_file_from_reader(path, content, overwrite).await
    }

    /// Like [`add_file`](Self::add_file) for streams that cannot seek; reads
    /// from the current position.
    pub async fn add_file_from_reader<R>(
        &self,
        path: &str,
        mut content: R,
        overwrite: bool,
    ) -> FsResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;
        self.add_bytes(path, Bytes::from(buf), overwrite).await
    }

    pub async fn add_bytes(&self, path: &str, data: Bytes, overwrite: bool) -> FsResult<()> {
        let key = self.paths.to_full_key(path);
        let existing = self.backend.head(&key).await?;
        if existing.is_some() && !overwrite {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let mut properties = self.write_properties(existing.as_ref());
        let length = data.len();
        let decorate_after = self.backend.updates_properties_in_place();
        if !decorate_after {
            let pending = ObjectMetadata {
                length: length as u64,
                last_modified: None,
                content_type: properties.content_type.clone(),
                content_disposition: properties.content_disposition.clone(),
            };
            if let Some(extra) = self.decoration(&key, &pending) {
                properties.merge(&extra);
            }
        }
        self.backend.write(&key, data, &properties).await?;
        info!(key = %key, bytes = length, "file written");

        if decorate_after {
            self.decorate(&key).await;
        }
        Ok(())
    }

    /// Properties for a (re)write. The content type and any creation date of
    /// the object being replaced are carried over.
    fn write_properties(&self, existing: Option<&ObjectMetadata>) -> ObjectProperties {
        let mut properties = ObjectProperties {
            content_type: existing.and_then(|m| m.content_type.clone()),
            content_disposition: existing.and_then(|m| m.content_disposition.clone()),
        };
        if !self.stamp_dates {
            return properties;
        }

        let now = Utc::now();
        let previous = properties
            .content_disposition
            .as_deref()
            .map(ContentDisposition::parse);
        let disposition = match previous {
            Some(d) => d.with_modified(now),
            None if existing.is_some() => ContentDisposition::default().with_modified(now),
            None => ContentDisposition::default()
                .with_created(now)
                .with_modified(now),
        };
        properties.content_disposition = Some(disposition.to_string());
        properties
    }

    /// Decorator output for an object about to be written. Errors are
    /// logged and the write goes ahead undecorated.
    fn decoration(&self, key: &str, pending: &ObjectMetadata) -> Option<ObjectProperties> {
        let decorator = self.decorator.as_ref()?;
        match decorator.on_file_written(key, pending) {
            Ok(properties) => properties,
            Err(e) => {
                warn!(key, error = %format!("{e:#}"), "property decorator failed");
                None
            }
        }
    }

    async fn decorate(&self, key: &str) {
        let Some(decorator) = &self.decorator else {
            return;
        };
        let result = async {
            let Some(metadata) = self.backend.head(key).await? else {
                return Ok(());
            };
            if let Some(properties) = decorator.on_file_written(key, &metadata)? {
                self.backend.set_properties(key, &properties).await?;
                debug!(key, ?properties, "properties applied");
            }
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(key, error = %format!("{e:#}"), "property decorator failed");
        }
    }

    /// Attach properties to an existing file.
    pub async fn set_file_properties(
        &self,
        path: &str,
        properties: &ObjectProperties,
    ) -> FsResult<()> {
        let key = self.paths.to_full_key(path);
        if !self.backend.exists(&key).await? {
            return Err(FsError::NotFound(path.to_string()));
        }
        self.backend.set_properties(&key, properties).await?;
        Ok(())
    }

    pub async fn open_file(&self, path: &str) -> FsResult<FileReader> {
        let key = self.paths.to_full_key(path);
        match self.backend.read(&key).await {
            Ok(data) => Ok(Cursor::new(data)),
            Err(e) => {
                if self.backend.exists(&key).await? {
                    Err(e.into())
                } else {
                    Err(FsError::NotFound(path.to_string()))
                }
            }
        }
    }

    /// No-op when the file does not exist.
    pub async fn delete_file(&self, path: &str) -> FsResult<()> {
        let key = self.paths.to_full_key(path);
        self.backend.delete(&key).await?;
        info!(key = %key, "file deleted");
        Ok(())
    }

    pub async fn file_exists(&self, path: &str) -> FsResult<bool> {
        let key = self.paths.to_full_key(path);
        Ok(self.backend.exists(&key).await?)
    }

    /// Immediate subdirectories of `path`, as logical paths.
    pub async fn get_directories(&self, path: &str) -> FsResult<Vec<String>> {
        let prefix = self.paths.directory_prefix(path);
        let entries = self.list_level(&prefix).await?;
        let dirs: BTreeSet<String> = entries
            .iter()
            .filter(|e| e.is_prefix())
            .map(|e| {
                self.paths
                    .to_logical_path(e.key().trim_end_matches(SEPARATOR))
            })
            .collect();
        Ok(dirs.into_iter().collect())
    }

    /// Files directly under `path` matching `filter` (default `*.*`).
    pub async fn get_files(&self, path: &str, filter: Option<&str>) -> FsResult<Files> {
        let prefix = self.paths.directory_prefix(path);
        let glob = Glob::scoped(&prefix, filter.unwrap_or(DEFAULT_FILTER));
        debug!(prefix = %prefix, glob = %glob, "listing files");
        let entries = self.list_level(&prefix).await?;
        Ok(Files {
            entries: entries.into_iter(),
            glob,
            paths: self.paths.clone(),
        })
    }

    async fn list_level(&self, prefix: &str) -> FsResult<Vec<ListEntry>> {
        match self.backend.list(prefix, false, None).await {
            Ok(entries) => Ok(entries),
            Err(e) if self.listing_errors == ListingErrors::Swallow => {
                warn!(prefix, error = %format!("{e:#}"), "listing failed, reporting no entries");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// True when any object, at any depth, lives under `path`. Looks at one
    /// listing row at most.
    pub async fn directory_exists(&self, path: &str) -> FsResult<bool> {
        let prefix = self.paths.directory_prefix(path);
        let rows = self.backend.list(&prefix, true, Some(1)).await?;
        Ok(!rows.is_empty())
    }

    /// Without `recursive`, fails on a non-empty directory and otherwise does
    /// nothing. With it, removes every object under the prefix.
    pub async fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        if !recursive {
            if self.directory_exists(path).await? {
                return Err(FsError::DirectoryNotEmpty(path.to_string()));
            }
            return Ok(());
        }

        let prefix = self.paths.directory_prefix(path);
        let keys: Vec<String> = self
            .backend
            .list(&prefix, true, None)
            .await?
            .into_iter()
            .filter(|e| !e.is_prefix())
            .map(|e| e.key().to_string())
            .collect();
        let count = keys.len();

        futures::stream::iter(keys)
            .map(|key| {
                let backend = Arc::clone(&self.backend);
                async move { backend.delete(&key).await }
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;

        info!(prefix = %prefix, objects = count, "directory deleted");
        Ok(())
    }

    /// Embedded modification date, else native last-modified, else the
    /// sentinel. For a directory, the earliest of its objects.
    pub async fn get_last_modified(&self, path: &str) -> FsResult<DateTime<Utc>> {
        let key = self.paths.to_full_key(path);
        if !key.is_empty() {
            if let Some(meta) = self.backend.head(&key).await? {
                return Ok(resolve_last_modified(Some(&meta)));
            }
        }

        let prefix = self.paths.directory_prefix(path);
        let rows = self.backend.list(&prefix, true, None).await?;
        let members = self.member_metadata(rows).await?;
        Ok(aggregate_last_modified(&members))
    }

    /// Metadata of every object row. Rows from backends whose listings lack
    /// descriptive properties are completed with a `head` each.
    async fn member_metadata(&self, rows: Vec<ListEntry>) -> FsResult<Vec<ObjectMetadata>> {
        let objects = rows.into_iter().filter_map(|row| match row {
            ListEntry::Object { key, metadata } => Some((key, metadata)),
            ListEntry::Prefix(_) => None,
        });
        if self.backend.listing_includes_properties() {
            return Ok(objects.map(|(_, metadata)| metadata).collect());
        }

        let members = futures::stream::iter(objects)
            .map(|(key, listed)| {
                let backend = Arc::clone(&self.backend);
                async move { anyhow::Ok(backend.head(&key).await?.unwrap_or(listed)) }
            })
            .buffer_unordered(HEAD_CONCURRENCY)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(members)
    }

    /// Embedded creation date, else the sentinel. Directories always get the
    /// sentinel.
    pub async fn get_created(&self, path: &str) -> FsResult<DateTime<Utc>> {
        let key = self.paths.to_full_key(path);
        if key.is_empty() {
            return Ok(missing_timestamp());
        }
        let meta = self.backend.head(&key).await?;
        Ok(resolve_created(meta.as_ref()))
    }

    pub fn get_url(&self, path: &str) -> String {
        self.paths.to_url(path)
    }

    pub fn get_full_path(&self, path: &str) -> String {
        self.paths.to_full_key(path)
    }

    pub fn get_relative_path(&self, full_path_or_url: &str) -> String {
        self.paths.to_logical_path(full_path_or_url)
    }
}

/// Lazily filtered file listing returned by [`FileSystem::get_files`].
#[derive(Debug)]
pub struct Files {
    entries: std::vec::IntoIter<ListEntry>,
    glob: Glob,
    paths: PathTranslator,
}

impl Iterator for Files {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        for entry in self.entries.by_ref() {
            if let ListEntry::Object { key, .. } = &entry {
                if self.glob.matches(key) {
                    return Some(self.paths.to_logical_path(key));
                }
            }
        }
        None
    }
}
