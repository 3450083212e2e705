use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::serde_types::ListBucketResult;
use tracing::debug;

use super::{Backend, ListEntry, ObjectMetadata, ObjectProperties, SEPARATOR};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct S3Backend {
    bucket: Box<Bucket>,
}

impl S3Backend {
    pub async fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };
        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)?;
        let bucket = Bucket::new(bucket_name, region, credentials)?.with_path_style();
        Ok(Self { bucket })
    }

    /// PUT with the given properties as request headers.
    async fn put(&self, key: &str, data: &[u8], properties: &ObjectProperties) -> Result<()> {
        let mut bucket = self.bucket.clone();
        if let Some(disposition) = &properties.content_disposition {
            bucket.add_header("Content-Disposition", disposition);
        }
        let content_type = properties
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        let response = bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .with_context(|| format!("S3 PUT failed: {key}"))?;
        check_status(response.status_code(), "PUT", key)
    }
}

const NOT_FOUND: u16 = 404;

/// Only reached when `rust-s3` is built with `fail-on-err`; otherwise the
/// status code comes back with an `Ok` and goes through [`check_status`].
fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(NOT_FOUND, _))
}

fn check_status(status: u16, operation: &str, key: &str) -> Result<()> {
    if !(200..300).contains(&status) {
        bail!("S3 {operation} failed: {key} (HTTP {status})");
    }
    Ok(())
}

/// Listing timestamps are ISO 8601, HEAD timestamps are HTTP dates.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn collect_page(page: ListBucketResult, entries: &mut Vec<ListEntry>) {
    for prefix in page.common_prefixes.unwrap_or_default() {
        entries.push(ListEntry::Prefix(prefix.prefix));
    }
    for obj in page.contents {
        let metadata = ObjectMetadata {
            length: obj.size,
            last_modified: parse_timestamp(&obj.last_modified),
            content_type: None,
            content_disposition: None,
        };
        entries.push(ListEntry::Object {
            key: obj.key,
            metadata,
        });
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .with_context(|| format!("S3 GET failed: {key}"))?;
        check_status(response.status_code(), "GET", key)?;
        Ok(Bytes::from(response.to_vec()))
    }

    async fn write(&self, key: &str, data: Bytes, properties: &ObjectProperties) -> Result<()> {
        self.put(key, &data, properties).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.bucket.delete_object(key).await {
            Ok(response) if response.status_code() == NOT_FOUND => Ok(()),
            Ok(response) => check_status(response.status_code(), "DELETE", key),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("S3 DELETE failed: {key}")),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ListEntry>> {
        let delimiter = (!recursive).then(|| SEPARATOR.to_string());
        debug!(prefix, recursive, ?limit, "S3 list");
        let mut entries = Vec::new();

        match limit {
            Some(max_keys) => {
                let (page, status) = self
                    .bucket
                    .list_page(prefix.to_string(), delimiter, None, None, Some(max_keys))
                    .await
                    .with_context(|| format!("S3 LIST failed: {prefix}"))?;
                check_status(status, "LIST", prefix)?;
                collect_page(page, &mut entries);
                entries.truncate(max_keys);
            }
            None => {
                let pages = self
                    .bucket
                    .list(prefix.to_string(), delimiter)
                    .await
                    .with_context(|| format!("S3 LIST failed: {prefix}"))?;
                for page in pages {
                    collect_page(page, &mut entries);
                }
            }
        }

        entries.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(entries)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        match self.bucket.head_object(key).await {
            Ok((_, NOT_FOUND)) => Ok(None),
            Ok((head, status)) => {
                check_status(status, "HEAD", key)?;
                Ok(Some(ObjectMetadata {
                    length: head
                        .content_length
                        .and_then(|l| u64::try_from(l).ok())
                        .unwrap_or(0),
                    last_modified: head.last_modified.as_deref().and_then(parse_timestamp),
                    content_type: head.content_type,
                    content_disposition: head.content_disposition,
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("S3 HEAD failed: {key}")),
        }
    }

    /// Headers are replaced by copying the object onto itself with
    /// `x-amz-metadata-directive: REPLACE`; the data never leaves the store.
    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        let current = self
            .head(key)
            .await?
            .with_context(|| format!("object not found: {key}"))?;
        let mut merged = ObjectProperties {
            content_type: current.content_type,
            content_disposition: current.content_disposition,
        };
        merged.merge(properties);

        let mut bucket = self.bucket.clone();
        bucket.add_header("x-amz-metadata-directive", "REPLACE");
        bucket.add_header(
            "Content-Type",
            merged.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
        );
        if let Some(disposition) = &merged.content_disposition {
            bucket.add_header("Content-Disposition", disposition);
        }
        let status = bucket
            .copy_object_internal(key, key)
            .await
            .with_context(|| format!("S3 COPY failed: {key}"))?;
        check_status(status, "COPY", key)?;
        debug!(key, "S3 properties replaced");
        Ok(())
    }

    fn listing_includes_properties(&self) -> bool {
        false
    }

    fn updates_properties_in_place(&self) -> bool {
        false
    }

    fn base_url(&self) -> Option<String> {
        Some(self.bucket.url())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
