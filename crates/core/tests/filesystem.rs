use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};

use blobfs_core::backend::local::LocalBackend;
use blobfs_core::backend::memory::MemoryBackend;
use blobfs_core::backend::{Backend, ListEntry, ObjectMetadata, ObjectProperties};
use blobfs_core::config::ListingErrors;
use blobfs_core::decorator::{ContentTypeDecorator, PropertyDecorator};
use blobfs_core::metadata::missing_timestamp;
use blobfs_core::{FileSystem, FsError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("blobfs_core=debug")
        .with_test_writer()
        .try_init();
}

fn memory_fs(root: &str) -> (Arc<MemoryBackend>, FileSystem) {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(backend.clone(), root, Some("https://store.example/media"))
        .with_separator('/');
    (backend, fs)
}

/// Fails every listing; everything else goes to an in-memory store.
struct BrokenListing {
    inner: MemoryBackend,
}

#[async_trait]
impl Backend for BrokenListing {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, data: Bytes, properties: &ObjectProperties) -> Result<()> {
        self.inner.write(key, data, properties).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(
        &self,
        prefix: &str,
        _recursive: bool,
        _limit: Option<usize>,
    ) -> Result<Vec<ListEntry>> {
        anyhow::bail!("listing {prefix} refused: access denied")
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        self.inner.head(key).await
    }

    fn name(&self) -> &'static str {
        "broken-listing"
    }
}

/// Behaves like a bucket: listing rows carry only size and native
/// timestamp, and property updates rewrite the object.
#[derive(Default)]
struct BareListing {
    inner: MemoryBackend,
    property_updates: AtomicUsize,
}

#[async_trait]
impl Backend for BareListing {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, data: Bytes, properties: &ObjectProperties) -> Result<()> {
        self.inner.write(key, data, properties).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ListEntry>> {
        let rows = self.inner.list(prefix, recursive, limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| match row {
                ListEntry::Object { key, metadata } => ListEntry::Object {
                    key,
                    metadata: ObjectMetadata {
                        content_type: None,
                        content_disposition: None,
                        ..metadata
                    },
                },
                other => other,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        self.inner.head(key).await
    }

    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        self.property_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.set_properties(key, properties).await
    }

    fn listing_includes_properties(&self) -> bool {
        false
    }

    fn updates_properties_in_place(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "bare-listing"
    }
}

struct FailingDecorator;

impl PropertyDecorator for FailingDecorator {
    fn on_file_written(
        &self,
        _key: &str,
        _metadata: &ObjectMetadata,
    ) -> Result<Option<ObjectProperties>> {
        anyhow::bail!("mime map unavailable")
    }
}

#[tokio::test]
async fn paths_roundtrip_through_facade() {
    let (_, fs) = memory_fs("site");
    for p in ["a.png", "x/y/z.txt"] {
        let full = fs.get_full_path(p);
        assert!(full.starts_with("site/"));
        assert_eq!(fs.get_full_path(&full), full);
        assert_eq!(fs.get_relative_path(&full), p);
        assert_eq!(fs.get_relative_path(&fs.get_url(p)), p);
    }
}

#[tokio::test]
async fn url_construction() {
    let (_, fs) = memory_fs("");
    for p in ["a/b.png", "/a/b.png", "a/b.png/"] {
        assert_eq!(fs.get_url(p), "https://store.example/media/a/b.png");
    }
}

#[tokio::test]
async fn root_url_falls_back_to_backend() {
    let backend = Arc::new(MemoryBackend::with_base_url("https://acct.blob.example/c/"));
    let fs = FileSystem::new(backend, "", None).with_separator('/');
    assert_eq!(fs.get_url("a.png"), "https://acct.blob.example/c/a.png");
}

#[tokio::test]
async fn overwrite_guard_and_readback() {
    let (_, fs) = memory_fs("site");
    fs.add_file("doc.txt", Cursor::new(b"v1".to_vec()), false)
        .await
        .unwrap();
    let err = fs
        .add_file("doc.txt", Cursor::new(b"v2".to_vec()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(ref p) if p == "doc.txt"));

    fs.add_file("doc.txt", Cursor::new(b"v2".to_vec()), true)
        .await
        .unwrap();
    assert_eq!(fs.open_file("doc.txt").await.unwrap().into_inner(), "v2");
}

#[tokio::test]
async fn non_seekable_reader_is_read_to_end() {
    let (_, fs) = memory_fs("");
    let reader: &[u8] = b"streamed";
    fs.add_file_from_reader("s.bin", reader, true).await.unwrap();
    assert_eq!(fs.open_file("s.bin").await.unwrap().into_inner(), "streamed");
}

#[tokio::test]
async fn delete_file_is_idempotent() {
    let (_, fs) = memory_fs("");
    fs.add_bytes("gone.txt", Bytes::from_static(b"x"), true)
        .await
        .unwrap();
    assert!(fs.file_exists("gone.txt").await.unwrap());
    fs.delete_file("gone.txt").await.unwrap();
    fs.delete_file("gone.txt").await.unwrap();
    assert!(!fs.file_exists("gone.txt").await.unwrap());
}

#[tokio::test]
async fn directories_are_immediate_children() {
    let (_, fs) = memory_fs("site");
    for p in ["top.txt", "a/1.txt", "a/deep/2.txt", "b/3.txt"] {
        fs.add_bytes(p, Bytes::new(), true).await.unwrap();
    }
    assert_eq!(fs.get_directories("").await.unwrap(), vec!["a", "b"]);
    assert_eq!(fs.get_directories("a").await.unwrap(), vec!["a/deep"]);
    assert!(fs.get_directories("b").await.unwrap().is_empty());
    assert!(fs.get_directories("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn files_respect_glob_and_level() {
    let (_, fs) = memory_fs("site");
    for p in ["t/test.txt", "t/tast.csv", "t/teest.txt", "t/notes", "t/sub/test.txt"] {
        fs.add_bytes(p, Bytes::new(), true).await.unwrap();
    }
    let matched: Vec<_> = fs.get_files("t", Some("t?st.*")).await.unwrap().collect();
    assert_eq!(matched, vec!["t/tast.csv", "t/test.txt"]);

    let default: Vec<_> = fs.get_files("t", None).await.unwrap().collect();
    assert_eq!(default, vec!["t/tast.csv", "t/teest.txt", "t/test.txt"]);

    assert_eq!(fs.get_files("empty", None).await.unwrap().count(), 0);
}

#[tokio::test]
async fn directory_exists_sees_nested_objects() {
    let (_, fs) = memory_fs("site");
    fs.add_bytes("a/b/c/deep.txt", Bytes::new(), true)
        .await
        .unwrap();
    assert!(fs.directory_exists("a").await.unwrap());
    assert!(fs.directory_exists("a/b").await.unwrap());
    assert!(!fs.directory_exists("a/b/c/deep.txt/x").await.unwrap());
    assert!(!fs.directory_exists("z").await.unwrap());
}

#[tokio::test]
async fn non_recursive_delete_guard() {
    let (backend, fs) = memory_fs("site");
    for p in ["d/1.txt", "d/e/2.txt", "keep/3.txt"] {
        fs.add_bytes(p, Bytes::new(), true).await.unwrap();
    }

    let err = fs.delete_directory("d", false).await.unwrap_err();
    assert!(matches!(err, FsError::DirectoryNotEmpty(_)));
    fs.delete_directory("nothing-here", false).await.unwrap();

    fs.delete_directory("d", true).await.unwrap();
    assert!(!fs.directory_exists("d").await.unwrap());
    assert!(fs.directory_exists("keep").await.unwrap());
    assert_eq!(backend.len(), 1);
}

#[tokio::test]
async fn timestamps_for_missing_and_directories() {
    let (backend, fs) = memory_fs("");
    assert_eq!(
        fs.get_last_modified("/does/not/exist").await.unwrap(),
        missing_timestamp()
    );
    assert_eq!(
        fs.get_created("/does/not/exist").await.unwrap(),
        missing_timestamp()
    );

    let t1 = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    let t2 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let props = ObjectProperties::default();
    backend.put_at("dir/late.txt", "l", props.clone(), t2).unwrap();
    backend.put_at("dir/early.txt", "e", props, t1).unwrap();
    assert_eq!(fs.get_last_modified("dir").await.unwrap(), t1);
    assert_eq!(fs.get_last_modified("dir/late.txt").await.unwrap(), t2);
}

#[tokio::test]
async fn embedded_dates_override_native_timestamp() {
    let (backend, fs) = memory_fs("");
    let native = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let props = ObjectProperties {
        content_type: None,
        content_disposition: Some(
            r#"attachment; creation-date="Tue, 1 Jan 2019 10:00:00 +0000"; modification-date="Wed, 2 Jan 2019 10:00:00 +0000""#
                .to_string(),
        ),
    };
    backend.put_at("f.txt", "f", props, native).unwrap();

    assert_eq!(
        fs.get_created("f.txt").await.unwrap(),
        Utc.with_ymd_and_hms(2019, 1, 1, 10, 0, 0).unwrap()
    );
    assert_eq!(
        fs.get_last_modified("f.txt").await.unwrap(),
        Utc.with_ymd_and_hms(2019, 1, 2, 10, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn content_type_decorator_runs_after_write() {
    let (backend, fs) = memory_fs("site");
    let fs = fs.with_decorator(Arc::new(ContentTypeDecorator::new(|key| {
        key.ends_with(".png").then(|| "image/png; q=1".to_string())
    })));
    fs.add_bytes("logo.png", Bytes::from_static(b"png"), true)
        .await
        .unwrap();
    let meta = backend.head("site/logo.png").await.unwrap().unwrap();
    assert_eq!(meta.content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn decorator_failure_keeps_the_write() {
    let (_, fs) = memory_fs("");
    let fs = fs.with_decorator(Arc::new(FailingDecorator));
    fs.add_bytes("kept.txt", Bytes::from_static(b"ok"), true)
        .await
        .unwrap();
    assert_eq!(fs.open_file("kept.txt").await.unwrap().into_inner(), "ok");
}

#[tokio::test]
async fn listing_errors_surface_by_default() {
    init_tracing();
    let backend = Arc::new(BrokenListing {
        inner: MemoryBackend::new(),
    });
    let fs = FileSystem::new(backend.clone(), "", None);
    assert!(matches!(
        fs.get_directories("a").await.unwrap_err(),
        FsError::Backend(_)
    ));
    assert!(fs.get_files("a", None).await.is_err());

    let legacy = FileSystem::new(backend, "", None).with_listing_errors(ListingErrors::Swallow);
    assert!(legacy.get_directories("a").await.unwrap().is_empty());
    assert_eq!(legacy.get_files("a", None).await.unwrap().count(), 0);
}

#[tokio::test]
async fn unsupported_properties_are_reported() {
    init_tracing();
    let backend = Arc::new(BrokenListing {
        inner: MemoryBackend::new(),
    });
    let fs = FileSystem::new(backend, "", None).with_separator('/');
    fs.add_bytes("a.txt", Bytes::new(), true).await.unwrap();

    let props = ObjectProperties {
        content_type: Some("text/plain".into()),
        content_disposition: None,
    };
    let err = fs.set_file_properties("a.txt", &props).await.unwrap_err();
    assert!(matches!(err, FsError::Unsupported(_)));

    let missing = fs.set_file_properties("b.txt", &props).await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn local_backend_behaves_like_object_store() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(LocalBackend::init(dir.path()).unwrap());
    let fs = FileSystem::new(backend, "uploads", Some("https://cdn.example"))
        .with_separator('/')
        .with_decorator(Arc::new(ContentTypeDecorator::new(|key| {
            key.ends_with(".txt").then(|| "text/plain".to_string())
        })));

    fs.add_bytes("2024/a.txt", Bytes::from_static(b"a"), false)
        .await
        .unwrap();
    fs.add_bytes("2024/05/b.txt", Bytes::from_static(b"b"), false)
        .await
        .unwrap();

    assert_eq!(fs.get_directories("").await.unwrap(), vec!["2024"]);
    assert_eq!(fs.get_directories("2024").await.unwrap(), vec!["2024/05"]);
    let files: Vec<_> = fs.get_files("2024", None).await.unwrap().collect();
    assert_eq!(files, vec!["2024/a.txt"]);
    assert_ne!(fs.get_created("2024/a.txt").await.unwrap(), missing_timestamp());
    assert_eq!(fs.get_url("2024/a.txt"), "https://cdn.example/uploads/2024/a.txt");

    assert!(matches!(
        fs.delete_directory("2024", false).await.unwrap_err(),
        FsError::DirectoryNotEmpty(_)
    ));
    fs.delete_directory("2024", true).await.unwrap();
    assert!(!fs.directory_exists("2024").await.unwrap());
    assert!(fs.get_directories("").await.unwrap().is_empty());

    std::fs::create_dir_all(dir.path().join("uploads").join("ghost")).unwrap();
    assert!(!fs.directory_exists("ghost").await.unwrap());
    assert!(fs.get_directories("").await.unwrap().is_empty());
}

#[tokio::test]
async fn directory_timestamp_uses_embedded_dates_from_bare_listings() {
    init_tracing();
    let backend = Arc::new(BareListing::default());
    let fs = FileSystem::new(backend.clone(), "", None).with_separator('/');
    let native = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let embedded = ObjectProperties {
        content_type: None,
        content_disposition: Some(
            r#"attachment; modification-date="Wed, 2 Jan 2019 10:00:00 +0000""#.to_string(),
        ),
    };
    backend
        .inner
        .put_at("dir/a.txt", "a", embedded, native)
        .unwrap();
    backend
        .inner
        .put_at("dir/sub/b.txt", "b", ObjectProperties::default(), native)
        .unwrap();

    let file = fs.get_last_modified("dir/a.txt").await.unwrap();
    assert_eq!(file, Utc.with_ymd_and_hms(2019, 1, 2, 10, 0, 0).unwrap());
    assert_eq!(fs.get_last_modified("dir").await.unwrap(), file);
}

#[tokio::test]
async fn decorator_output_travels_with_the_write_when_updates_rewrite() {
    init_tracing();
    let backend = Arc::new(BareListing::default());
    let fs = FileSystem::new(backend.clone(), "", None)
        .with_separator('/')
        .with_decorator(Arc::new(ContentTypeDecorator::new(|key| {
            key.ends_with(".png").then(|| "image/png".to_string())
        })));

    fs.add_bytes("logo.png", Bytes::from_static(b"png"), true)
        .await
        .unwrap();
    let meta = backend.head("logo.png").await.unwrap().unwrap();
    assert_eq!(meta.content_type.as_deref(), Some("image/png"));
    assert_ne!(fs.get_created("logo.png").await.unwrap(), missing_timestamp());
    assert_eq!(backend.property_updates.load(Ordering::SeqCst), 0);

    let fs = fs.with_decorator(Arc::new(FailingDecorator));
    fs.add_bytes("kept.png", Bytes::from_static(b"ok"), false)
        .await
        .unwrap();
    assert!(fs.file_exists("kept.png").await.unwrap());
}
