use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::pin;

use futures_util::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::client::{
    DEFAULT_CONTENT_TYPE, GetOptions, ObjectInfo, StatOptions, StorageClient, clamp_range,
};
use crate::error::{Result, StorageError};
use crate::stream::PayloadStream;

/// A [`StorageClient`] storing objects as files below a root directory.
///
/// Buckets map to directories directly below the root. Object names may contain `/`, which maps
/// to nested directories.
#[derive(Clone, Debug)]
pub struct LocalFs {
    path: PathBuf,
    endpoint: String,
}

impl LocalFs {
    /// Creates a store rooted at the given directory.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.into(),
            endpoint: format!("file://{}", path.display()),
        }
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.path.join(bucket)
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let path = self.bucket_path(bucket);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(no_such_bucket(bucket)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(no_such_bucket(bucket)),
            Err(err) => Err(err.into()),
        }
    }

    async fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf> {
        Ok(self.ensure_bucket(bucket).await?.join(name))
    }
}

fn no_such_bucket(bucket: &str) -> StorageError {
    StorageError::NoSuchBucket {
        bucket: bucket.to_owned(),
    }
}

fn map_not_found(err: std::io::Error, bucket: &str, name: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound {
            bucket: bucket.to_owned(),
            name: name.to_owned(),
        }
    } else {
        err.into()
    }
}

#[async_trait::async_trait]
impl StorageClient for LocalFs {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket);
        tracing::debug!(bucket, path = %path.display(), "creating bucket");
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        let root = self.ensure_bucket(bucket).await?;
        let mut names = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(name);
            }
        }

        names.sort_unstable();
        tracing::debug!(bucket, count = names.len(), "listed objects");
        Ok(names)
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        payload: PayloadStream,
        _size: u64,
        _content_type: &str,
    ) -> Result<u64> {
        let path = self.object_path(bucket, name).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;

        let mut reader = pin!(StreamReader::new(payload));
        let mut writer = BufWriter::new(file);

        let written = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_data().await?;

        Ok(written)
    }

    async fn get_object(
        &self,
        bucket: &str,
        name: &str,
        options: &GetOptions,
    ) -> Result<PayloadStream> {
        let path = self.object_path(bucket, name).await?;
        let mut file = OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .map_err(|err| map_not_found(err, bucket, name))?;

        let Some(range) = &options.range else {
            return Ok(ReaderStream::new(file).boxed());
        };

        let len = file.metadata().await?.len();
        let range = clamp_range(range, len);
        file.seek(SeekFrom::Start(range.start)).await?;
        Ok(ReaderStream::new(file.take(range.end - range.start)).boxed())
    }

    async fn stat_object(
        &self,
        bucket: &str,
        name: &str,
        _options: &StatOptions,
    ) -> Result<ObjectInfo> {
        let path = self.object_path(bucket, name).await?;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|err| map_not_found(err, bucket, name))?;
        if !meta.is_file() {
            return Err(map_not_found(ErrorKind::NotFound.into(), bucket, name));
        }

        Ok(ObjectInfo {
            name: name.to_owned(),
            size: meta.len(),
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
        })
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> Result<()> {
        let path = self.object_path(bucket, name).await?;
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| map_not_found(err, bucket, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{make_stream, read_to_vec};

    #[tokio::test]
    async fn stores_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFs::new(tempdir.path());
        store.make_bucket("bucket").await.unwrap();

        let written = store
            .put_object(
                "bucket",
                "prefix/obj.crnd",
                make_stream(b"oh hai!"),
                7,
                DEFAULT_CONTENT_TYPE,
            )
            .await
            .unwrap();
        assert_eq!(written, 7);

        let file_path = tempdir.path().join("bucket").join("prefix").join("obj.crnd");
        assert_eq!(std::fs::read(file_path).unwrap(), b"oh hai!");

        let stream = store
            .get_object("bucket", "prefix/obj.crnd", &GetOptions::default())
            .await
            .unwrap();
        assert_eq!(read_to_vec(stream).await.unwrap(), b"oh hai!");

        let info = store
            .stat_object("bucket", "prefix/obj.crnd", &StatOptions::default())
            .await
            .unwrap();
        assert_eq!(info.size, 7);
    }

    #[tokio::test]
    async fn ranged_get() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFs::new(tempdir.path());
        store.make_bucket("bucket").await.unwrap();
        store
            .put_object("bucket", "obj", make_stream(b"0123456789"), 10, "")
            .await
            .unwrap();

        let options = GetOptions {
            range: Some(4..20),
        };
        let stream = store.get_object("bucket", "obj", &options).await.unwrap();
        assert_eq!(read_to_vec(stream).await.unwrap(), b"456789");
    }

    #[tokio::test]
    async fn lists_nested_objects() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFs::new(tempdir.path());
        store.make_bucket("bucket").await.unwrap();

        for name in ["b", "a/x", "a/y/z"] {
            store
                .put_object("bucket", name, make_stream(b"-"), 1, "")
                .await
                .unwrap();
        }

        let names = store.list_objects("bucket").await.unwrap();
        assert_eq!(names, ["a/x", "a/y/z", "b"]);

        store.remove_object("bucket", "a/x").await.unwrap();
        let err = store.remove_object("bucket", "a/x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn missing_bucket() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFs::new(tempdir.path());

        let err = store
            .stat_object("bucket", "obj", &StatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchBucket { .. }));
    }
}
