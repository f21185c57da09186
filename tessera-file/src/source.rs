use std::fmt::Debug;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tessera_error::TesseraResult;
use tessera_io::{ReadAt, TokioFile};

/// A file that a [`FileFormat`](crate::FileFormat) can inspect and scan.
///
/// The location identifies the file to caches, so two sources with the same location must
/// hold the same bytes.
pub trait FileSource: Debug + Send + Sync {
    fn location(&self) -> &str;

    /// Open a random-access handle to the file's bytes.
    fn open(&self) -> TesseraResult<Arc<dyn ReadAt>>;
}

/// A file held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    location: String,
    bytes: Bytes,
}

impl InMemorySource {
    pub fn new(location: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            location: location.into(),
            bytes: bytes.into(),
        }
    }
}

impl FileSource for InMemorySource {
    fn location(&self) -> &str {
        &self.location
    }

    fn open(&self) -> TesseraResult<Arc<dyn ReadAt>> {
        Ok(Arc::new(self.bytes.clone()))
    }
}

/// A file on the local file system.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
    location: String,
}

impl LocalFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            location: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for LocalFileSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn open(&self) -> TesseraResult<Arc<dyn ReadAt>> {
        Ok(Arc::new(TokioFile::open(&self.path)?))
    }
}

/// The unit of work a host hands to [`FileFormat::scan_batches`](crate::FileFormat::scan_batches):
/// a file, optionally restricted to a range of its rows.
#[derive(Debug, Clone)]
pub struct FileFragment {
    source: Arc<dyn FileSource>,
    row_range: Option<Range<u64>>,
}

impl FileFragment {
    pub fn new(source: Arc<dyn FileSource>) -> Self {
        Self {
            source,
            row_range: None,
        }
    }

    pub fn with_row_range(mut self, row_range: Range<u64>) -> Self {
        self.row_range = Some(row_range);
        self
    }

    pub fn source(&self) -> &Arc<dyn FileSource> {
        &self.source
    }

    pub fn row_range(&self) -> Option<Range<u64>> {
        self.row_range.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn in_memory_source_reads_its_bytes() {
        let source = InMemorySource::new("memory://a", Bytes::from_static(b"hello"));
        assert_eq!(source.location(), "memory://a");

        let read = source.open().unwrap();
        assert_eq!(read.size().await.unwrap(), 5);
        assert_eq!(read.read_byte_range(1..3).await.unwrap(), "el");
    }

    #[tokio::test]
    async fn local_source_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let source = LocalFileSource::new(file.path());
        assert_eq!(source.path(), file.path());
        let read = source.open().unwrap();
        assert_eq!(read.read_byte_range(7..10).await.unwrap(), "789");
    }

    #[test]
    fn missing_local_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new(dir.path().join("missing.tessera"));
        assert!(source.open().is_err());
    }
}
