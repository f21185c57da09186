use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::stream::BoxStream;
use log::{debug, trace};
use moka::future::Cache;
use rustc_hash::FxBuildHasher;
use tessera_error::{TesseraResult, tessera_err};
use tessera_io::WriteSink;

use crate::reader::unwrap_shared;
use crate::scan::DEFAULT_CONCURRENCY;
use crate::{
    FILE_EXTENSION, FORMAT_TYPE_NAME, FileFragment, FileReader, FileSource, FileWriter, Manifest,
    OpenOptions, ScanBuilder, ScanOptions, TaskExecutor, WriteOptions,
};

/// The capabilities a host scanning framework needs from a file format.
#[async_trait]
pub trait FileFormat: Debug + Send + Sync {
    /// The identifier the format registers under.
    fn type_name(&self) -> &str;

    fn file_extension(&self) -> &str;

    /// Two formats are the same format iff their type names match.
    fn equals(&self, other: &dyn FileFormat) -> bool {
        self.type_name() == other.type_name()
    }

    /// Whether the format may be able to read `source`, without reading it.
    fn is_supported(&self, source: &dyn FileSource) -> bool;

    /// Read the schema of `source`.
    async fn inspect(&self, source: &dyn FileSource) -> TesseraResult<SchemaRef>;

    /// Scan one fragment into a stream of record batches in row order.
    async fn scan_batches(
        &self,
        options: ScanOptions,
        fragment: &FileFragment,
    ) -> TesseraResult<BoxStream<'static, TesseraResult<RecordBatch>>>;

    /// Create a writer of `schema` over `sink`, failing immediately on invalid options.
    fn make_writer(
        &self,
        sink: Box<dyn WriteSink>,
        schema: SchemaRef,
        options: WriteOptions,
    ) -> TesseraResult<FileWriter<Box<dyn WriteSink>>>;

    fn default_write_options(&self) -> WriteOptions;
}

/// The default number of manifests kept by a [`TesseraFormat`].
pub const DEFAULT_MANIFEST_CACHE_CAPACITY: u64 = 1024;

/// Options to configure the [`TesseraFormat`].
#[derive(Clone)]
pub struct FormatOptions {
    manifest_cache_capacity: u64,
    concurrency: usize,
    executor: Option<Arc<dyn TaskExecutor>>,
    write_options: WriteOptions,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            manifest_cache_capacity: DEFAULT_MANIFEST_CACHE_CAPACITY,
            concurrency: DEFAULT_CONCURRENCY,
            executor: None,
            write_options: WriteOptions::default(),
        }
    }
}

impl Debug for FormatOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatOptions")
            .field("manifest_cache_capacity", &self.manifest_cache_capacity)
            .field("concurrency", &self.concurrency)
            .field("write_options", &self.write_options)
            .finish_non_exhaustive()
    }
}

impl FormatOptions {
    /// The number of file manifests kept in memory between `inspect` and scans.
    pub fn with_manifest_cache_capacity(mut self, capacity: u64) -> Self {
        self.manifest_cache_capacity = capacity;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> TesseraResult<Self> {
        if concurrency == 0 {
            return Err(tessera_err!(
                InvalidConfiguration: "scan concurrency must be greater than 0"
            ));
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_write_options(mut self, write_options: WriteOptions) -> Self {
        self.write_options = write_options;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// The Tessera implementation of [`FileFormat`].
#[derive(Debug, Default)]
pub struct TesseraFormat {
    manifests: ManifestCache,
    options: FormatOptions,
}

impl TesseraFormat {
    pub fn new(options: FormatOptions) -> Self {
        Self {
            manifests: ManifestCache::new(options.manifest_cache_capacity),
            options,
        }
    }

    /// Return the format specific configuration
    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    /// Load the manifest of `source`, or return the one cached by an earlier call.
    pub async fn manifest(&self, source: &dyn FileSource) -> TesseraResult<Arc<Manifest>> {
        self.manifests.try_get(source).await
    }
}

#[async_trait]
impl FileFormat for TesseraFormat {
    fn type_name(&self) -> &str {
        FORMAT_TYPE_NAME
    }

    fn file_extension(&self) -> &str {
        FILE_EXTENSION
    }

    fn is_supported(&self, _source: &dyn FileSource) -> bool {
        true
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(location = source.location())))]
    async fn inspect(&self, source: &dyn FileSource) -> TesseraResult<SchemaRef> {
        self.manifest(source).await?.schema().to_arrow()
    }

    async fn scan_batches(
        &self,
        options: ScanOptions,
        fragment: &FileFragment,
    ) -> TesseraResult<BoxStream<'static, TesseraResult<RecordBatch>>> {
        let source = fragment.source().as_ref();
        let manifest = self.manifest(source).await?;
        let reader = OpenOptions::new()
            .with_manifest(manifest)
            .open(source.open()?);

        let mut scan = ScanBuilder::new(reader)
            .with_options(options)
            .with_some_row_range(fragment.row_range())
            .with_concurrency(self.options.concurrency)?;
        if let Some(executor) = &self.options.executor {
            scan = scan.with_executor(executor.clone());
        }
        scan.into_stream().await
    }

    fn make_writer(
        &self,
        sink: Box<dyn WriteSink>,
        schema: SchemaRef,
        options: WriteOptions,
    ) -> TesseraResult<FileWriter<Box<dyn WriteSink>>> {
        FileWriter::try_new(sink, &schema, options)
    }

    fn default_write_options(&self) -> WriteOptions {
        self.options.write_options.clone()
    }
}

/// Manifests keyed by source location.
#[derive(Debug, Clone)]
struct ManifestCache {
    inner: Cache<String, Arc<Manifest>, FxBuildHasher>,
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST_CACHE_CAPACITY)
    }
}

impl ManifestCache {
    fn new(capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .eviction_listener(|location: Arc<String>, _, _| {
                trace!("Removed manifest of {}", location);
            })
            .build_with_hasher(FxBuildHasher);
        Self { inner }
    }

    async fn try_get(&self, source: &dyn FileSource) -> TesseraResult<Arc<Manifest>> {
        self.inner
            .try_get_with(source.location().to_string(), async {
                debug!("loading manifest of {}", source.location());
                FileReader::open(source.open()?).manifest().await
            })
            .await
            .map_err(unwrap_shared)
    }
}
