use std::io;
use std::ops::Range;
use std::sync::Arc;

use arrow_array::{
    ArrayRef, ListArray, RecordBatch, RecordBatchOptions, StructArray, new_empty_array,
};
use arrow_schema::{Fields, Schema as ArrowSchema, SchemaRef};
use arrow_select::concat::concat;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use log::{debug, trace, warn};
use moka::future::Cache;
use rustc_hash::FxBuildHasher;
use tessera_error::{TesseraError, TesseraResult, tessera_bail, tessera_err};
use tessera_io::ReadAt;
use tokio::sync::OnceCell;

use crate::encoding::{decode_dictionary_values, decode_leaf, decode_list, decode_struct_validity};
use crate::{
    Encoding, Field, FieldId, MAGIC_BYTES, Manifest, MokaPageCache, PageCache, PageSpec, Schema,
    TRAILER_SIZE, Trailer,
};

/// Options for opening a [`FileReader`].
#[derive(Clone, Default)]
pub struct OpenOptions {
    file_size: Option<u64>,
    manifest: Option<Arc<Manifest>>,
    page_cache: Option<Arc<dyn PageCache>>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The size of the file, if known, saves a size request when loading the manifest.
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }

    /// A manifest already loaded from this file, e.g. by an earlier inspection.
    pub fn with_manifest(mut self, manifest: Arc<Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Replace the default [`MokaPageCache`]. Use [`NoOpPageCache`](crate::NoOpPageCache) to
    /// disable page caching.
    pub fn with_page_cache(mut self, page_cache: Arc<dyn PageCache>) -> Self {
        self.page_cache = Some(page_cache);
        self
    }

    /// Wrap a byte source. No IO is performed.
    pub fn open<R: ReadAt>(self, read: R) -> FileReader {
        FileReader {
            inner: Arc::new(Inner {
                read: Arc::new(read),
                file_size: self.file_size,
                manifest: OnceCell::new_with(self.manifest),
                dictionaries: Cache::builder()
                    .name("tessera-dictionaries")
                    .build_with_hasher(FxBuildHasher),
                page_cache: self
                    .page_cache
                    .unwrap_or_else(|| Arc::new(MokaPageCache::default())),
            }),
        }
    }
}

/// A handle on one file.
///
/// The manifest is loaded on first use and shared by every clone of the handle, so a reader can
/// serve any number of concurrent reads and scans.
#[derive(Clone)]
pub struct FileReader {
    inner: Arc<Inner>,
}

struct Inner {
    read: Arc<dyn ReadAt>,
    file_size: Option<u64>,
    manifest: OnceCell<Arc<Manifest>>,
    dictionaries: Cache<FieldId, ArrayRef, FxBuildHasher>,
    page_cache: Arc<dyn PageCache>,
}

impl FileReader {
    /// Wrap a byte source with default [`OpenOptions`]. No IO is performed.
    pub fn open<R: ReadAt>(read: R) -> Self {
        OpenOptions::default().open(read)
    }

    /// The manifest, loaded with two reads (the trailer, then the manifest) on first access.
    pub async fn manifest(&self) -> TesseraResult<Arc<Manifest>> {
        self.inner
            .manifest
            .get_or_try_init(|| self.load_manifest())
            .await
            .cloned()
    }

    pub async fn schema(&self) -> TesseraResult<Arc<Schema>> {
        Ok(self.manifest().await?.schema().clone())
    }

    /// The schema in Arrow form, field ids carried in field metadata.
    pub async fn arrow_schema(&self) -> TesseraResult<SchemaRef> {
        self.manifest().await?.schema().to_arrow()
    }

    pub async fn row_count(&self) -> TesseraResult<u64> {
        Ok(self.manifest().await?.row_count())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    async fn load_manifest(&self) -> TesseraResult<Arc<Manifest>> {
        let file_size = match self.inner.file_size {
            Some(file_size) => file_size,
            None => self.inner.read.size().await?,
        };
        if file_size < (MAGIC_BYTES.len() + TRAILER_SIZE) as u64 {
            tessera_bail!(
                CorruptFile: "{} bytes is too small to be a file",
                file_size
            );
        }

        let trailer_bytes = self
            .read_range(file_size - TRAILER_SIZE as u64..file_size)
            .await?;
        let trailer = Trailer::parse(&trailer_bytes, file_size)?;
        let manifest_bytes = self.read_range(trailer.manifest_range()).await?;
        let manifest = Manifest::from_trailer(&trailer, &manifest_bytes)?;

        debug!(
            "loaded manifest: version {}, {} rows, {} pages, {} columns",
            manifest.version(),
            manifest.row_count(),
            manifest.num_pages(),
            manifest.columns().len()
        );
        Ok(Arc::new(manifest))
    }

    /// Read rows `row_range` of one column, touching only the pages that hold them.
    ///
    /// Fields nested inside structs can be read on their own; fields nested inside lists
    /// cannot, as their values do not line up with rows.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn read_column(
        &self,
        field_id: FieldId,
        row_range: Range<u64>,
    ) -> TesseraResult<ArrayRef> {
        let manifest = self.manifest().await?;
        self.read_column_in(manifest, field_id, row_range).await
    }

    /// Read rows `row_range` of several columns concurrently, in the given order.
    pub async fn read_batch(
        &self,
        field_ids: &[FieldId],
        row_range: Range<u64>,
    ) -> TesseraResult<RecordBatch> {
        let manifest = self.manifest().await?;
        check_row_range(&manifest, &row_range)?;

        let fields = field_ids
            .iter()
            .map(|&id| find_field(&manifest, id).and_then(Field::to_arrow))
            .collect::<TesseraResult<Vec<_>>>()?;
        let columns = self
            .read_columns_in(manifest, field_ids, row_range.clone())
            .await?;

        let options =
            RecordBatchOptions::new().with_row_count(Some((row_range.end - row_range.start) as usize));
        Ok(RecordBatch::try_new_with_options(
            Arc::new(ArrowSchema::new(fields)),
            columns,
            &options,
        )?)
    }

    pub(crate) async fn read_columns_in(
        &self,
        manifest: Arc<Manifest>,
        field_ids: &[FieldId],
        row_range: Range<u64>,
    ) -> TesseraResult<Vec<ArrayRef>> {
        try_join_all(
            field_ids
                .iter()
                .map(|&id| self.read_column_in(manifest.clone(), id, row_range.clone())),
        )
        .await
    }

    async fn read_column_in(
        &self,
        manifest: Arc<Manifest>,
        field_id: FieldId,
        row_range: Range<u64>,
    ) -> TesseraResult<ArrayRef> {
        let field = find_field(&manifest, field_id)?;
        if !manifest.is_row_addressable(field_id) {
            tessera_bail!(
                "field {} is nested in a list and cannot be read by row",
                field
            );
        }
        check_row_range(&manifest, &row_range)?;

        let pages = manifest.pages_overlapping(row_range.clone());
        if pages.is_empty() {
            return Ok(new_empty_array(field.to_arrow()?.data_type()));
        }

        let decoded = try_join_all(
            pages
                .clone()
                .map(|page| self.decode_page(manifest.clone(), field_id, page)),
        )
        .await?;

        let slices = pages
            .zip(decoded)
            .map(|(page, array)| {
                let page_rows = manifest.page_row_range(page);
                let start = row_range.start.max(page_rows.start);
                let end = row_range.end.min(page_rows.end);
                array.slice((start - page_rows.start) as usize, (end - start) as usize)
            })
            .collect::<Vec<_>>();

        match slices.as_slice() {
            [single] => Ok(single.clone()),
            _ => Ok(concat(&slices.iter().map(|a| a.as_ref()).collect::<Vec<_>>())?),
        }
    }

    /// Decode page `page_idx` of a column, recursing into the pages of its children.
    fn decode_page(
        &self,
        manifest: Arc<Manifest>,
        field_id: FieldId,
        page_idx: usize,
    ) -> BoxFuture<'static, TesseraResult<ArrayRef>> {
        let this = self.clone();
        async move {
            let field = find_field(&manifest, field_id)?;
            let layout = manifest.column_layout(field_id)?;
            let page = page_spec(layout.pages(), page_idx, field)?;
            let bytes = this.fetch(page).await?;
            let len = page.value_count as usize;

            match layout.encoding() {
                Encoding::Plain | Encoding::VarBinary => decode_leaf(field, page, &bytes, None),
                Encoding::Dictionary => {
                    let dictionary = this.dictionary(&manifest, field).await?;
                    decode_leaf(field, page, &bytes, Some(dictionary))
                }
                Encoding::Validity => {
                    let nulls = decode_struct_validity(page, &bytes)?;
                    let children = try_join_all(
                        field
                            .children()
                            .iter()
                            .map(|c| this.decode_page(manifest.clone(), c.id(), page_idx)),
                    )
                    .await?;
                    if children.is_empty() {
                        return Ok(Arc::new(StructArray::new_empty_fields(len, nulls)) as ArrayRef);
                    }
                    if let Some((child, array)) = field
                        .children()
                        .iter()
                        .zip(&children)
                        .find(|(_, array)| array.len() != len)
                    {
                        tessera_bail!(
                            CorruptFile: "page {} of {} holds {} values, its parent {}",
                            page_idx,
                            child,
                            array.len(),
                            len
                        );
                    }

                    let fields = field
                        .children()
                        .iter()
                        .map(|c| c.to_arrow().map(Arc::new))
                        .collect::<TesseraResult<Fields>>()?;
                    let array = StructArray::try_new(fields, children, nulls).map_err(|e| {
                        tessera_err!(CorruptFile: "invalid struct page of {}: {}", field, e)
                    })?;
                    Ok(Arc::new(array) as ArrayRef)
                }
                Encoding::ListOffsets => {
                    let [element] = field.children() else {
                        tessera_bail!(CorruptFile: "list field {} must have one child", field);
                    };
                    let element_layout = manifest.column_layout(element.id())?;
                    let element_page = page_spec(element_layout.pages(), page_idx, element)?;
                    let (nulls, offsets) =
                        decode_list(page, &bytes, element_page.value_count as usize)?;
                    let values = this
                        .decode_page(manifest.clone(), element.id(), page_idx)
                        .await?;

                    let array =
                        ListArray::try_new(Arc::new(element.to_arrow()?), offsets, values, nulls)
                            .map_err(|e| {
                                tessera_err!(CorruptFile: "invalid list page of {}: {}", field, e)
                            })?;
                    Ok(Arc::new(array) as ArrayRef)
                }
            }
        }
        .boxed()
    }

    /// The decoded dictionary of a column, loaded once and shared by every page.
    async fn dictionary(&self, manifest: &Manifest, field: &Field) -> TesseraResult<ArrayRef> {
        self.inner
            .dictionaries
            .try_get_with(field.id(), async {
                let layout = manifest.column_layout(field.id())?;
                let page = layout.dictionary().ok_or_else(|| {
                    tessera_err!(CorruptFile: "dictionary of field {} is missing", field)
                })?;
                let bytes = self.fetch(page).await?;
                decode_dictionary_values(field, page, &bytes)
            })
            .await
            .map_err(unwrap_shared)
    }

    async fn fetch(&self, page: &PageSpec) -> TesseraResult<Bytes> {
        match self.inner.page_cache.get(page.range).await {
            Ok(Some(bytes)) => {
                trace!("page cache hit for {}", page.range);
                return Ok(bytes);
            }
            Ok(None) => {}
            Err(e) => warn!("page cache lookup for {} failed: {}", page.range, e),
        }

        let bytes = self.read_range(page.range.to_range()).await?;
        page.verify(&bytes)?;

        if let Err(e) = self.inner.page_cache.put(page.range, bytes.clone()).await {
            warn!("failed to cache page {}: {}", page.range, e);
        }
        Ok(bytes)
    }

    async fn read_range(&self, range: Range<u64>) -> TesseraResult<Bytes> {
        self.inner
            .read
            .read_byte_range(range.clone())
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => tessera_err!(
                    CorruptFile: "file truncated, cannot read {}..{}",
                    range.start,
                    range.end
                ),
                _ => TesseraError::from(e),
            })
    }
}

fn find_field(manifest: &Manifest, field_id: FieldId) -> TesseraResult<&Field> {
    manifest
        .schema()
        .field(field_id)
        .ok_or_else(|| tessera_err!(ColumnNotFound: "no field with id {}", field_id))
}

fn page_spec<'a>(pages: &'a [PageSpec], page_idx: usize, field: &Field) -> TesseraResult<&'a PageSpec> {
    pages
        .get(page_idx)
        .ok_or_else(|| tessera_err!(CorruptFile: "field {} has no page {}", field, page_idx))
}

fn check_row_range(manifest: &Manifest, row_range: &Range<u64>) -> TesseraResult<()> {
    if row_range.start > row_range.end || row_range.end > manifest.row_count() {
        tessera_bail!(
            RowRangeOutOfBounds: row_range.start,
            row_range.end,
            manifest.row_count()
        );
    }
    Ok(())
}

/// Recover an owned error from one shared by a cache between concurrent loaders.
pub(crate) fn unwrap_shared(err: Arc<TesseraError>) -> TesseraError {
    match Arc::try_unwrap(err) {
        Ok(err) => err,
        Err(err) => match err.root() {
            TesseraError::CorruptFile(msg, _) => tessera_err!(CorruptFile: "{}", msg),
            TesseraError::UnsupportedVersion(found, supported, _) => {
                tessera_err!(UnsupportedVersion: *found, *supported)
            }
            TesseraError::ColumnNotFound(msg, _) => tessera_err!(ColumnNotFound: "{}", msg),
            _ => tessera_err!("{}", err),
        },
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;
    use arrow_array::{Int64Array, StringArray};
    use arrow_schema::{DataType, Field as ArrowField};
    use tessera_io::InstrumentedReadAt;

    use super::*;
    use crate::{FileWriter, NoOpPageCache, WriteOptions};

    async fn write(batch_size: usize) -> Bytes {
        let schema = Arc::new(ArrowSchema::new(vec![
            ArrowField::new("id", DataType::Int64, false),
            ArrowField::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from_iter_values(0..10)),
                Arc::new(StringArray::from_iter((0..10).map(|i| {
                    (i % 3 != 0).then(|| format!("name-{i}"))
                }))),
            ],
        )
        .unwrap();

        let options = WriteOptions::default().with_batch_size(batch_size).unwrap();
        let mut writer = FileWriter::try_new(Vec::new(), &schema, options).unwrap();
        writer.write_batch(&batch).await.unwrap();
        writer.finalize().await.unwrap();
        Bytes::from(writer.into_inner())
    }

    #[tokio::test]
    async fn open_does_no_io() {
        let read = Arc::new(InstrumentedReadAt::new(write(4).await));
        let reader = FileReader::open(read.clone());
        assert_eq!(read.stats().requests, 0);

        assert_eq!(reader.row_count().await.unwrap(), 10);
        assert_eq!(read.stats().requests, 2);

        // memoized
        reader.schema().await.unwrap();
        reader.clone().manifest().await.unwrap();
        assert_eq!(read.stats().requests, 2);
    }

    #[tokio::test]
    async fn read_column_slices_pages() {
        let read = Arc::new(InstrumentedReadAt::new(write(4).await));
        let reader = OpenOptions::new()
            .with_page_cache(Arc::new(NoOpPageCache))
            .open(read.clone());
        let manifest = reader.manifest().await.unwrap();
        read.reset();

        let ids = reader.read_column(0, 3..9).await.unwrap();
        assert_eq!(
            ids.as_primitive::<Int64Type>().values().to_vec(),
            vec![3, 4, 5, 6, 7, 8]
        );
        // pages 0..4, 4..8 and 8..10, and nothing of the name column
        assert_eq!(read.stats().requests, 3);
        for page in manifest.column_layout(1).unwrap().pages() {
            assert!(!read.stats().touched(&page.range.to_range()));
        }

        let names = reader.read_column(1, 2..4).await.unwrap();
        assert_eq!(
            names.as_string::<i32>().iter().collect::<Vec<_>>(),
            vec![Some("name-2"), None]
        );

        let empty = reader.read_column(1, 5..5).await.unwrap();
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.data_type(), &DataType::Utf8);
    }

    #[tokio::test]
    async fn read_errors() {
        let reader = FileReader::open(write(4).await);
        assert!(matches!(
            reader.read_column(7, 0..1).await,
            Err(TesseraError::ColumnNotFound(..))
        ));
        assert!(matches!(
            reader.read_column(0, 0..11).await,
            Err(TesseraError::RowRangeOutOfBounds(0, 11, 10, _))
        ));
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 4..2;
        assert!(matches!(
            reader.read_column(0, reversed).await,
            Err(TesseraError::RowRangeOutOfBounds(4, 2, 10, _))
        ));
    }

    #[tokio::test]
    async fn read_batch_in_requested_order() {
        let reader = FileReader::open(write(3).await);
        let batch = reader.read_batch(&[1, 0], 8..10).await.unwrap();
        assert_eq!(batch.schema().field(0).name(), "name");
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(
            batch.column(1).as_primitive::<Int64Type>().values().to_vec(),
            vec![8, 9]
        );

        let counted = reader.read_batch(&[], 1..4).await.unwrap();
        assert_eq!(counted.num_rows(), 3);
        assert_eq!(counted.num_columns(), 0);
    }

    #[tokio::test]
    async fn truncated_file_is_corrupt() {
        let bytes = write(4).await;
        let reader = OpenOptions::new()
            .with_file_size(bytes.len() as u64)
            .open(bytes.slice(..bytes.len() - 1));
        assert!(matches!(
            reader.manifest().await,
            Err(TesseraError::CorruptFile(..))
        ));

        let reader = FileReader::open(bytes.slice(..10));
        assert!(matches!(
            reader.manifest().await,
            Err(TesseraError::CorruptFile(..))
        ));
    }

    #[tokio::test]
    async fn page_checksum_mismatch_is_corrupt() {
        let bytes = write(4).await;
        let manifest = Manifest::load(&bytes).unwrap();
        let page = manifest.column_layout(0).unwrap().pages()[1].range;

        let mut corrupted = bytes.to_vec();
        corrupted[page.offset as usize] ^= 0xff;
        let reader = FileReader::open(Bytes::from(corrupted));

        assert!(reader.read_column(0, 0..4).await.is_ok());
        assert!(matches!(
            reader.read_column(0, 0..8).await,
            Err(TesseraError::CorruptFile(..))
        ));
    }
}
