use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{Schema as ArrowSchema, SchemaRef};
use arrow_select::concat::concat;
use bytes::Bytes;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};
use tessera_io::WriteSink;

use crate::encoding::{EncodedPage, PageEncoder};
use crate::{
    ByteRange, ColumnLayout, Encoding, FieldId, MAGIC_BYTES, Manifest, PageSpec, Schema, Trailer,
    VERSION,
};

/// The number of rows buffered per page when no batch size is configured.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Options fixed for the lifetime of a [`FileWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    batch_size: usize,
    page_checksums: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            page_checksums: true,
        }
    }
}

impl WriteOptions {
    /// Set the number of rows per page. Must be greater than one.
    pub fn with_batch_size(mut self, batch_size: usize) -> TesseraResult<Self> {
        self.batch_size = batch_size;
        self.validate()?;
        Ok(self)
    }

    /// Record a CRC32 of every page in the manifest. Enabled by default.
    pub fn with_page_checksums(mut self, page_checksums: bool) -> Self {
        self.page_checksums = page_checksums;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn page_checksums(&self) -> bool {
        self.page_checksums
    }

    pub fn validate(&self) -> TesseraResult<()> {
        if self.batch_size <= 1 {
            tessera_bail!(
                InvalidConfiguration: "batch size must be greater than 1, got {}",
                self.batch_size
            );
        }
        Ok(())
    }
}

/// The lifecycle of a [`FileWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Nothing has been written to the sink yet.
    Created,
    /// The leading magic is written and batches are being accepted.
    Open,
    /// The manifest and trailer are written. No further writes are accepted.
    Finalized,
    /// A page or the sink failed part way. Buffered rows may have been lost, so the file can
    /// never be completed.
    Failed,
}

/// Writes record batches into a single file on an append-only sink.
///
/// Rows are buffered until `batch_size` of them are available and then written as one page per
/// column. Every column therefore shares the same page boundaries.
pub struct FileWriter<W> {
    sink: W,
    schema: Arc<Schema>,
    arrow_schema: SchemaRef,
    options: WriteOptions,
    state: WriterState,
    position: u64,
    buffered: VecDeque<RecordBatch>,
    buffered_rows: usize,
    encoder: PageEncoder,
    page_rows: Vec<u64>,
    columns: Vec<ColumnLayout>,
    column_index: FxHashMap<FieldId, usize>,
}

impl<W: WriteSink> FileWriter<W> {
    /// Create a writer for batches of `schema`. Options are validated here, no IO happens until
    /// the first write.
    pub fn try_new(sink: W, schema: &ArrowSchema, options: WriteOptions) -> TesseraResult<Self> {
        options.validate()?;
        let schema = Arc::new(Schema::from_arrow(schema)?);
        let arrow_schema = schema.to_arrow()?;

        let columns: Vec<_> = schema
            .all_fields()
            .into_iter()
            .map(|f| ColumnLayout::new(f.id(), Encoding::for_type(f.logical_type()), vec![], None))
            .collect();
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.field_id(), idx))
            .collect();

        Ok(Self {
            sink,
            encoder: PageEncoder::new(&schema),
            schema,
            arrow_schema,
            options,
            state: WriterState::Created,
            position: 0,
            buffered: VecDeque::new(),
            buffered_rows: 0,
            page_rows: Vec::new(),
            columns,
            column_index,
        })
    }

    /// The schema being written, with field ids assigned.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The Arrow form of [`Self::schema`], field ids carried in field metadata.
    pub fn arrow_schema(&self) -> &SchemaRef {
        &self.arrow_schema
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    /// Append a batch. Full pages are flushed as soon as enough rows are buffered.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(rows = batch.num_rows())))]
    pub async fn write_batch(&mut self, batch: &RecordBatch) -> TesseraResult<()> {
        self.check_open()?;

        let batch_schema = Schema::from_arrow(batch.schema_ref())?;
        if batch_schema != *self.schema {
            tessera_bail!(
                SchemaMismatch: "batch schema {} does not match file schema {}",
                batch_schema,
                self.schema
            );
        }

        let result = self.append(batch).await;
        self.fail_on_error(result)
    }

    /// Flush buffered rows, dictionaries, the manifest and the trailer.
    ///
    /// Returns the manifest that was written. The writer accepts no further writes.
    ///
    /// Any error after the schema check leaves the writer [`WriterState::Failed`], and every
    /// later call returns [`WriterClosed`](tessera_error::TesseraError::WriterClosed).
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn finalize(&mut self) -> TesseraResult<Arc<Manifest>> {
        self.check_open()?;
        let result = self.write_footer().await;
        self.fail_on_error(result)
    }

    /// Release the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn check_open(&self) -> TesseraResult<()> {
        match self.state {
            WriterState::Finalized => {
                tessera_bail!(WriterClosed: "the file has already been finalized")
            }
            WriterState::Failed => {
                tessera_bail!(WriterClosed: "an earlier write failed, the file is incomplete")
            }
            WriterState::Created | WriterState::Open => Ok(()),
        }
    }

    fn fail_on_error<T>(&mut self, result: TesseraResult<T>) -> TesseraResult<T> {
        if result.is_err() {
            self.state = WriterState::Failed;
        }
        result
    }

    async fn append(&mut self, batch: &RecordBatch) -> TesseraResult<()> {
        self.open().await?;

        if batch.num_rows() == 0 {
            return Ok(());
        }
        self.buffered_rows += batch.num_rows();
        self.buffered.push_back(batch.clone());

        while self.buffered_rows >= self.options.batch_size {
            self.flush_page(self.options.batch_size).await?;
        }
        Ok(())
    }

    async fn write_footer(&mut self) -> TesseraResult<Arc<Manifest>> {
        self.open().await?;

        while self.buffered_rows > 0 {
            self.flush_page(self.buffered_rows.min(self.options.batch_size))
                .await?;
        }

        for page in self.encoder.finish_dictionaries(&self.schema)? {
            let field_id = page.field_id;
            let spec = self.write_page(page).await?;
            self.column_mut(field_id)?.set_dictionary(spec);
        }

        let manifest = Manifest::try_new(
            self.schema.clone(),
            mem::take(&mut self.page_rows),
            mem::take(&mut self.columns),
        )?;
        let manifest_bytes = manifest.to_bytes();
        let trailer = Trailer {
            manifest_offset: self.position,
            manifest_length: u32::try_from(manifest_bytes.len()).map_err(|_| {
                tessera_err!("manifest of {} bytes exceeds u32", manifest_bytes.len())
            })?,
            manifest_checksum: crc32fast::hash(&manifest_bytes),
            version: VERSION,
        };
        self.write_all(manifest_bytes).await?;
        self.write_all(Bytes::copy_from_slice(&trailer.to_bytes()))
            .await?;
        self.sink.flush().await?;

        self.state = WriterState::Finalized;
        debug!(
            "finalized file of {} rows in {} pages, {} bytes",
            manifest.row_count(),
            manifest.num_pages(),
            self.position
        );
        Ok(Arc::new(manifest))
    }

    async fn open(&mut self) -> TesseraResult<()> {
        if self.state == WriterState::Created {
            self.write_all(Bytes::from_static(&MAGIC_BYTES)).await?;
            self.state = WriterState::Open;
        }
        Ok(())
    }

    fn column_mut(&mut self, field_id: FieldId) -> TesseraResult<&mut ColumnLayout> {
        self.column_index
            .get(&field_id)
            .and_then(|&idx| self.columns.get_mut(idx))
            .ok_or_else(|| tessera_err!(ColumnNotFound: "no field with id {}", field_id))
    }

    /// Take the first `rows` buffered rows and write them as one page row group.
    async fn flush_page(&mut self, rows: usize) -> TesseraResult<()> {
        let mut taken = Vec::new();
        let mut remaining = rows;
        while remaining > 0 {
            let Some(batch) = self.buffered.pop_front() else {
                break;
            };
            if batch.num_rows() <= remaining {
                remaining -= batch.num_rows();
                taken.push(batch);
            } else {
                taken.push(batch.slice(0, remaining));
                self.buffered
                    .push_front(batch.slice(remaining, batch.num_rows() - remaining));
                remaining = 0;
            }
        }
        let rows = rows - remaining;
        self.buffered_rows -= rows;

        let columns = (0..self.arrow_schema.fields().len())
            .map(|idx| concat_column(&taken, idx))
            .collect::<TesseraResult<Vec<_>>>()?;
        let pages = self.encoder.encode(&self.schema, &columns)?;

        for page in pages {
            let field_id = page.field_id;
            let spec = self.write_page(page).await?;
            self.column_mut(field_id)?.push_page(spec);
        }
        self.page_rows.push(rows as u64);
        trace!(
            "flushed page row group {} of {} rows",
            self.page_rows.len() - 1,
            rows
        );
        Ok(())
    }

    async fn write_page(&mut self, page: EncodedPage) -> TesseraResult<PageSpec> {
        let checksum = self
            .options
            .page_checksums
            .then(|| crc32fast::hash(&page.buffer));
        let range = ByteRange::new(self.position, page.buffer.len() as u64);
        self.write_all(page.buffer).await?;
        Ok(PageSpec {
            range,
            value_count: page.value_count,
            null_count: page.null_count,
            checksum,
        })
    }

    async fn write_all(&mut self, buffer: Bytes) -> TesseraResult<()> {
        let len = buffer.len() as u64;
        self.sink.write_all(buffer).await?;
        self.position += len;
        Ok(())
    }
}

fn concat_column(batches: &[RecordBatch], idx: usize) -> TesseraResult<ArrayRef> {
    match batches {
        [batch] => Ok(batch.column(idx).clone()),
        _ => {
            let arrays = batches
                .iter()
                .map(|b| b.column(idx).as_ref())
                .collect::<Vec<&dyn Array>>();
            Ok(concat(&arrays)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::types::Int8Type;
    use arrow_array::{DictionaryArray, Int8Array, Int64Array, StringArray};
    use arrow_schema::{DataType, Field as ArrowField};
    use tessera_error::TesseraError;

    use super::*;

    fn schema() -> SchemaRef {
        Arc::new(ArrowSchema::new(vec![
            ArrowField::new("id", DataType::Int64, false),
            ArrowField::new("name", DataType::Utf8, true),
        ]))
    }

    fn batch(ids: Vec<i64>) -> RecordBatch {
        let names = ids.iter().map(|i| format!("n{i}")).collect::<Vec<_>>();
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn batch_size_validation() {
        assert!(matches!(
            WriteOptions::default().with_batch_size(1),
            Err(TesseraError::InvalidConfiguration(..))
        ));
        assert!(WriteOptions::default().with_batch_size(0).is_err());
        assert_eq!(
            WriteOptions::default()
                .with_batch_size(2)
                .unwrap()
                .batch_size(),
            2
        );
        assert_eq!(WriteOptions::default().batch_size(), DEFAULT_BATCH_SIZE);
    }

    #[tokio::test]
    async fn pages_follow_batch_size() {
        let options = WriteOptions::default().with_batch_size(2).unwrap();
        let mut writer = FileWriter::try_new(Vec::new(), &schema(), options).unwrap();
        assert_eq!(writer.state(), WriterState::Created);

        writer.write_batch(&batch(vec![1, 2, 3])).await.unwrap();
        assert_eq!(writer.state(), WriterState::Open);
        writer.write_batch(&batch(vec![4, 5])).await.unwrap();
        let manifest = writer.finalize().await.unwrap();
        assert_eq!(writer.state(), WriterState::Finalized);

        assert_eq!(manifest.page_rows(), &[2, 2, 1]);
        assert_eq!(manifest.row_count(), 5);
        let bytes = writer.into_inner();
        assert_eq!(&bytes[..4], &MAGIC_BYTES);
        assert_eq!(Manifest::load(&bytes).unwrap(), *manifest);
    }

    #[tokio::test]
    async fn closed_after_finalize() {
        let mut writer =
            FileWriter::try_new(Vec::new(), &schema(), WriteOptions::default()).unwrap();
        writer.finalize().await.unwrap();

        assert!(matches!(
            writer.write_batch(&batch(vec![1])).await,
            Err(TesseraError::WriterClosed(..))
        ));
        assert!(matches!(
            writer.finalize().await,
            Err(TesseraError::WriterClosed(..))
        ));
    }

    #[tokio::test]
    async fn rejects_foreign_schema() {
        let mut writer =
            FileWriter::try_new(Vec::new(), &schema(), WriteOptions::default()).unwrap();
        let other = RecordBatch::try_new(
            Arc::new(ArrowSchema::new(vec![ArrowField::new(
                "id",
                DataType::Int32,
                false,
            )])),
            vec![Arc::new(arrow_array::Int32Array::from(vec![1]))],
        )
        .unwrap();

        assert!(matches!(
            writer.write_batch(&other).await,
            Err(TesseraError::SchemaMismatch(..))
        ));
        // a rejected batch does not open the file
        assert_eq!(writer.state(), WriterState::Created);
        assert_eq!(writer.bytes_written(), 0);
    }

    fn categories(start: usize) -> RecordBatch {
        let values = StringArray::from_iter_values((start..start + 100).map(|i| format!("v{i}")));
        let keys = Int8Array::from_iter_values(0..100);
        let category = DictionaryArray::<Int8Type>::try_new(keys, Arc::new(values)).unwrap();
        RecordBatch::try_from_iter([("category", Arc::new(category) as ArrayRef)]).unwrap()
    }

    #[tokio::test]
    async fn failed_page_poisons_the_writer() {
        let first = categories(0);
        let options = WriteOptions::default().with_batch_size(100).unwrap();
        let mut writer = FileWriter::try_new(Vec::new(), first.schema_ref(), options).unwrap();

        writer.write_batch(&first).await.unwrap();
        // 200 distinct values no longer fit Int8 keys
        assert!(writer.write_batch(&categories(100)).await.is_err());
        assert_eq!(writer.state(), WriterState::Failed);

        assert!(matches!(
            writer.write_batch(&first).await,
            Err(TesseraError::WriterClosed(..))
        ));
        assert!(matches!(
            writer.finalize().await,
            Err(TesseraError::WriterClosed(..))
        ));
        let bytes = writer.into_inner();
        assert!(Manifest::load(&bytes).is_err());
    }

    #[tokio::test]
    async fn empty_file() {
        let mut writer =
            FileWriter::try_new(Vec::new(), &schema(), WriteOptions::default()).unwrap();
        let manifest = writer.finalize().await.unwrap();
        assert_eq!(manifest.row_count(), 0);
        assert_eq!(manifest.num_pages(), 0);
        let bytes = writer.into_inner();
        assert_eq!(Manifest::load(&bytes).unwrap().schema(), manifest.schema());
    }
}
