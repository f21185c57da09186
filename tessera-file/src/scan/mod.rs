//! Scans over a [`FileReader`], yielding filtered and projected record batches in row order.

use std::ops::Range;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
pub use executor::*;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt, future, stream};
use log::debug;
use tessera_error::{TesseraResult, tessera_err};
use tessera_expr::ExprRef;

use crate::writer::DEFAULT_BATCH_SIZE;
use crate::{FileReader, Manifest};

mod executor;
mod plan;

use plan::ScanPlan;

/// The default number of batches decoded ahead of the consumer.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// What a scan materializes: which columns, which rows, and how many rows per batch.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    projection: Option<Vec<String>>,
    filter: Option<ExprRef>,
    batch_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            projection: None,
            filter: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ScanOptions {
    /// Materialize only the named top-level columns, in this order.
    ///
    /// An empty projection produces batches that carry only a row count.
    pub fn with_projection<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: ExprRef) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_some_filter(mut self, filter: Option<ExprRef>) -> Self {
        self.filter = filter;
        self
    }

    /// The number of rows decoded per batch, before filtering.
    pub fn with_batch_size(mut self, batch_size: usize) -> TesseraResult<Self> {
        if batch_size == 0 {
            return Err(tessera_err!(
                InvalidConfiguration: "scan batch size must be greater than 0"
            ));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    pub fn filter(&self) -> Option<&ExprRef> {
        self.filter.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// A struct for building a scan operation.
pub struct ScanBuilder {
    reader: FileReader,
    options: ScanOptions,
    /// Optionally read a subset of the rows in the file.
    row_range: Option<Range<u64>>,
    /// The number of batches to make progress on concurrently.
    concurrency: usize,
    /// The executor each batch is decoded on, the process-wide worker pool when unset.
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl ScanBuilder {
    pub fn new(reader: FileReader) -> Self {
        Self {
            reader,
            options: ScanOptions::default(),
            row_range: None,
            concurrency: DEFAULT_CONCURRENCY,
            executor: None,
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_projection<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.options = self.options.with_projection(columns);
        self
    }

    pub fn with_filter(mut self, filter: ExprRef) -> Self {
        self.options = self.options.with_filter(filter);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> TesseraResult<Self> {
        self.options = self.options.with_batch_size(batch_size)?;
        Ok(self)
    }

    pub fn with_row_range(mut self, row_range: Range<u64>) -> Self {
        self.row_range = Some(row_range);
        self
    }

    pub fn with_some_row_range(mut self, row_range: Option<Range<u64>>) -> Self {
        self.row_range = row_range;
        self
    }

    /// The number of batches to make progress on concurrently, must be greater than 0.
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

    /// Decode each batch on the given Tokio runtime.
    pub fn with_tokio_executor(mut self, handle: tokio::runtime::Handle) -> Self {
        self.executor = Some(Arc::new(handle));
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Returns the Arrow schema of the batches this scan yields.
    pub async fn output_schema(&self) -> TesseraResult<SchemaRef> {
        let manifest = self.reader.manifest().await?;
        let plan = ScanPlan::try_new(
            manifest.schema(),
            self.options.projection(),
            self.options.filter(),
        )?;
        Ok(plan.output_schema().clone())
    }

    /// Returns a stream over the batches of the scan, in file row order.
    ///
    /// The manifest is loaded and the plan validated before the stream is returned, so unknown
    /// columns and out of bounds row ranges fail here without reading any page. Each batch is
    /// decoded on the executor, at most `concurrency` batches ahead of the consumer. Dropping
    /// the stream stops submitting work and discards the results of batches still in flight.
    pub async fn into_stream(self) -> TesseraResult<BoxStream<'static, TesseraResult<RecordBatch>>> {
        let manifest = self.reader.manifest().await?;
        let plan = Arc::new(ScanPlan::try_new(
            manifest.schema(),
            self.options.projection(),
            self.options.filter(),
        )?);

        let row_count = manifest.row_count();
        let row_range = self.row_range.unwrap_or(0..row_count);
        if row_range.start > row_range.end || row_range.end > row_count {
            return Err(tessera_err!(
                RowRangeOutOfBounds: row_range.start,
                row_range.end,
                row_count
            ));
        }

        let batch_size = self.options.batch_size() as u64;
        debug!(
            "scanning rows {}..{} in batches of {}, decoding {} of {} columns",
            row_range.start,
            row_range.end,
            batch_size,
            plan.decode_ids().len(),
            manifest.schema().fields().len(),
        );

        let executor = self.executor.unwrap_or_else(default_executor);
        let reader = self.reader;
        let splits = split_rows(row_range, batch_size);

        Ok(stream::iter(splits)
            .map(move |rows| {
                let unit = instrument!(
                    "decode_batch",
                    { start = rows.start, end = rows.end },
                    decode_batch(reader.clone(), manifest.clone(), plan.clone(), rows)
                );
                executor.spawn(unit.boxed())
            })
            .buffered(self.concurrency)
            .try_filter(|batch| future::ready(batch.num_rows() > 0))
            .scan(false, |failed, result| {
                if *failed {
                    return future::ready(None);
                }
                *failed = result.is_err();
                future::ready(Some(result))
            })
            .boxed())
    }
}

/// Read, filter and project one batch of rows.
async fn decode_batch(
    reader: FileReader,
    manifest: Arc<Manifest>,
    plan: Arc<ScanPlan>,
    rows: Range<u64>,
) -> TesseraResult<RecordBatch> {
    let num_rows = (rows.end - rows.start) as usize;
    let columns = reader
        .read_columns_in(manifest, plan.decode_ids(), rows)
        .await?;
    plan.apply(columns, num_rows)
}

fn split_rows(row_range: Range<u64>, batch_size: u64) -> impl Iterator<Item = Range<u64>> + Send {
    let end = row_range.end;
    row_range
        .step_by(batch_size as usize)
        .map(move |start| start..(start + batch_size).min(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_cover_the_range() {
        let splits = split_rows(3..10, 3).collect::<Vec<_>>();
        assert_eq!(splits, vec![3..6, 6..9, 9..10]);
        assert_eq!(split_rows(4..4, 3).count(), 0);
    }

    #[test]
    fn scan_options_validate_batch_size() {
        assert!(ScanOptions::default().with_batch_size(0).is_err());
        let options = ScanOptions::default()
            .with_batch_size(1)
            .unwrap()
            .with_projection(["id"]);
        assert_eq!(options.batch_size(), 1);
        assert_eq!(options.projection(), Some(["id".to_string()].as_slice()));
        assert!(options.filter().is_none());
    }
}
