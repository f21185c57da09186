//! A self-describing columnar file format for Arrow record batches.
//!
//! Files are written with a [`FileWriter`](file::FileWriter) and read with a
//! [`FileReader`](file::FileReader), whose [`ScanBuilder`](file::ScanBuilder) pushes column
//! projection and row filters down into decoding. Hosts that scan many files go through the
//! [`FileFormat`](file::FileFormat) trait implemented by [`TesseraFormat`](file::TesseraFormat).

pub use tessera_file::*;
pub use {
    tessera_error as error, tessera_expr as expr, tessera_file as file, tessera_io as io,
};

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use arrow_array::cast::AsArray;
    use arrow_array::types::Int32Type;
    use arrow_array::{Int32Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use futures::TryStreamExt;

    use crate::expr::{col, lit, lt};
    use crate::{FileReader, FileWriter, ScanBuilder, WriteOptions};

    #[tokio::test]
    async fn write_then_scan() {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int32Array::from_iter_values(0..10))],
        )
        .unwrap();

        let mut writer = FileWriter::try_new(Vec::new(), &schema, WriteOptions::default()).unwrap();
        writer.write_batch(&batch).await.unwrap();
        writer.finalize().await.unwrap();

        let reader = FileReader::open(bytes::Bytes::from(writer.into_inner()));
        let batches: Vec<RecordBatch> = ScanBuilder::new(reader)
            .with_filter(lt(col("n"), lit(3i32)))
            .into_stream()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let values = batches
            .iter()
            .flat_map(|b| b.column(0).as_primitive::<Int32Type>().values().to_vec())
            .collect::<Vec<_>>();
        assert_eq!(values, vec![0, 1, 2]);
    }
}
