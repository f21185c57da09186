use std::sync::Arc;

use arrow_array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_schema::SchemaRef;
use arrow_select::filter::filter_record_batch;
use itertools::Itertools;
use tessera_error::{TesseraResult, tessera_err};
use tessera_expr::{ExprRef, TesseraExprExt};

use crate::{FieldId, Schema};

/// Which top-level columns a scan decodes and how it turns them into output batches.
///
/// A scan decodes the union of the projected columns and the columns its filter references,
/// filters the decoded rows, and then keeps only the projected columns, in projection order.
#[derive(Debug)]
pub(crate) struct ScanPlan {
    decode_ids: Vec<FieldId>,
    decode_schema: SchemaRef,
    output_positions: Vec<usize>,
    output_schema: SchemaRef,
    filter: Option<ExprRef>,
}

impl ScanPlan {
    pub fn try_new(
        schema: &Schema,
        projection: Option<&[String]>,
        filter: Option<&ExprRef>,
    ) -> TesseraResult<Self> {
        let output_indices = match projection {
            None => (0..schema.fields().len()).collect::<Vec<_>>(),
            Some(names) => names
                .iter()
                .map(|name| column_index(schema, name))
                .try_collect()?,
        };

        let filter_indices: Vec<usize> = filter
            .map(|expr| {
                expr.references()
                    .iter()
                    .map(|name| column_index(schema, name))
                    .try_collect()
            })
            .transpose()?
            .unwrap_or_default();

        let decode_indices = output_indices
            .iter()
            .chain(filter_indices.iter())
            .copied()
            .sorted_unstable()
            .dedup()
            .collect::<Vec<_>>();

        let arrow_schema = schema.to_arrow()?;
        let decode_schema = Arc::new(arrow_schema.project(&decode_indices)?);
        let output_schema = Arc::new(arrow_schema.project(&output_indices)?);

        let output_positions = output_indices
            .iter()
            .map(|idx| {
                decode_indices
                    .binary_search(idx)
                    .map_err(|_| tessera_err!(AssertionFailed: "output column {} is not decoded", idx))
            })
            .try_collect()?;

        Ok(Self {
            decode_ids: decode_indices
                .iter()
                .map(|&idx| schema.fields()[idx].id())
                .collect(),
            decode_schema,
            output_positions,
            output_schema,
            filter: filter.cloned(),
        })
    }

    /// The ids of the top-level fields to decode, in schema order.
    pub fn decode_ids(&self) -> &[FieldId] {
        &self.decode_ids
    }

    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    /// Filter and project the decoded columns of `num_rows` rows.
    pub fn apply(&self, columns: Vec<ArrayRef>, num_rows: usize) -> TesseraResult<RecordBatch> {
        let decoded = RecordBatch::try_new_with_options(
            self.decode_schema.clone(),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(num_rows)),
        )?;

        let selected = match &self.filter {
            None => decoded,
            // Rows where the predicate is null are not selected.
            Some(filter) => filter_record_batch(&decoded, &filter.evaluate_mask(&decoded)?)?,
        };

        let columns = self
            .output_positions
            .iter()
            .map(|&pos| selected.column(pos).clone())
            .collect();
        Ok(RecordBatch::try_new_with_options(
            self.output_schema.clone(),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(selected.num_rows())),
        )?)
    }
}

fn column_index(schema: &Schema, name: &str) -> TesseraResult<usize> {
    schema
        .index_of(name)
        .ok_or_else(|| tessera_err!(ColumnNotFound: "no top-level column named {}", name))
}

#[cfg(test)]
mod tests {
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;
    use arrow_array::{BooleanArray, Int64Array, StringArray};
    use arrow_schema::{DataType, Field as ArrowField, Schema as ArrowSchema};
    use tessera_error::TesseraError;
    use tessera_expr::{col, gt, lit};

    use super::*;

    fn schema() -> Schema {
        Schema::from_arrow(&ArrowSchema::new(vec![
            ArrowField::new("id", DataType::Int64, true),
            ArrowField::new("name", DataType::Utf8, true),
            ArrowField::new("flag", DataType::Boolean, true),
        ]))
        .unwrap()
    }

    #[test]
    fn decodes_the_union_of_projection_and_filter() {
        let schema = schema();
        let filter = gt(col("id"), lit(2i64));
        let plan = ScanPlan::try_new(&schema, Some(["name".to_string()].as_slice()), Some(&filter)).unwrap();

        let id = schema.fields()[0].id();
        let name = schema.fields()[1].id();
        assert_eq!(plan.decode_ids(), &[id, name]);
        assert_eq!(plan.output_schema().fields().len(), 1);
        assert_eq!(plan.output_schema().field(0).name(), "name");
    }

    #[test]
    fn projection_order_is_kept() {
        let plan = ScanPlan::try_new(
            &schema(),
            Some(["flag".to_string(), "id".to_string()].as_slice()),
            None,
        )
        .unwrap();
        assert_eq!(plan.decode_ids().len(), 2);

        let batch = plan
            .apply(
                vec![
                    Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
                    Arc::new(BooleanArray::from(vec![true, false])) as ArrayRef,
                ],
                2,
            )
            .unwrap();
        assert_eq!(batch.schema().field(0).name(), "flag");
        assert_eq!(batch.schema().field(1).name(), "id");
    }

    #[test]
    fn unknown_columns_fail_before_any_io() {
        let err = ScanPlan::try_new(&schema(), Some(["missing".to_string()].as_slice()), None).unwrap_err();
        assert!(matches!(err, TesseraError::ColumnNotFound(..)));

        let filter = gt(col("missing"), lit(1i64));
        let err = ScanPlan::try_new(&schema(), None, Some(&filter)).unwrap_err();
        assert!(matches!(err, TesseraError::ColumnNotFound(..)));
    }

    #[test]
    fn null_predicates_drop_rows() {
        let filter = gt(col("id"), lit(1i64));
        let plan = ScanPlan::try_new(&schema(), Some(["id".to_string()].as_slice()), Some(&filter)).unwrap();
        let batch = plan
            .apply(vec![Arc::new(Int64Array::from(vec![Some(1), None, Some(3)])) as ArrayRef], 3)
            .unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.column(0).as_primitive::<Int64Type>().value(0), 3);
    }

    #[test]
    fn empty_projection_counts_rows() {
        let filter = gt(col("id"), lit(1i64));
        let plan = ScanPlan::try_new(&schema(), Some([].as_slice()), Some(&filter)).unwrap();
        let batch = plan
            .apply(vec![Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef], 3)
            .unwrap();
        assert_eq!(batch.num_columns(), 0);
        assert_eq!(batch.num_rows(), 2);

        let plan = ScanPlan::try_new(&schema(), Some([].as_slice()), None).unwrap();
        assert!(plan.decode_ids().is_empty());
        assert_eq!(plan.apply(vec![], 4).unwrap().num_rows(), 4);
    }

    #[test]
    fn filter_only_columns_are_dropped() {
        let filter = gt(col("id"), lit(1i64));
        let plan = ScanPlan::try_new(&schema(), Some(["name".to_string()].as_slice()), Some(&filter)).unwrap();
        let batch = plan
            .apply(
                vec![
                    Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
                    Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef,
                ],
                2,
            )
            .unwrap();
        assert_eq!(batch.num_columns(), 1);
        assert_eq!(batch.column(0).as_string::<i32>().value(0), "b");
    }
}
