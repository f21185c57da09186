//! Page encodings.
//!
//! A page is `[validity bitmap][payload]`, where the bitmap (one bit per value, LSB first) is
//! present only when the page holds nulls. The payload depends on the column's [`Encoding`].

mod dictionary;
mod list;
mod plain;
mod validity;
mod varbin;

use std::fmt::{Display, Formatter};

use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef};
use arrow_buffer::{NullBuffer, OffsetBuffer};
use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use log::trace;
use rustc_hash::FxHashMap;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

use self::dictionary::DictionaryEncoder;
use crate::{Field, FieldId, LogicalType, PageSpec, Schema};

/// How the pages of a column are laid out. Fixed by the column's logical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Bit-packed booleans or raw little-endian fixed-width values.
    Plain,
    /// Rebased offsets followed by the value bytes.
    VarBinary,
    /// Plain encoded keys into a per-column dictionary written once at the end of the file.
    Dictionary,
    /// Validity only; a struct's children own their own pages.
    Validity,
    /// Rebased list offsets. The child's page `i` holds exactly the elements of page `i`.
    ListOffsets,
}

impl Encoding {
    pub fn for_type(logical_type: &LogicalType) -> Self {
        match logical_type {
            LogicalType::Dictionary { .. } => Encoding::Dictionary,
            LogicalType::Struct => Encoding::Validity,
            LogicalType::List => Encoding::ListOffsets,
            lt if lt.is_var_binary() => Encoding::VarBinary,
            _ => Encoding::Plain,
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Plain => write!(f, "plain"),
            Encoding::VarBinary => write!(f, "varbinary"),
            Encoding::Dictionary => write!(f, "dictionary"),
            Encoding::Validity => write!(f, "validity"),
            Encoding::ListOffsets => write!(f, "list-offsets"),
        }
    }
}

/// An encoded page, not yet placed in the file.
#[derive(Debug, Clone)]
pub(crate) struct EncodedPage {
    pub(crate) field_id: FieldId,
    pub(crate) buffer: Bytes,
    pub(crate) value_count: u64,
    pub(crate) null_count: u64,
}

/// Encodes page row groups for a writer, holding the dictionaries that span the whole file.
pub(crate) struct PageEncoder {
    dictionaries: FxHashMap<FieldId, DictionaryEncoder>,
}

impl PageEncoder {
    pub(crate) fn new(schema: &Schema) -> Self {
        let dictionaries = schema
            .all_fields()
            .into_iter()
            .filter(|f| matches!(f.logical_type(), LogicalType::Dictionary { .. }))
            .map(|f| (f.id(), DictionaryEncoder::default()))
            .collect();
        Self { dictionaries }
    }

    /// Encode one page for every column, parents before their children.
    pub(crate) fn encode(
        &mut self,
        schema: &Schema,
        columns: &[ArrayRef],
    ) -> TesseraResult<Vec<EncodedPage>> {
        let mut pages = Vec::new();
        for (field, column) in schema.fields().iter().zip_eq(columns) {
            self.encode_field(field, column, &mut pages)?;
        }
        Ok(pages)
    }

    fn encode_field(
        &mut self,
        field: &Field,
        array: &ArrayRef,
        pages: &mut Vec<EncodedPage>,
    ) -> TesseraResult<()> {
        let mut buffer = BytesMut::new();
        let encoding = Encoding::for_type(field.logical_type());

        let mut push = |buffer: BytesMut, null_count: u64, value_count: usize| {
            pages.push(EncodedPage {
                field_id: field.id(),
                buffer: buffer.freeze(),
                value_count: value_count as u64,
                null_count,
            })
        };

        match encoding {
            Encoding::Plain => {
                let null_count = validity::write_validity(&mut buffer, array.nulls());
                plain::encode_plain(array, &mut buffer)?;
                push(buffer, null_count, array.len());
            }
            Encoding::VarBinary => {
                let null_count = validity::write_validity(&mut buffer, array.nulls());
                varbin::encode_varbin(array, &mut buffer)?;
                push(buffer, null_count, array.len());
            }
            Encoding::Dictionary => {
                let LogicalType::Dictionary { key, .. } = field.logical_type() else {
                    tessera_bail!("field {} is not dictionary typed", field);
                };
                let encoder = self
                    .dictionaries
                    .get_mut(&field.id())
                    .ok_or_else(|| tessera_err!("no dictionary for field {}", field))?;
                let keys = encoder.remap_keys(array, &key.to_arrow_leaf()?)?;
                let null_count = validity::write_validity(&mut buffer, keys.nulls());
                plain::encode_plain(&keys, &mut buffer)?;
                push(buffer, null_count, array.len());
            }
            Encoding::Validity => {
                let null_count = validity::write_validity(&mut buffer, array.nulls());
                push(buffer, null_count, array.len());

                let struct_array = array
                    .as_struct_opt()
                    .ok_or_else(|| tessera_err!("expected a struct array for field {}", field))?;
                for (child, column) in field.children().iter().zip_eq(struct_array.columns()) {
                    self.encode_field(child, column, pages)?;
                }
            }
            Encoding::ListOffsets => {
                let null_count = validity::write_validity(&mut buffer, array.nulls());
                let elements = list::encode_list_offsets(array, &mut buffer)?;
                push(buffer, null_count, array.len());

                let [element] = field.children() else {
                    tessera_bail!("list field {} must have exactly one child", field);
                };
                self.encode_field(element, &elements, pages)?;
            }
        }
        Ok(())
    }

    /// Encode the merged dictionary of every dictionary column, in schema order.
    pub(crate) fn finish_dictionaries(&self, schema: &Schema) -> TesseraResult<Vec<EncodedPage>> {
        schema
            .all_fields()
            .into_iter()
            .filter_map(|field| match field.logical_type() {
                LogicalType::Dictionary { value, .. } => Some((field, value)),
                _ => None,
            })
            .map(|(field, value)| {
                let encoder = self
                    .dictionaries
                    .get(&field.id())
                    .ok_or_else(|| tessera_err!("no dictionary for field {}", field))?;
                trace!("field {} has {} distinct values", field, encoder.len());
                let values = encoder.values(&value.to_arrow_leaf()?)?;
                let mut buffer = BytesMut::new();
                varbin::encode_varbin(&values, &mut buffer)?;
                Ok(EncodedPage {
                    field_id: field.id(),
                    buffer: buffer.freeze(),
                    value_count: values.len() as u64,
                    null_count: 0,
                })
            })
            .collect()
    }
}

/// Decode a page of a leaf column. Dictionary columns need their decoded dictionary values.
pub(crate) fn decode_leaf(
    field: &Field,
    page: &PageSpec,
    bytes: &[u8],
    dictionary: Option<ArrayRef>,
) -> TesseraResult<ArrayRef> {
    let len = page.value_count as usize;
    let (nulls, payload) = validity::read_validity(bytes, len, page.null_count as usize)?;
    match field.logical_type() {
        LogicalType::Dictionary { key, .. } => {
            let values = dictionary
                .ok_or_else(|| tessera_err!(CorruptFile: "field {} has no dictionary", field))?;
            dictionary::decode_dictionary(&key.to_arrow_leaf()?, payload, len, nulls, values)
        }
        LogicalType::Struct | LogicalType::List => {
            tessera_bail!("field {} is nested and has no leaf pages", field)
        }
        lt if lt.is_var_binary() => varbin::decode_varbin(&lt.to_arrow_leaf()?, payload, len, nulls),
        lt => plain::decode_plain(&lt.to_arrow_leaf()?, payload, len, nulls),
    }
}

/// Decode the dictionary page of a dictionary encoded column.
pub(crate) fn decode_dictionary_values(
    field: &Field,
    page: &PageSpec,
    bytes: &[u8],
) -> TesseraResult<ArrayRef> {
    let LogicalType::Dictionary { value, .. } = field.logical_type() else {
        tessera_bail!("field {} is not dictionary typed", field);
    };
    if page.null_count != 0 {
        tessera_bail!(CorruptFile: "dictionary of field {} holds nulls", field);
    }
    varbin::decode_varbin(
        &value.to_arrow_leaf()?,
        bytes,
        page.value_count as usize,
        None,
    )
}

/// Decode the validity of a struct page.
pub(crate) fn decode_struct_validity(
    page: &PageSpec,
    bytes: &[u8],
) -> TesseraResult<Option<NullBuffer>> {
    let (nulls, payload) = validity::read_validity(
        bytes,
        page.value_count as usize,
        page.null_count as usize,
    )?;
    if !payload.is_empty() {
        tessera_bail!(
            CorruptFile: "struct page {} has {} trailing bytes",
            page.range,
            payload.len()
        );
    }
    Ok(nulls)
}

/// Decode the validity and offsets of a list page whose child page holds `child_len` values.
pub(crate) fn decode_list(
    page: &PageSpec,
    bytes: &[u8],
    child_len: usize,
) -> TesseraResult<(Option<NullBuffer>, OffsetBuffer<i32>)> {
    let len = page.value_count as usize;
    let (nulls, payload) = validity::read_validity(bytes, len, page.null_count as usize)?;
    let offsets = list::decode_list_offsets(payload, len, child_len)?;
    Ok((nulls, offsets))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::types::{Int32Type, UInt8Type};
    use arrow_array::{
        BooleanArray, DictionaryArray, Int64Array, ListArray, RecordBatch, StringArray,
        StructArray,
    };
    use arrow_schema::{DataType, Field as ArrowField, Schema as ArrowSchema};

    use super::*;
    use crate::ByteRange;

    fn spec(page: &EncodedPage) -> PageSpec {
        PageSpec {
            range: ByteRange::new(0, page.buffer.len() as u64),
            value_count: page.value_count,
            null_count: page.null_count,
            checksum: None,
        }
    }

    #[test]
    fn encoding_follows_type() {
        assert_eq!(Encoding::for_type(&LogicalType::Int32), Encoding::Plain);
        assert_eq!(Encoding::for_type(&LogicalType::Boolean), Encoding::Plain);
        assert_eq!(Encoding::for_type(&LogicalType::LargeBinary), Encoding::VarBinary);
        assert_eq!(Encoding::for_type(&LogicalType::Struct), Encoding::Validity);
        assert_eq!(Encoding::for_type(&LogicalType::List), Encoding::ListOffsets);
    }

    #[test]
    fn nested_pages_in_pre_order() {
        let point = StructArray::from(vec![
            (
                Arc::new(ArrowField::new("x", DataType::Int64, true)),
                Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
            ),
            (
                Arc::new(ArrowField::new("ok", DataType::Boolean, true)),
                Arc::new(BooleanArray::from(vec![true, false, true])) as ArrayRef,
            ),
        ]);
        let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1)]),
            None,
            Some(vec![Some(2), Some(3)]),
        ]);
        let names: DictionaryArray<UInt8Type> = vec!["a", "b", "a"].into_iter().collect();

        let arrow = ArrowSchema::new(vec![
            ArrowField::new("point", point.data_type().clone(), true),
            ArrowField::new("tags", tags.data_type().clone(), true),
            ArrowField::new("name", names.data_type().clone(), true),
        ]);
        let schema = Schema::from_arrow(&arrow).unwrap();
        let batch = RecordBatch::try_new(
            Arc::new(arrow),
            vec![
                Arc::new(point) as ArrayRef,
                Arc::new(tags),
                Arc::new(names),
            ],
        )
        .unwrap();

        let mut encoder = PageEncoder::new(&schema);
        let pages = encoder.encode(&schema, batch.columns()).unwrap();
        assert_eq!(
            pages.iter().map(|p| p.field_id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
        // list parent has 3 rows with one null, its child 3 elements
        assert_eq!((pages[3].value_count, pages[3].null_count), (3, 1));
        assert_eq!(pages[4].value_count, 3);
        // a struct page without nulls is empty
        assert!(pages[0].buffer.is_empty());

        let tags_field = &schema.fields()[1];
        let (nulls, offsets) = decode_list(&spec(&pages[3]), &pages[3].buffer, 3).unwrap();
        assert_eq!(nulls.map(|n| n.null_count()), Some(1));
        assert_eq!(offsets.iter().copied().collect::<Vec<_>>(), vec![0, 1, 1, 3]);
        let elements =
            decode_leaf(&tags_field.children()[0], &spec(&pages[4]), &pages[4].buffer, None)
                .unwrap();
        assert_eq!(elements.len(), 3);

        let dictionaries = encoder.finish_dictionaries(&schema).unwrap();
        assert_eq!(dictionaries.len(), 1);
        let name_field = &schema.fields()[2];
        let values = decode_dictionary_values(
            name_field,
            &spec(&dictionaries[0]),
            &dictionaries[0].buffer,
        )
        .unwrap();
        assert_eq!(values.as_string::<i32>(), &StringArray::from(vec!["a", "b"]));

        let names = decode_leaf(name_field, &spec(&pages[5]), &pages[5].buffer, Some(values))
            .unwrap();
        let names = names.as_dictionary::<UInt8Type>();
        assert_eq!(
            names
                .downcast_dict::<StringArray>()
                .unwrap()
                .into_iter()
                .collect::<Vec<_>>(),
            vec![Some("a"), Some("b"), Some("a")]
        );
    }

    #[test]
    fn struct_page_with_payload_is_corrupt() {
        let page = PageSpec {
            range: ByteRange::new(4, 1),
            value_count: 3,
            null_count: 0,
            checksum: None,
        };
        assert!(decode_struct_validity(&page, &[0]).is_err());
        assert_eq!(decode_struct_validity(&page, &[]).unwrap(), None);
    }
}
