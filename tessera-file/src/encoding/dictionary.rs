use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::*;
use arrow_array::{Array, ArrayRef, DictionaryArray, LargeBinaryArray, UInt64Array};
use arrow_buffer::NullBuffer;
use arrow_cast::{CastOptions, cast, cast_with_options};
use arrow_schema::DataType;
use rustc_hash::FxHashMap;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

use super::plain::decode_plain;

/// Accumulates the file-level dictionary of one column across every batch written.
///
/// Batches may carry different dictionaries. Each is merged into the file-level one, interning
/// only the values that some valid key actually references, and keys are rewritten to point
/// into the merged dictionary.
#[derive(Debug, Default)]
pub(crate) struct DictionaryEncoder {
    index: FxHashMap<Vec<u8>, u64>,
    values: Vec<Vec<u8>>,
}

impl DictionaryEncoder {
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    fn intern(&mut self, value: &[u8]) -> u64 {
        if let Some(&id) = self.index.get(value) {
            return id;
        }
        let id = self.values.len() as u64;
        self.values.push(value.to_vec());
        self.index.insert(value.to_vec(), id);
        id
    }

    /// Rewrite the keys of a dictionary array into the merged dictionary, as `key_type`.
    pub(crate) fn remap_keys(
        &mut self,
        array: &dyn Array,
        key_type: &DataType,
    ) -> TesseraResult<ArrayRef> {
        let Some(dictionary) = array.as_any_dictionary_opt() else {
            tessera_bail!("expected a dictionary array, got {}", array.data_type());
        };
        let values = cast(dictionary.values(), &DataType::LargeBinary)?;
        let values = values.as_binary::<i64>();
        let nulls = array.logical_nulls();

        let mut remapped: Vec<Option<u64>> = vec![None; values.len()];
        let mut keys = Vec::with_capacity(array.len());
        for (idx, key) in dictionary.normalized_keys().into_iter().enumerate() {
            if nulls.as_ref().is_some_and(|n| n.is_null(idx)) {
                keys.push(0);
                continue;
            }
            let slot = remapped
                .get_mut(key)
                .ok_or_else(|| tessera_err!("dictionary key {} out of bounds", key))?;
            let id = match slot {
                Some(id) => *id,
                None => {
                    let id = self.intern(values.value(key));
                    *slot = Some(id);
                    id
                }
            };
            keys.push(id);
        }

        let keys = UInt64Array::new(keys.into(), nulls);
        let options = CastOptions {
            safe: false,
            ..Default::default()
        };
        cast_with_options(&keys, key_type, &options).map_err(|_| {
            tessera_err!(
                InvalidArgument: "dictionary of {} values overflows key type {}",
                self.values.len(),
                key_type
            )
        })
    }

    /// The merged dictionary as an array of `value_type`.
    pub(crate) fn values(&self, value_type: &DataType) -> TesseraResult<ArrayRef> {
        let values = LargeBinaryArray::from_iter_values(self.values.iter());
        Ok(cast(&values, value_type)?)
    }
}

macro_rules! dictionary {
    ($K:ty, $keys:expr, $values:expr) => {
        Arc::new(
            DictionaryArray::<$K>::try_new($keys.as_primitive::<$K>().clone(), $values)
                .map_err(|e| tessera_err!(CorruptFile: "invalid dictionary keys: {}", e))?,
        ) as ArrayRef
    };
}

/// Decode a page of plain encoded keys against the column's dictionary values.
pub(crate) fn decode_dictionary(
    key_type: &DataType,
    payload: &[u8],
    len: usize,
    nulls: Option<NullBuffer>,
    values: ArrayRef,
) -> TesseraResult<ArrayRef> {
    let keys = decode_plain(key_type, payload, len, nulls)?;
    Ok(match key_type {
        DataType::Int8 => dictionary!(Int8Type, keys, values),
        DataType::Int16 => dictionary!(Int16Type, keys, values),
        DataType::Int32 => dictionary!(Int32Type, keys, values),
        DataType::Int64 => dictionary!(Int64Type, keys, values),
        DataType::UInt8 => dictionary!(UInt8Type, keys, values),
        DataType::UInt16 => dictionary!(UInt16Type, keys, values),
        DataType::UInt32 => dictionary!(UInt32Type, keys, values),
        DataType::UInt64 => dictionary!(UInt64Type, keys, values),
        other => tessera_bail!(CorruptFile: "{} is not a dictionary key type", other),
    })
}
