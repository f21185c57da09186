use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::*;
use arrow_array::{Array, ArrayRef, BooleanArray, PrimitiveArray, downcast_primitive_array};
use arrow_buffer::{BooleanBuffer, Buffer, NullBuffer, ScalarBuffer};
use arrow_schema::{DataType, TimeUnit};
use bytes::{BufMut, BytesMut};
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

use super::validity::bitmap_len;

/// Append the values of a boolean or primitive array: bit-packed for booleans, raw
/// little-endian values otherwise.
pub(crate) fn encode_plain(array: &dyn Array, out: &mut BytesMut) -> TesseraResult<()> {
    downcast_primitive_array!(
        array => out.put_slice(array.values().inner().as_slice()),
        DataType::Boolean => out.put_slice(array.as_boolean().values().sliced().as_slice()),
        other => tessera_bail!("{} cannot be plain encoded", other)
    );
    Ok(())
}

macro_rules! primitive {
    ($T:ty, $values:expr, $len:expr, $nulls:expr, $data_type:expr) => {
        Arc::new(
            PrimitiveArray::<$T>::try_new(ScalarBuffer::new($values, 0, $len), $nulls)?
                .with_data_type($data_type.clone()),
        ) as ArrayRef
    };
}

pub(crate) fn decode_plain(
    data_type: &DataType,
    payload: &[u8],
    len: usize,
    nulls: Option<NullBuffer>,
) -> TesseraResult<ArrayRef> {
    let expected = match data_type {
        DataType::Boolean => bitmap_len(len),
        other => match other.primitive_width() {
            Some(width) => width.checked_mul(len).ok_or_else(|| {
                tessera_err!(CorruptFile: "{} page of {} values overflows", other, len)
            })?,
            None => tessera_bail!("{} cannot be plain decoded", other),
        },
    };
    if payload.len() != expected {
        tessera_bail!(
            CorruptFile: "{} page of {} values has {} bytes, expected {}",
            data_type,
            len,
            payload.len(),
            expected
        );
    }

    // Copy into an aligned buffer, file bytes carry no alignment guarantee.
    let values = Buffer::from_slice_ref(payload);
    Ok(match data_type {
        DataType::Boolean => Arc::new(BooleanArray::new(BooleanBuffer::new(values, 0, len), nulls)),
        DataType::Int8 => primitive!(Int8Type, values, len, nulls, data_type),
        DataType::Int16 => primitive!(Int16Type, values, len, nulls, data_type),
        DataType::Int32 => primitive!(Int32Type, values, len, nulls, data_type),
        DataType::Int64 => primitive!(Int64Type, values, len, nulls, data_type),
        DataType::UInt8 => primitive!(UInt8Type, values, len, nulls, data_type),
        DataType::UInt16 => primitive!(UInt16Type, values, len, nulls, data_type),
        DataType::UInt32 => primitive!(UInt32Type, values, len, nulls, data_type),
        DataType::UInt64 => primitive!(UInt64Type, values, len, nulls, data_type),
        DataType::Float32 => primitive!(Float32Type, values, len, nulls, data_type),
        DataType::Float64 => primitive!(Float64Type, values, len, nulls, data_type),
        DataType::Date32 => primitive!(Date32Type, values, len, nulls, data_type),
        DataType::Date64 => primitive!(Date64Type, values, len, nulls, data_type),
        DataType::Timestamp(TimeUnit::Second, _) => {
            primitive!(TimestampSecondType, values, len, nulls, data_type)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            primitive!(TimestampMillisecondType, values, len, nulls, data_type)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            primitive!(TimestampMicrosecondType, values, len, nulls, data_type)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            primitive!(TimestampNanosecondType, values, len, nulls, data_type)
        }
        other => tessera_bail!("{} cannot be plain decoded", other),
    })
}
