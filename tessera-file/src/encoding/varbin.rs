use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{ByteArrayType, GenericBinaryType, GenericStringType};
use arrow_array::{Array, ArrayRef, GenericByteArray};
use arrow_buffer::{ArrowNativeType, Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_schema::DataType;
use bytes::{BufMut, BytesMut};
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

/// Append `len + 1` offsets rebased to start at zero, followed by the referenced value bytes.
pub(crate) fn encode_varbin(array: &dyn Array, out: &mut BytesMut) -> TesseraResult<()> {
    match array.data_type() {
        DataType::Utf8 => encode_bytes(array.as_string::<i32>(), out),
        DataType::LargeUtf8 => encode_bytes(array.as_string::<i64>(), out),
        DataType::Binary => encode_bytes(array.as_binary::<i32>(), out),
        DataType::LargeBinary => encode_bytes(array.as_binary::<i64>(), out),
        other => tessera_bail!("{} cannot be varbinary encoded", other),
    }
    Ok(())
}

fn encode_bytes<T: ByteArrayType>(array: &GenericByteArray<T>, out: &mut BytesMut) {
    let offsets = array.value_offsets();
    let first = offsets.first().copied().unwrap_or_default();
    let last = offsets.last().copied().unwrap_or_default();

    let rebased: Vec<T::Offset> = offsets.iter().map(|&o| o - first).collect();
    out.put_slice(Buffer::from_vec(rebased).as_slice());
    out.put_slice(&array.value_data()[first.as_usize()..last.as_usize()]);
}

pub(crate) fn decode_varbin(
    data_type: &DataType,
    payload: &[u8],
    len: usize,
    nulls: Option<NullBuffer>,
) -> TesseraResult<ArrayRef> {
    match data_type {
        DataType::Utf8 => decode_bytes::<GenericStringType<i32>>(payload, len, nulls),
        DataType::LargeUtf8 => decode_bytes::<GenericStringType<i64>>(payload, len, nulls),
        DataType::Binary => decode_bytes::<GenericBinaryType<i32>>(payload, len, nulls),
        DataType::LargeBinary => decode_bytes::<GenericBinaryType<i64>>(payload, len, nulls),
        other => tessera_bail!("{} cannot be varbinary decoded", other),
    }
}

fn decode_bytes<T: ByteArrayType>(
    payload: &[u8],
    len: usize,
    nulls: Option<NullBuffer>,
) -> TesseraResult<ArrayRef> {
    let offsets_len = offsets_size::<T::Offset>(len)?;
    if payload.len() < offsets_len {
        tessera_bail!(
            CorruptFile: "{} page of {} values is too short for its offsets",
            T::DATA_TYPE,
            len
        );
    }
    let (offsets, data) = payload.split_at(offsets_len);
    let offsets = read_offsets::<T::Offset>(offsets, len, data.len())?;

    let array = GenericByteArray::<T>::try_new(offsets, Buffer::from_slice_ref(data), nulls)
        .map_err(|e| tessera_err!(CorruptFile: "invalid {} page: {}", T::DATA_TYPE, e))?;
    Ok(Arc::new(array))
}

/// The byte size of the `len + 1` offsets of a page of `len` values.
fn offsets_size<O: ArrowNativeType>(len: usize) -> TesseraResult<usize> {
    len.checked_add(1)
        .and_then(|n| n.checked_mul(size_of::<O>()))
        .ok_or_else(|| tessera_err!(CorruptFile: "page of {} values overflows its offsets", len))
}

/// Read `len + 1` offsets, checking that they start at zero, never decrease and end at
/// `data_len`.
pub(crate) fn read_offsets<O: ArrowNativeType>(
    bytes: &[u8],
    len: usize,
    data_len: usize,
) -> TesseraResult<OffsetBuffer<O>> {
    if bytes.len() != offsets_size::<O>(len)? {
        tessera_bail!(
            CorruptFile: "expected {} offsets, got {} bytes",
            len + 1,
            bytes.len()
        );
    }
    let offsets = ScalarBuffer::<O>::new(Buffer::from_slice_ref(bytes), 0, len + 1);

    let mut previous = 0usize;
    for (idx, offset) in offsets.iter().enumerate() {
        let Some(offset) = offset.to_usize() else {
            tessera_bail!(CorruptFile: "negative offset at {}", idx);
        };
        if (idx == 0 && offset != 0) || offset < previous {
            tessera_bail!(CorruptFile: "offsets are not monotonic at {}", idx);
        }
        previous = offset;
    }
    if previous != data_len {
        tessera_bail!(
            CorruptFile: "offsets end at {} but {} bytes follow",
            previous,
            data_len
        );
    }

    Ok(OffsetBuffer::new(offsets))
}

#[cfg(test)]
mod tests {
    use arrow_array::{BinaryArray, LargeStringArray, StringArray};

    use super::*;

    fn round_trip(array: &dyn Array) -> ArrayRef {
        let mut out = BytesMut::new();
        encode_varbin(array, &mut out).unwrap();
        decode_varbin(array.data_type(), &out, array.len(), array.nulls().cloned()).unwrap()
    }

    #[test]
    fn strings() {
        let array = StringArray::from(vec![Some("alice"), None, Some(""), Some("dave")]);
        assert_eq!(round_trip(&array).as_string::<i32>(), &array);

        let large = LargeStringArray::from(vec!["x", "yz"]);
        assert_eq!(round_trip(&large).as_string::<i64>(), &large);
    }

    #[test]
    fn sliced_values_are_rebased() {
        let array = BinaryArray::from_iter_values([
            b"ab".as_slice(),
            b"cde".as_slice(),
            b"f".as_slice(),
            b"ghij".as_slice(),
        ]);
        let sliced = array.slice(1, 2);

        let mut out = BytesMut::new();
        encode_varbin(&sliced, &mut out).unwrap();
        // three i32 offsets then "cdef"
        assert_eq!(out.len(), 12 + 4);
        assert_eq!(&out[..12], &[0, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(round_trip(&sliced).as_binary::<i32>(), &sliced);
    }

    #[test]
    fn invalid_pages_are_corrupt() {
        // offsets [0, 4] but only 2 bytes of data
        let mut page = vec![0, 0, 0, 0, 4, 0, 0, 0];
        page.extend_from_slice(b"ab");
        assert!(decode_varbin(&DataType::Utf8, &page, 1, None).is_err());

        // decreasing offsets
        let page = [0, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, b'a'];
        assert!(decode_varbin(&DataType::Binary, &page, 2, None).is_err());

        // invalid utf8
        let page = [0, 0, 0, 0, 1, 0, 0, 0, 0xff];
        assert!(decode_varbin(&DataType::Utf8, &page, 1, None).is_err());
        assert!(decode_varbin(&DataType::Binary, &page, 1, None).is_ok());
    }

    #[test]
    fn huge_value_count_is_corrupt() {
        for len in [usize::MAX, usize::MAX / 4] {
            assert!(matches!(
                decode_varbin(&DataType::LargeUtf8, &[0; 16], len, None),
                Err(tessera_error::TesseraError::CorruptFile(..))
            ));
        }
    }
}
