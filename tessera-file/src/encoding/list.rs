use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef};
use arrow_buffer::{Buffer, OffsetBuffer};
use bytes::{BufMut, BytesMut};
use tessera_error::{TesseraResult, tessera_err};

use super::varbin::read_offsets;

/// Append the rebased offsets of a list array, returning the slice of the child that its
/// elements cover.
pub(crate) fn encode_list_offsets(array: &dyn Array, out: &mut BytesMut) -> TesseraResult<ArrayRef> {
    let list = array
        .as_list_opt::<i32>()
        .ok_or_else(|| tessera_err!("expected a list array, got {}", array.data_type()))?;

    let offsets = list.value_offsets();
    let first = offsets.first().copied().unwrap_or_default();
    let last = offsets.last().copied().unwrap_or_default();

    let rebased: Vec<i32> = offsets.iter().map(|o| o - first).collect();
    out.put_slice(Buffer::from_vec(rebased).as_slice());

    Ok(list
        .values()
        .slice(first as usize, (last - first) as usize))
}

/// Read the offsets of a list page whose child page holds `child_len` values.
pub(crate) fn decode_list_offsets(
    payload: &[u8],
    len: usize,
    child_len: usize,
) -> TesseraResult<OffsetBuffer<i32>> {
    read_offsets::<i32>(payload, len, child_len)
}

#[cfg(test)]
mod tests {
    use arrow_array::ListArray;
    use arrow_array::types::Int32Type;

    use super::*;

    #[test]
    fn sliced_lists_cover_their_elements() {
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1), Some(2)]),
            None,
            Some(vec![Some(3), Some(4), Some(5)]),
            Some(vec![]),
        ]);
        let sliced = list.slice(2, 2);

        let mut out = BytesMut::new();
        let child = encode_list_offsets(&sliced, &mut out).unwrap();
        assert_eq!(child.len(), 3);
        assert_eq!(child.as_primitive::<Int32Type>().values().to_vec(), vec![3, 4, 5]);

        let offsets = decode_list_offsets(&out, 2, 3).unwrap();
        assert_eq!(offsets.iter().copied().collect::<Vec<_>>(), vec![0, 3, 3]);
        assert!(decode_list_offsets(&out, 2, 4).is_err());
    }
}
