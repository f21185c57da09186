use arrow_buffer::{BooleanBuffer, Buffer, NullBuffer};
use bytes::{BufMut, BytesMut};
use tessera_error::{TesseraResult, tessera_bail};

pub(crate) fn bitmap_len(len: usize) -> usize {
    len.div_ceil(8)
}

/// Append a validity bitmap when `nulls` holds any null, returning the null count.
pub(crate) fn write_validity(out: &mut BytesMut, nulls: Option<&NullBuffer>) -> u64 {
    match nulls {
        Some(nulls) if nulls.null_count() > 0 => {
            out.put_slice(nulls.inner().sliced().as_slice());
            nulls.null_count() as u64
        }
        _ => 0,
    }
}

/// Split a page into its validity and payload.
pub(crate) fn read_validity(
    bytes: &[u8],
    len: usize,
    null_count: usize,
) -> TesseraResult<(Option<NullBuffer>, &[u8])> {
    if null_count == 0 {
        return Ok((None, bytes));
    }

    let bitmap_len = bitmap_len(len);
    if bytes.len() < bitmap_len {
        tessera_bail!(
            CorruptFile: "page of {} bytes is too short for a {} value validity bitmap",
            bytes.len(),
            len
        );
    }
    let (bitmap, payload) = bytes.split_at(bitmap_len);
    let nulls = NullBuffer::new(BooleanBuffer::new(Buffer::from_slice_ref(bitmap), 0, len));
    if nulls.null_count() != null_count {
        tessera_bail!(
            CorruptFile: "validity bitmap has {} nulls, expected {}",
            nulls.null_count(),
            null_count
        );
    }
    Ok((Some(nulls), payload))
}
