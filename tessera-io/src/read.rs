use std::io;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tessera_error::tessera_err;

/// A trait for random-access byte sources that support asynchronous positional reads.
///
/// The trait is object safe so that readers can be shared as `Arc<dyn ReadAt>` across scans
/// and worker tasks. Returned futures are `'static` and must not borrow from `self`;
/// implementations clone whatever handle they need into the future.
pub trait ReadAt: Send + Sync + 'static {
    /// Request an asynchronous positional read of the bytes in `range`.
    ///
    /// If the source does not have the requested number of bytes, the returned future
    /// completes with an [`UnexpectedEof`][io::ErrorKind::UnexpectedEof].
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<Bytes>>;

    /// Asynchronously get the number of bytes of data readable.
    fn size(&self) -> BoxFuture<'static, io::Result<u64>>;
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<Bytes>> {
        T::read_byte_range(self, range)
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        T::size(self)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<Bytes>> {
        T::read_byte_range(self, range)
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        T::size(self)
    }
}

impl ReadAt for Bytes {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<Bytes>> {
        futures::future::ready(slice_bytes(self, range)).boxed()
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        futures::future::ready(Ok(self.len() as u64)).boxed()
    }
}

fn slice_bytes(bytes: &Bytes, range: Range<u64>) -> io::Result<Bytes> {
    if range.start > range.end {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            tessera_err!("invalid byte range {}..{}", range.start, range.end),
        ));
    }
    let end = usize::try_from(range.end).unwrap_or(usize::MAX);
    if end > bytes.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            tessera_err!(
                "unexpected eof reading {}..{} from {} bytes",
                range.start,
                range.end,
                bytes.len()
            ),
        ));
    }
    // start <= end <= len, so start fits in usize too
    let start = usize::try_from(range.start).unwrap_or(end);
    Ok(bytes.slice(start..end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_read_within_bounds() {
        let data = Bytes::from_static(b"0123456789");
        assert_eq!(data.size().await.unwrap(), 10);
        assert_eq!(
            data.read_byte_range(2..5).await.unwrap(),
            Bytes::from_static(b"234")
        );
        assert!(data.read_byte_range(10..10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bytes_read_past_end() {
        let data = Bytes::from_static(b"0123456789");
        let err = data.read_byte_range(8..12).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn shared_reader_is_object_safe() {
        let data: Arc<dyn ReadAt> = Arc::new(Bytes::from_static(b"abcdef"));
        assert_eq!(
            data.read_byte_range(4..6).await.unwrap(),
            Bytes::from_static(b"ef")
        );
    }
}
