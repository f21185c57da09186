use std::fs::File;
use std::io;
use std::ops::{Deref, Range};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{ReadAt, WriteSink};

pub struct TokioAdapter<IO>(pub IO);

impl<W: AsyncWrite + Unpin + Send> WriteSink for TokioAdapter<W> {
    fn write_all(&mut self, buffer: Bytes) -> BoxFuture<'_, io::Result<()>> {
        async move { self.0.write_all(&buffer).await }.boxed()
    }

    fn flush(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.0.flush().boxed()
    }

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.0.shutdown().boxed()
    }
}

/// A cheaply cloneable, readonly file.
///
/// We use this because the builtin tokio `File` type is not `Clone` and
/// also does not implement a `read_exact_at` operation.
#[derive(Debug, Clone)]
pub struct TokioFile(Arc<File>);

impl TokioFile {
    /// Open a file on the current file system.
    ///
    /// The `TokioFile` takes ownership of the file descriptor, and can be cloned
    /// many times without opening a new file descriptor. When the last instance
    /// of the `TokioFile` is dropped, the file descriptor is closed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::open(path)?;

        Ok(Self(Arc::new(f)))
    }
}

// Implement deref coercion for non-mut `File` methods on `TokioFile`.
impl Deref for TokioFile {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ReadAt for TokioFile {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<Bytes>> {
        let len = match range
            .end
            .checked_sub(range.start)
            .and_then(|len| usize::try_from(len).ok())
        {
            Some(len) => len,
            None => {
                return futures::future::ready(Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid byte range {}..{}", range.start, range.end),
                )))
                .boxed();
            }
        };

        let mut buffer = BytesMut::zeroed(len);
        let result = self
            .read_exact_at(&mut buffer, range.start)
            .map(|()| buffer.freeze());
        futures::future::ready(result).boxed()
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        let this = self.clone();

        async move { this.metadata().map(|metadata| metadata.len()) }.boxed()
    }
}

impl WriteSink for tokio::fs::File {
    fn write_all(&mut self, buffer: Bytes) -> BoxFuture<'_, io::Result<()>> {
        async move { AsyncWriteExt::write_all(self, &buffer).await }.boxed()
    }

    fn flush(&mut self) -> BoxFuture<'_, io::Result<()>> {
        AsyncWriteExt::flush(self).boxed()
    }

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>> {
        AsyncWriteExt::shutdown(self).boxed()
    }
}
