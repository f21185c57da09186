use std::io;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;

/// An append-only, asynchronous byte sink.
///
/// Writers only ever append: nothing written is revisited, so sinks backed by object stores or
/// pipes work as well as local files.
pub trait WriteSink: Send {
    /// Append the whole buffer to the sink.
    fn write_all(&mut self, buffer: Bytes) -> BoxFuture<'_, io::Result<()>>;

    fn flush(&mut self) -> BoxFuture<'_, io::Result<()>>;

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

impl WriteSink for Vec<u8> {
    fn write_all(&mut self, buffer: Bytes) -> BoxFuture<'_, io::Result<()>> {
        self.extend_from_slice(&buffer);
        futures::future::ready(Ok(())).boxed()
    }

    fn flush(&mut self) -> BoxFuture<'_, io::Result<()>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>> {
        futures::future::ready(Ok(())).boxed()
    }
}

impl<W: WriteSink + ?Sized> WriteSink for &mut W {
    fn write_all(&mut self, buffer: Bytes) -> BoxFuture<'_, io::Result<()>> {
        (*self).write_all(buffer)
    }

    fn flush(&mut self) -> BoxFuture<'_, io::Result<()>> {
        (*self).flush()
    }

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>> {
        (*self).shutdown()
    }
}

impl<W: WriteSink + ?Sized> WriteSink for Box<W> {
    fn write_all(&mut self, buffer: Bytes) -> BoxFuture<'_, io::Result<()>> {
        W::write_all(self, buffer)
    }

    fn flush(&mut self) -> BoxFuture<'_, io::Result<()>> {
        W::flush(self)
    }

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>> {
        W::shutdown(self)
    }
}
