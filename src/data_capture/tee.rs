//! Duplex tee over a proxied connection.
//!
//! [`DuplexTee`] is a drop-in `AsyncRead + AsyncWrite` substitute for the
//! wrapped stream. Bytes the downstream handler reads are mirrored into the
//! request capture, bytes it writes are mirrored into the response capture.
//! Data, ordering and error values seen by the caller are exactly those of
//! the wrapped stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::capture_stream::CaptureSink;

pub struct DuplexTee<S> {
    inner: S,
    request: CaptureSink,
    response: CaptureSink,
}

impl<S> DuplexTee<S> {
    pub fn new(inner: S, request: CaptureSink, response: CaptureSink) -> Self {
        Self {
            inner,
            request,
            response,
        }
    }

    /// Seals both directions. The response direction has no end-of-stream
    /// marker of its own, so this is the teardown signal for it.
    pub fn seal(&mut self) {
        self.request.close();
        self.response.close();
    }

    /// Whether the request direction is still being captured.
    pub fn request_open(&self) -> bool {
        self.request.is_open()
    }

    pub fn response_open(&self) -> bool {
        self.response.is_open()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DuplexTee<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                if !read.is_empty() {
                    this.request.mirror(read);
                } else if had_room {
                    this.request.close();
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DuplexTee<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.response.mirror(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
