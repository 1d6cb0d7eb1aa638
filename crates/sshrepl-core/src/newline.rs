//! Line-ending conversion for shell output.
//!
//! Remote terminals expect `\r\n`; evaluation engines write `\n`. Each write
//! is converted on its own: a `\r` at the end of one write followed by `\n`
//! at the start of the next still gains a second `\r`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::AsyncWrite;
use tokio::sync::watch;

use crate::constants::{CR, LF};

/// Rewrite every `\n` not preceded by `\r` in the same chunk into `\r\n`.
pub fn convert_newlines(chunk: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(chunk.len() + chunk.len() / 8);
    convert_into(chunk, &mut out);
    out
}

fn convert_into(chunk: &[u8], out: &mut BytesMut) {
    let mut last = 0;
    for (i, _) in chunk.iter().enumerate().filter(|(_, b)| **b == LF) {
        if i == 0 {
            out.extend_from_slice(&[CR]);
        } else if chunk[i - 1] != CR {
            out.extend_from_slice(&chunk[last..i]);
            out.extend_from_slice(&[CR]);
            last = i;
        }
    }
    out.extend_from_slice(&chunk[last..]);
}

/// Writer that converts line endings before forwarding to `inner`.
///
/// Also carries the live terminal width so an engine can lay out output.
pub struct NewlineWriter<W> {
    inner: W,
    pending: BytesMut,
    columns: watch::Receiver<u16>,
}

impl<W: AsyncWrite + Unpin> NewlineWriter<W> {
    pub fn new(inner: W, columns: watch::Receiver<u16>) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
            columns,
        }
    }

    /// Current terminal width in columns, 0 when no terminal is attached.
    pub fn columns(&self) -> u16 {
        *self.columns.borrow()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = match Pin::new(&mut self.inner).poll_write(cx, &self.pending) {
                Poll::Ready(Ok(n)) => n,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for NewlineWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // Earlier output must reach the channel before new output is accepted.
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }

        convert_into(buf, &mut this.pending);
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}
