use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::resp::{self, Frame};

/// Read half of a connection: buffers socket bytes and cuts them into frames.
///
/// Reading is cancel safe: bytes are only removed from the buffer once a
/// whole frame has been parsed, so it can sit inside `select!`.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Reads the next frame and the exact number of bytes it occupied.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<(Frame, usize)>, ProtocolError> {
        loop {
            if let Some((frame, used)) = Frame::parse(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(Some((frame, used)));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Reads and discards a `$<len>\r\n<bytes>` snapshot, returning its payload length.
    pub async fn read_snapshot(&mut self) -> Result<Option<usize>, ProtocolError> {
        loop {
            if let Some((len, used)) = resp::parse_snapshot(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(Some(len));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Pulls more bytes off the socket. `false` on a clean close at a frame boundary.
    async fn fill(&mut self) -> Result<bool, ProtocolError> {
        if self.reader.read_buf(&mut self.buffer).await? == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(true)
    }
}

/// Writes one reply as a single buffer and flushes it.
pub async fn write_reply<W>(writer: &mut W, reply: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(reply).await?;
    writer.flush().await
}
