use super::error::PeerError;
use super::message::{Handshake, Message};
use crate::bandwidth::BandwidthLimiter;
use crate::constants::READ_BUFFER_SIZE;
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    Message(Message),
}

impl Frame {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Handshake(handshake) => handshake.encode_into(buf),
            Frame::Message(message) => message.encode_into(buf),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Handshake(_) => "handshake",
            Frame::Message(message) => message.name(),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Message(message)
    }
}

impl From<Handshake> for Frame {
    fn from(handshake: Handshake) -> Self {
        Frame::Handshake(handshake)
    }
}

/// Reads frames from a byte stream.
///
/// After the first handshake, bytes that cannot start a frame are skipped
/// one at a time until the stream lines up again. Piece payloads are
/// slices of the read buffer.
pub struct FrameReader<R> {
    reader: R,
    read_buf: BytesMut,
    limiter: Arc<BandwidthLimiter>,
    awaiting_handshake: bool,
    skipped: usize,
    bytes_read: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, limiter: Arc<BandwidthLimiter>) -> Self {
        Self {
            reader,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            limiter,
            awaiting_handshake: true,
            skipped: 0,
            bytes_read: 0,
        }
    }

    /// For streams whose handshake was already consumed elsewhere.
    pub fn without_handshake(mut self) -> Self {
        self.awaiting_handshake = false;
        self
    }

    /// Waits for the next complete frame.
    ///
    /// Bytes that cannot be framed before the first handshake end the
    /// stream with `InvalidHandshake`; after it they are skipped.
    pub async fn read_frame(&mut self) -> Result<Frame, PeerError> {
        loop {
            if let Some(frame) = self.decode_next()? {
                return Ok(frame);
            }

            self.read_buf.reserve(READ_BUFFER_SIZE);
            let n = self.reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
            self.bytes_read += n;
            self.limiter.acquire_read(n).await;
        }
    }

    /// Bytes skipped while resynchronising since the last call.
    pub fn take_skipped(&mut self) -> usize {
        std::mem::take(&mut self.skipped)
    }

    /// Bytes read from the stream since the last call.
    pub fn take_bytes_read(&mut self) -> usize {
        std::mem::take(&mut self.bytes_read)
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, PeerError> {
        loop {
            if self.read_buf.is_empty() {
                return Ok(None);
            }

            match self.try_decode() {
                Ok(frame) => return Ok(frame),
                Err(e) if self.awaiting_handshake => {
                    return Err(match e {
                        PeerError::InvalidHandshake(_) => e,
                        other => PeerError::InvalidHandshake(other.to_string()),
                    });
                }
                Err(e) => {
                    tracing::trace!("skipping byte: {}", e);
                    self.read_buf.advance(1);
                    self.skipped += 1;
                }
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<Frame>, PeerError> {
        if self.awaiting_handshake {
            // A zero first byte is a length prefix, not a protocol name
            // length. The message is passed on so the session can reject
            // it. Any other protocol name is accepted here for the same
            // reason.
            if self.read_buf[0] == 0 {
                return self.decode_message();
            }
            return self.decode_handshake();
        }

        if Handshake::looks_like(&self.read_buf) {
            return self.decode_handshake();
        }
        self.decode_message()
    }

    fn decode_handshake(&mut self) -> Result<Option<Frame>, PeerError> {
        let Some(len) = Handshake::frame_len(&self.read_buf) else {
            return Ok(None);
        };
        let handshake = Handshake::decode(&self.read_buf[..len])?;
        self.read_buf.advance(len);
        self.awaiting_handshake = false;
        Ok(Some(Frame::Handshake(handshake)))
    }

    fn decode_message(&mut self) -> Result<Option<Frame>, PeerError> {
        let Some(len) = Message::frame_len(&self.read_buf)? else {
            return Ok(None);
        };
        let data = self.read_buf.split_to(len).freeze();
        Message::decode(data).map(|m| Some(Frame::Message(m)))
    }
}

/// Writes batches of frames to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
    write_buf: BytesMut,
    limiter: Arc<BandwidthLimiter>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, limiter: Arc<BandwidthLimiter>) -> Self {
        Self {
            writer,
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            limiter,
        }
    }

    /// Encodes `frames` back to back and writes them in one go.
    ///
    /// Returns the number of bytes written.
    pub async fn send(&mut self, frames: &[Frame]) -> Result<usize, PeerError> {
        self.write_buf.clear();
        for frame in frames {
            frame.encode_into(&mut self.write_buf);
        }

        let n = self.write_buf.len();
        if n == 0 {
            return Ok(0);
        }

        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        self.limiter.acquire_write(n).await;
        Ok(n)
    }

    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
