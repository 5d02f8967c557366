//! Length-prefixed frame codec.
//!
//! Wire format: a 4-byte big-endian length prefix followed by the
//! MessagePack-encoded [`Frame`]:
//!
//! ```text
//! ┌───────────┬──────────────────────┐
//! │ Length    │ Frame (MessagePack)  │
//! │ 4 bytes   │ `length` bytes       │
//! │ uint32 BE │                      │
//! └───────────┴──────────────────────┘
//! ```
//!
//! [`FrameCodec`] is a push-based state machine for the read side: feed it
//! whatever the socket produced and it yields every complete frame, keeping
//! partial data buffered for the next push. [`FramedStream`] pairs the codec
//! with any async byte stream.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::message::Frame;
use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{Result, VrpcError};

/// Length prefix size in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Read buffer size for [`FramedStream::recv`].
const READ_BUF_SIZE: usize = 64 * 1024;

/// Encode a frame into a length-prefixed byte vector.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    // to_vec_named keeps struct fields self-describing on the wire, so
    // both sides can evolve their record types independently.
    let body = rmp_serde::to_vec_named(frame)?;
    let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Prefix parsed, waiting for the body.
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameCodec {
    buffer: BytesMut,
    state: State,
    max_frame_size: u32,
}

impl FrameCodec {
    /// Create a codec with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_BUF_SIZE),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Fragmented data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame announces a body larger than the
    /// configured maximum, or if a body fails to decode.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForLength => {
                if self.buffer.len() < LEN_PREFIX_SIZE {
                    return Ok(None);
                }

                let len = u32::from_be_bytes([
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ]);
                if len > self.max_frame_size {
                    return Err(VrpcError::Protocol(format!(
                        "frame size {} exceeds maximum {}",
                        len, self.max_frame_size
                    )));
                }

                let _ = self.buffer.split_to(LEN_PREFIX_SIZE);
                self.state = State::WaitingForBody { remaining: len };
                self.try_extract_one()
            }

            State::WaitingForBody { remaining } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining);
                self.state = State::WaitingForLength;

                let frame: Frame = rmp_serde::from_slice(&body)?;
                Ok(Some(frame))
            }
        }
    }

    /// Number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame-oriented wrapper over any async byte stream.
///
/// The core works over any bidirectional, ordered, reliable stream: TCP,
/// vsock, or an in-memory duplex in tests.
pub struct FramedStream<S> {
    io: S,
    codec: FrameCodec,
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Wrap a stream with the default maximum frame size.
    pub fn new(io: S) -> Self {
        Self::with_max_frame_size(io, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wrap a stream with a custom maximum frame size.
    pub fn with_max_frame_size(io: S, max_frame_size: u32) -> Self {
        Self {
            io,
            codec: FrameCodec::with_max_frame_size(max_frame_size),
            pending: VecDeque::new(),
            read_buf: vec![0u8; READ_BUF_SIZE],
        }
    }

    /// Encode and send one frame, flushing the stream.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        self.io.write_all(&bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Receive the next frame.
    ///
    /// # Errors
    ///
    /// [`VrpcError::ConnectionClosed`] once the peer shuts the stream down.
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let n = self.io.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(VrpcError::ConnectionClosed);
            }
            let frames = self.codec.push(&self.read_buf[..n])?;
            self.pending.extend(frames);
        }
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{BatchReq, BatchResp, Request, Response};
    use bytes::Bytes;

    fn batch_frame(commands: &[&str]) -> Frame {
        Frame::Batch(BatchReq {
            requests: commands
                .iter()
                .map(|c| Request::new(*c, Bytes::from_static(b"{}")))
                .collect(),
        })
    }

    #[test]
    fn test_single_complete_frame() {
        let mut codec = FrameCodec::new();
        let frame = batch_frame(&["/echo"]);
        let bytes = encode_frame(&frame).unwrap();

        let frames = codec.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], frame);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut codec = FrameCodec::new();
        let f1 = batch_frame(&["/a"]);
        let f2 = Frame::Ping;
        let f3 = Frame::Reply(BatchResp { responses: vec![Response::ok_empty()] });

        let mut combined = Vec::new();
        combined.extend(encode_frame(&f1).unwrap());
        combined.extend(encode_frame(&f2).unwrap());
        combined.extend(encode_frame(&f3).unwrap());

        let frames = codec.push(&combined).unwrap();

        assert_eq!(frames, vec![f1, f2, f3]);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut codec = FrameCodec::new();
        let bytes = encode_frame(&Frame::Pong).unwrap();

        let frames = codec.push(&bytes[..2]).unwrap();
        assert!(frames.is_empty());

        let frames = codec.push(&bytes[2..]).unwrap();
        assert_eq!(frames, vec![Frame::Pong]);
    }

    #[test]
    fn test_fragmented_body() {
        let mut codec = FrameCodec::new();
        let frame = batch_frame(&["/echo", "/stats", "/echo"]);
        let bytes = encode_frame(&frame).unwrap();

        let split = LEN_PREFIX_SIZE + 3;
        assert!(codec.push(&bytes[..split]).unwrap().is_empty());

        let frames = codec.push(&bytes[split..]).unwrap();
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut codec = FrameCodec::new();
        let frame = batch_frame(&["/echo"]);
        let bytes = encode_frame(&frame).unwrap();

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(codec.push(&[*byte]).unwrap());
        }

        assert_eq!(all, vec![frame]);
    }

    #[test]
    fn test_max_frame_size_rejected() {
        let mut codec = FrameCodec::with_max_frame_size(16);
        let frame = batch_frame(&["/a-command-longer-than-sixteen-bytes"]);
        let bytes = encode_frame(&frame).unwrap();

        let err = codec.push(&bytes).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_payload_bytes_survive_roundtrip() {
        let mut codec = FrameCodec::new();
        let payload = Bytes::from(vec![0u8, 159, 146, 150, 255]);
        let frame = Frame::Batch(BatchReq {
            requests: vec![Request::new("/bin", payload.clone())],
        });

        let frames = codec.push(&encode_frame(&frame).unwrap()).unwrap();

        match &frames[0] {
            Frame::Batch(b) => assert_eq!(b.requests[0].payload, payload),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_framed_stream_duplex_roundtrip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = FramedStream::new(a);
        let mut right = FramedStream::new(b);

        let frame = batch_frame(&["/echo", "/echo"]);
        left.send(&frame).await.unwrap();
        left.send(&Frame::Ping).await.unwrap();

        assert_eq!(right.recv().await.unwrap(), frame);
        assert_eq!(right.recv().await.unwrap(), Frame::Ping);
    }

    #[tokio::test]
    async fn test_framed_stream_eof() {
        let (a, b) = tokio::io::duplex(1024);
        let mut right = FramedStream::new(b);
        drop(a);

        match right.recv().await {
            Err(VrpcError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }
}
