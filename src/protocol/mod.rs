//! Wire protocol: message records and the length-prefixed frame codec.
//!
//! Provides:
//! - [`Request`], [`Response`], [`BatchReq`], [`BatchResp`] - the batch RPC
//!   records
//! - [`Frame`] - the envelope exchanged on a stream
//! - [`FrameCodec`] / [`FramedStream`] - framing over any async byte stream

mod framing;
mod message;

pub use framing::{encode_frame, FrameCodec, FramedStream, LEN_PREFIX_SIZE};
pub use message::{BatchReq, BatchResp, Frame, Request, Response, MSG_OK};
