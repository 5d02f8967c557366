//! Wire message records.
//!
//! A stream carries [`Frame`] envelopes in both directions. The host sends
//! `Batch` (and `Ping`); the enclave answers `Reply` (and `Pong`). Within a
//! batch, `responses[i]` is always the outcome of `requests[i]`.
//!
//! Application payloads are opaque to this layer; by convention they are
//! JSON, UTF-8, and a zero-length payload means "no body".

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Message for success responses.
pub const MSG_OK: &str = "ok";

/// A single application request: a command routing key plus an opaque
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Names a registered handler, URL-like by convention (e.g. `/echo`).
    pub command: String,
    /// Opaque payload bytes, may be empty.
    pub payload: Bytes,
}

impl Request {
    /// Create a new request.
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { command: command.into(), payload: payload.into() }
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// `0` means success; any other value is a failure.
    pub code: u32,
    /// `"ok"` on success, an error description otherwise.
    pub message: String,
    /// Opaque payload bytes, may be empty.
    pub payload: Bytes,
}

impl Response {
    /// Success response with a payload.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self { code: 0, message: MSG_OK.to_string(), payload: payload.into() }
    }

    /// Success response with no payload.
    pub fn ok_empty() -> Self {
        Self::ok(Bytes::new())
    }

    /// Failure response; the payload is always empty.
    pub fn failure(code: u32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), payload: Bytes::new() }
    }

    /// Whether this response is a success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// An ordered batch of requests, sent as one wire message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReq {
    pub requests: Vec<Request>,
}

/// The ordered outcomes of one [`BatchReq`].
///
/// Invariant: `responses.len() == requests.len()` of the batch it answers,
/// with positional correspondence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResp {
    pub responses: Vec<Response>,
}

/// The envelope exchanged on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Host → enclave: a batch of requests.
    Batch(BatchReq),
    /// Enclave → host: the responses for one batch.
    Reply(BatchResp),
    /// Host → enclave: keepalive probe.
    Ping,
    /// Enclave → host: keepalive answer.
    Pong,
}

impl Frame {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Batch(_) => "batch",
            Frame::Reply(_) => "reply",
            Frame::Ping => "ping",
            Frame::Pong => "pong",
        }
    }
}
