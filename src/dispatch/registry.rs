//! Command registry mapping command strings to typed handlers.
//!
//! Handlers are async closures taking a [`CallContext`] and, depending on
//! the registration method, a decoded JSON argument. The adapter decodes
//! the request payload before calling the closure and encodes the result
//! after, so the closure only ever sees its own types:
//!
//! ```
//! use vrpc::dispatch::Dispatcher;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Default)]
//! struct Req { xid: String }
//!
//! #[derive(Serialize)]
//! struct Resp { dix: String }
//!
//! let dispatcher = Dispatcher::default().handle("/echo", |_ctx, req: Req| async move {
//!     Ok(Resp { dix: req.xid.chars().rev().collect() })
//! });
//! ```
//!
//! The registration shape rules of this protocol (context first, one
//! optional argument, error-typed result) are carried by the adapter
//! signatures, so a handler of the wrong shape is a compile error rather
//! than a startup panic.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::CallContext;
use crate::config::{DEFAULT_DISPATCH_TIMEOUT, DEFAULT_ERR_CODE};
use crate::protocol::Response;

/// Error type handlers may return; the text becomes the response message.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future for handler results.
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which step of a call went wrong; decides the response message prefix.
enum HandlerFailure {
    Parse(serde_json::Error),
    Handler(HandlerError),
    Encode(serde_json::Error),
}

type HandlerOutcome = Result<Option<Vec<u8>>, HandlerFailure>;

/// Object-safe handler interface stored in the registry.
trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: CallContext, payload: Bytes) -> BoxFuture<'static, HandlerOutcome>;
}

/// Encode a handler's success value as the response payload.
///
/// A value that encodes to JSON `null` (unit, `None`) means "no payload".
fn encode_reply<R: Serialize>(reply: &R) -> HandlerOutcome {
    let buf = serde_json::to_vec(reply).map_err(HandlerFailure::Encode)?;
    if buf.as_slice() == b"null" {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}

/// Adapter for handlers taking a decoded argument by value.
///
/// An empty request payload decodes to `A::default()`.
struct ValueHandler<F, A, R, Fut> {
    f: F,
    _phantom: PhantomData<fn(A) -> (R, Fut)>,
}

impl<F, A, R, Fut> Handler for ValueHandler<F, A, R, Fut>
where
    F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Default + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, ctx: CallContext, payload: Bytes) -> BoxFuture<'static, HandlerOutcome> {
        let arg: A = if payload.is_empty() {
            A::default()
        } else {
            match serde_json::from_slice(&payload) {
                Ok(v) => v,
                Err(e) => return Box::pin(async move { Err(HandlerFailure::Parse(e)) }),
            }
        };
        let fut = (self.f)(ctx, arg);
        Box::pin(async move {
            let reply = fut.await.map_err(HandlerFailure::Handler)?;
            encode_reply(&reply)
        })
    }
}

/// Adapter for handlers taking an optional argument.
///
/// An empty request payload is observed as `None`.
struct OptionHandler<F, A, R, Fut> {
    f: F,
    _phantom: PhantomData<fn(A) -> (R, Fut)>,
}

impl<F, A, R, Fut> Handler for OptionHandler<F, A, R, Fut>
where
    F: Fn(CallContext, Option<A>) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, ctx: CallContext, payload: Bytes) -> BoxFuture<'static, HandlerOutcome> {
        let arg: Option<A> = if payload.is_empty() {
            None
        } else {
            match serde_json::from_slice(&payload) {
                Ok(v) => v,
                Err(e) => return Box::pin(async move { Err(HandlerFailure::Parse(e)) }),
            }
        };
        let fut = (self.f)(ctx, arg);
        Box::pin(async move {
            let reply = fut.await.map_err(HandlerFailure::Handler)?;
            encode_reply(&reply)
        })
    }
}

/// Adapter for context-only handlers; the request payload is ignored.
struct NoArgHandler<F, R, Fut> {
    f: F,
    _phantom: PhantomData<fn() -> (R, Fut)>,
}

impl<F, R, Fut> Handler for NoArgHandler<F, R, Fut>
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, ctx: CallContext, _payload: Bytes) -> BoxFuture<'static, HandlerOutcome> {
        let fut = (self.f)(ctx);
        Box::pin(async move {
            let reply = fut.await.map_err(HandlerFailure::Handler)?;
            encode_reply(&reply)
        })
    }
}

/// Routes each request of a batch to its registered handler.
///
/// Built once at startup, read-only while serving. The error code is the
/// single source of truth for every failure response this dispatcher
/// produces.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
    err_code: u32,
    timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with the given failure code and per-call
    /// deadline.
    pub fn new(err_code: u32, timeout: Duration) -> Self {
        Self { handlers: HashMap::new(), err_code, timeout }
    }

    /// Register a handler taking a decoded argument by value.
    ///
    /// An empty request payload is decoded as `A::default()`. Returning a
    /// value that encodes to JSON `null` produces a response with no
    /// payload.
    pub fn handle<F, A, R, Fut>(mut self, command: &str, f: F) -> Self
    where
        F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.handlers
            .insert(command.to_string(), Arc::new(ValueHandler { f, _phantom: PhantomData }));
        self
    }

    /// Register a handler taking an optional argument.
    ///
    /// An empty request payload is observed as `None`, mirroring protocols
    /// that pass a null reference for a missing body.
    pub fn handle_opt<F, A, R, Fut>(mut self, command: &str, f: F) -> Self
    where
        F: Fn(CallContext, Option<A>) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.handlers
            .insert(command.to_string(), Arc::new(OptionHandler { f, _phantom: PhantomData }));
        self
    }

    /// Register a context-only handler; the request payload is ignored.
    pub fn handle_noarg<F, R, Fut>(mut self, command: &str, f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.handlers
            .insert(command.to_string(), Arc::new(NoArgHandler { f, _phantom: PhantomData }));
        self
    }

    /// The failure code this dispatcher stamps on error responses.
    #[inline]
    pub fn err_code(&self) -> u32 {
        self.err_code
    }

    /// Whether a command is registered.
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Route one request to its handler and produce its response.
    ///
    /// Never fails outward: every failure mode becomes a response with the
    /// configured error code.
    pub async fn dispatch(&self, command: &str, payload: Bytes) -> Response {
        let Some(handler) = self.handlers.get(command) else {
            return Response::failure(self.err_code, format!("command [{}] not found", command));
        };

        let ctx = CallContext::new(command, Instant::now() + self.timeout);
        let outcome = tokio::time::timeout(self.timeout, handler.call(ctx, payload)).await;

        match outcome {
            Err(_) => Response::failure(
                self.err_code,
                format!("handler err: deadline exceeded after {:?}", self.timeout),
            ),
            Ok(Err(HandlerFailure::Parse(e))) => {
                Response::failure(self.err_code, format!("parse request err: {}", e))
            }
            Ok(Err(HandlerFailure::Handler(e))) => {
                Response::failure(self.err_code, format!("handler err: {}", e))
            }
            Ok(Err(HandlerFailure::Encode(e))) => {
                Response::failure(self.err_code, format!("marshal err: {}", e))
            }
            Ok(Ok(None)) => Response::ok_empty(),
            Ok(Ok(Some(buf))) => Response::ok(buf),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ERR_CODE, DEFAULT_DISPATCH_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct TestRequest {
        name: String,
        age: u32,
    }

    #[derive(Debug, Serialize)]
    struct TestResponse {
        message: String,
        status: String,
    }

    fn test_dispatcher() -> Dispatcher {
        Dispatcher::new(10005, Duration::from_secs(1))
            .handle("/req_resp", |_ctx, req: TestRequest| async move {
                if req.name == "error" {
                    return Err("test error".into());
                }
                Ok(TestResponse {
                    message: format!("Hello {}, age {}", req.name, req.age),
                    status: "success".to_string(),
                })
            })
            .handle_opt("/maybe", |_ctx, req: Option<TestRequest>| async move {
                Ok(req.map(|r| r.name))
            })
            .handle_noarg("/touch", |_ctx| async move { Ok(()) })
            .handle("/check", |_ctx, input: String| async move {
                if input.len() > 10 {
                    return Err("input too long".into());
                }
                Ok(true)
            })
    }

    #[tokio::test]
    async fn test_successful_request_with_response() {
        let d = test_dispatcher();
        let resp = d
            .dispatch("/req_resp", Bytes::from_static(br#"{"name":"John","age":30}"#))
            .await;

        assert_eq!(resp.code, 0);
        assert_eq!(resp.message, "ok");
        let body: serde_json::Value = serde_json::from_slice(&resp.payload).unwrap();
        assert_eq!(body["message"], "Hello John, age 30");
        assert_eq!(body["status"], "success");
    }

    #[tokio::test]
    async fn test_command_not_found() {
        let d = test_dispatcher();
        let resp = d.dispatch("/nonexistent", Bytes::new()).await;

        assert_eq!(resp.code, 10005);
        assert!(resp.message.contains("command [/nonexistent] not found"));
        assert!(resp.payload.is_empty());
    }

    #[tokio::test]
    async fn test_handler_error() {
        let d = test_dispatcher();
        let resp = d
            .dispatch("/req_resp", Bytes::from_static(br#"{"name":"error","age":25}"#))
            .await;

        assert_eq!(resp.code, 10005);
        assert!(resp.message.contains("handler err: test error"));
        assert!(resp.payload.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_payload() {
        let d = test_dispatcher();
        let resp = d
            .dispatch("/req_resp", Bytes::from_static(br#"{"name":"John","age":}"#))
            .await;

        assert_eq!(resp.code, 10005);
        assert!(resp.message.contains("parse request err"));
    }

    #[tokio::test]
    async fn test_empty_payload_decodes_to_default() {
        let d = test_dispatcher();
        let resp = d.dispatch("/req_resp", Bytes::new()).await;

        assert_eq!(resp.code, 0);
        let body: serde_json::Value = serde_json::from_slice(&resp.payload).unwrap();
        assert_eq!(body["message"], "Hello , age 0");
    }

    #[tokio::test]
    async fn test_empty_payload_observed_as_none() {
        let d = test_dispatcher();
        let resp = d.dispatch("/maybe", Bytes::new()).await;

        // None encodes to null, which means "no payload".
        assert_eq!(resp.code, 0);
        assert!(resp.payload.is_empty());
    }

    #[tokio::test]
    async fn test_option_handler_with_body() {
        let d = test_dispatcher();
        let resp = d
            .dispatch("/maybe", Bytes::from_static(br#"{"name":"Ada","age":36}"#))
            .await;

        assert_eq!(resp.code, 0);
        assert_eq!(&resp.payload[..], br#""Ada""#);
    }

    #[tokio::test]
    async fn test_noarg_handler_unit_reply_has_no_payload() {
        let d = test_dispatcher();
        let resp = d.dispatch("/touch", Bytes::new()).await;

        assert_eq!(resp.code, 0);
        assert_eq!(resp.message, "ok");
        assert!(resp.payload.is_empty());
    }

    #[tokio::test]
    async fn test_scalar_reply_encoded_as_json() {
        let d = test_dispatcher();
        let resp = d.dispatch("/check", Bytes::from_static(br#""short""#)).await;

        assert_eq!(resp.code, 0);
        assert_eq!(&resp.payload[..], b"true");
    }

    #[tokio::test]
    async fn test_scalar_handler_failure() {
        let d = test_dispatcher();
        let resp = d
            .dispatch("/check", Bytes::from_static(br#""a very very very long message""#))
            .await;

        assert_eq!(resp.code, 10005);
        assert!(resp.message.contains("input too long"));
    }

    #[tokio::test]
    async fn test_deadline_enforced() {
        let d = Dispatcher::new(10005, Duration::from_millis(20)).handle_noarg(
            "/slow",
            |_ctx| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        );

        let resp = d.dispatch("/slow", Bytes::new()).await;

        assert_eq!(resp.code, 10005);
        assert!(resp.message.contains("handler err: deadline exceeded"));
    }

    #[tokio::test]
    async fn test_context_carries_command_and_deadline() {
        let d = Dispatcher::new(10005, Duration::from_secs(1)).handle_noarg(
            "/inspect",
            |ctx| async move {
                assert_eq!(ctx.command(), "/inspect");
                assert!(ctx.remaining() <= Duration::from_secs(1));
                assert!(ctx.remaining() > Duration::ZERO);
                Ok(())
            },
        );

        let resp = d.dispatch("/inspect", Bytes::new()).await;
        assert_eq!(resp.code, 0);
    }

    #[tokio::test]
    async fn test_configured_code_is_authoritative() {
        let d = Dispatcher::new(42, Duration::from_secs(1));
        let resp = d.dispatch("/missing", Bytes::new()).await;
        assert_eq!(resp.code, 42);
    }

    #[test]
    fn test_contains() {
        let d = test_dispatcher();
        assert!(d.contains("/req_resp"));
        assert!(!d.contains("/nope"));
    }
}
