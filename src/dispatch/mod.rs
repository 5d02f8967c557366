//! Command dispatch: registry, typed handler adapters, call context.
//!
//! Provides:
//! - [`Dispatcher`] - maps command strings to handlers and produces a
//!   [`Response`](crate::protocol::Response) for every request
//! - [`CallContext`] - deadline-bearing context handed to handlers
//!
//! # Example
//!
//! ```
//! use vrpc::dispatch::Dispatcher;
//!
//! let dispatcher = Dispatcher::default()
//!     .handle("/upper", |_ctx, word: String| async move {
//!         Ok(word.to_uppercase())
//!     })
//!     .handle_noarg("/health", |_ctx| async move { Ok("up") });
//! ```

mod context;
mod registry;

pub use context::CallContext;
pub use registry::{Dispatcher, HandlerError};
