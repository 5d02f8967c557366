//! Per-call context passed to handlers.

use std::time::{Duration, Instant};

/// Context handed to every handler invocation.
///
/// Carries the command that routed here and the deadline the dispatcher
/// will enforce. Handlers doing their own slow I/O should check
/// [`remaining`](Self::remaining) and give up early; the dispatcher cuts
/// them off at the deadline either way.
#[derive(Debug, Clone)]
pub struct CallContext {
    command: String,
    deadline: Instant,
}

impl CallContext {
    pub(crate) fn new(command: impl Into<String>, deadline: Instant) -> Self {
        Self { command: command.into(), deadline }
    }

    /// The command string that selected this handler.
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The absolute deadline for this call.
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline; zero once it has passed.
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_accessors() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let ctx = CallContext::new("/echo", deadline);

        assert_eq!(ctx.command(), "/echo");
        assert_eq!(ctx.deadline(), deadline);
        assert!(ctx.remaining() <= Duration::from_secs(1));
    }

    #[test]
    fn test_remaining_saturates_at_zero() {
        let ctx = CallContext::new("/echo", Instant::now() - Duration::from_secs(1));
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
