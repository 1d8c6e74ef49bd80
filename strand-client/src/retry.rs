//! Retry policies for `FLOOD_WAIT` answers.
//!
//! The event loop consults the configured [`RetryPolicy`] whenever the server
//! answers a request with an RPC error. Only the failing request is delayed;
//! everything else keeps flowing.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::InvocationError;

/// Controls how the client reacts when an RPC call fails.
pub trait RetryPolicy: Send + Sync + 'static {
    /// `Continue(delay)` resends the request after `delay`; `Break` hands
    /// the error to the caller.
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`RetryPolicy::should_retry`] on each failure.
pub struct RetryContext {
    pub fail_count:   NonZeroU32,
    pub slept_so_far: Duration,
    pub error:        InvocationError,
}

/// Never retry.
pub struct NoRetries;
impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Sleep through one FLOOD_WAIT no longer than `threshold`, then resend.
pub struct AutoSleep {
    pub threshold: Duration,
}

impl Default for AutoSleep {
    fn default() -> Self {
        Self { threshold: Duration::from_secs(60) }
    }
}

impl RetryPolicy for AutoSleep {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        if let Some(secs) = ctx.error.flood_wait_seconds() {
            if ctx.fail_count.get() == 1 && secs <= self.threshold.as_secs() {
                tracing::info!("[strand] FLOOD_WAIT_{secs}: sleeping before retry");
                return ControlFlow::Continue(Duration::from_secs(secs));
            }
        }
        ControlFlow::Break(())
    }
}
