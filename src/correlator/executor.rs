//! Local execution of tool calls pushed by the peer.
//!
//! The correlator answers every inbound `tool_call` with a `tool_result`.
//! Producing the result is the front end's job; the correlator only routes
//! it back. [`ToolExecutor`] is that seam.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::models::envelope::{ToolCall, ToolResult};

/// Produces results for peer-initiated tool calls.
pub trait ToolExecutor: Send + Sync {
    /// Run `call` and report its outcome.
    ///
    /// Failures are expressed in the returned [`ToolResult`]
    /// (`success: false`), never as a Rust error: the peer always gets an
    /// answer.
    fn execute<'a>(
        &'a self,
        call: &'a ToolCall,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;
}

/// Placeholder executor: waits a fixed delay, then reports success.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedExecutor {
    delay: Duration,
}

impl SimulatedExecutor {
    /// Create an executor answering after `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ToolExecutor for SimulatedExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a ToolCall,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            debug!(
                tool_func = %call.tool_func,
                thread_id = %call.thread_id,
                "simulated tool execution finished"
            );
            ToolResult {
                success: true,
                message: format!("simulated execution: {}", call.tool_func),
            }
        })
    }
}
