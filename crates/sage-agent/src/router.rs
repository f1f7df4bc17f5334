//! Routing decision after each model step.

use sage_ai::Message;

/// Where the loop goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run the tool dispatch step
    Dispatch,
    /// Stop the loop
    Terminate,
}

/// Decide from the latest model message alone.
///
/// Dispatch if and only if it carries at least one tool call. A synthetic
/// failure message carries none, so it always terminates.
pub fn route(latest: &Message) -> Route {
    if latest.tool_calls().is_empty() {
        Route::Terminate
    } else {
        Route::Dispatch
    }
}
