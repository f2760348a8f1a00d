//! Logging facilities for sockline.
//!
//! sockline uses the `tracing` crate for instrumentation. The library never
//! installs a subscriber; to see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("sockline=debug")
//!         .init();
//! }
//! ```
//!
//! Every event is emitted under one of the [`targets`] so subsystems can be
//! filtered independently.

/// Span names used throughout sockline for tracing.
pub mod span_names {
    /// Connection supervision span (one per client).
    pub const SUPERVISOR: &str = "sockline::supervisor";
    /// Inbound read loop span (one per established connection).
    pub const READ_LOOP: &str = "sockline::read_loop";
    /// Outbound file transfer span.
    pub const FILE_SEND: &str = "sockline::file_send";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Signal/slot system target.
    pub const SIGNAL: &str = "sockline_core::signal";
    /// Connection manager and reconnector target.
    pub const CLIENT: &str = "sockline::client";
    /// Wire codec target.
    pub const CODEC: &str = "sockline::codec";
    /// File transfer engine target.
    pub const TRANSFER: &str = "sockline::transfer";
    /// Event dispatcher target.
    pub const EVENTS: &str = "sockline::events";
    /// Performance spans target.
    pub const PERF: &str = "sockline::perf";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// Useful for timing an operation with a subscriber that records span
/// durations.
#[derive(Debug)]
pub struct PerfSpan {
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation = name);
        Self {
            _span: span.entered(),
        }
    }
}
