//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};
use tracing_subscriber::EnvFilter;

use crate::dsp::ProcessingMode;

/// Install the fmt subscriber, filtered by `RUST_LOG` or `default_filter`.
///
/// Returns false if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Span covering one playback session.
#[inline]
pub fn span_session(session: u64, mode: ProcessingMode) -> Span {
    span!(Level::INFO, "session", id = session, mode = mode.label())
}

/// Span covering one frame.
#[inline]
pub fn span_frame(frame: u64) -> Span {
    span!(Level::TRACE, "frame", n = frame)
}
