//! Playback sessions: audio I/O, the frame loop and the session controller.
//!
//! - [`FrameSource`] / [`FrameSink`]: per-session audio endpoints, opened
//!   through a [`SessionIo`] factory.
//! - [`FramePipeline`]: reads a frame into the audio region, runs the
//!   [`SignalEngine`](crate::dsp::SignalEngine), writes the result and
//!   reports statistics.
//! - [`SessionController`]: starts one pipeline session at a time on its own
//!   thread and re-arms it when playback loops.

#[cfg(feature = "alsa")]
mod alsa;
mod controller;
mod frame;
mod io;
#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "alsa")]
pub use alsa::AlsaSink;
pub use controller::{SessionController, SessionState};
pub use frame::{
    FramePipeline, PipelineOptions, SessionOutcome, SessionReport, mean_amplitude,
};
pub use io::{
    ConfiguredIo, FrameSink, FrameSource, NullSink, OutputTarget, SessionIo, WavSink, WavSource,
};
