//! Numeric metrics using metrics-rs.

use metrics::{Counter, Gauge, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

use super::FrameSample;
use crate::dsp::ProcessingMode;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const FRAMES_PROCESSED: &str = "dsp_offload_frames_processed";
const FRAMES_DROPPED: &str = "dsp_offload_frames_dropped";
const SESSIONS_STARTED: &str = "dsp_offload_sessions_started";
const FRAME_LATENCY_MS: &str = "dsp_offload_frame_latency_ms";
const FRAME_AMPLITUDE: &str = "dsp_offload_frame_amplitude";
const CPU_LOAD: &str = "dsp_offload_cpu_load_percent";
const DSP_LOAD: &str = "dsp_offload_dsp_load";
const TELEMETRY_DROPPED: &str = "dsp_offload_telemetry_dropped";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(FRAMES_PROCESSED, Unit::Count, "Frames processed and written");
    metrics::describe_counter!(
        FRAMES_DROPPED,
        Unit::Count,
        "Frames abandoned after a transient fault"
    );
    metrics::describe_counter!(SESSIONS_STARTED, Unit::Count, "Playback sessions started");
    metrics::describe_histogram!(
        FRAME_LATENCY_MS,
        Unit::Milliseconds,
        "Time spent in the signal engine per frame"
    );
    metrics::describe_gauge!(FRAME_AMPLITUDE, "Mean absolute sample value of the last frame");
    metrics::describe_gauge!(CPU_LOAD, Unit::Percent, "Host CPU load");
    metrics::describe_gauge!(DSP_LOAD, "Load figure reported by the remote core");
    metrics::describe_counter!(
        TELEMETRY_DROPPED,
        Unit::Count,
        "Telemetry lines dropped on a full transport queue"
    );
}

/// Record a telemetry line dropped on a full queue.
#[inline]
pub fn record_telemetry_dropped() {
    counter!(TELEMETRY_DROPPED).increment(1);
}

/// Metric handles for one playback session, labelled by mode.
#[derive(Clone)]
pub struct SessionMetrics {
    processed: Counter,
    dropped: Counter,
    latency: Histogram,
    amplitude: Gauge,
    cpu_load: Gauge,
    dsp_load: Gauge,
}

impl SessionMetrics {
    /// Register handles and count the session start.
    pub fn new(mode: ProcessingMode) -> Self {
        let label = mode.label();
        counter!(SESSIONS_STARTED, "mode" => label).increment(1);
        Self {
            processed: counter!(FRAMES_PROCESSED, "mode" => label),
            dropped: counter!(FRAMES_DROPPED, "mode" => label),
            latency: histogram!(FRAME_LATENCY_MS, "mode" => label),
            amplitude: gauge!(FRAME_AMPLITUDE, "mode" => label),
            cpu_load: gauge!(CPU_LOAD),
            dsp_load: gauge!(DSP_LOAD),
        }
    }

    /// Record a completed frame.
    #[inline]
    pub fn record_frame(&self, sample: &FrameSample) {
        self.processed.increment(1);
        self.latency.record(sample.latency_ms);
        self.amplitude.set(sample.amplitude);
        self.cpu_load.set(sample.cpu_load);
        self.dsp_load.set(sample.dsp_load);
    }

    /// Record an abandoned frame.
    #[inline]
    pub fn record_drop(&self) {
        self.dropped.increment(1);
    }
}

impl std::fmt::Debug for SessionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
        assert!(METRICS_INITIALIZED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_session_metrics_without_recorder() {
        let m = SessionMetrics::new(ProcessingMode::Remote);
        m.record_frame(&FrameSample::default());
        m.record_drop();
        record_telemetry_dropped();
    }
}
