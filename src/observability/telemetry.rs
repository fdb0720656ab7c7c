//! Text telemetry consumed by the host monitoring tools.
//!
//! The tools match these lines with regular expressions, so the formats are
//! fixed:
//!
//! ```text
//! Frame 12: AvgAmp=1834.27, Latency=0.41ms, Mode=CPU CPULoad=23.5% DSPLoad=0.0%
//! [Live Summary] Frames: 10
//! [Live Summary] Latency (ms): Min: 0.38, Max: 0.52, Avg: 0.43
//! [Live Summary] Amp: Min: 1201.10, Max: 2004.88, Avg: 1650.02
//! [Live Summary] CPU Load (%): Min: 20.1, Max: 31.0, Avg: 24.2
//! [Live Summary] DSP Load (%): Min: 0.0, Max: 0.0, Avg: 0.0
//! IWAVE0: 12,-40,311,
//! WAVE0: 11,-38,305,
//! ```

use std::fmt::Write as _;

use super::{FrameSample, Summary, record_telemetry_dropped};
use crate::dsp::ProcessingMode;

/// Per-frame line.
pub fn frame_line(frame: u64, sample: &FrameSample, mode: ProcessingMode) -> String {
    format!(
        "Frame {}: AvgAmp={:.2}, Latency={:.2}ms, Mode={} CPULoad={:.1}% DSPLoad={:.1}%",
        frame, sample.amplitude, sample.latency_ms, mode.label(), sample.cpu_load, sample.dsp_load
    )
}

/// The five summary lines, in emission order.
pub fn summary_lines(summary: &Summary) -> [String; 5] {
    let Summary {
        frames,
        latency,
        amplitude,
        cpu_load,
        dsp_load,
    } = summary;
    [
        format!("[Live Summary] Frames: {}", frames),
        format!(
            "[Live Summary] Latency (ms): Min: {:.2}, Max: {:.2}, Avg: {:.2}",
            latency.min, latency.max, latency.avg
        ),
        format!(
            "[Live Summary] Amp: Min: {:.2}, Max: {:.2}, Avg: {:.2}",
            amplitude.min, amplitude.max, amplitude.avg
        ),
        format!(
            "[Live Summary] CPU Load (%): Min: {:.1}, Max: {:.1}, Avg: {:.1}",
            cpu_load.min, cpu_load.max, cpu_load.avg
        ),
        format!(
            "[Live Summary] DSP Load (%): Min: {:.1}, Max: {:.1}, Avg: {:.1}",
            dsp_load.min, dsp_load.max, dsp_load.avg
        ),
    ]
}

/// Samples of one channel of an interleaved frame, as `<prefix><ch>: s,s,...,`.
pub fn waveform_line(prefix: &str, channel: usize, frame: &[i16], channels: usize) -> String {
    let mut line = format!("{}{}: ", prefix, channel);
    for s in frame.iter().skip(channel).step_by(channels.max(1)) {
        let _ = write!(line, "{},", s);
    }
    line
}

/// Fan-out point for telemetry lines.
///
/// Every line goes to the tracing log. When a transport is attached the line
/// is also offered to its bounded queue; a full queue drops the line rather
/// than stalling the frame thread.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    tx: Option<kanal::Sender<String>>,
}

impl Telemetry {
    /// Telemetry with a transport queue of `capacity` lines.
    pub fn channel(capacity: usize) -> (Self, kanal::Receiver<String>) {
        let (tx, rx) = kanal::bounded(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Log-only telemetry.
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// Emit one line.
    pub fn emit(&self, line: String) {
        tracing::info!(target: "telemetry", "{}", line);
        let Some(tx) = &self.tx else { return };
        match tx.try_send(line) {
            Ok(true) => {}
            Ok(false) => record_telemetry_dropped(),
            Err(_) => {} // transport gone
        }
    }
}
