//! Observability: frame statistics, telemetry lines, metrics and tracing.
//!
//! - **Statistics**: [`MetricsAccumulator`] keeps per-session min/max/avg of
//!   latency, amplitude, host CPU load and DSP load.
//! - **Telemetry**: fixed-format text lines for the host tools
//!   ([`frame_line`], [`summary_lines`], [`waveform_line`]) fanned out by
//!   [`Telemetry`].
//! - **Metrics**: counters, gauges and histograms via `metrics-rs`.
//! - **Tracing**: session and frame spans via `tracing`.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `dsp_offload_frames_processed` | Counter | Frames processed and written |
//! | `dsp_offload_frames_dropped` | Counter | Frames abandoned after a transient fault |
//! | `dsp_offload_sessions_started` | Counter | Playback sessions started |
//! | `dsp_offload_frame_latency_ms` | Histogram | Engine time per frame |
//! | `dsp_offload_frame_amplitude` | Gauge | Mean absolute sample value |
//! | `dsp_offload_cpu_load_percent` | Gauge | Host CPU load |
//! | `dsp_offload_dsp_load` | Gauge | Remote core load figure |
//! | `dsp_offload_telemetry_dropped` | Counter | Lines dropped on a full queue |

mod accumulator;
mod cpu;
mod metrics;
mod telemetry;
mod tracing_support;

pub use accumulator::{FrameSample, MetricsAccumulator, Stat, StatSummary, Summary};
pub use cpu::CpuLoadSampler;
pub use metrics::{SessionMetrics, init_metrics, record_telemetry_dropped};
pub use telemetry::{Telemetry, frame_line, summary_lines, waveform_line};
pub use tracing_support::{init_tracing, span_frame, span_session};
