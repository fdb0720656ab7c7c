//! Running per-session frame statistics.

/// Measurements taken for one processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameSample {
    /// Engine time in milliseconds.
    pub latency_ms: f64,
    /// Mean absolute sample value.
    pub amplitude: f64,
    /// Host CPU load in percent.
    pub cpu_load: f64,
    /// Load reported by the remote core; 0.0 when not available.
    pub dsp_load: f64,
}

/// Min, max and sum of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stat {
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for Stat {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl Stat {
    fn record(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    fn summarize(&self, count: u64) -> StatSummary {
        StatSummary {
            min: self.min,
            max: self.max,
            avg: self.sum / count as f64,
        }
    }
}

/// Reduced view of a [`Stat`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSummary {
    /// Smallest value seen.
    pub min: f64,
    /// Largest value seen.
    pub max: f64,
    /// Arithmetic mean.
    pub avg: f64,
}

/// Session totals at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Frames recorded.
    pub frames: u64,
    /// Latency in ms.
    pub latency: StatSummary,
    /// Mean absolute amplitude.
    pub amplitude: StatSummary,
    /// Host CPU load in percent.
    pub cpu_load: StatSummary,
    /// Remote load.
    pub dsp_load: StatSummary,
}

/// Running min/max/sum of latency, amplitude, CPU and DSP load.
///
/// Scoped to one playback session; the pipeline creates a fresh one when a
/// session starts. Totals are cumulative across summary boundaries.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    frames: u64,
    latency: Stat,
    amplitude: Stat,
    cpu_load: Stat,
    dsp_load: Stat,
}

impl MetricsAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one frame. Returns the frame's 1-based sequence number.
    pub fn record(&mut self, sample: &FrameSample) -> u64 {
        self.frames += 1;
        self.latency.record(sample.latency_ms);
        self.amplitude.record(sample.amplitude);
        self.cpu_load.record(sample.cpu_load);
        self.dsp_load.record(sample.dsp_load);
        self.frames
    }

    /// Frames recorded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Current totals, or `None` before the first frame.
    pub fn summary(&self) -> Option<Summary> {
        if self.frames == 0 {
            return None;
        }
        Some(Summary {
            frames: self.frames,
            latency: self.latency.summarize(self.frames),
            amplitude: self.amplitude.summarize(self.frames),
            cpu_load: self.cpu_load.summarize(self.frames),
            dsp_load: self.dsp_load.summarize(self.frames),
        })
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
