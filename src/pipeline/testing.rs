//! In-memory sources and sinks for pipeline tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{FramePipeline, FrameSink, FrameSource, PipelineOptions, SessionIo};
use crate::config::Config;
use crate::dsp::{ParameterControl, SignalEngine};
use crate::error::Result;
use crate::memory::{MemfdBackend, ShmRegion};
use crate::observability::Telemetry;

pub(crate) struct VecSource {
    samples: Vec<i16>,
    pos: usize,
    channels: u16,
    gate: Option<Arc<AtomicBool>>,
}

impl FrameSource for VecSource {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<usize> {
        if let Some(gate) = &self.gate {
            while !gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        let n = frame.len().min(self.samples.len() - self.pos);
        frame[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Clone, Default)]
pub(crate) struct CollectSink(pub Arc<Mutex<Vec<i16>>>);

impl FrameSink for CollectSink {
    fn write_frame(&mut self, frame: &[i16]) -> Result<()> {
        self.0.lock().unwrap().extend_from_slice(frame);
        Ok(())
    }
}

/// Serves the same samples to every session.
pub(crate) struct TestIo {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub out: CollectSink,
    /// Reads block until this is set.
    pub gate: Option<Arc<AtomicBool>>,
}

impl TestIo {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            channels: 1,
            out: CollectSink::default(),
            gate: None,
        }
    }

    pub fn written(&self) -> usize {
        self.out.0.lock().unwrap().len()
    }
}

impl SessionIo for TestIo {
    fn open_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(VecSource {
            samples: self.samples.clone(),
            pos: 0,
            channels: self.channels,
            gate: self.gate.clone(),
        }))
    }

    fn open_sink(&self) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(self.out.clone()))
    }
}

/// Host-mode pipeline over a memfd-backed audio region.
pub(crate) fn host_pipeline(config: &Config, telemetry: Telemetry) -> FramePipeline {
    let audio = ShmRegion::allocate(
        Arc::new(MemfdBackend::new()),
        "audio",
        config.data_size,
        Path::new("/dev/remoteproc0"),
    )
    .unwrap();
    FramePipeline::new(
        SignalEngine::host(config),
        audio,
        Arc::new(ParameterControl::host(config)),
        telemetry,
        PipelineOptions::from_config(config),
    )
    .unwrap()
}

pub(crate) fn drain(rx: &kanal::Receiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(Some(line)) = rx.try_recv() {
        out.push(line);
    }
    out
}
