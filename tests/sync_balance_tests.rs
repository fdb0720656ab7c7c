//! Sync bracket accounting when sessions are cut short.
//!
//! Every path out of a bracket, including errors and panics, must issue the
//! closing sync so the region can be released exactly once.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use dsp_offload::config::Config;
use dsp_offload::dsp::{ParameterControl, SignalEngine};
use dsp_offload::error::{Error, Result};
use dsp_offload::memory::{MemfdBackend, ShmRegion};
use dsp_offload::observability::Telemetry;
use dsp_offload::pipeline::{FramePipeline, FrameSink, FrameSource, PipelineOptions, SessionIo};

/// Endless noise.
struct Noise {
    state: u32,
}

impl FrameSource for Noise {
    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<usize> {
        for s in frame.iter_mut() {
            self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            *s = (self.state >> 16) as i16;
        }
        Ok(frame.len())
    }
}

/// Fails or panics on the given frame.
struct FailingSink {
    remaining: usize,
    panic: bool,
}

impl FrameSink for FailingSink {
    fn write_frame(&mut self, _frame: &[i16]) -> Result<()> {
        if self.remaining == 0 {
            if self.panic {
                panic!("sink exploded");
            }
            return Err(Error::Sink("device unplugged".into()));
        }
        self.remaining -= 1;
        Ok(())
    }
}

struct AbortAfter {
    frames: usize,
    panic: bool,
}

impl SessionIo for AbortAfter {
    fn open_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(Noise {
            state: self.frames as u32,
        }))
    }

    fn open_sink(&self) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FailingSink {
            remaining: self.frames,
            panic: self.panic,
        }))
    }
}

fn pipeline(config: &Config) -> FramePipeline {
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
        Telemetry::log_only(),
        PipelineOptions::from_config(config),
    )
    .unwrap()
}

#[test]
fn test_sink_failure_leaves_brackets_balanced() {
    let config = Config::default();
    let mut p = pipeline(&config);
    for frames in [0, 1, 2, 7, 13] {
        let err = p
            .run(&AbortAfter { frames, panic: false }, &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
        let counts = p.audio().sync_counts();
        assert!(counts.is_balanced(), "unbalanced after {} frames: {:?}", frames, counts);
    }
    p.shutdown();
}

#[test]
fn test_panic_mid_bracket_still_closes() {
    let config = Config::default();
    for frames in [0, 3, 9] {
        let mut p = pipeline(&config);
        let result = catch_unwind(AssertUnwindSafe(|| {
            p.run(&AbortAfter { frames, panic: true }, &AtomicBool::new(false))
        }));
        assert!(result.is_err());
        let counts = p.audio().sync_counts();
        assert!(counts.is_balanced(), "unbalanced after panic: {:?}", counts);
        assert!(counts.starts > 0);
        p.shutdown();
    }
}

#[test]
fn test_shared_parameter_brackets_balanced() {
    let config = Config::default();
    let region = Arc::new(
        ShmRegion::allocate(
            Arc::new(MemfdBackend::new()),
            "params",
            config.param_size,
            Path::new("/dev/remoteproc0"),
        )
        .unwrap(),
    );
    let params = Arc::new(ParameterControl::shared(&config, region.clone()).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let params = params.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    params.set_gain_mid((t * 500 + i) as f32).unwrap();
                    params.snapshot().unwrap();
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    let counts = region.sync_counts();
    assert!(counts.is_balanced());
    assert!(counts.starts >= 4000);
}
