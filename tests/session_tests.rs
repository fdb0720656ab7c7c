//! End-to-end playback sessions over WAV files and memfd-backed regions.
//!
//! Remote-mode tests replace the rpmsg endpoint with a transport that plays
//! the DSP's part: it checks the request, writes a load figure into the
//! parameter region and echoes the request back.

use std::f64::consts::PI;
use std::io;
use std::path::Path;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use dsp_offload::app::Daemon;
use dsp_offload::config::Config;
use dsp_offload::dsp::{FilterVariant, ParameterControl, ProcessingMode, SignalEngine};
use dsp_offload::ipc::{CoprocChannel, IpcRequest, Transport};
use dsp_offload::memory::{DmaBackend, MemfdBackend, ShmRegion};
use dsp_offload::observability::Telemetry;
use dsp_offload::pipeline::{
    ConfiguredIo, FramePipeline, OutputTarget, PipelineOptions, SessionOutcome,
};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use realfft::RealFftPlanner;

const FRAME: usize = 256;
const RATE: u32 = 48_000;

fn write_wav(path: &Path, samples: &[i16]) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut w = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        w.write_sample(s).unwrap();
    }
    w.finalize().unwrap();
}

fn read_wav(path: &Path) -> Vec<i16> {
    WavReader::open(path)
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

/// Sum of sines sitting exactly on FFT bins of a 256-sample frame.
fn bin_tones(bins: &[(usize, f64)]) -> Vec<i16> {
    (0..FRAME)
        .map(|n| {
            let v: f64 = bins
                .iter()
                .map(|&(k, amp)| amp * (2.0 * PI * k as f64 * n as f64 / FRAME as f64).sin())
                .sum();
            v.round() as i16
        })
        .collect()
}

fn bin_magnitudes(samples: &[i16]) -> Vec<f64> {
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(samples.len());
    let mut input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum).unwrap();
    spectrum.iter().map(|c| c.norm()).collect()
}

fn file_config(dir: &Path, input: &[i16]) -> Config {
    let input_path = dir.join("in.wav");
    write_wav(&input_path, input);
    Config {
        input_file: input_path,
        output_file: Some(dir.join("out.wav")),
        loop_playback: false,
        ..Config::default()
    }
}

fn memfd() -> Arc<dyn DmaBackend> {
    Arc::new(MemfdBackend::new())
}

fn drain(rx: &kanal::Receiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(Some(line)) = rx.try_recv() {
        out.push(line);
    }
    out
}

fn run_daemon(config: Config) -> Vec<String> {
    let io = Arc::new(ConfiguredIo::from_config(&config));
    let mut daemon = Daemon::assemble(config, memfd(), None, io).unwrap();
    let telemetry = daemon.take_telemetry().unwrap();
    daemon.run(&AtomicBool::new(false)).unwrap();
    drain(&telemetry)
}

#[test]
fn test_unity_gain_frame_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let input = bin_tones(&[(3, 6000.0), (20, 2500.0), (70, 900.0)]);
    let config = file_config(dir.path(), &input);
    let output_path = config.output_file.clone().unwrap();

    let lines = run_daemon(config);
    let frame_lines: Vec<_> = lines.iter().filter(|l| l.starts_with("Frame ")).collect();
    assert_eq!(frame_lines.len(), 1);
    assert!(frame_lines[0].starts_with("Frame 1: AvgAmp="));
    assert!(frame_lines[0].contains("Mode=CPU"));

    let output = read_wav(&output_path);
    assert_eq!(output.len(), input.len());
    for (i, (&a, &b)) in input.iter().zip(&output).enumerate() {
        assert!((a as i32 - b as i32).abs() <= 1, "sample {}: {} vs {}", i, a, b);
    }
}

#[test]
fn test_zero_bass_removes_low_bins() {
    let dir = tempfile::tempdir().unwrap();
    // bin 1 = 187.5 Hz (bass), bin 8 = 1500 Hz (mid), bin 40 = 7500 Hz (treble)
    let input = bin_tones(&[(1, 8000.0), (8, 8000.0), (40, 4000.0)]);
    let config = Config {
        gain_bass: 0.0,
        ..file_config(dir.path(), &input)
    };
    let output_path = config.output_file.clone().unwrap();
    run_daemon(config);

    let before = bin_magnitudes(&input);
    let after = bin_magnitudes(&read_wav(&output_path));
    assert!(before[1] > 100_000.0);
    assert!(after[1] < before[1] * 0.01, "bass bin kept {}", after[1]);
    assert!((after[8] - before[8]).abs() < before[8] * 0.01);
    assert!((after[40] - before[40]).abs() < before[40] * 0.01);
}

#[test]
fn test_trailing_partial_frame_is_not_played() {
    let dir = tempfile::tempdir().unwrap();
    let input: Vec<i16> = (0..(FRAME * 3 + 17)).map(|i| (i % 97) as i16 * 10).collect();
    let config = file_config(dir.path(), &input);
    let output_path = config.output_file.clone().unwrap();

    let lines = run_daemon(config);
    assert_eq!(lines.iter().filter(|l| l.starts_with("Frame ")).count(), 3);
    assert_eq!(read_wav(&output_path).len(), FRAME * 3);
}

#[test]
fn test_wrong_sample_rate_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        sample_rate: 44_100,
        ..file_config(dir.path(), &[0; FRAME])
    };
    let io = Arc::new(ConfiguredIo::from_config(&config));
    let daemon = Daemon::assemble(config, memfd(), None, io).unwrap();
    let err = daemon.run(&AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, dsp_offload::Error::FormatMismatch { .. }));
}

/// Plays the remote core: validates the request, reports a load figure in
/// the parameter region and echoes the request.
struct EchoDsp {
    params: Arc<ShmRegion>,
    expected: IpcRequest,
    load: f32,
    pending: Option<Vec<u8>>,
}

impl Transport for EchoDsp {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let request = IpcRequest::from_bytes(buf)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad request"))?;
        assert_eq!(request, self.expected);
        {
            let fields = self.params.bracket().unwrap();
            fields.store_f32(0, self.load);
        }
        self.pending = Some(buf.to_vec());
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> io::Result<Option<usize>> {
        match self.pending.take() {
            Some(reply) => {
                buf[..reply.len()].copy_from_slice(&reply);
                Ok(Some(reply.len()))
            }
            None => Ok(None),
        }
    }
}

#[test]
fn test_remote_frame_reports_dsp_load() {
    let dir = tempfile::tempdir().unwrap();
    let input = bin_tones(&[(5, 3000.0)]);
    let config = Config {
        mode: ProcessingMode::Remote,
        filter_variant: FilterVariant::HighPassCutoff,
        firmware_schema: FilterVariant::HighPassCutoff,
        fft_index: 12,
        ..file_config(dir.path(), &input)
    };
    let output_path = config.output_file.clone().unwrap();

    let backend = memfd();
    let device = Path::new("/dev/remoteproc0");
    let audio = ShmRegion::allocate(backend.clone(), "audio", config.data_size, device).unwrap();
    let params_region =
        Arc::new(ShmRegion::allocate(backend, "params", config.param_size, device).unwrap());
    let params = Arc::new(ParameterControl::shared(&config, params_region.clone()).unwrap());
    assert_eq!(params.snapshot().unwrap().cutoff_bin, 12);

    let request = IpcRequest::for_regions(&audio, &params_region, config.graph_id).unwrap();
    let dsp = EchoDsp {
        params: params_region.clone(),
        expected: request,
        load: 37.5,
        pending: None,
    };
    let channel = CoprocChannel::new(
        Box::new(dsp) as Box<dyn Transport>,
        Some(Duration::from_millis(100)),
    );
    let engine = SignalEngine::remote(&config, channel, request).unwrap();

    let (telemetry, lines) = Telemetry::channel(16);
    let mut pipeline = FramePipeline::new(
        engine,
        audio,
        params,
        telemetry,
        PipelineOptions::from_config(&config),
    )
    .unwrap();
    let io = ConfiguredIo::from_config(&config);
    let report = pipeline.run(&io, &AtomicBool::new(false)).unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted);
    assert_eq!(report.frames, 1);
    assert_eq!(report.summary.unwrap().dsp_load.avg, 37.5);

    let lines = drain(&lines);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Mode=DSP"));
    assert!(lines[0].ends_with("DSPLoad=37.5%"));

    // the echo leaves the frame as the host wrote it
    assert_eq!(read_wav(&output_path), input);
    assert!(pipeline.audio().sync_counts().is_balanced());
    assert!(params_region.sync_counts().is_balanced());
    pipeline.shutdown();
}

#[test]
fn test_remote_timeouts_drop_frames_without_ending_session() {
    struct Silent;
    impl Transport for Silent {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn read(&mut self, _buf: &mut [u8], _t: Option<Duration>) -> io::Result<Option<usize>> {
            Ok(None)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        mode: ProcessingMode::Remote,
        rpmsg_timeout: Duration::from_millis(20),
        ..file_config(dir.path(), &vec![100; FRAME * 2])
    };
    let output_path = config.output_file.clone().unwrap();
    let io = Arc::new(ConfiguredIo::from_config(&config));
    let mut daemon = Daemon::assemble(config, memfd(), Some(Box::new(Silent)), io).unwrap();
    let lines = daemon.take_telemetry().unwrap();
    daemon.run(&AtomicBool::new(false)).unwrap();

    assert!(drain(&lines).iter().all(|l| !l.starts_with("Frame ")));
    assert!(read_wav(&output_path).is_empty());
}

/// Answers requests in order, reporting the request number as the load.
/// The first answer misses its deadline.
struct LateDsp {
    params: Arc<ShmRegion>,
    queued: Arc<Mutex<VecDeque<u32>>>,
    sent: u32,
    first_read_done: bool,
}

impl Transport for LateDsp {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent += 1;
        self.queued.lock().unwrap().push_back(self.sent);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> io::Result<Option<usize>> {
        if !self.first_read_done {
            self.first_read_done = true;
            return Ok(None);
        }
        let Some(seq) = self.queued.lock().unwrap().pop_front() else {
            return Ok(None);
        };
        self.params.bracket().unwrap().store_f32(0, seq as f32);
        buf[..4].copy_from_slice(&seq.to_ne_bytes());
        Ok(Some(4))
    }
}

#[test]
fn test_late_reply_does_not_shift_later_frames() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        mode: ProcessingMode::Remote,
        filter_variant: FilterVariant::HighPassCutoff,
        firmware_schema: FilterVariant::HighPassCutoff,
        ..file_config(dir.path(), &vec![50; FRAME * 4])
    };
    let output_path = config.output_file.clone().unwrap();

    let backend = memfd();
    let device = Path::new("/dev/remoteproc0");
    let audio = ShmRegion::allocate(backend.clone(), "audio", config.data_size, device).unwrap();
    let params_region =
        Arc::new(ShmRegion::allocate(backend, "params", config.param_size, device).unwrap());
    let params = Arc::new(ParameterControl::shared(&config, params_region.clone()).unwrap());
    let request = IpcRequest::for_regions(&audio, &params_region, config.graph_id).unwrap();

    let queued = Arc::new(Mutex::new(VecDeque::new()));
    let dsp = LateDsp {
        params: params_region.clone(),
        queued: queued.clone(),
        sent: 0,
        first_read_done: false,
    };
    let channel = CoprocChannel::new(
        Box::new(dsp) as Box<dyn Transport>,
        Some(Duration::from_millis(20)),
    );
    let engine = SignalEngine::remote(&config, channel, request).unwrap();

    let (telemetry, lines) = Telemetry::channel(16);
    let mut pipeline = FramePipeline::new(
        engine,
        audio,
        params,
        telemetry,
        PipelineOptions::from_config(&config),
    )
    .unwrap();
    let report = pipeline
        .run(&ConfiguredIo::from_config(&config), &AtomicBool::new(false))
        .unwrap();

    assert_eq!(report.frames, 3);
    assert_eq!(report.dropped, 1);
    let lines = drain(&lines);
    assert_eq!(lines.len(), 3);
    // frame n of the session was request n + 1; request 1 timed out
    for (i, line) in lines.iter().enumerate() {
        let expected = format!("DSPLoad={:.1}%", (i + 2) as f32);
        assert!(line.ends_with(&expected), "{} should end with {}", line, expected);
    }
    assert!(queued.lock().unwrap().is_empty());
    assert_eq!(read_wav(&output_path).len(), FRAME * 3);
    assert!(params_region.sync_counts().is_balanced());
    pipeline.shutdown();
}

#[test]
fn test_discard_output_still_reports() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path(), &vec![7; FRAME * 2]);
    let io = Arc::new(ConfiguredIo::from_config(&config).with_output(OutputTarget::Discard));
    let mut daemon = Daemon::assemble(config, memfd(), None, io).unwrap();
    let lines = daemon.take_telemetry().unwrap();
    daemon.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(drain(&lines).len(), 2);
}
