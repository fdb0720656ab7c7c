//! Playback session state machine.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use super::{FramePipeline, SessionIo, SessionOutcome, SessionReport};
use crate::error::{Error, Result};

/// Controller state.
///
/// ```text
/// Idle --start--> Armed --poll--> Running --exhausted--> Exit --(loop)--> Armed
///                                    |
///                                    +--stop--> Stopped --start--> Armed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session requested yet.
    Idle,
    /// A session will start on the next poll.
    Armed,
    /// The frame thread is running.
    Running,
    /// The last session was stopped on request.
    Stopped,
    /// The last session ended on its own or with an error.
    Exit,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Exit => "exit",
        };
        f.write_str(s)
    }
}

type Worker = JoinHandle<(FramePipeline, Result<SessionReport>)>;

/// Runs one [`FramePipeline`] session at a time on a dedicated thread.
///
/// The pipeline moves into the session thread and comes back when the
/// thread is joined, so the shared regions outlive every session. A session
/// that fails with an error does not re-arm.
pub struct SessionController {
    pipeline: Option<FramePipeline>,
    io: Arc<dyn SessionIo>,
    worker: Option<Worker>,
    stop: Arc<AtomicBool>,
    state: SessionState,
    loop_playback: bool,
}

impl SessionController {
    /// Controller in `Idle` owning `pipeline`.
    pub fn new(pipeline: FramePipeline, io: Arc<dyn SessionIo>, loop_playback: bool) -> Self {
        Self {
            pipeline: Some(pipeline),
            io,
            worker: None,
            stop: Arc::new(AtomicBool::new(false)),
            state: SessionState::Idle,
            loop_playback,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a session thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Ask for a new session. Ignored while one is armed or running.
    pub fn request_start(&mut self) -> bool {
        match self.state {
            SessionState::Armed | SessionState::Running => {
                tracing::debug!(state = %self.state, "start ignored");
                false
            }
            _ if self.pipeline.is_none() => {
                tracing::warn!("start ignored: pipeline was lost");
                false
            }
            _ => {
                self.transition(SessionState::Armed);
                true
            }
        }
    }

    /// Ask the running session to stop after its current frame.
    pub fn request_stop(&mut self) {
        match self.state {
            SessionState::Running => {
                self.stop.store(true, Ordering::Release);
            }
            SessionState::Armed => self.transition(SessionState::Stopped),
            _ => {}
        }
    }

    /// Advance the state machine without blocking.
    ///
    /// Starts an armed session, and reaps a finished one. Returns the report
    /// of a session that finished during this call.
    pub fn poll(&mut self) -> Result<Option<SessionReport>> {
        let finished = self.worker.as_ref().is_some_and(|w| w.is_finished());
        let report = if finished { self.reap()? } else { None };
        if self.state == SessionState::Armed {
            self.spawn()?;
        }
        Ok(report)
    }

    /// Block until the running session, if any, finishes.
    ///
    /// Does not start an armed session.
    pub fn wait(&mut self) -> Result<Option<SessionReport>> {
        if self.worker.is_some() {
            self.reap()
        } else {
            Ok(None)
        }
    }

    /// Stop any session and hand back the pipeline.
    pub fn shutdown(mut self) -> Option<FramePipeline> {
        self.loop_playback = false;
        self.request_stop();
        if let Err(e) = self.wait() {
            tracing::warn!(error = %e, "last session ended with an error");
        }
        self.pipeline.take()
    }

    fn spawn(&mut self) -> Result<()> {
        let Some(mut pipeline) = self.pipeline.take() else {
            self.transition(SessionState::Exit);
            return Err(Error::SessionPanicked);
        };
        self.stop.store(false, Ordering::Release);
        let stop = self.stop.clone();
        let io = self.io.clone();

        let worker = std::thread::Builder::new()
            .name("frame-pipeline".into())
            .spawn(move || {
                let result = pipeline.run(io.as_ref(), &stop);
                (pipeline, result)
            });
        match worker {
            Ok(worker) => {
                self.worker = Some(worker);
                self.transition(SessionState::Running);
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Exit);
                Err(Error::Io(e))
            }
        }
    }

    fn reap(&mut self) -> Result<Option<SessionReport>> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let (pipeline, result) = match worker.join() {
            Ok(joined) => joined,
            Err(_) => {
                tracing::error!("session thread panicked");
                self.transition(SessionState::Exit);
                return Err(Error::SessionPanicked);
            }
        };
        self.pipeline = Some(pipeline);

        match result {
            Ok(report) => {
                match report.outcome {
                    SessionOutcome::Stopped => self.transition(SessionState::Stopped),
                    SessionOutcome::Exhausted => {
                        self.transition(SessionState::Exit);
                        if self.loop_playback {
                            self.transition(SessionState::Armed);
                        }
                    }
                }
                Ok(Some(report))
            }
            Err(e) => {
                self.transition(SessionState::Exit);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "session state");
            self.state = next;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("loop_playback", &self.loop_playback)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::observability::Telemetry;
    use crate::pipeline::testing::{TestIo, host_pipeline};
    use std::time::{Duration, Instant};

    fn controller(io: Arc<TestIo>, loop_playback: bool) -> SessionController {
        let pipeline = host_pipeline(&Config::default(), Telemetry::log_only());
        SessionController::new(pipeline, io, loop_playback)
    }

    fn poll_until_report(c: &mut SessionController) -> Result<SessionReport> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(report) = c.poll()? {
                return Ok(report);
            }
            assert!(Instant::now() < deadline, "session did not finish");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_idle_until_started() {
        let mut c = controller(Arc::new(TestIo::new(vec![0; 512])), false);
        assert_eq!(c.poll().unwrap(), None);
        assert_eq!(c.state(), SessionState::Idle);
    }

    #[test]
    fn test_session_runs_to_exit() {
        let io = Arc::new(TestIo::new(vec![10; 256 * 3]));
        let mut c = controller(io.clone(), false);
        assert!(c.request_start());
        assert_eq!(c.state(), SessionState::Armed);

        let report = poll_until_report(&mut c).unwrap();
        assert_eq!(report.outcome, SessionOutcome::Exhausted);
        assert_eq!(report.frames, 3);
        assert_eq!(c.state(), SessionState::Exit);
        assert_eq!(io.written(), 256 * 3);

        let pipeline = c.shutdown().unwrap();
        assert!(pipeline.audio().sync_counts().is_balanced());
    }

    #[test]
    fn test_loop_playback_rearms() {
        let io = Arc::new(TestIo::new(vec![10; 256]));
        let mut c = controller(io.clone(), true);
        c.request_start();

        poll_until_report(&mut c).unwrap();
        assert_eq!(c.state(), SessionState::Running);
        poll_until_report(&mut c).unwrap();
        assert!(io.written() >= 512);
        c.shutdown();
    }

    #[test]
    fn test_start_ignored_while_running_and_stop() {
        let gate = Arc::new(AtomicBool::new(false));
        let mut io = TestIo::new(vec![1; 256 * 4]);
        io.gate = Some(gate.clone());
        let io = Arc::new(io);
        let mut c = controller(io.clone(), true);

        c.request_start();
        c.poll().unwrap();
        assert_eq!(c.state(), SessionState::Running);
        assert!(!c.request_start());

        c.request_stop();
        gate.store(true, Ordering::Release);
        let report = c.wait().unwrap().unwrap();
        assert_eq!(report.outcome, SessionOutcome::Stopped);
        assert_eq!(report.frames, 1);
        assert_eq!(c.state(), SessionState::Stopped);

        assert!(c.request_start());
        let report = poll_until_report(&mut c).unwrap();
        assert_eq!(report.frames, 4);
        c.shutdown();
    }

    #[test]
    fn test_setup_error_does_not_rearm() {
        let mut io = TestIo::new(vec![0; 512]);
        io.channels = 2;
        let mut c = controller(Arc::new(io), true);
        c.request_start();

        let err = poll_until_report(&mut c).unwrap_err();
        assert!(matches!(err, Error::FormatMismatch { .. }));
        assert_eq!(c.state(), SessionState::Exit);
        assert_eq!(c.poll().unwrap(), None);
        assert_eq!(c.state(), SessionState::Exit);
        assert!(c.request_start());
    }

    #[test]
    fn test_stop_while_armed() {
        let mut c = controller(Arc::new(TestIo::new(vec![0; 512])), false);
        c.request_start();
        c.request_stop();
        assert_eq!(c.state(), SessionState::Stopped);
        assert_eq!(c.poll().unwrap(), None);
        assert!(!c.is_running());
    }
}
