//! Process wiring for the daemon.
//!
//! [`Daemon::build`] allocates the shared regions, opens the co-processor
//! channel when the remote engine is selected, and assembles the frame
//! pipeline behind a [`SessionController`]. [`serve`] adds the command and
//! telemetry transports and drives the control loop until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::dsp::{ParameterControl, ProcessingMode, RemoteChannel, SignalEngine};
use crate::error::{Error, Result};
use crate::host::{Command, net, uart};
use crate::ipc::{CoprocChannel, IpcRequest, RpmsgEndpoint, Transport};
use crate::memory::{DmaBackend, ShmRegion};
use crate::observability::{Telemetry, init_metrics, summary_lines};
use crate::pipeline::{
    ConfiguredIo, FramePipeline, PipelineOptions, SessionController, SessionIo, SessionReport,
    SessionState,
};

/// Telemetry lines buffered for a slow transport before dropping.
pub const TELEMETRY_QUEUE: usize = 1024;

/// Commands buffered between the transports and the control loop.
pub const COMMAND_QUEUE: usize = 64;

/// How long the control loop waits for a command before polling the session.
pub const CONTROL_TICK: Duration = Duration::from_millis(20);

/// A fully assembled daemon: regions, engine, controller and queues.
pub struct Daemon {
    config: Config,
    controller: SessionController,
    params: Arc<ParameterControl>,
    commands: kanal::Receiver<Command>,
    command_tx: kanal::Sender<Command>,
    telemetry: Option<kanal::Receiver<String>>,
}

impl Daemon {
    /// Build against the configured memory backend, rpmsg and audio devices.
    pub fn build(config: Config) -> Result<Self> {
        let backend = config.shm_backend.backend();
        let io = Arc::new(ConfiguredIo::from_config(&config));
        Self::assemble(config, backend, None, io)
    }

    /// Build with explicit collaborators.
    ///
    /// In remote mode `transport` replaces the rpmsg endpoint; when `None`
    /// the endpoint is created from the configuration.
    pub fn assemble(
        config: Config,
        backend: Arc<dyn DmaBackend>,
        transport: Option<Box<dyn Transport>>,
        io: Arc<dyn SessionIo>,
    ) -> Result<Self> {
        config.validate()?;

        let audio = ShmRegion::allocate(
            backend.clone(),
            &config.dma_heap,
            config.data_size,
            &config.rproc_device,
        )?;

        let (engine, params) = match config.mode {
            ProcessingMode::Host => (
                SignalEngine::host(&config),
                Arc::new(ParameterControl::host(&config)),
            ),
            ProcessingMode::Remote => {
                let param_region = Arc::new(ShmRegion::allocate(
                    backend,
                    &config.dma_heap,
                    config.param_size,
                    &config.rproc_device,
                )?);
                let params = Arc::new(ParameterControl::shared(&config, param_region.clone())?);
                let transport: Box<dyn Transport> = match transport {
                    Some(t) => t,
                    None => Box::new(RpmsgEndpoint::open(
                        &config.rpmsg_ctrl_device,
                        config.proc_id,
                        config.remote_endpoint,
                    )?),
                };
                let channel: RemoteChannel =
                    CoprocChannel::new(transport, Some(config.rpmsg_timeout));
                let request = IpcRequest::for_regions(&audio, &param_region, config.graph_id)?;
                tracing::info!(
                    data_addr = format_args!("{:#x}", request.data_addr),
                    params_addr = format_args!("{:#x}", request.params_addr),
                    graph_id = request.graph_id,
                    "remote request prepared"
                );
                (SignalEngine::remote(&config, channel, request)?, params)
            }
        };

        let (telemetry, telemetry_rx) = Telemetry::channel(TELEMETRY_QUEUE);
        let pipeline = FramePipeline::new(
            engine,
            audio,
            params.clone(),
            telemetry,
            PipelineOptions::from_config(&config),
        )?;
        let controller = SessionController::new(pipeline, io, config.loop_playback);
        let (command_tx, commands) = kanal::bounded(COMMAND_QUEUE);

        tracing::info!(
            mode = %config.mode,
            variant = %config.filter_variant,
            channels = config.channels,
            sample_rate = config.sample_rate,
            frame_samples = config.frame_samples,
            "daemon assembled"
        );

        Ok(Self {
            config,
            controller,
            params,
            commands,
            command_tx,
            telemetry: Some(telemetry_rx),
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parameter control surface shared with the frame thread.
    pub fn params(&self) -> &Arc<ParameterControl> {
        &self.params
    }

    /// Sender for parsed runtime commands.
    pub fn command_sender(&self) -> kanal::Sender<Command> {
        self.command_tx.clone()
    }

    /// Take the telemetry queue. Only the first call returns it.
    pub fn take_telemetry(&mut self) -> Option<kanal::Receiver<String>> {
        self.telemetry.take()
    }

    /// Session controller state.
    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    /// Arm the first session.
    pub fn start(&mut self) -> bool {
        self.controller.request_start()
    }

    /// Apply pending commands, waiting up to `wait` for the first, then
    /// advance the session controller.
    pub fn step(&mut self, wait: Duration) -> Result<Option<SessionReport>> {
        if let Ok(command) = self.commands.recv_timeout(wait) {
            self.apply(&command);
        }
        while let Ok(Some(command)) = self.commands.try_recv() {
            self.apply(&command);
        }
        self.controller.poll()
    }

    /// Whether playback has ended with nothing armed.
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), SessionState::Exit | SessionState::Stopped)
            && !self.controller.is_running()
    }

    /// Run sessions until playback ends, a session fails, or `shutdown`
    /// is set, then release the shared regions.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<()> {
        self.start();
        let result = loop {
            if shutdown.load(Ordering::Acquire) {
                tracing::info!("shutdown requested");
                break Ok(());
            }
            match self.step(CONTROL_TICK) {
                Ok(Some(report)) => log_report(&report),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "session failed");
                    break Err(e);
                }
            }
            if self.is_finished() {
                tracing::info!("playback finished");
                break Ok(());
            }
        };
        self.finish();
        result
    }

    /// Stop any session and release the shared regions.
    pub fn finish(self) {
        let Daemon {
            controller, params, ..
        } = self;
        if let Some(pipeline) = controller.shutdown() {
            pipeline.shutdown();
        }
        drop(params);
        tracing::info!("shared regions released");
    }

    fn apply(&self, command: &Command) {
        match self.params.apply(command) {
            Ok(()) => tracing::info!(command = %command, "command applied"),
            Err(e) => tracing::warn!(command = %command, error = %e, "command failed"),
        }
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("mode", &self.config.mode)
            .field("controller", &self.controller)
            .finish()
    }
}

fn log_report(report: &SessionReport) {
    tracing::info!(
        outcome = ?report.outcome,
        frames = report.frames,
        dropped = report.dropped,
        "session report"
    );
    if let Some(summary) = &report.summary {
        for line in summary_lines(summary) {
            tracing::debug!("{}", line);
        }
    }
}

/// Start the command/telemetry transports selected by the configuration.
///
/// TCP ports run as tasks on the current runtime; the UART runs on two
/// threads. A UART that cannot be opened leaves telemetry log-only.
pub async fn spawn_transports(
    config: &Config,
    telemetry: kanal::Receiver<String>,
    commands: kanal::Sender<Command>,
) -> Result<()> {
    if config.host_eth_iface {
        let log = net::bind(config.log_port).await?;
        let cmd = net::bind(config.cmd_port).await?;
        tokio::spawn(async move {
            if let Err(e) = net::serve_telemetry(log, telemetry.to_async()).await {
                tracing::warn!(error = %e, "log port stopped");
            }
        });
        tokio::spawn(async move {
            if let Err(e) = net::serve_commands(cmd, commands.to_async()).await {
                tracing::warn!(error = %e, "command port stopped");
            }
        });
        return Ok(());
    }

    match uart::open_uart(&config.uart_device) {
        Ok(fd) => {
            uart::spawn_line_io(fd, commands, telemetry)?;
            tracing::info!(device = %config.uart_device.display(), "UART transport ready");
        }
        Err(e) => {
            tracing::warn!(
                device = %config.uart_device.display(),
                error = %e,
                "UART unavailable, telemetry goes to the log only"
            );
        }
    }
    Ok(())
}

/// Run the daemon until playback ends or the process is interrupted.
pub async fn serve(config: Config) -> Result<()> {
    init_metrics();
    let mut daemon = Daemon::build(config)?;
    if let Some(telemetry) = daemon.take_telemetry() {
        spawn_transports(daemon.config(), telemetry, daemon.command_sender()).await?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            flag.store(true, Ordering::Release);
        }
    });

    tokio::task::spawn_blocking(move || daemon.run(&shutdown))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
