//! Audio offload daemon.
//!
//! ```text
//! offloadd [--config PATH] [run]
//! offloadd [--config PATH] switch-firmware [IMAGE | --old | --new]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use dsp_offload::config::{Config, DEFAULT_CONFIG_PATH};
use dsp_offload::error::{Error, Result};
use dsp_offload::firmware::switch_firmware;
use dsp_offload::observability::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "offloadd", version, about = "Audio filtering with DSP offload")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Play the configured input through the filter (default).
    Run,
    /// Point the remote core at another firmware image and restart it.
    SwitchFirmware {
        /// Image to boot.
        #[arg(conflicts_with_all = ["old", "new"])]
        image: Option<PathBuf>,
        /// Boot the image named by C7_OLD_FW_PATH.
        #[arg(long, conflicts_with = "new")]
        old: bool,
        /// Boot the image named by C7_NEW_FW_PATH.
        #[arg(long)]
        new: bool,
    },
}

fn firmware_image(config: &Config, image: Option<PathBuf>, old: bool, new: bool) -> Result<PathBuf> {
    let chosen = match (image, old, new) {
        (Some(path), _, _) => Some(path),
        (None, true, _) => config.fw_old_path.clone(),
        (None, _, true) => config.fw_new_path.clone(),
        (None, false, false) => config.fw_new_path.clone(),
    };
    chosen.ok_or_else(|| Error::Config("no firmware image given or configured".into()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing("info");

    let config = Config::load(&cli.config);
    let result = match cli.command.unwrap_or(Cmd::Run) {
        Cmd::Run => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Io)
            .and_then(|rt| rt.block_on(dsp_offload::app::serve(config))),
        Cmd::SwitchFirmware { image, old, new } => firmware_image(&config, image, old, new)
            .and_then(|image| {
                switch_firmware(&image, &config.fw_link_path, &config.fw_state_path)
            }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "offloadd failed");
            eprintln!("offloadd: {}", e);
            ExitCode::FAILURE
        }
    }
}
