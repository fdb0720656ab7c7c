//! Remote processor firmware switching.
//!
//! The remoteproc driver boots whatever image the firmware symlink points
//! at. Switching images means stopping the core through its sysfs state
//! file, repointing the symlink and starting the core again.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Longest state string read back from the state file.
const STATE_MAX: usize = 31;

/// Transition requested through the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RprocCommand {
    /// Boot the core.
    Start,
    /// Halt the core.
    Stop,
}

impl RprocCommand {
    /// Word written to the state file.
    pub fn as_str(self) -> &'static str {
        match self {
            RprocCommand::Start => "start",
            RprocCommand::Stop => "stop",
        }
    }

    /// Whether a core reporting `state` needs no write for this command.
    ///
    /// Accepts both the command word and the state the kernel reports after
    /// it (`running` / `offline`).
    pub fn satisfied_by(self, state: &str) -> bool {
        match self {
            RprocCommand::Start => state == "start" || state == "running",
            RprocCommand::Stop => state == "stop" || state == "offline",
        }
    }
}

/// Current state string, without the trailing newline.
pub fn read_state(state_path: &Path) -> Result<String> {
    let raw = fs::read(state_path).map_err(|e| {
        Error::Firmware(format!("cannot read {}: {}", state_path.display(), e))
    })?;
    let raw = &raw[..raw.len().min(STATE_MAX)];
    let text = String::from_utf8_lossy(raw);
    let line = text.split('\n').next().unwrap_or_default();
    Ok(line.to_string())
}

/// Write `command` unless the core is already there. Returns whether a
/// write happened.
pub fn write_state_if_needed(state_path: &Path, command: RprocCommand) -> Result<bool> {
    let current = read_state(state_path)?;
    if command.satisfied_by(&current) {
        tracing::info!(state = %current, "remote core already in requested state, skipping");
        return Ok(false);
    }
    fs::write(state_path, command.as_str()).map_err(|e| {
        Error::Firmware(format!(
            "cannot write '{}' to {}: {}",
            command.as_str(),
            state_path.display(),
            e
        ))
    })?;
    tracing::info!(from = %current, to = command.as_str(), "remote core state changed");
    Ok(true)
}

/// Point `link` at `image`, replacing any existing link.
pub fn update_symlink(link: &Path, image: &Path) -> Result<()> {
    let mut staged = link.as_os_str().to_owned();
    staged.push(".new");
    let staged = PathBuf::from(staged);

    match fs::remove_file(&staged) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(e)),
    }
    std::os::unix::fs::symlink(image, &staged).map_err(|e| {
        Error::Firmware(format!("cannot create link to {}: {}", image.display(), e))
    })?;
    fs::rename(&staged, link).map_err(|e| {
        let _ = fs::remove_file(&staged);
        Error::Firmware(format!("cannot replace {}: {}", link.display(), e))
    })?;
    tracing::debug!(link = %link.display(), image = %image.display(), "firmware link updated");
    Ok(())
}

/// Stop the core, point `link` at `image`, start the core.
pub fn switch_firmware(image: &Path, link: &Path, state_path: &Path) -> Result<()> {
    tracing::info!(image = %image.display(), "switching remote firmware");
    write_state_if_needed(state_path, RprocCommand::Stop)?;
    update_symlink(link, image)?;
    write_state_if_needed(state_path, RprocCommand::Start)?;
    Ok(())
}
