//! Serial command and telemetry transport.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use rustix::fd::OwnedFd;
use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;
use rustix::termios::{ControlModes, OptionalActions, SpecialCodeIndex};

use super::{Command, LineAssembler};
use crate::error::{Error, Result};

/// Line speed used by the host tools.
pub const BAUD_RATE: u32 = 115_200;

/// Open `path` and configure it for 115200 8N1 raw mode.
pub fn open_uart(path: &Path) -> Result<OwnedFd> {
    let fd = rustix::fs::open(
        path,
        OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| Error::Config(format!("cannot open UART {}: {}", path.display(), e)))?;

    let mut tio = rustix::termios::tcgetattr(&fd)?;
    tio.make_raw();
    tio.set_speed(BAUD_RATE)?;
    tio.control_modes |= ControlModes::CLOCAL | ControlModes::CREAD | ControlModes::CS8;
    tio.control_modes -= ControlModes::PARENB | ControlModes::CSTOPB | ControlModes::CRTSCTS;
    tio.special_codes[SpecialCodeIndex::VMIN] = 1;
    tio.special_codes[SpecialCodeIndex::VTIME] = 0;
    rustix::termios::tcsetattr(&fd, OptionalActions::Now, &tio)?;

    tracing::info!(device = %path.display(), baud = BAUD_RATE, "UART configured");
    Ok(fd)
}

/// Run a command reader and a telemetry writer over one byte stream.
///
/// The reader parses lines into [`Command`]s until the stream ends or the
/// command channel closes. The writer forwards telemetry lines, newline
/// terminated, until the telemetry channel closes.
pub fn spawn_line_io(
    fd: OwnedFd,
    commands: kanal::Sender<Command>,
    telemetry: kanal::Receiver<String>,
) -> Result<[JoinHandle<()>; 2]> {
    let fd = Arc::new(fd);

    let reader = {
        let fd = Arc::clone(&fd);
        std::thread::Builder::new()
            .name("uart-cmd".into())
            .spawn(move || read_commands(&fd, &commands))?
    };
    let writer = std::thread::Builder::new()
        .name("uart-log".into())
        .spawn(move || write_telemetry(&fd, &telemetry))?;

    Ok([reader, writer])
}

fn read_commands(fd: &OwnedFd, commands: &kanal::Sender<Command>) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 128];
    let mut parsed = Vec::new();

    loop {
        let n = match rustix::io::read(fd, &mut buf) {
            Ok(0) => {
                tracing::info!("command stream closed");
                return;
            }
            Ok(n) => n,
            Err(Errno::INTR) | Err(Errno::AGAIN) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "command read failed");
                return;
            }
        };

        assembler.push(&buf[..n], |line| match Command::parse(line) {
            Some(cmd) => parsed.push(cmd),
            None => tracing::debug!(line, "ignoring unrecognized command"),
        });
        for cmd in parsed.drain(..) {
            tracing::debug!(command = %cmd, "command received");
            if commands.send(cmd).is_err() {
                return;
            }
        }
    }
}

fn write_telemetry(fd: &OwnedFd, telemetry: &kanal::Receiver<String>) {
    while let Ok(mut line) = telemetry.recv() {
        line.push('\n');
        if let Err(e) = write_all(fd, line.as_bytes()) {
            tracing::warn!(error = %e, "telemetry write failed");
            return;
        }
    }
}

fn write_all(fd: &OwnedFd, mut bytes: &[u8]) -> std::result::Result<(), Errno> {
    while !bytes.is_empty() {
        match rustix::io::write(fd, bytes) {
            Ok(n) => bytes = &bytes[n..],
            Err(Errno::INTR) | Err(Errno::AGAIN) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
