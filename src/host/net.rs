//! TCP command and telemetry ports for networked host tools.
//!
//! Each port serves one client at a time. When a client goes away the port
//! goes back to accepting.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::{Command, LineAssembler};
use crate::error::Result;

/// Bind a listener on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    tracing::info!(port, "listening");
    Ok(listener)
}

/// Stream telemetry lines to the connected client.
///
/// Returns when the telemetry channel closes.
pub async fn serve_telemetry(
    listener: TcpListener,
    telemetry: kanal::AsyncReceiver<String>,
) -> Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "log client connected");

        loop {
            let Ok(mut line) = telemetry.recv().await else {
                return Ok(());
            };
            line.push('\n');
            if let Err(e) = stream.write_all(line.as_bytes()).await {
                tracing::info!(%peer, error = %e, "log client disconnected");
                break;
            }
        }
    }
}

/// Read command lines from the connected client.
///
/// Returns when the command channel closes.
pub async fn serve_commands(
    listener: TcpListener,
    commands: kanal::AsyncSender<Command>,
) -> Result<()> {
    let mut buf = [0u8; 256];
    loop {
        let (mut stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "command client connected");
        let mut assembler = LineAssembler::new();

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "command read failed");
                    break;
                }
            };

            let mut parsed = Vec::new();
            assembler.push(&buf[..n], |line| match Command::parse(line) {
                Some(cmd) => parsed.push(cmd),
                None => tracing::debug!(line, "ignoring unrecognized command"),
            });
            for cmd in parsed {
                tracing::debug!(command = %cmd, "command received");
                if commands.send(cmd).await.is_err() {
                    return Ok(());
                }
            }
        }
        tracing::info!(%peer, "command client disconnected");
    }
}
