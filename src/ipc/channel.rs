//! Bracketed send/receive over a [`Transport`].

use std::time::Duration;

use super::{IpcRequest, RpmsgEndpoint};
use crate::error::{Error, Result};
use crate::memory::ShmRegion;

/// Reply buffer size used when the caller has no better bound.
pub const DEFAULT_REPLY_LEN: usize = 512;

/// Byte-level message endpoint.
///
/// One `write` is one message and one `read` returns one message, as with
/// rpmsg character devices.
pub trait Transport: Send {
    /// Write one message, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    /// Read one message. `Ok(None)` means `timeout` elapsed first.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<Option<usize>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (**self).write(buf)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<Option<usize>> {
        (**self).read(buf, timeout)
    }
}

/// Request/response channel to the remote processor.
///
/// Every send and receive is wrapped in a synchronization bracket on the
/// audio region, so host writes are flushed before the request leaves and
/// the remote core's output is visible once the reply is read.
///
/// At most one request is in flight. A request whose reply timed out stays
/// outstanding until [`settle`](Self::settle) consumes the late reply, and
/// no new request is sent before that.
#[derive(Debug)]
pub struct CoprocChannel<T> {
    transport: T,
    timeout: Option<Duration>,
    reply: Vec<u8>,
    in_flight: bool,
}

impl CoprocChannel<RpmsgEndpoint> {
    /// Open an rpmsg endpoint and wrap it.
    pub fn open(
        ctrl_device: &std::path::Path,
        proc_id: u32,
        remote_endpoint: u32,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let endpoint = RpmsgEndpoint::open(ctrl_device, proc_id, remote_endpoint)?;
        Ok(Self::new(endpoint, timeout))
    }
}

impl<T: Transport> CoprocChannel<T> {
    /// Wrap a transport. `timeout` bounds every receive; `None` waits forever.
    pub fn new(transport: T, timeout: Option<Duration>) -> Self {
        Self {
            transport,
            timeout,
            reply: Vec::with_capacity(DEFAULT_REPLY_LEN),
            in_flight: false,
        }
    }

    /// Reply deadline.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether a sent request has not been answered yet.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Wait for the reply to a request whose receive timed out, and discard it.
    ///
    /// Returns immediately when nothing is outstanding. Fails with
    /// [`Error::ChannelTimeout`] if the reply is still missing after the
    /// deadline; the request then stays outstanding.
    pub fn settle(&mut self) -> Result<()> {
        if !self.in_flight {
            return Ok(());
        }
        self.reply.resize(DEFAULT_REPLY_LEN, 0);
        match self
            .transport
            .read(&mut self.reply, self.timeout)
            .map_err(Error::ChannelIo)?
        {
            Some(n) => {
                self.in_flight = false;
                tracing::debug!(reply_len = n, "late remote reply discarded");
                Ok(())
            }
            None => {
                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "remote core still busy");
                Err(Error::ChannelTimeout(timeout))
            }
        }
    }

    /// Send one request.
    ///
    /// Settles any outstanding request first. Returns the number of bytes
    /// written; anything short of the full 20-byte record is
    /// [`Error::ShortWrite`].
    pub fn send(&mut self, request: &IpcRequest, region: &ShmRegion) -> Result<usize> {
        self.settle()?;
        let bytes = request.to_bytes();
        let written = {
            let _bracket = region.bracket()?;
            self.transport.write(&bytes).map_err(Error::ChannelIo)?
        };
        if written != bytes.len() {
            tracing::warn!(written, expected = bytes.len(), "short write to remote endpoint");
            return Err(Error::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        self.in_flight = true;
        tracing::trace!(graph_id = request.graph_id, "request sent");
        Ok(written)
    }

    /// Wait for one reply of at most `max_len` bytes.
    ///
    /// The payload is returned as-is; callers only use it as a completion
    /// signal.
    pub fn receive(&mut self, max_len: usize, region: &ShmRegion) -> Result<&[u8]> {
        self.reply.resize(max_len, 0);
        let read = {
            let _bracket = region.bracket()?;
            self.transport
                .read(&mut self.reply, self.timeout)
                .map_err(Error::ChannelIo)?
        };
        match read {
            Some(n) => {
                self.in_flight = false;
                Ok(&self.reply[..n])
            }
            None => {
                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "remote reply timed out");
                Err(Error::ChannelTimeout(timeout))
            }
        }
    }
}
