//! Request/response channel to the remote processor.
//!
//! Each frame processed remotely costs exactly one [`IpcRequest`] written to
//! the rpmsg endpoint and one reply read back. The request carries no audio:
//! it names the two shared regions by device address and the DSP works on
//! them in place. The exchange is a handshake, so the only data crossing the
//! channel is the 20-byte record.
//!
//! - [`IpcRequest`]: the wire record.
//! - [`Transport`]: byte-level endpoint; [`RpmsgEndpoint`] is the real one.
//! - [`CoprocChannel`]: send/receive with synchronization brackets and a
//!   reply deadline.

mod channel;
mod message;
mod rpmsg;

pub use channel::{CoprocChannel, DEFAULT_REPLY_LEN, Transport};
pub use message::IpcRequest;
pub use rpmsg::{RpmsgEndpoint, endpoint_name};
