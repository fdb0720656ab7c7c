//! Operator-facing command and telemetry transports.
//!
//! Commands are short text lines (see [`Command`]) that adjust filter
//! parameters at runtime. Telemetry flows the other way as log lines. Both
//! travel over the UART or, when configured, over two TCP ports.
//!
//! Transports never touch parameters themselves: they forward parsed
//! commands into a bounded channel drained by the control task.

mod command;
pub mod net;
pub mod uart;

pub use command::{Command, LineAssembler, MAX_LINE};
