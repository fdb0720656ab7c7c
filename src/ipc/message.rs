//! Fixed-layout IPC record exchanged with the remote processor.

use crate::error::{Error, Result};
use crate::memory::ShmRegion;

/// Request sent to the remote processor for every offloaded frame.
///
/// Wire layout (native endian, 20 bytes, no padding):
///
/// | Offset | Type | Field |
/// |--------|------|-------|
/// | 0 | u32 | audio region device address |
/// | 4 | u32 | parameter region device address |
/// | 8 | i32 | audio region size |
/// | 12 | i32 | parameter region size |
/// | 16 | i32 | graph id |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcRequest {
    /// Device address of the audio region.
    pub data_addr: u32,
    /// Device address of the parameter region.
    pub params_addr: u32,
    /// Size of the audio region in bytes.
    pub data_size: i32,
    /// Size of the parameter region in bytes.
    pub params_size: i32,
    /// Remote processing graph to run.
    pub graph_id: i32,
}

impl IpcRequest {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 20;

    /// Build the request describing an allocated region pair.
    ///
    /// Fails if either region is larger than the signed 32-bit size field.
    pub fn for_regions(audio: &ShmRegion, params: &ShmRegion, graph_id: i32) -> Result<Self> {
        Ok(Self {
            data_addr: audio.device_addr(),
            params_addr: params.device_addr(),
            data_size: wire_size("audio", audio.len())?,
            params_size: wire_size("parameter", params.len())?,
            graph_id,
        })
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.data_addr.to_ne_bytes());
        out[4..8].copy_from_slice(&self.params_addr.to_ne_bytes());
        out[8..12].copy_from_slice(&self.data_size.to_ne_bytes());
        out[12..16].copy_from_slice(&self.params_size.to_ne_bytes());
        out[16..20].copy_from_slice(&self.graph_id.to_ne_bytes());
        out
    }

    /// Decode from wire bytes. Returns `None` if fewer than 20 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::WIRE_SIZE] = bytes.get(..Self::WIRE_SIZE)?.try_into().ok()?;
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        Some(Self {
            data_addr: u32::from_ne_bytes(word(0)),
            params_addr: u32::from_ne_bytes(word(4)),
            data_size: i32::from_ne_bytes(word(8)),
            params_size: i32::from_ne_bytes(word(12)),
            graph_id: i32::from_ne_bytes(word(16)),
        })
    }
}

fn wire_size(name: &str, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        Error::Config(format!(
            "{} region of {} bytes does not fit the 32-bit size field",
            name, len
        ))
    })
}
