//! Signal processing: parameter schemas, the control surface and the
//! per-frame engine.
//!
//! A frame is filtered either on the host by [`SpectralProcessor`] or by the
//! remote DSP, reached through the IPC channel. [`SignalEngine`] picks one of
//! the two once per session. [`ParameterControl`] holds the tunables and is
//! shared between the frame thread and the command listeners.

mod engine;
mod params;
mod spectral;

pub use engine::{ProcessingMode, RemoteChannel, SignalEngine, check_schema};
pub use params::{FilterSettings, FilterVariant, ParameterControl};
pub use spectral::{BASS_CROSSOVER_HZ, MID_CROSSOVER_HZ, SpectralProcessor, saturate};
