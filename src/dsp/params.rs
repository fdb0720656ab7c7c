//! Filter parameter schemas and the runtime control surface.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::Command;
use crate::memory::ShmRegion;

/// Filter algorithm, which also fixes the parameter record layout.
///
/// The two records are not wire compatible, so the host and the remote image
/// must agree on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterVariant {
    /// Bass/mid/treble gains split at 300 Hz and 3 kHz.
    ///
    /// `{ f32 gain_bass @0; f32 gain_mid @4; f32 gain_treble @8 }`
    ThreeBandEq,
    /// Zero every bin below a cutoff index.
    ///
    /// `{ f32 dsp_load @0; i32 cutoff_bin_index @4 }`
    HighPassCutoff,
}

impl FilterVariant {
    /// Size of the parameter record in bytes.
    pub const fn schema_size(self) -> usize {
        match self {
            FilterVariant::ThreeBandEq => 12,
            FilterVariant::HighPassCutoff => 8,
        }
    }

    /// Stable name used in logs and errors.
    pub const fn schema_name(self) -> &'static str {
        match self {
            FilterVariant::ThreeBandEq => "three-band-eq",
            FilterVariant::HighPassCutoff => "high-pass-cutoff",
        }
    }
}

impl fmt::Display for FilterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema_name())
    }
}

impl FromStr for FilterVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" | "3band" | "three-band-eq" => Ok(FilterVariant::ThreeBandEq),
            "highpass" | "hp" | "high-pass-cutoff" => Ok(FilterVariant::HighPassCutoff),
            other => Err(Error::Config(format!("unknown filter variant '{}'", other))),
        }
    }
}

// Field offsets within the parameter record. Every offset + 4 is within
// `schema_size()`, and `shared` refuses regions smaller than the schema, so
// bracket field access never goes out of bounds.
const EQ_BASS: usize = 0;
const EQ_MID: usize = 4;
const EQ_TREBLE: usize = 8;
const HP_DSP_LOAD: usize = 0;
const HP_CUTOFF: usize = 4;

/// Per-frame view of the filter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Gain for bins at or below 300 Hz.
    pub gain_bass: f32,
    /// Gain for bins above 300 Hz up to 3 kHz.
    pub gain_mid: f32,
    /// Gain for bins above 3 kHz.
    pub gain_treble: f32,
    /// Bins below this index are zeroed. Zero when the filter is disabled.
    pub cutoff_bin: i32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            gain_bass: 1.0,
            gain_mid: 1.0,
            gain_treble: 1.0,
            cutoff_bin: 0,
        }
    }
}

#[derive(Debug)]
struct HostParams {
    gain_bass: AtomicU32,
    gain_mid: AtomicU32,
    gain_treble: AtomicU32,
    cutoff_bin: AtomicI32,
}

#[derive(Debug)]
enum ParamStore {
    Host(HostParams),
    Shared(Arc<ShmRegion>),
}

/// Runtime-mutable filter parameters.
///
/// In host mode the values live in process memory; in remote mode they live
/// in the shared parameter region, where the remote core reads them, and
/// every access is bracketed. Setters may be called from any thread while
/// the frame thread reads; an update lands on the in-flight frame or the
/// next one.
///
/// Disabling the high-pass filter writes cutoff 0 while remembering the
/// configured index, so re-enabling restores it.
#[derive(Debug)]
pub struct ParameterControl {
    variant: FilterVariant,
    store: ParamStore,
    configured_cutoff: AtomicI32,
    filter_enabled: AtomicBool,
}

impl ParameterControl {
    /// Parameters held in process memory, initialised from `config`.
    pub fn host(config: &Config) -> Self {
        let initial = initial_settings(config);
        Self {
            variant: config.filter_variant,
            store: ParamStore::Host(HostParams {
                gain_bass: AtomicU32::new(initial.gain_bass.to_bits()),
                gain_mid: AtomicU32::new(initial.gain_mid.to_bits()),
                gain_treble: AtomicU32::new(initial.gain_treble.to_bits()),
                cutoff_bin: AtomicI32::new(initial.cutoff_bin),
            }),
            configured_cutoff: AtomicI32::new(config.fft_index),
            filter_enabled: AtomicBool::new(config.fft_filter_enabled),
        }
    }

    /// Parameters held in the shared region, initialised from `config`.
    pub fn shared(config: &Config, region: Arc<ShmRegion>) -> Result<Self> {
        let variant = config.filter_variant;
        if variant.schema_size() > region.len() {
            return Err(Error::Config(format!(
                "{} parameter record does not fit in a {} byte region",
                variant,
                region.len()
            )));
        }

        let initial = initial_settings(config);
        {
            let fields = region.bracket()?;
            match variant {
                FilterVariant::ThreeBandEq => {
                    fields.store_f32(EQ_BASS, initial.gain_bass);
                    fields.store_f32(EQ_MID, initial.gain_mid);
                    fields.store_f32(EQ_TREBLE, initial.gain_treble);
                }
                FilterVariant::HighPassCutoff => {
                    fields.store_f32(HP_DSP_LOAD, 0.0);
                    fields.store_i32(HP_CUTOFF, initial.cutoff_bin);
                }
            }
        }

        Ok(Self {
            variant,
            store: ParamStore::Shared(region),
            configured_cutoff: AtomicI32::new(config.fft_index),
            filter_enabled: AtomicBool::new(config.fft_filter_enabled),
        })
    }

    /// Active parameter schema.
    pub fn variant(&self) -> FilterVariant {
        self.variant
    }

    /// Whether the values live in the shared region.
    pub fn is_shared(&self) -> bool {
        matches!(self.store, ParamStore::Shared(_))
    }

    /// Set the bass gain.
    pub fn set_gain_bass(&self, value: f32) -> Result<()> {
        self.set_gain("bass", EQ_BASS, value, |p| &p.gain_bass)
    }

    /// Set the mid gain.
    pub fn set_gain_mid(&self, value: f32) -> Result<()> {
        self.set_gain("mid", EQ_MID, value, |p| &p.gain_mid)
    }

    /// Set the treble gain.
    pub fn set_gain_treble(&self, value: f32) -> Result<()> {
        self.set_gain("treble", EQ_TREBLE, value, |p| &p.gain_treble)
    }

    fn set_gain(
        &self,
        band: &str,
        offset: usize,
        value: f32,
        slot: impl FnOnce(&HostParams) -> &AtomicU32,
    ) -> Result<()> {
        if self.variant != FilterVariant::ThreeBandEq {
            tracing::warn!(band, variant = %self.variant, "gain has no effect on this filter");
            return Ok(());
        }
        if !value.is_finite() {
            tracing::warn!(band, value, "ignoring non-finite gain");
            return Ok(());
        }
        match &self.store {
            ParamStore::Host(p) => slot(p).store(value.to_bits(), Ordering::Release),
            ParamStore::Shared(region) => region.bracket()?.store_f32(offset, value),
        }
        tracing::info!(band, value, "gain updated");
        Ok(())
    }

    /// Set the high-pass cutoff bin.
    pub fn set_cutoff_bin(&self, index: i32) -> Result<()> {
        if self.variant != FilterVariant::HighPassCutoff {
            tracing::warn!(index, variant = %self.variant, "cutoff has no effect on this filter");
            return Ok(());
        }
        if index < 0 {
            tracing::warn!(index, "ignoring negative cutoff bin");
            return Ok(());
        }
        self.configured_cutoff.store(index, Ordering::Release);
        if self.filter_enabled.load(Ordering::Acquire) {
            self.write_cutoff(index)?;
        }
        tracing::info!(index, "cutoff bin updated");
        Ok(())
    }

    /// Enable or disable the high-pass filter.
    pub fn set_filter_enabled(&self, enabled: bool) -> Result<()> {
        if self.variant != FilterVariant::HighPassCutoff {
            tracing::warn!(enabled, variant = %self.variant, "filter toggle has no effect on this filter");
            return Ok(());
        }
        self.filter_enabled.store(enabled, Ordering::Release);
        let effective = if enabled {
            self.configured_cutoff.load(Ordering::Acquire)
        } else {
            0
        };
        self.write_cutoff(effective)?;
        tracing::info!(enabled, cutoff = effective, "high-pass filter toggled");
        Ok(())
    }

    fn write_cutoff(&self, index: i32) -> Result<()> {
        match &self.store {
            ParamStore::Host(p) => p.cutoff_bin.store(index, Ordering::Release),
            ParamStore::Shared(region) => region.bracket()?.store_i32(HP_CUTOFF, index),
        }
        Ok(())
    }

    /// Apply one runtime command.
    pub fn apply(&self, command: &Command) -> Result<()> {
        match *command {
            Command::SetBass(v) => self.set_gain_bass(v),
            Command::SetMid(v) => self.set_gain_mid(v),
            Command::SetTreble(v) => self.set_gain_treble(v),
            Command::SetFftIndex(i) => self.set_cutoff_bin(i),
            Command::SetFftFilter(on) => self.set_filter_enabled(on),
        }
    }

    /// Read the current parameters once.
    ///
    /// Fields outside the active schema keep their neutral values.
    pub fn snapshot(&self) -> Result<FilterSettings> {
        let mut settings = FilterSettings::default();
        match &self.store {
            ParamStore::Host(p) => {
                settings.gain_bass = f32::from_bits(p.gain_bass.load(Ordering::Acquire));
                settings.gain_mid = f32::from_bits(p.gain_mid.load(Ordering::Acquire));
                settings.gain_treble = f32::from_bits(p.gain_treble.load(Ordering::Acquire));
                settings.cutoff_bin = p.cutoff_bin.load(Ordering::Acquire);
            }
            ParamStore::Shared(region) => {
                let fields = region.bracket()?;
                match self.variant {
                    FilterVariant::ThreeBandEq => {
                        settings.gain_bass = fields.load_f32(EQ_BASS);
                        settings.gain_mid = fields.load_f32(EQ_MID);
                        settings.gain_treble = fields.load_f32(EQ_TREBLE);
                    }
                    FilterVariant::HighPassCutoff => {
                        settings.cutoff_bin = fields.load_i32(HP_CUTOFF);
                    }
                }
            }
        }
        Ok(settings)
    }

    /// Load figure reported by the remote core.
    ///
    /// Opaque value forwarded unchanged. Only the high-pass record carries
    /// it; otherwise 0.0.
    pub fn dsp_load(&self) -> Result<f32> {
        match (&self.store, self.variant) {
            (ParamStore::Shared(region), FilterVariant::HighPassCutoff) => {
                Ok(region.bracket()?.load_f32(HP_DSP_LOAD))
            }
            _ => Ok(0.0),
        }
    }
}

fn initial_settings(config: &Config) -> FilterSettings {
    FilterSettings {
        gain_bass: config.gain_bass,
        gain_mid: config.gain_mid,
        gain_treble: config.gain_treble,
        cutoff_bin: if config.fft_filter_enabled {
            config.fft_index.max(0)
        } else {
            0
        },
    }
}
