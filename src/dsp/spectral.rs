//! Host-side frequency-domain filtering.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::{FilterSettings, FilterVariant};
use crate::error::{Error, Result};

/// Upper edge of the bass band in Hz (inclusive).
pub const BASS_CROSSOVER_HZ: f64 = 300.0;
/// Upper edge of the mid band in Hz (inclusive).
pub const MID_CROSSOVER_HZ: f64 = 3000.0;

/// Per-frame FFT filter run on the host CPU.
///
/// Each channel of an interleaved frame is transformed on its own: forward
/// real FFT, bin manipulation, inverse FFT, division by the transform length,
/// rounding and saturation to 16 bits. Plans and buffers are built once and
/// reused for every frame.
pub struct SpectralProcessor {
    frame_len: usize,
    channels: usize,
    sample_rate: u32,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    time: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl SpectralProcessor {
    /// Plan transforms for `frame_len` samples per channel.
    pub fn new(frame_len: usize, channels: usize, sample_rate: u32) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(frame_len);
        let inverse = planner.plan_fft_inverse(frame_len);
        let scratch_len = forward.get_scratch_len().max(inverse.get_scratch_len());
        let time = forward.make_input_vec();
        let spectrum = forward.make_output_vec();

        Self {
            frame_len,
            channels: channels.max(1),
            sample_rate,
            forward,
            inverse,
            time,
            spectrum,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    /// Samples per channel in one frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Centre frequency of bin `index` in Hz.
    #[inline]
    pub fn bin_frequency(&self, index: usize) -> f64 {
        index as f64 * self.sample_rate as f64 / self.frame_len as f64
    }

    /// Filter one interleaved frame in place.
    pub fn process(
        &mut self,
        frame: &mut [i16],
        variant: FilterVariant,
        settings: &FilterSettings,
    ) -> Result<()> {
        let expected = self.frame_len * self.channels;
        if frame.len() != expected {
            return Err(Error::Processing(format!(
                "frame holds {} samples, expected {}",
                frame.len(),
                expected
            )));
        }

        for ch in 0..self.channels {
            for (dst, src) in self
                .time
                .iter_mut()
                .zip(frame.iter().skip(ch).step_by(self.channels))
            {
                *dst = *src as f64;
            }

            self.forward
                .process_with_scratch(&mut self.time, &mut self.spectrum, &mut self.scratch)
                .map_err(|e| Error::Processing(format!("forward transform: {}", e)))?;

            match variant {
                FilterVariant::ThreeBandEq => self.apply_gains(settings),
                FilterVariant::HighPassCutoff => self.apply_cutoff(settings.cutoff_bin),
            }

            // c2r requires purely real DC and Nyquist bins
            self.spectrum[0].im = 0.0;
            if self.frame_len % 2 == 0 {
                if let Some(last) = self.spectrum.last_mut() {
                    last.im = 0.0;
                }
            }

            self.inverse
                .process_with_scratch(&mut self.spectrum, &mut self.time, &mut self.scratch)
                .map_err(|e| Error::Processing(format!("inverse transform: {}", e)))?;

            let scale = self.frame_len as f64;
            for (dst, src) in frame
                .iter_mut()
                .skip(ch)
                .step_by(self.channels)
                .zip(self.time.iter())
            {
                *dst = saturate(*src / scale);
            }
        }
        Ok(())
    }

    fn apply_gains(&mut self, settings: &FilterSettings) {
        for i in 0..self.spectrum.len() {
            let freq = self.bin_frequency(i);
            let gain = if freq <= BASS_CROSSOVER_HZ {
                settings.gain_bass
            } else if freq <= MID_CROSSOVER_HZ {
                settings.gain_mid
            } else {
                settings.gain_treble
            };
            self.spectrum[i] *= gain as f64;
        }
    }

    fn apply_cutoff(&mut self, cutoff: i32) {
        let cutoff = (cutoff.max(0) as usize).min(self.spectrum.len());
        for bin in &mut self.spectrum[..cutoff] {
            *bin = Complex::new(0.0, 0.0);
        }
    }
}

impl std::fmt::Debug for SpectralProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralProcessor")
            .field("frame_len", &self.frame_len)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Round to the nearest integer and clamp to the 16-bit range.
#[inline]
pub fn saturate(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const N: usize = 256;
    const RATE: u32 = 48_000;

    fn tone(bin: usize, amplitude: f64) -> Vec<f64> {
        (0..N)
            .map(|i| amplitude * (2.0 * PI * bin as f64 * i as f64 / N as f64).sin())
            .collect()
    }

    fn to_i16(signal: &[f64]) -> Vec<i16> {
        signal.iter().map(|&v| saturate(v)).collect()
    }

    fn bin_energy(frame: &[i16], bin: usize) -> f64 {
        let (mut re, mut im) = (0.0, 0.0);
        for (i, &s) in frame.iter().enumerate() {
            let phase = 2.0 * PI * bin as f64 * i as f64 / frame.len() as f64;
            re += s as f64 * phase.cos();
            im -= s as f64 * phase.sin();
        }
        re * re + im * im
    }

    #[test]
    fn test_unity_settings_reproduce_input() {
        let mut p = SpectralProcessor::new(N, 1, RATE);
        let input: Vec<i16> = (0..N as i32).map(|i| ((i * 7919) % 20000 - 10000) as i16).collect();
        let mut frame = input.clone();
        p.process(&mut frame, FilterVariant::ThreeBandEq, &FilterSettings::default())
            .unwrap();
        for (a, b) in input.iter().zip(&frame) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} vs {}", a, b);
        }

        let mut frame = input.clone();
        p.process(&mut frame, FilterVariant::HighPassCutoff, &FilterSettings::default())
            .unwrap();
        for (a, b) in input.iter().zip(&frame) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_saturates_instead_of_wrapping() {
        let mut p = SpectralProcessor::new(N, 1, RATE);
        let settings = FilterSettings {
            gain_bass: 2.0,
            ..FilterSettings::default()
        };

        let mut frame = vec![20_000i16; N];
        p.process(&mut frame, FilterVariant::ThreeBandEq, &settings).unwrap();
        assert!(frame.iter().all(|&s| s == i16::MAX));

        let mut frame = vec![-20_000i16; N];
        p.process(&mut frame, FilterVariant::ThreeBandEq, &settings).unwrap();
        assert!(frame.iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn test_bass_gain_zero_removes_low_band() {
        let mut p = SpectralProcessor::new(N, 1, RATE);
        // bin 1 = 187.5 Hz, bin 25 = 4687.5 Hz
        let low = tone(1, 8000.0);
        let high = tone(25, 8000.0);
        let mixed: Vec<f64> = low.iter().zip(&high).map(|(a, b)| a + b).collect();
        let mut frame = to_i16(&mixed);
        let settings = FilterSettings {
            gain_bass: 0.0,
            ..FilterSettings::default()
        };
        p.process(&mut frame, FilterVariant::ThreeBandEq, &settings).unwrap();

        let reference = to_i16(&high);
        assert!(bin_energy(&frame, 1) < 1e-3 * bin_energy(&reference, 25));
        let kept = bin_energy(&frame, 25) / bin_energy(&reference, 25);
        assert!((kept - 1.0).abs() < 0.01, "high band kept {}", kept);
    }

    #[test]
    fn test_cutoff_zeroes_lower_bins() {
        let mut p = SpectralProcessor::new(N, 1, RATE);
        let mixed: Vec<f64> = tone(2, 6000.0)
            .iter()
            .zip(tone(40, 6000.0))
            .map(|(a, b)| a + b)
            .collect();
        let mut frame = to_i16(&mixed);
        let settings = FilterSettings {
            cutoff_bin: 10,
            ..FilterSettings::default()
        };
        p.process(&mut frame, FilterVariant::HighPassCutoff, &settings).unwrap();

        let expected = to_i16(&tone(40, 6000.0));
        for (a, b) in expected.iter().zip(&frame) {
            assert!((*a as i32 - *b as i32).abs() <= 2);
        }
    }

    #[test]
    fn test_channels_processed_independently() {
        let mut p = SpectralProcessor::new(N, 2, RATE);
        let left = to_i16(&tone(1, 9000.0));
        let mut frame: Vec<i16> = left.iter().flat_map(|&l| [l, 0]).collect();
        let settings = FilterSettings {
            gain_bass: 0.0,
            ..FilterSettings::default()
        };
        p.process(&mut frame, FilterVariant::ThreeBandEq, &settings).unwrap();
        assert!(frame.iter().skip(1).step_by(2).all(|&s| s == 0));
        assert!(frame.iter().step_by(2).all(|&s| s.abs() <= 1));
    }

    #[test]
    fn test_wrong_frame_length() {
        let mut p = SpectralProcessor::new(N, 1, RATE);
        let mut frame = vec![0i16; N - 1];
        let err = p
            .process(&mut frame, FilterVariant::ThreeBandEq, &FilterSettings::default())
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_crossover_bins() {
        let p = SpectralProcessor::new(N, 1, RATE);
        assert_eq!(p.bin_frequency(1), 187.5);
        assert!(p.bin_frequency(2) > BASS_CROSSOVER_HZ);
        assert!(p.bin_frequency(16) == MID_CROSSOVER_HZ);
    }
}
