//! OFDM modulation/demodulation.
//!
//! Time-domain symbols are produced with an IFFT plus a fixed `CP`-sample
//! cyclic prefix; the reverse on receive strips the CP and runs the
//! forward FFT. Unlike a 3GPP numerology, the reference configuration has
//! one fixed FFT size and one fixed CP length for every symbol — there is
//! no per-symbol CP-length table to maintain.

use common::{CP, NFFT};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex};

/// Shared FFT engine for both TX (IFFT) and RX (FFT), so construction cost
/// (the rustfft planner) is paid once.
pub struct OfdmEngine {
    ifft: Arc<dyn Fft<f32>>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Mutex<Vec<Complex32>>,
}

impl OfdmEngine {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(NFFT);
        let fft = planner.plan_fft_forward(NFFT);
        let scratch_len = ifft.get_inplace_scratch_len().max(fft.get_inplace_scratch_len());
        Self {
            ifft,
            fft,
            scratch: Mutex::new(vec![Complex32::new(0.0, 0.0); scratch_len]),
        }
    }

    /// Modulate one frequency-domain symbol (`NFFT` cells) into `NFFT + CP`
    /// time-domain samples.
    pub fn modulate_symbol(&self, freq: &[Complex32]) -> Vec<Complex32> {
        debug_assert_eq!(freq.len(), NFFT);
        let mut time = freq.to_vec();
        {
            let mut scratch = self.scratch.lock().unwrap();
            self.ifft.process_with_scratch(&mut time, &mut scratch);
        }
        let scale = 1.0 / (NFFT as f32).sqrt();
        for s in &mut time {
            *s *= scale;
        }
        let mut out = Vec::with_capacity(NFFT + CP);
        out.extend_from_slice(&time[NFFT - CP..]);
        out.extend_from_slice(&time);
        out
    }

    /// Demodulate `NFFT + CP` time-domain samples back to `NFFT`
    /// frequency-domain cells, discarding the cyclic prefix.
    pub fn demodulate_symbol(&self, samples: &[Complex32]) -> Vec<Complex32> {
        debug_assert_eq!(samples.len(), NFFT + CP);
        let mut freq: Vec<Complex32> = samples[CP..].to_vec();
        {
            let mut scratch = self.scratch.lock().unwrap();
            self.fft.process_with_scratch(&mut freq, &mut scratch);
        }
        let scale = 1.0 / (NFFT as f32).sqrt();
        for s in &mut freq {
            *s *= scale;
        }
        freq
    }
}

impl Default for OfdmEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples per OFDM symbol including the cyclic prefix.
pub const SYMBOL_LEN: usize = NFFT + CP;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulate_demodulate_round_trips_at_zero_noise() {
        let engine = OfdmEngine::new();
        let mut freq = vec![Complex32::new(0.0, 0.0); NFFT];
        for (i, c) in freq.iter_mut().enumerate() {
            *c = Complex32::new((i as f32 * 0.37).sin(), (i as f32 * 0.61).cos());
        }
        freq[0] = Complex32::new(0.0, 0.0); // DC is always null

        let time = engine.modulate_symbol(&freq);
        assert_eq!(time.len(), SYMBOL_LEN);

        let recovered = engine.demodulate_symbol(&time);
        for (a, b) in freq.iter().zip(recovered.iter()) {
            assert!((a - b).norm() < 1e-3, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn cyclic_prefix_is_a_copy_of_the_symbol_tail() {
        let engine = OfdmEngine::new();
        let freq = vec![Complex32::new(1.0, 0.0); NFFT];
        let time = engine.modulate_symbol(&freq);
        assert_eq!(&time[0..CP], &time[NFFT..NFFT + CP]);
    }
}
