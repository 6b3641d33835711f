//! Numerically-controlled oscillator.

use std::f32::consts::{PI, TAU};

use num_complex::Complex32;

/// Discrete-time oscillator parameterized by normalized frequency
/// (cycles per sample). Each [`Nco::read`] returns the current phasor and
/// advances the phase by one sample.
#[derive(Clone, Debug)]
pub struct Nco {
    phase: f32,
    freq: f32,
}

impl Nco {
    pub fn new(freq_norm: f32) -> Self {
        Self {
            phase: 0.0,
            freq: freq_norm,
        }
    }

    pub fn set_freq(&mut self, freq_norm: f32) {
        self.freq = freq_norm;
    }

    pub fn freq(&self) -> f32 {
        self.freq
    }

    /// Returns the current unit phasor and advances one sample.
    pub fn read(&mut self) -> Complex32 {
        let out = Complex32::from_polar(1.0, self.phase);
        self.phase += TAU * self.freq;
        // Keep the accumulator in (-pi, pi] so it never loses precision.
        if self.phase > PI || self.phase < -PI {
            self.phase -= TAU * (self.phase / TAU).round();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_rate_oscillator_cycles_every_four_samples() {
        let mut nco = Nco::new(0.25);
        let s0 = nco.read();
        for _ in 0..3 {
            nco.read();
        }
        let s4 = nco.read();
        assert!((s0 - s4).norm() < 1e-5);
    }

    #[test]
    fn phase_stays_bounded() {
        let mut nco = Nco::new(0.3);
        for _ in 0..10_000 {
            let s = nco.read();
            assert!((s.norm() - 1.0).abs() < 1e-4);
        }
    }
}
