//! Automatic gain control.
//!
//! Dual-speed peak tracker: a fast follower reacts to bursts, a slow
//! follower holds the long-term level, and a hang timer keeps the slow
//! follower from collapsing the gain during short pauses. The input is
//! delayed so the gain applied to a sample reflects the magnitude history
//! around it rather than only what came before.

use num_complex::Complex32;

use crate::error::DspError;

/// Time constants are in samples; sizes are in samples.
#[derive(Clone, Copy, Debug)]
pub struct AgcParams {
    pub fast_rise_t: f32,
    pub fast_fall_t: f32,
    pub slow_rise_t: f32,
    pub slow_fall_t: f32,
    pub hang_max: f32,
    pub delay_line_size: usize,
    pub mag_history_size: usize,
    /// Peaks below this magnitude leave the gain untouched.
    pub threshold: f32,
}

impl AgcParams {
    fn validate(&self) -> Result<(), DspError> {
        if self.fast_rise_t <= 0.0
            || self.fast_fall_t <= 0.0
            || self.slow_rise_t <= 0.0
            || self.slow_fall_t <= 0.0
        {
            return Err(DspError::InvalidAgcParams("non-positive time constant"));
        }
        if self.hang_max < 0.0 {
            return Err(DspError::InvalidAgcParams("negative hang time"));
        }
        if self.delay_line_size == 0 || self.mag_history_size == 0 {
            return Err(DspError::InvalidAgcParams("zero-length line"));
        }
        Ok(())
    }
}

pub struct Agc {
    delay_line: Vec<Complex32>,
    delay_pos: usize,

    mag_history: Vec<f32>,
    mag_pos: usize,
    mag_sum: f32,

    fast_level: f32,
    slow_level: f32,
    hang: f32,
    hang_max: f32,

    fast_rise_alpha: f32,
    fast_fall_alpha: f32,
    slow_rise_alpha: f32,
    slow_fall_alpha: f32,

    threshold: f32,
}

impl Agc {
    pub fn new(params: &AgcParams) -> Result<Self, DspError> {
        params.validate()?;
        Ok(Self {
            delay_line: vec![Complex32::ZERO; params.delay_line_size],
            delay_pos: 0,
            mag_history: vec![0.0; params.mag_history_size],
            mag_pos: 0,
            mag_sum: 0.0,
            fast_level: 0.0,
            slow_level: 0.0,
            hang: 0.0,
            hang_max: params.hang_max,
            fast_rise_alpha: 1.0 / params.fast_rise_t,
            fast_fall_alpha: 1.0 / params.fast_fall_t,
            slow_rise_alpha: 1.0 / params.slow_rise_t,
            slow_fall_alpha: 1.0 / params.slow_fall_t,
            threshold: params.threshold,
        })
    }

    /// Feeds one sample, returning the delayed, gain-corrected sample.
    pub fn feed(&mut self, x: Complex32) -> Complex32 {
        // Smoothed input level over the magnitude history window.
        let mag = x.norm();
        self.mag_sum += mag - self.mag_history[self.mag_pos];
        self.mag_history[self.mag_pos] = mag;
        self.mag_pos = (self.mag_pos + 1) % self.mag_history.len();
        let level = (self.mag_sum / self.mag_history.len() as f32).max(0.0);

        // Fast follower: short attack, short release.
        if level > self.fast_level {
            self.fast_level += (level - self.fast_level) * self.fast_rise_alpha;
        } else {
            self.fast_level += (level - self.fast_level) * self.fast_fall_alpha;
        }

        // Slow follower: the hang timer defers the release.
        if level > self.slow_level {
            self.slow_level += (level - self.slow_level) * self.slow_rise_alpha;
            self.hang = 0.0;
        } else if self.hang < self.hang_max {
            self.hang += 1.0;
        } else {
            self.slow_level += (level - self.slow_level) * self.slow_fall_alpha;
        }

        let delayed = self.delay_line[self.delay_pos];
        self.delay_line[self.delay_pos] = x;
        self.delay_pos = (self.delay_pos + 1) % self.delay_line.len();

        // Output normalized a fixed 2*sqrt(2) below the tracked peak; the
        // pipeline applies the matching makeup gain after the fact.
        let peak = self.fast_level.max(self.slow_level);
        if peak > self.threshold {
            delayed / (2.0 * std::f32::consts::SQRT_2 * peak)
        } else {
            delayed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> AgcParams {
        AgcParams {
            fast_rise_t: 4.0,
            fast_fall_t: 8.0,
            slow_rise_t: 40.0,
            slow_fall_t: 80.0,
            hang_max: 2.0,
            delay_line_size: 4,
            mag_history_size: 4,
            threshold: 1e-4,
        }
    }

    #[test]
    fn rejects_degenerate_params() {
        let mut params = test_params();
        params.fast_rise_t = 0.0;
        assert!(Agc::new(&params).is_err());

        let mut params = test_params();
        params.delay_line_size = 0;
        assert!(Agc::new(&params).is_err());
    }

    #[test]
    fn normalizes_a_constant_envelope() {
        let mut agc = Agc::new(&test_params()).unwrap();
        let x = Complex32::new(3.0, 0.0);
        let mut out = Complex32::ZERO;
        for _ in 0..2_000 {
            out = agc.feed(x);
        }
        // Converged output magnitude sits near 1/(2*sqrt(2)) so the
        // pipeline's 2*sqrt(2) makeup gain lands the peak near 1.
        let target = 1.0 / (2.0 * std::f32::consts::SQRT_2);
        assert!((out.norm() - target).abs() < 0.1, "norm = {}", out.norm());
    }

    #[test]
    fn leaves_silence_untouched() {
        let mut agc = Agc::new(&test_params()).unwrap();
        for _ in 0..100 {
            let out = agc.feed(Complex32::ZERO);
            assert_eq!(out, Complex32::ZERO);
        }
    }
}
