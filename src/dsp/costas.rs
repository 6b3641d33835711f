//! Costas phase-locked loops for suppressed-carrier recovery.

use std::f32::consts::{FRAC_1_SQRT_2, PI, TAU};

use num_complex::Complex32;

use crate::error::DspError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CostasKind {
    /// Two-point constellation; error detector `re * im`.
    Bpsk,
    /// Four-point constellation; error detector
    /// `sign(re) * im - sign(im) * re`.
    Qpsk,
}

/// A Costas loop: an NCO steered by a phase-error detector through a
/// proportional-plus-integral filter, with a second integrator engaged for
/// loop orders above two so constant frequency drift settles with zero
/// residual error.
pub struct Costas {
    kind: CostasKind,
    phase: f32,
    /// rad/sample
    freq: f32,
    max_freq: f32,

    gain: f32,
    alpha: f32,
    beta: f32,
    gamma: f32,
    accel: f32,

    y: Complex32,
}

impl Costas {
    /// `f0` and `omega` are normalized (cycles per sample); `omega` is the
    /// loop natural frequency.
    pub fn new(
        kind: CostasKind,
        f0: f32,
        omega: f32,
        order: u32,
        loop_gain: f32,
    ) -> Result<Self, DspError> {
        if omega <= 0.0 {
            return Err(DspError::InvalidLoopParams("non-positive natural frequency"));
        }
        if loop_gain <= 0.0 {
            return Err(DspError::InvalidLoopParams("non-positive loop gain"));
        }
        if order < 2 {
            return Err(DspError::InvalidLoopParams("loop order below 2"));
        }

        let wn = TAU * omega;
        let zeta = FRAC_1_SQRT_2;
        let denom = 1.0 + 2.0 * zeta * wn + wn * wn;
        let alpha = 4.0 * zeta * wn / denom;
        let beta = 4.0 * wn * wn / denom;
        // The second integrator must shrink with the loop gain, or small
        // gains leave the acceleration term dominating the damped terms.
        let gamma = if order > 2 {
            beta * beta * 0.25 * loop_gain
        } else {
            0.0
        };

        Ok(Self {
            kind,
            phase: 0.0,
            freq: TAU * f0,
            max_freq: 2.0 * wn.max(TAU * f0.abs()),
            gain: loop_gain,
            alpha,
            beta,
            gamma,
            accel: 0.0,
            y: Complex32::ZERO,
        })
    }

    /// Mixes one sample against the recovered carrier and updates the loop.
    pub fn feed(&mut self, x: Complex32) {
        let y = x * Complex32::from_polar(1.0, -self.phase);

        let err = match self.kind {
            CostasKind::Bpsk => y.re * y.im,
            CostasKind::Qpsk => sign(y.re) * y.im - sign(y.im) * y.re,
        };
        let err = (err * self.gain).clamp(-1.0, 1.0);

        self.accel += self.gamma * err;
        self.freq = (self.freq + self.beta * err + self.accel)
            .clamp(-self.max_freq, self.max_freq);
        self.phase += self.freq + self.alpha * err;
        if self.phase > PI || self.phase < -PI {
            self.phase -= TAU * (self.phase / TAU).round();
        }

        self.y = y;
    }

    /// Most recent derotated sample.
    pub fn y(&self) -> Complex32 {
        self.y
    }
}

fn sign(v: f32) -> f32 {
    if v >= 0.0 { 1.0 } else { -1.0 }
}
