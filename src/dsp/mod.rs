//! DSP primitives used by the inspector pipeline: oscillator, AGC,
//! Costas loops and the channel detector with its blind baud estimators.

pub mod agc;
pub mod costas;
pub mod detector;
pub mod nco;

pub use agc::{Agc, AgcParams};
pub use costas::{Costas, CostasKind};
pub use detector::{ChannelDetector, DetectorMode, DetectorParams};
pub use nco::Nco;

/// Absolute frequency in Hz to normalized frequency in cycles per sample.
pub fn norm_freq(samp_rate: f32, freq: f32) -> f32 {
    freq / samp_rate
}

/// Absolute baud rate to symbols per sample.
pub fn norm_baud(samp_rate: f32, baud: f32) -> f32 {
    baud / samp_rate
}
