//! Channel detector: centers the channel of interest, low-passes it to the
//! channel bandwidth, and keeps a sliding window over which it produces a
//! blind baud-rate estimate.
//!
//! Two estimation modes exist. Autocorrelation (FAC) looks for the lag
//! that maximizes the mean-removed autocorrelation of the envelope, which
//! peaks at the symbol period of a shaped PSK signal. Nonlinear-diff (NLN)
//! applies a differential magnitude nonlinearity first, which turns symbol
//! transitions into pulses whose periodicity is sharper for constant
//! envelope signals.

use num_complex::Complex32;

use crate::dsp::nco::Nco;
use crate::error::DspError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorMode {
    /// Envelope autocorrelation peak (FAC).
    Autocorrelation,
    /// Differential nonlinearity periodicity (NLN).
    NonlinearDiff,
}

#[derive(Clone, Copy, Debug)]
pub struct DetectorParams {
    pub mode: DetectorMode,
    pub samp_rate: f32,
    /// Channel center frequency, absolute Hz.
    pub fc: f32,
    /// Channel bandwidth, Hz.
    pub bw: f32,
    pub window_size: usize,
    /// Smoothing constant for the running estimate.
    pub alpha: f32,
}

impl DetectorParams {
    fn validate(&self) -> Result<(), DspError> {
        if self.samp_rate <= 0.0 {
            return Err(DspError::InvalidDetectorParams("non-positive sample rate"));
        }
        if self.bw <= 0.0 || self.bw > self.samp_rate {
            return Err(DspError::InvalidDetectorParams(
                "bandwidth outside (0, samp_rate]",
            ));
        }
        if self.window_size < 8 {
            return Err(DspError::InvalidDetectorParams("window too short"));
        }
        if self.alpha <= 0.0 || self.alpha > 1.0 {
            return Err(DspError::InvalidDetectorParams("alpha outside (0, 1]"));
        }
        Ok(())
    }
}

pub struct ChannelDetector {
    params: DetectorParams,
    /// Centering oscillator at the channel center frequency.
    lo: Nco,
    /// One-pole low-pass state; this is the windowed pre-mixer sample the
    /// inspector pipeline taps.
    lp_state: Complex32,
    lp_alpha: f32,
    prev: Complex32,

    /// Per-mode scalar sequence the estimator runs over.
    window: Vec<f32>,
    pos: usize,

    min_lag: usize,
    baud: f32,
}

impl ChannelDetector {
    pub fn new(params: DetectorParams) -> Result<Self, DspError> {
        params.validate()?;
        // Low-pass pole matched to the channel bandwidth.
        let lp_alpha = (params.bw / params.samp_rate).min(1.0);
        // The low-pass smears each symbol transition over roughly
        // samp_rate / bw samples; lags inside that main lobe always win the
        // scan, so they are excluded.
        let min_lag = ((1.5 * params.samp_rate / params.bw) as usize).max(4);
        Ok(Self {
            lo: Nco::new(params.fc / params.samp_rate),
            lp_state: Complex32::ZERO,
            lp_alpha,
            prev: Complex32::ZERO,
            window: vec![0.0; params.window_size],
            pos: 0,
            min_lag,
            baud: 0.0,
            params,
        })
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// The centered, low-passed sample produced by the last feed.
    pub fn last_window_sample(&self) -> Complex32 {
        self.lp_state
    }

    /// Current blind baud estimate; 0 until the first full window.
    pub fn baud(&self) -> f32 {
        self.baud
    }

    pub fn feed(&mut self, x: Complex32) -> Result<(), DspError> {
        if !x.re.is_finite() || !x.im.is_finite() {
            return Err(DspError::NonFiniteSample);
        }

        let centered = x * self.lo.read().conj();
        self.lp_state += (centered - self.lp_state) * self.lp_alpha;

        let m = match self.params.mode {
            DetectorMode::Autocorrelation => self.lp_state.norm(),
            DetectorMode::NonlinearDiff => (self.lp_state - self.prev).norm_sqr(),
        };
        self.prev = self.lp_state;

        self.window[self.pos] = m;
        self.pos += 1;
        if self.pos == self.window.len() {
            self.pos = 0;
            self.update_estimate();
        }
        Ok(())
    }

    /// Scans the mean-removed autocorrelation of the transition sequence
    /// for its peak lag and folds the implied rate into the smoothed
    /// estimate. Symbol transitions show up as impulses on a grid whose
    /// pitch is the symbol period, so the correlation peaks there.
    fn update_estimate(&mut self) {
        // The envelope itself only carries the within-symbol triangle; its
        // first difference isolates the transitions. The nonlinear-diff
        // window is already impulsive.
        let seq: Vec<f32> = match self.params.mode {
            DetectorMode::Autocorrelation => self
                .window
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .collect(),
            DetectorMode::NonlinearDiff => self.window.clone(),
        };

        let n = seq.len();
        let mean = seq.iter().sum::<f32>() / n as f32;

        let max_lag = n / 2;
        if self.min_lag >= max_lag {
            return;
        }

        let mut rs = vec![0.0f32; max_lag];
        let mut best_r = 0.0f32;
        for lag in self.min_lag..max_lag {
            let mut r = 0.0f32;
            for i in 0..n - lag {
                r += (seq[i] - mean) * (seq[i + lag] - mean);
            }
            r /= (n - lag) as f32;
            rs[lag] = r;
            best_r = best_r.max(r);
        }
        if best_r <= 0.0 {
            return;
        }

        // Every multiple of the symbol period correlates about equally
        // well; the fundamental is the smallest lag near the maximum.
        let Some(best_lag) = (self.min_lag..max_lag).find(|&lag| rs[lag] >= 0.9 * best_r) else {
            return;
        };
        let estimate = self.params.samp_rate / best_lag as f32;
        if self.baud == 0.0 {
            self.baud = estimate;
        } else {
            // Heavier smoothing than the per-sample alpha: one update per
            // window, not per sample.
            let alpha = (self.params.alpha * n as f32).min(1.0);
            self.baud += (estimate - self.baud) * alpha;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params(mode: DetectorMode) -> DetectorParams {
        DetectorParams {
            mode,
            samp_rate: 8_000.0,
            fc: 0.0,
            bw: 2_000.0,
            window_size: 256,
            alpha: 1e-2,
        }
    }

    #[test]
    fn rejects_degenerate_params() {
        let mut params = test_params(DetectorMode::Autocorrelation);
        params.bw = 0.0;
        assert!(ChannelDetector::new(params).is_err());

        let mut params = test_params(DetectorMode::Autocorrelation);
        params.window_size = 4;
        assert!(ChannelDetector::new(params).is_err());
    }

    #[test]
    fn rejects_non_finite_samples() {
        let mut det = ChannelDetector::new(test_params(DetectorMode::Autocorrelation)).unwrap();
        assert!(det.feed(Complex32::new(f32::NAN, 0.0)).is_err());
    }

    #[test]
    fn estimates_the_envelope_period() {
        // On-off keying at 16 samples per symbol: the envelope
        // autocorrelation peaks at the symbol period.
        let mut det = ChannelDetector::new(test_params(DetectorMode::Autocorrelation)).unwrap();
        let period = 16usize;
        let pattern = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        for n in 0..4_096 {
            let bit = pattern[(n / period) % pattern.len()];
            det.feed(Complex32::new(bit, 0.0)).unwrap();
        }
        let expected = 8_000.0 / period as f32;
        let baud = det.baud();
        assert!(
            (baud - expected).abs() / expected < 0.5,
            "baud = {baud}, expected ~{expected}"
        );
    }

    #[test]
    fn baud_is_zero_before_the_first_window() {
        let mut det = ChannelDetector::new(test_params(DetectorMode::NonlinearDiff)).unwrap();
        for _ in 0..16 {
            det.feed(Complex32::new(1.0, 0.0)).unwrap();
        }
        assert_eq!(det.baud(), 0.0);
    }
}
