//! Per-channel inspector: carrier recovery, AGC, blind baud estimation and
//! fractional symbol-timing sampling over one spectral channel.

use std::f32::consts::SQRT_2;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use num_complex::Complex32;
use serde::Serialize;

use crate::dsp::{
    self, Agc, AgcParams, ChannelDetector, Costas, CostasKind, DetectorMode, DetectorParams, Nco,
};
use crate::error::{DspError, FeedError};
use crate::source::{Channel, SOURCE_BUFSIZ, TaskId};

/// Detector smoothing constant.
const DETECTOR_ALPHA: f32 = 1e-4;

/// AGC time constants, as fractions of the samples-per-symbol estimate.
const AGC_FAST_RISE_FRAC: f32 = 0.39062;
const AGC_FAST_FALL_FRAC: f32 = 0.78124;
const AGC_SLOW_RISE_FRAC: f32 = 3.9062;
const AGC_SLOW_FALL_FRAC: f32 = 7.8124;
const AGC_HANG_MAX_FRAC: f32 = 0.19531;
/// Delay line and magnitude history length, as a fraction of
/// samples-per-symbol.
const AGC_LINE_FRAC: f32 = 0.39072;
const AGC_THRESHOLD: f32 = 1e-4;

/// Costas loop gain, as a fraction of the loop natural frequency.
const COSTAS_GAIN_FRAC: f32 = 1e-2;
const COSTAS_ORDER: u32 = 3;

/// Inspector lifecycle. Transitions are strictly monotonic.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Allocated, not yet registered.
    Created = 0,
    /// Registered; accepts control operations and worker dispatch.
    Running = 1,
    /// Close requested; the worker will not reschedule it.
    Halting = 2,
    /// The worker let go; the record may be reclaimed.
    Halted = 3,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Created,
            1 => State::Running,
            2 => State::Halting,
            _ => State::Halted,
        }
    }
}

/// Carrier control variant selected by the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum CarrierCtrl {
    /// No recovery loop; the mixer output is the sample.
    #[default]
    Manual,
    /// BPSK Costas loop.
    Costas2,
    /// QPSK Costas loop.
    Costas4,
}

/// User-tunable inspector configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Params {
    /// Client-assigned opaque label echoed in every outbound message tied
    /// to this inspector.
    pub inspector_id: u32,
    pub fc_ctrl: CarrierCtrl,
    /// Additional carrier offset, absolute Hz.
    pub fc_off: f32,
    /// Static carrier phase rotation, radians.
    pub fc_phi: f32,
    /// Expected baud rate, absolute; 0 disables the sampler.
    pub baud: f32,
    /// Fractional sampling phase within a symbol, in [0, 1).
    pub sym_phase: f32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            inspector_id: 0,
            fc_ctrl: CarrierCtrl::Manual,
            fc_off: 0.0,
            fc_phi: 0.0,
            baud: 0.0,
            sym_phase: 0.0,
        }
    }
}

/// Baud estimates from the two detectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BaudInfo {
    /// Envelope-autocorrelation estimate.
    pub fac: f32,
    /// Nonlinear-diff estimate.
    pub nln: f32,
}

/// DSP and sampler state, touched by one worker at a time and briefly by
/// the analyzer when parameters are retuned.
struct DspState {
    fac_baud_det: ChannelDetector,
    nln_baud_det: ChannelDetector,
    lo: Nco,
    /// Unit-modulus static carrier rotation.
    phase: Complex32,
    agc: Agc,
    costas_2: Costas,
    costas_4: Costas,

    samp_rate: f32,

    /// Samples per symbol; 0 disables the sampler.
    sym_period: f32,
    /// Accumulator in [0, sym_period).
    sym_phase: f32,
    sym_last_sample: Complex32,
    sym_sampler_output: Complex32,
    /// Set exactly when the sampler fires.
    sym_new_sample: bool,

    /// Cursor into the shared sample window, bound by the worker.
    cursor: Option<TaskId>,
}

pub struct Inspector {
    state: AtomicU8,
    params: Mutex<Params>,
    dsp: Mutex<DspState>,
}

impl Inspector {
    /// Builds the full per-channel pipeline for `channel` over a source
    /// running at `samp_rate`. Fails if the channel geometry or any derived
    /// sub-state is degenerate; partially constructed sub-states are torn
    /// down on the way out.
    pub fn new(samp_rate: f32, channel: &Channel) -> Result<Self, DspError> {
        if !(channel.bw > 0.0) || channel.bw > samp_rate {
            return Err(DspError::InvalidChannel("bandwidth outside (0, samp_rate]"));
        }

        let det_params = DetectorParams {
            mode: DetectorMode::Autocorrelation,
            samp_rate,
            fc: channel.fc,
            bw: channel.bw,
            window_size: SOURCE_BUFSIZ,
            alpha: DETECTOR_ALPHA,
        };
        let fac_baud_det = ChannelDetector::new(det_params)?;
        let nln_baud_det = ChannelDetector::new(DetectorParams {
            mode: DetectorMode::NonlinearDiff,
            ..det_params
        })?;

        // Samples per symbol at the channel's maximum symbol rate.
        let tau = samp_rate / channel.bw;
        let line = (tau * AGC_LINE_FRAC).round().max(1.0) as usize;
        let agc = Agc::new(&AgcParams {
            fast_rise_t: tau * AGC_FAST_RISE_FRAC,
            fast_fall_t: tau * AGC_FAST_FALL_FRAC,
            slow_rise_t: tau * AGC_SLOW_RISE_FRAC,
            slow_fall_t: tau * AGC_SLOW_FALL_FRAC,
            hang_max: tau * AGC_HANG_MAX_FRAC,
            delay_line_size: line,
            mag_history_size: line,
            threshold: AGC_THRESHOLD,
        })?;

        let omega = dsp::norm_freq(samp_rate, channel.bw);
        let costas_2 = Costas::new(
            CostasKind::Bpsk,
            0.0,
            omega,
            COSTAS_ORDER,
            COSTAS_GAIN_FRAC * omega,
        )?;
        let costas_4 = Costas::new(
            CostasKind::Qpsk,
            0.0,
            omega,
            COSTAS_ORDER,
            COSTAS_GAIN_FRAC * omega,
        )?;

        Ok(Self {
            state: AtomicU8::new(State::Created as u8),
            params: Mutex::new(Params::default()),
            dsp: Mutex::new(DspState {
                fac_baud_det,
                nln_baud_det,
                lo: Nco::new(0.0),
                phase: Complex32::new(1.0, 0.0),
                agc,
                costas_2,
                costas_4,
                samp_rate,
                sym_period: 0.0,
                sym_phase: 0.0,
                sym_last_sample: Complex32::ZERO,
                sym_sampler_output: Complex32::ZERO,
                sym_new_sample: false,
                cursor: None,
            }),
        })
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advances the lifecycle toward `to`. The state never decreases, so a
    /// late transition request against a further-along inspector is a
    /// no-op.
    pub fn advance_state(&self, to: State) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    pub fn params(&self) -> Params {
        *self.params.lock().unwrap()
    }

    /// Installs new parameters and retunes the mixer and sampler: the
    /// symbol period follows `baud`, the oscillator follows `fc_off` and
    /// the static rotation follows `fc_phi`.
    pub fn apply_params(&self, params: Params) {
        *self.params.lock().unwrap() = params;

        let mut st = self.dsp.lock().unwrap();
        st.sym_period = if params.baud > 0.0 {
            1.0 / dsp::norm_baud(st.samp_rate, params.baud)
        } else {
            0.0
        };
        let freq = dsp::norm_freq(st.samp_rate, params.fc_off);
        st.lo.set_freq(freq);
        st.phase = Complex32::from_polar(1.0, params.fc_phi);
    }

    /// Current estimates from both baud detectors.
    pub fn baud_info(&self) -> BaudInfo {
        let st = self.dsp.lock().unwrap();
        BaudInfo {
            fac: st.fac_baud_det.baud(),
            nln: st.nln_baud_det.baud(),
        }
    }

    pub fn sym_period(&self) -> f32 {
        self.dsp.lock().unwrap().sym_period
    }

    pub fn task_cursor(&self) -> Option<TaskId> {
        self.dsp.lock().unwrap().cursor
    }

    pub fn bind_cursor(&self, cursor: TaskId) {
        self.dsp.lock().unwrap().cursor = Some(cursor);
    }

    /// Runs the inner DSP loop over `samples`, returning the number of
    /// samples consumed. Returns as soon as one symbol sample has been
    /// produced so the caller can collect it and keep batching; an empty
    /// input consumes nothing and leaves all state untouched.
    pub fn feed_bulk(&self, samples: &[Complex32]) -> Result<usize, FeedError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let params = *self.params.lock().unwrap();
        let mut st = self.dsp.lock().unwrap();
        st.sym_new_sample = false;

        let mut consumed = 0usize;
        for &x in samples {
            st.fac_baud_det.feed(x)?;
            st.nln_baud_det.feed(x)?;

            // The windowed sample from the autocorrelation detector is the
            // canonical pre-mixer sample.
            let det_x = st.fac_baud_det.last_window_sample();
            let mixed = det_x * st.lo.read().conj() * st.phase;
            let leveled = st.agc.feed(mixed) * (2.0 * SQRT_2);

            let sample = match params.fc_ctrl {
                CarrierCtrl::Manual => leveled,
                CarrierCtrl::Costas2 => {
                    st.costas_2.feed(leveled);
                    st.costas_2.y()
                }
                CarrierCtrl::Costas4 => {
                    st.costas_4.feed(leveled);
                    st.costas_4.y()
                }
            };

            consumed += 1;

            if st.sym_period >= 1.0 {
                st.sym_phase += 1.0;
                if st.sym_phase >= st.sym_period {
                    st.sym_phase -= st.sym_period;
                }
                let target = params.sym_phase * st.sym_period;
                if (st.sym_phase - target).floor() == 0.0 {
                    let alpha = st.sym_phase - st.sym_phase.floor();
                    st.sym_sampler_output =
                        (st.sym_last_sample * (1.0 - alpha) + sample * alpha) * 0.5;
                    st.sym_new_sample = true;
                }
            }

            st.sym_last_sample = sample;

            if st.sym_new_sample {
                break;
            }
        }

        Ok(consumed)
    }

    /// The symbol sample produced by the last `feed_bulk` call, if that
    /// call fired the sampler.
    pub fn sampler_output(&self) -> Option<Complex32> {
        let st = self.dsp.lock().unwrap();
        st.sym_new_sample.then_some(st.sym_sampler_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f32 = 48_000.0;

    fn test_channel() -> Channel {
        Channel {
            fc: 0.0,
            bw: 4_800.0,
        }
    }

    fn ones(n: usize) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); n]
    }

    #[test]
    fn construction_starts_created_with_sampler_off() {
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        assert_eq!(insp.state(), State::Created);
        assert_eq!(insp.sym_period(), 0.0);
        assert_eq!(insp.params(), Params::default());
    }

    #[test]
    fn rejects_a_degenerate_channel() {
        assert!(Inspector::new(FS, &Channel { fc: 0.0, bw: 0.0 }).is_err());
        assert!(
            Inspector::new(
                FS,
                &Channel {
                    fc: 0.0,
                    bw: FS * 2.0
                }
            )
            .is_err()
        );
    }

    #[test]
    fn state_transitions_never_decrease() {
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        insp.advance_state(State::Running);
        insp.advance_state(State::Halted);
        // A late Halting request must not roll the state back.
        insp.advance_state(State::Halting);
        assert_eq!(insp.state(), State::Halted);
    }

    #[test]
    fn set_params_derives_the_symbol_period() {
        // Baud 1200 at 48 kHz gives 40 samples per symbol.
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        let params = Params {
            inspector_id: 7,
            baud: 1_200.0,
            sym_phase: 0.5,
            ..Params::default()
        };
        insp.apply_params(params);
        assert_eq!(insp.params(), params);
        assert_eq!(insp.sym_period(), FS / 1_200.0);
    }

    #[test]
    fn set_params_keeps_the_rotor_on_the_unit_circle() {
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        for phi in [0.0f32, 0.7, -2.1, 3.14, 12.0] {
            insp.apply_params(Params {
                fc_phi: phi,
                ..Params::default()
            });
            let st = insp.dsp.lock().unwrap();
            assert!((st.phase.norm() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_feed_consumes_nothing() {
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        insp.apply_params(Params {
            baud: 4_800.0,
            ..Params::default()
        });
        assert_eq!(insp.feed_bulk(&[]).unwrap(), 0);
        assert!(insp.sampler_output().is_none());
    }

    #[test]
    fn sampler_disabled_without_a_baud() {
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        let mut fed = 0;
        while fed < 2_048 {
            fed += insp.feed_bulk(&ones(256)).unwrap();
            assert!(insp.sampler_output().is_none());
        }
    }

    #[test]
    fn sampler_fires_once_per_symbol_period() {
        // Ten samples per symbol, sampling phase 0: feeding 25 samples
        // yields two symbols across successive calls, the first of which
        // returns after ten samples.
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        insp.apply_params(Params {
            baud: FS / 10.0,
            ..Params::default()
        });
        assert_eq!(insp.sym_period(), 10.0);

        let input = ones(25);
        let mut offset = 0usize;
        let mut symbols = 0usize;
        let mut calls = Vec::new();
        while offset < input.len() {
            let fed = insp.feed_bulk(&input[offset..]).unwrap();
            calls.push(fed);
            if insp.sampler_output().is_some() {
                symbols += 1;
            }
            offset += fed;
        }

        assert_eq!(symbols, 2);
        assert_eq!(calls, vec![10, 10, 5]);
    }

    #[test]
    fn feed_fails_on_a_non_finite_sample() {
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        let bad = [Complex32::new(f32::NAN, 0.0)];
        assert!(insp.feed_bulk(&bad).is_err());
    }

    #[test]
    fn interpolated_symbol_is_half_the_blend() {
        // With a constant post-recovery sample the interpolation collapses
        // to half the sample value, whatever the fractional phase.
        let insp = Inspector::new(FS, &test_channel()).unwrap();
        insp.apply_params(Params {
            baud: FS / 10.0,
            ..Params::default()
        });

        // Let the AGC settle on the constant envelope first.
        for _ in 0..40 {
            let fed = insp.feed_bulk(&ones(512)).unwrap();
            assert!(fed > 0);
        }
        insp.feed_bulk(&ones(10)).unwrap();
        let sym = insp.sampler_output().expect("sampler should have fired");
        let last = {
            let st = insp.dsp.lock().unwrap();
            st.sym_last_sample
        };
        assert!((sym - last * 0.5).norm() < 1e-3, "sym = {sym}, last = {last}");
    }
}
