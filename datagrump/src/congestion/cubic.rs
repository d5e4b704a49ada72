//! CUBIC-style window growth anchored at the last cut.
//!
//! W(t) = C * (t - K)^3 + w_max
//!   where t is seconds since the curve's epoch (flow start or last cut)
//!   and K = cbrt(beta * w_max / C).
//! Each ack re-evaluates W(t); the window never retreats between cuts and
//! always advances by at least `responsiveness / cwnd`.
//! On an RTT above the delay threshold (at most once per 2 * threshold):
//!   w_max = the window evaluated at that ack, cwnd = beta * w_max.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::congestion::{
    Step, StrategyKind, Update, WindowStrategy, DEFAULT_RETRANSMISSION_TIMEOUT_MS,
};
use crate::error::{DatagrumpError, Result};
use crate::event::{AckSample, Clock};
use crate::telemetry::{CutReason, Probe, SkipReason, TelemetryEvent};

/// Default window the first cubic climb is anchored at.
const WINDOW_MAX: f64 = 20.0;
/// Default multiplicative-decrease factor.
const BETA: f64 = 0.5;
/// Default cubic scaling constant.
const SCALING_C: f64 = 3.5;
const DELAY_THRESHOLD_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubicConfig {
    /// Initial `w_max`; the flow starts at `beta * window_max`.
    pub window_max: f64,
    pub beta: f64,
    pub scaling_c: f64,
    /// Scales the minimum per-ack increase `1 / cwnd`.
    pub responsiveness: f64,
    pub delay_threshold_ms: u64,
    pub retransmission_timeout_ms: u64,
}

impl Default for CubicConfig {
    fn default() -> Self {
        Self {
            window_max: WINDOW_MAX,
            beta: BETA,
            scaling_c: SCALING_C,
            responsiveness: 1.0,
            delay_threshold_ms: DELAY_THRESHOLD_MS,
            retransmission_timeout_ms: DEFAULT_RETRANSMISSION_TIMEOUT_MS,
        }
    }
}

impl CubicConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(DatagrumpError::invalid("beta", self.beta, "0 < beta < 1"));
        }
        if !(self.scaling_c > 0.0 && self.scaling_c.is_finite()) {
            return Err(DatagrumpError::invalid(
                "scaling_c",
                self.scaling_c,
                "a finite value > 0",
            ));
        }
        if !(self.window_max >= 1.0 && self.window_max.is_finite()) {
            return Err(DatagrumpError::invalid(
                "window_max",
                self.window_max,
                "a finite value >= 1",
            ));
        }
        if !(self.responsiveness > 0.0 && self.responsiveness.is_finite()) {
            return Err(DatagrumpError::invalid(
                "responsiveness",
                self.responsiveness,
                "a finite value > 0",
            ));
        }
        if self.delay_threshold_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("delay_threshold_ms"));
        }
        if self.retransmission_timeout_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("retransmission_timeout_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CubicState {
    /// Window at the last cut; the inflection point of the curve.
    pub window_max: f64,
    /// Origin of `t`. Set by the first ack, then by every cut.
    pub epoch: Option<Clock>,
    /// Time of the last real cut; rate-limits delay cuts.
    pub last_cut_time: Option<Clock>,
    pub beta: f64,
    pub scaling_c: f64,
    pub current_window: f64,
}

impl CubicState {
    /// Time offset of the inflection point, in seconds.
    pub fn k(&self) -> f64 {
        (self.beta * self.window_max / self.scaling_c).cbrt()
    }

    /// Raw curve value `t` seconds after the last cut.
    pub fn cubic_window(&self, t: f64) -> f64 {
        let dt = t - self.k();
        self.scaling_c * dt * dt * dt + self.window_max
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cubic {
    config: CubicConfig,
}

impl Cubic {
    pub fn new(config: CubicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CubicConfig {
        &self.config
    }

    /// Window proposed `elapsed_ms` after the last cut.
    ///
    /// Floors the curve at one datagram, refuses to go below
    /// `current_window`, and enforces the minimum step.
    pub fn evaluate(&self, state: &CubicState, elapsed_ms: u64, probe: &mut Probe) -> f64 {
        let t = elapsed_ms as f64 / 1000.0;
        let w_cubic = state.cubic_window(t).max(1.0);
        let current = state.current_window.max(1.0);

        let s_min = self.config.responsiveness / current;
        let window_diff = (w_cubic - current).max(0.0);
        let window = if window_diff < s_min {
            current + s_min
        } else {
            w_cubic
        };

        probe.emit(TelemetryEvent::CubicEvaluated {
            k: state.k(),
            t,
            w_cubic,
            window,
        });
        window
    }
}

impl WindowStrategy for Cubic {
    type State = CubicState;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Cubic
    }

    fn initial_state(&self) -> CubicState {
        CubicState {
            window_max: self.config.window_max,
            epoch: None,
            last_cut_time: None,
            beta: self.config.beta,
            scaling_c: self.config.scaling_c,
            current_window: (self.config.beta * self.config.window_max).max(1.0),
        }
    }

    fn on_ack(
        &self,
        state: &CubicState,
        sample: &AckSample,
        probe: &mut Probe,
    ) -> Step<CubicState> {
        let now = sample.now();
        let epoch = state.epoch.unwrap_or(now);
        let elapsed = now.checked_sub(epoch).ok_or(SkipReason::ClockRegression)?;
        let cut_allowed = match state.last_cut_time {
            None => true,
            Some(last) => {
                let since = now.checked_sub(last).ok_or(SkipReason::ClockRegression)?;
                since >= self.config.delay_threshold_ms.saturating_mul(2)
            }
        };

        let evaluated = self.evaluate(state, elapsed, probe);
        let mut next = state.clone();

        if sample.rtt > self.config.delay_threshold_ms && cut_allowed {
            next.window_max = evaluated;
            next.epoch = Some(now);
            next.last_cut_time = Some(now);
            next.current_window = (state.beta * evaluated).max(1.0);
            debug!(
                rtt = sample.rtt,
                window_max = next.window_max,
                to = next.current_window,
                "cubic: rtt above threshold, re-anchoring curve"
            );
            return Ok(Update::cut(next, CutReason::Delay));
        }

        next.epoch = Some(epoch);
        next.current_window = evaluated;
        trace!(elapsed, window = evaluated, "cubic: window evaluated");
        Ok(Update::steady(next))
    }

    /// Restart the curve so that it passes through one datagram at `now`:
    /// (1 - beta) * w_max = 1.
    fn collapse(&self, state: &CubicState, now: Clock) -> CubicState {
        CubicState {
            window_max: 1.0 / (1.0 - state.beta),
            epoch: Some(now),
            last_cut_time: Some(now),
            current_window: 1.0,
            ..state.clone()
        }
    }

    fn window(&self, state: &CubicState) -> f64 {
        state.current_window
    }

    fn retransmission_timeout(&self) -> u64 {
        self.config.retransmission_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AckEvent;

    fn sample(seq: u64, rtt: u64, ack_time: Clock) -> AckSample {
        AckSample::from_event(AckEvent::new(seq, ack_time - rtt, 0, ack_time)).unwrap()
    }

    #[test]
    fn initial_window_is_beta_times_max() {
        let c = Cubic::default();
        let s = c.initial_state();
        assert_eq!(s.current_window, 10.0);
        assert_eq!(s.window_max, WINDOW_MAX);
    }

    #[test]
    fn k_places_inflection_at_window_max() {
        let c = Cubic::default();
        let s = c.initial_state();
        let k = s.k();
        assert!((s.cubic_window(k) - s.window_max).abs() < 1e-9);
        // beta * w_max / C = 0.5 * 20 / 3.5
        assert!((k.powi(3) - 10.0 / 3.5).abs() < 1e-9);
    }

    #[test]
    fn first_fast_ack_anchors_epoch() {
        let c = Cubic::default();
        let update = c
            .on_ack(&c.initial_state(), &sample(0, 40, 10_000), &mut Probe::default())
            .unwrap();
        assert!(update.cut.is_none());
        assert_eq!(update.state.epoch, Some(10_000));
        assert_eq!(update.state.last_cut_time, None);
    }

    #[test]
    fn first_slow_ack_may_cut() {
        let c = Cubic::default();
        let update = c
            .on_ack(&c.initial_state(), &sample(0, 300, 10_000), &mut Probe::default())
            .unwrap();
        assert_eq!(update.cut, Some(CutReason::Delay));
        assert_eq!(update.state.last_cut_time, Some(10_000));
        assert_eq!(update.state.epoch, Some(10_000));
    }

    #[test]
    fn flat_curve_takes_minimum_step() {
        let c = Cubic::default();
        let s = c.initial_state();
        // At t = 0 the curve sits at w_max - beta * w_max = 10, same as cwnd.
        let w = c.evaluate(&s, 0, &mut Probe::default());
        assert!((w - (10.0 + 1.0 / 10.0)).abs() < 1e-9, "w = {w}");
    }

    #[test]
    fn steep_curve_is_followed() {
        let c = Cubic::default();
        let s = c.initial_state();
        let w = c.evaluate(&s, 5_000, &mut Probe::default());
        assert!((w - s.cubic_window(5.0)).abs() < 1e-9);
    }

    #[test]
    fn responsiveness_scales_minimum_step() {
        let c = Cubic::new(CubicConfig {
            responsiveness: 2.0,
            ..Default::default()
        });
        let w = c.evaluate(&c.initial_state(), 0, &mut Probe::default());
        assert!((w - 10.2).abs() < 1e-9);
    }

    #[test]
    fn evaluation_emits_telemetry() {
        let c = Cubic::default();
        let mut probe = Probe::new(true);
        c.evaluate(&c.initial_state(), 250, &mut probe);
        assert!(matches!(
            probe.events(),
            [TelemetryEvent::CubicEvaluated { t, .. }] if (*t - 0.25).abs() < 1e-12
        ));
    }

    #[test]
    fn config_rejects_out_of_range_beta() {
        for beta in [0.0, 1.0, -0.2, f64::NAN] {
            let cfg = CubicConfig {
                beta,
                ..Default::default()
            };
            assert!(cfg.validate().is_err(), "beta {beta} should be rejected");
        }
    }

    #[test]
    fn collapse_restarts_curve_at_one() {
        let c = Cubic::default();
        let s = c.collapse(&c.initial_state(), 777);
        assert_eq!(s.current_window, 1.0);
        assert_eq!(s.window_max, 2.0);
        assert_eq!(s.epoch, Some(777));
        assert_eq!(s.last_cut_time, Some(777));
        assert!((s.cubic_window(0.0) - 1.0).abs() < 1e-9);
    }
}
