//! RTT-gradient control in the style of TIMELY.
//!
//! rtt_diff = (1 - alpha) * rtt_diff + alpha * (rtt_n - rtt_{n-1})
//! g        = rtt_diff / min_rtt
//!
//! g <= 0: additive increase of `additive_step * n` micro-acks, where `n`
//!         counts consecutive non-increasing rounds.
//! g > 0:  multiplicative decrease by (1 - beta * g).
//! RTT above `rtt_high_ms`: halve.
//!
//! Micro-acks feed an accumulator. Each time it holds a full window's worth
//! the window grows by one datagram (or shrinks, for a negative balance).

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::congestion::{halve, Step, StrategyKind, Update, WindowStrategy};
use crate::error::{DatagrumpError, Result};
use crate::event::{AckSample, Clock};
use crate::telemetry::{CutReason, Probe, SkipReason, TelemetryEvent};

const INITIAL_WINDOW: u32 = 10;
/// EWMA weight of the newest RTT difference.
const ALPHA: f64 = 0.125;
/// Multiplicative decrease weight.
const BETA: f64 = 0.8;
/// RTT (ms) treated as an outlier.
const RTT_HIGH_MS: u64 = 150;
/// Micro-acks granted per good round, before scaling by the step counter.
const ADDITIVE_STEP: u32 = 4;
const RETRANSMISSION_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    pub initial_window: u32,
    pub alpha: f64,
    pub beta: f64,
    pub rtt_high_ms: u64,
    pub additive_step: u32,
    pub retransmission_timeout_ms: u64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            initial_window: INITIAL_WINDOW,
            alpha: ALPHA,
            beta: BETA,
            rtt_high_ms: RTT_HIGH_MS,
            additive_step: ADDITIVE_STEP,
            retransmission_timeout_ms: RETRANSMISSION_TIMEOUT_MS,
        }
    }
}

impl GradientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_window == 0 {
            return Err(DatagrumpError::ZeroParameter("initial_window"));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(DatagrumpError::invalid(
                "alpha",
                self.alpha,
                "0 < alpha <= 1",
            ));
        }
        if !(self.beta > 0.0 && self.beta.is_finite()) {
            return Err(DatagrumpError::invalid("beta", self.beta, "a finite value > 0"));
        }
        if self.rtt_high_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("rtt_high_ms"));
        }
        if self.additive_step == 0 {
            return Err(DatagrumpError::ZeroParameter("additive_step"));
        }
        if self.retransmission_timeout_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("retransmission_timeout_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientState {
    pub window: u32,
    /// Micro-ack balance; stays within `(-window, window)` between acks.
    pub accumulator: i64,
    pub min_rtt: Option<f64>,
    pub prev_rtt: Option<f64>,
    pub smoothed_rtt_gradient: f64,
    /// Consecutive non-increasing rounds, starting at 1.
    pub backoff_step_counter: u32,
}

impl GradientState {
    /// Add (or, if negative, remove) `units` micro-acks and carry the
    /// balance into the window.
    pub fn apply_micro_acks(&mut self, units: i64) {
        let mut window = i64::from(self.window);
        let mut acc = self.accumulator.saturating_add(units);

        while acc >= window {
            acc -= window;
            window += 1;
        }
        while window > 0 && acc <= -window {
            acc += window;
            window -= 1;
        }

        if window <= 0 {
            self.window = 1;
            self.accumulator = 0;
        } else {
            self.window = u32::try_from(window).unwrap_or(u32::MAX);
            self.accumulator = acc;
        }
    }

    /// Shrink the window to `floor(window * factor)`, keeping whatever
    /// balance still fits under the new window.
    pub fn scale_window(&mut self, factor: f64) {
        let target = (f64::from(self.window) * factor).floor();
        if target.is_nan() || target < 1.0 {
            self.window = 1;
            self.accumulator = 0;
            return;
        }
        if target >= f64::from(self.window) {
            return;
        }
        self.window = target as u32;
        let bound = i64::from(self.window) - 1;
        self.accumulator = self.accumulator.clamp(-bound, bound);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gradient {
    config: GradientConfig,
}

impl Gradient {
    pub fn new(config: GradientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }
}

impl WindowStrategy for Gradient {
    type State = GradientState;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Gradient
    }

    fn initial_state(&self) -> GradientState {
        GradientState {
            window: self.config.initial_window.max(1),
            accumulator: 0,
            min_rtt: None,
            prev_rtt: None,
            smoothed_rtt_gradient: 0.0,
            backoff_step_counter: 1,
        }
    }

    fn on_ack(
        &self,
        state: &GradientState,
        sample: &AckSample,
        probe: &mut Probe,
    ) -> Step<GradientState> {
        // A zero RTT would seed a zero min_rtt and poison every later division.
        if sample.rtt == 0 {
            return Err(SkipReason::ZeroMinRtt);
        }
        let rtt = sample.rtt as f64;

        let mut next = state.clone();
        let (min_rtt, prev_rtt) = match (state.min_rtt, state.prev_rtt) {
            (Some(min_rtt), Some(prev_rtt)) => (min_rtt, prev_rtt),
            _ => {
                next.min_rtt = Some(rtt);
                next.prev_rtt = Some(rtt);
                trace!(rtt, "gradient: seeded rtt history");
                return Ok(Update::steady(next));
            }
        };
        next.prev_rtt = Some(rtt);

        if sample.rtt > self.config.rtt_high_ms {
            probe.emit(TelemetryEvent::Outlier {
                at: sample.now(),
                rtt: sample.rtt,
                threshold: self.config.rtt_high_ms,
            });
            next.window = halve(state.window);
            next.accumulator = 0;
            next.backoff_step_counter = 1;
            debug!(
                rtt = sample.rtt,
                from = state.window,
                to = next.window,
                "gradient: rtt outlier, halving window"
            );
            return Ok(Update::cut(next, CutReason::Outlier));
        }

        let min_rtt = min_rtt.min(rtt);
        debug_assert!(min_rtt > 0.0);
        next.min_rtt = Some(min_rtt);

        let alpha = self.config.alpha;
        next.smoothed_rtt_gradient =
            (1.0 - alpha) * state.smoothed_rtt_gradient + alpha * (rtt - prev_rtt);
        let normalized = next.smoothed_rtt_gradient / min_rtt;
        probe.emit(TelemetryEvent::GradientEvaluated {
            rtt_diff: next.smoothed_rtt_gradient,
            normalized,
            min_rtt,
        });

        if normalized <= 0.0 {
            let units =
                i64::from(self.config.additive_step) * i64::from(state.backoff_step_counter);
            next.apply_micro_acks(units);
            next.backoff_step_counter = state.backoff_step_counter.saturating_add(1);
            trace!(
                units,
                window = next.window,
                accumulator = next.accumulator,
                "gradient: additive increase"
            );
            return Ok(Update::steady(next));
        }

        next.backoff_step_counter = 1;
        let factor = 1.0 - self.config.beta * normalized;
        next.scale_window(factor);
        trace!(
            normalized,
            factor,
            window = next.window,
            "gradient: multiplicative decrease"
        );
        if next.window < state.window {
            Ok(Update::cut(next, CutReason::Gradient))
        } else {
            Ok(Update::steady(next))
        }
    }

    fn collapse(&self, state: &GradientState, _now: Clock) -> GradientState {
        GradientState {
            window: 1,
            accumulator: 0,
            backoff_step_counter: 1,
            ..state.clone()
        }
    }

    fn window(&self, state: &GradientState) -> f64 {
        f64::from(state.window)
    }

    fn retransmission_timeout(&self) -> u64 {
        self.config.retransmission_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AckEvent;

    fn sample(seq: u64, rtt: u64) -> AckSample {
        let ack_time = 10_000 + seq * 10;
        AckSample::from_event(AckEvent::new(seq, ack_time - rtt, 0, ack_time)).unwrap()
    }

    fn state(window: u32, accumulator: i64) -> GradientState {
        GradientState {
            window,
            accumulator,
            ..Gradient::default().initial_state()
        }
    }

    #[test]
    fn carry_grows_window() {
        let mut s = state(10, 8);
        s.apply_micro_acks(4);
        assert_eq!((s.window, s.accumulator), (11, 2));
    }

    #[test]
    fn large_credit_carries_repeatedly() {
        let mut s = state(2, 0);
        // 2 + 3 + 4 = 9 units buy three datagrams.
        s.apply_micro_acks(9);
        assert_eq!((s.window, s.accumulator), (5, 0));
    }

    #[test]
    fn borrow_shrinks_window() {
        let mut s = state(10, 0);
        s.apply_micro_acks(-10);
        assert_eq!((s.window, s.accumulator), (9, 0));
    }

    #[test]
    fn borrow_past_zero_clamps_to_one() {
        let mut s = state(2, 0);
        s.apply_micro_acks(-1_000);
        assert_eq!((s.window, s.accumulator), (1, 0));
    }

    #[test]
    fn scale_window_is_multiplicative() {
        let mut s = state(20, 3);
        s.scale_window(0.5);
        assert_eq!(s.window, 10);
        assert_eq!(s.accumulator, 3);
    }

    #[test]
    fn scale_window_to_zero_clamps() {
        let mut s = state(20, 0);
        s.scale_window(-4.0);
        assert_eq!((s.window, s.accumulator), (1, 0));
    }

    #[test]
    fn first_sample_only_seeds() {
        let g = Gradient::default();
        let update = g
            .on_ack(&g.initial_state(), &sample(0, 40), &mut Probe::default())
            .unwrap();
        assert!(update.cut.is_none());
        assert_eq!(update.state.window, INITIAL_WINDOW);
        assert_eq!(update.state.min_rtt, Some(40.0));
        assert_eq!(update.state.prev_rtt, Some(40.0));
    }

    #[test]
    fn zero_rtt_is_skipped() {
        let g = Gradient::default();
        let step = g.on_ack(&g.initial_state(), &sample(0, 0), &mut Probe::default());
        assert_eq!(step, Err(SkipReason::ZeroMinRtt));
    }

    #[test]
    fn rising_rtt_decreases_and_resets_step() {
        let g = Gradient::default();
        let mut s = g.initial_state();
        s.window = 21;
        s.backoff_step_counter = 5;
        let s = g.on_ack(&s, &sample(0, 40), &mut Probe::default()).unwrap().state;
        let update = g.on_ack(&s, &sample(1, 80), &mut Probe::default()).unwrap();
        // rtt_diff = 0.125 * 40 = 5, g = 5 / 40 = 0.125, factor = 0.9: 21 -> 18.9
        assert_eq!(update.state.window, 18);
        assert_eq!(update.state.backoff_step_counter, 1);
        assert_eq!(update.cut, Some(CutReason::Gradient));
    }

    #[test]
    fn outlier_is_reported() {
        let g = Gradient::default();
        let s = g
            .on_ack(&g.initial_state(), &sample(0, 40), &mut Probe::default())
            .unwrap()
            .state;
        let mut probe = Probe::new(true);
        let update = g.on_ack(&s, &sample(1, 200), &mut probe).unwrap();
        assert_eq!(update.cut, Some(CutReason::Outlier));
        assert_eq!(
            probe.events(),
            [TelemetryEvent::Outlier {
                at: 10_010,
                rtt: 200,
                threshold: RTT_HIGH_MS,
            }]
        );
    }
}
