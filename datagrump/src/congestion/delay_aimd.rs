//! Delay-triggered AIMD.
//!
//! Grows like loss AIMD, but cuts when the round-trip time rises above a
//! fixed threshold. Cuts are rate-limited to one per `2 * threshold` so a
//! single delay spike cannot halve the window repeatedly.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::congestion::{
    halve, Step, StrategyKind, Update, WindowStrategy, DEFAULT_RETRANSMISSION_TIMEOUT_MS,
};
use crate::error::{DatagrumpError, Result};
use crate::event::{AckSample, Clock};
use crate::telemetry::{CutReason, Probe, SkipReason};

const INITIAL_WINDOW: u32 = 10;
/// RTT (ms) above which the path is considered congested.
const DELAY_THRESHOLD_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayAimdConfig {
    pub initial_window: u32,
    pub delay_threshold_ms: u64,
    pub retransmission_timeout_ms: u64,
}

impl Default for DelayAimdConfig {
    fn default() -> Self {
        Self {
            initial_window: INITIAL_WINDOW,
            delay_threshold_ms: DELAY_THRESHOLD_MS,
            retransmission_timeout_ms: DEFAULT_RETRANSMISSION_TIMEOUT_MS,
        }
    }
}

impl DelayAimdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_window == 0 {
            return Err(DatagrumpError::ZeroParameter("initial_window"));
        }
        if self.delay_threshold_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("delay_threshold_ms"));
        }
        if self.retransmission_timeout_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("retransmission_timeout_ms"));
        }
        Ok(())
    }

    /// Minimum spacing between two cuts.
    pub fn cut_interval_ms(&self) -> u64 {
        self.delay_threshold_ms.saturating_mul(2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayAimdState {
    pub window: u32,
    pub consecutive_successes: u32,
    /// Sender time of the last cut; `None` until the first one.
    pub last_cut_time: Option<Clock>,
}

#[derive(Debug, Clone, Default)]
pub struct DelayAimd {
    config: DelayAimdConfig,
}

impl DelayAimd {
    pub fn new(config: DelayAimdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DelayAimdConfig {
        &self.config
    }
}

impl WindowStrategy for DelayAimd {
    type State = DelayAimdState;

    fn kind(&self) -> StrategyKind {
        StrategyKind::DelayAimd
    }

    fn initial_state(&self) -> DelayAimdState {
        DelayAimdState {
            window: self.config.initial_window.max(1),
            consecutive_successes: 0,
            last_cut_time: None,
        }
    }

    fn on_ack(
        &self,
        state: &DelayAimdState,
        sample: &AckSample,
        _probe: &mut Probe,
    ) -> Step<DelayAimdState> {
        let now = sample.now();
        let cut_allowed = match state.last_cut_time {
            None => true,
            Some(last) => {
                let since = now.checked_sub(last).ok_or(SkipReason::ClockRegression)?;
                since >= self.config.cut_interval_ms()
            }
        };

        let mut next = state.clone();
        if sample.rtt > self.config.delay_threshold_ms && cut_allowed {
            next.window = halve(state.window);
            next.consecutive_successes = 0;
            next.last_cut_time = Some(now);
            debug!(
                rtt = sample.rtt,
                from = state.window,
                to = next.window,
                "delay-aimd: rtt above threshold, halving window"
            );
            return Ok(Update::cut(next, CutReason::Delay));
        }

        next.consecutive_successes += 1;
        if next.consecutive_successes >= next.window {
            next.window = next.window.saturating_add(1);
            next.consecutive_successes = 0;
            trace!(window = next.window, "delay-aimd: full window acked, growing");
        }
        Ok(Update::steady(next))
    }

    fn collapse(&self, state: &DelayAimdState, _now: Clock) -> DelayAimdState {
        DelayAimdState {
            window: 1,
            consecutive_successes: 0,
            ..state.clone()
        }
    }

    fn window(&self, state: &DelayAimdState) -> f64 {
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

    fn sample(seq: u64, rtt: u64, ack_time: Clock) -> AckSample {
        AckSample::from_event(AckEvent::new(seq, ack_time - rtt, 0, ack_time)).unwrap()
    }

    fn feed(strategy: &DelayAimd, state: &DelayAimdState, s: AckSample) -> Update<DelayAimdState> {
        strategy.on_ack(state, &s, &mut Probe::default()).unwrap()
    }

    #[test]
    fn first_slow_ack_cuts_immediately() {
        let aimd = DelayAimd::default();
        let update = feed(&aimd, &aimd.initial_state(), sample(0, 150, 1_000));
        assert_eq!(update.cut, Some(CutReason::Delay));
        assert_eq!(update.state.window, 5);
        assert_eq!(update.state.last_cut_time, Some(1_000));
    }

    #[test]
    fn rtt_at_threshold_grows() {
        let aimd = DelayAimd::default();
        let update = feed(&aimd, &aimd.initial_state(), sample(0, 100, 1_000));
        assert!(update.cut.is_none());
        assert_eq!(update.state.consecutive_successes, 1);
    }

    #[test]
    fn cut_allowed_again_after_interval() {
        let aimd = DelayAimd::default();
        let s = feed(&aimd, &aimd.initial_state(), sample(0, 150, 1_000)).state;
        let update = feed(&aimd, &s, sample(1, 150, 1_200));
        assert_eq!(update.cut, Some(CutReason::Delay));
        assert_eq!(update.state.window, 2);
    }

    #[test]
    fn ack_before_last_cut_is_skipped() {
        let aimd = DelayAimd::default();
        let s = feed(&aimd, &aimd.initial_state(), sample(0, 150, 1_000)).state;
        let step = aimd.on_ack(&s, &sample(1, 10, 900), &mut Probe::default());
        assert_eq!(step, Err(SkipReason::ClockRegression));
    }
}
