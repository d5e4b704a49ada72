//! Loss-triggered AIMD.
//!
//! A gap between consecutive acks longer than the retransmission timeout is
//! read as a loss and halves the window. Otherwise every full window of acks
//! grows it by one datagram.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::congestion::{
    halve, Step, StrategyKind, Update, WindowStrategy, DEFAULT_RETRANSMISSION_TIMEOUT_MS,
};
use crate::error::{DatagrumpError, Result};
use crate::event::{AckSample, Clock};
use crate::telemetry::{CutReason, Probe, SkipReason};

/// Default initial window, in datagrams.
const INITIAL_WINDOW: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossAimdConfig {
    pub initial_window: u32,
    /// Ack gap (ms) beyond which a loss is presumed.
    pub retransmission_timeout_ms: u64,
}

impl Default for LossAimdConfig {
    fn default() -> Self {
        Self {
            initial_window: INITIAL_WINDOW,
            retransmission_timeout_ms: DEFAULT_RETRANSMISSION_TIMEOUT_MS,
        }
    }
}

impl LossAimdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_window == 0 {
            return Err(DatagrumpError::ZeroParameter("initial_window"));
        }
        if self.retransmission_timeout_ms == 0 {
            return Err(DatagrumpError::ZeroParameter("retransmission_timeout_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossAimdState {
    pub window: u32,
    pub consecutive_successes: u32,
    /// Sender time of the last processed ack; `None` before the first one.
    pub last_event_time: Option<Clock>,
}

#[derive(Debug, Clone, Default)]
pub struct LossAimd {
    config: LossAimdConfig,
}

impl LossAimd {
    pub fn new(config: LossAimdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LossAimdConfig {
        &self.config
    }
}

impl WindowStrategy for LossAimd {
    type State = LossAimdState;

    fn kind(&self) -> StrategyKind {
        StrategyKind::LossAimd
    }

    fn initial_state(&self) -> LossAimdState {
        LossAimdState {
            window: self.config.initial_window.max(1),
            consecutive_successes: 0,
            last_event_time: None,
        }
    }

    fn on_ack(
        &self,
        state: &LossAimdState,
        sample: &AckSample,
        _probe: &mut Probe,
    ) -> Step<LossAimdState> {
        let now = sample.now();
        let gap = match state.last_event_time {
            None => None,
            Some(prev) => Some(now.checked_sub(prev).ok_or(SkipReason::ClockRegression)?),
        };

        let mut next = state.clone();
        next.last_event_time = Some(now);

        if gap.is_some_and(|gap| gap > self.config.retransmission_timeout_ms) {
            next.window = halve(state.window);
            next.consecutive_successes = 0;
            debug!(
                gap = gap.unwrap_or_default(),
                from = state.window,
                to = next.window,
                "loss-aimd: ack gap exceeded timeout, halving window"
            );
            return Ok(Update::cut(next, CutReason::AckGap));
        }

        next.consecutive_successes += 1;
        if next.consecutive_successes >= next.window {
            next.window = next.window.saturating_add(1);
            next.consecutive_successes = 0;
            trace!(window = next.window, "loss-aimd: full window acked, growing");
        }
        Ok(Update::steady(next))
    }

    fn collapse(&self, state: &LossAimdState, _now: Clock) -> LossAimdState {
        LossAimdState {
            window: 1,
            consecutive_successes: 0,
            ..state.clone()
        }
    }

    fn window(&self, state: &LossAimdState) -> f64 {
        f64::from(state.window)
    }

    fn retransmission_timeout(&self) -> u64 {
        self.config.retransmission_timeout_ms
    }
}
