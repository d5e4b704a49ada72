//! Congestion control module.
//!
//! Defines the object-safe `CongestionController` trait used by transports,
//! the `WindowStrategy` trait implemented by each algorithm, and the four
//! strategies: loss-triggered AIMD, delay-triggered AIMD, CUBIC-style growth
//! and RTT-gradient control.

pub mod cubic;
pub mod delay_aimd;
pub mod gradient;
pub mod loss_aimd;

use std::fmt;

use crate::controller::ControllerStats;
use crate::event::{AckEvent, AckSample, Clock};
use crate::telemetry::{CutReason, Probe, SkipReason};

/// Retransmission timeout used unless a strategy overrides it.
pub const DEFAULT_RETRANSMISSION_TIMEOUT_MS: u64 = 50;

/// Trait for pluggable congestion controllers, as seen by the transport.
///
/// One controller belongs to one flow. Calls must be serialized by the
/// owner; every method runs to completion without blocking.
pub trait CongestionController: Send {
    /// Notify the controller that a datagram left the sender.
    fn datagram_sent(&mut self, sequence_number: u64, send_time: Clock);

    /// Notify the controller of an acknowledgment, in receipt order.
    fn ack_received(&mut self, ack: AckEvent);

    /// Notify the controller that the retransmission timeout fired at `now`.
    fn on_timeout(&mut self, now: Clock);

    /// Returns the current congestion window in datagrams.
    fn current_window(&self) -> u32;

    /// How long (ms) the transport should wait without acks before
    /// presuming loss.
    fn retransmission_timeout(&self) -> u64;

    /// Which algorithm drives this controller.
    fn kind(&self) -> StrategyKind;

    /// Counters accumulated since the controller was created.
    fn stats(&self) -> ControllerStats;

    /// Whether another datagram may be sent with `in_flight` outstanding.
    fn can_send(&self, in_flight: usize) -> bool {
        in_flight < self.current_window() as usize
    }
}

/// Identifies a window strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    LossAimd,
    DelayAimd,
    Cubic,
    Gradient,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LossAimd => "loss-aimd",
            Self::DelayAimd => "delay-aimd",
            Self::Cubic => "cubic",
            Self::Gradient => "gradient",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of feeding one ack to a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<S> {
    pub state: S,
    /// Set when this ack reduced the window.
    pub cut: Option<CutReason>,
}

impl<S> Update<S> {
    pub fn steady(state: S) -> Self {
        Self { state, cut: None }
    }

    pub fn cut(state: S, reason: CutReason) -> Self {
        Self {
            state,
            cut: Some(reason),
        }
    }
}

/// Either the next state, or the reason the sample was ignored. A skipped
/// sample leaves the previous state in place.
pub type Step<S> = std::result::Result<Update<S>, SkipReason>;

/// A window-control algorithm.
///
/// Strategies hold only immutable parameters. All per-flow state lives in
/// `Self::State`, which the controller owns and passes in on every event;
/// each handler returns the next state instead of mutating in place.
pub trait WindowStrategy: Send {
    type State: Clone + fmt::Debug + Send;

    fn kind(&self) -> StrategyKind;

    /// State for a freshly started flow.
    fn initial_state(&self) -> Self::State;

    /// Compute the state that follows `sample`.
    fn on_ack(&self, state: &Self::State, sample: &AckSample, probe: &mut Probe)
        -> Step<Self::State>;

    /// Collapse the window to one datagram after a retransmission timeout.
    fn collapse(&self, state: &Self::State, now: Clock) -> Self::State;

    /// Exact (possibly fractional) window held in `state`.
    fn window(&self, state: &Self::State) -> f64;

    fn retransmission_timeout(&self) -> u64 {
        DEFAULT_RETRANSMISSION_TIMEOUT_MS
    }
}

/// Halve an integer window, never going below one datagram.
pub(crate) fn halve(window: u32) -> u32 {
    (window / 2).max(1)
}

/// Truncate an internal window to the integer reported to the transport.
pub(crate) fn truncate_window(window: f64) -> u32 {
    if window.is_nan() || window <= 0.0 {
        0
    } else if window >= u32::MAX as f64 {
        u32::MAX
    } else {
        window as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halve_floors_and_keeps_one() {
        assert_eq!(halve(10), 5);
        assert_eq!(halve(7), 3);
        assert_eq!(halve(2), 1);
        assert_eq!(halve(1), 1);
        assert_eq!(halve(0), 1);
    }

    #[test]
    fn truncate_handles_non_finite() {
        assert_eq!(truncate_window(13.99), 13);
        assert_eq!(truncate_window(1.0), 1);
        assert_eq!(truncate_window(-3.0), 0);
        assert_eq!(truncate_window(f64::NAN), 0);
        assert_eq!(truncate_window(f64::INFINITY), u32::MAX);
    }

    #[test]
    fn kind_names() {
        assert_eq!(StrategyKind::Cubic.to_string(), "cubic");
        assert_eq!(StrategyKind::LossAimd.as_str(), "loss-aimd");
    }
}
