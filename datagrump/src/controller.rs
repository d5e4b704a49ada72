//! Per-flow controller wrapping a [`WindowStrategy`].
//!
//! The controller owns the strategy state, validates incoming timestamps,
//! forwards telemetry to an optional sink, and keeps running counters. The
//! strategy only ever sees validated samples and never touches the sink.

use std::fmt;

use tracing::{debug, trace};

use crate::congestion::{truncate_window, CongestionController, StrategyKind, WindowStrategy};
use crate::event::{AckEvent, AckSample, Clock};
use crate::telemetry::{CutReason, Probe, SkipReason, TelemetryEvent, TelemetrySink};

/// Counters accumulated over the life of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub datagrams_sent: u64,
    pub acks_processed: u64,
    pub samples_skipped: u64,
    pub cuts: u64,
    pub timeouts: u64,
}

/// Congestion controller for a single flow.
pub struct Controller<S: WindowStrategy> {
    strategy: S,
    state: S::State,
    reset_on_timeout: bool,
    /// Receiver-clock arrival time of the previous valid ack.
    prev_recv_time: Option<Clock>,
    stats: ControllerStats,
    sink: Option<Box<dyn TelemetrySink>>,
}

impl<S: WindowStrategy> Controller<S> {
    pub fn new(strategy: S) -> Self {
        let state = strategy.initial_state();
        Self {
            strategy,
            state,
            reset_on_timeout: false,
            prev_recv_time: None,
            stats: ControllerStats::default(),
            sink: None,
        }
    }

    /// Collapse the window to one datagram whenever `on_timeout` fires.
    pub fn with_reset_on_timeout(mut self, reset: bool) -> Self {
        self.reset_on_timeout = reset;
        self
    }

    /// Attach a telemetry sink.
    pub fn with_telemetry<T: TelemetrySink + 'static>(mut self, sink: T) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub(crate) fn with_boxed_telemetry(mut self, sink: Option<Box<dyn TelemetrySink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Current strategy state.
    pub fn state(&self) -> &S::State {
        &self.state
    }

    /// Exact window before truncation.
    pub fn exact_window(&self) -> f64 {
        self.strategy.window(&self.state)
    }

    fn probe(&self) -> Probe {
        Probe::new(self.sink.is_some())
    }

    fn flush(&mut self, mut probe: Probe) {
        if let Some(sink) = self.sink.as_deref_mut() {
            probe.flush_into(sink);
        }
    }

    fn skip(&mut self, ack: &AckEvent, reason: SkipReason, probe: &mut Probe) {
        self.stats.samples_skipped += 1;
        debug!(
            seq = ack.sequence_number,
            send_time = ack.send_time,
            ack_time = ack.ack_time,
            ?reason,
            "ack sample skipped"
        );
        probe.emit(TelemetryEvent::SampleSkipped {
            sequence_number: ack.sequence_number,
            reason,
        });
    }

    fn record_cut(&mut self, at: Clock, from: f64, to: f64, reason: CutReason, probe: &mut Probe) {
        self.stats.cuts += 1;
        debug!(
            strategy = %self.strategy.kind(),
            at,
            from,
            to,
            ?reason,
            "congestion window cut"
        );
        probe.emit(TelemetryEvent::Cut {
            at,
            from,
            to,
            reason,
        });
    }
}

impl<S: WindowStrategy + Default> Default for Controller<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: WindowStrategy> fmt::Debug for Controller<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("strategy", &self.strategy)
            .field("state", &self.state)
            .field("reset_on_timeout", &self.reset_on_timeout)
            .field("stats", &self.stats)
            .field("telemetry", &self.sink.is_some())
            .finish()
    }
}

impl<S: WindowStrategy> CongestionController for Controller<S> {
    fn datagram_sent(&mut self, sequence_number: u64, send_time: Clock) {
        self.stats.datagrams_sent += 1;
        trace!(seq = sequence_number, send_time, "datagram sent");

        let mut probe = self.probe();
        probe.emit(TelemetryEvent::DatagramSent {
            sequence_number,
            send_time,
        });
        self.flush(probe);
    }

    fn ack_received(&mut self, ack: AckEvent) {
        let mut probe = self.probe();

        let Some(sample) = AckSample::from_event(ack) else {
            self.skip(&ack, SkipReason::AckBeforeSend, &mut probe);
            self.flush(probe);
            return;
        };

        let before = self.strategy.window(&self.state);
        match self.strategy.on_ack(&self.state, &sample, &mut probe) {
            Ok(update) => {
                let after = self.strategy.window(&update.state);
                debug_assert!(after >= 1.0, "window fell below one datagram: {after}");
                if let Some(reason) = update.cut {
                    self.record_cut(sample.now(), before, after, reason, &mut probe);
                }
                self.state = update.state;
                self.stats.acks_processed += 1;

                let recv_spacing = self
                    .prev_recv_time
                    .and_then(|prev| ack.recv_time.checked_sub(prev));
                self.prev_recv_time = Some(ack.recv_time);

                let window = self.current_window();
                trace!(
                    seq = ack.sequence_number,
                    rtt = sample.rtt,
                    window,
                    "ack processed"
                );
                probe.emit(TelemetryEvent::AckProcessed {
                    sequence_number: ack.sequence_number,
                    ack_time: ack.ack_time,
                    rtt: sample.rtt,
                    recv_spacing,
                    window,
                });
            }
            Err(reason) => self.skip(&ack, reason, &mut probe),
        }
        self.flush(probe);
    }

    fn on_timeout(&mut self, now: Clock) {
        self.stats.timeouts += 1;
        if !self.reset_on_timeout {
            trace!(now, "timeout ignored by controller");
            return;
        }

        let from = self.strategy.window(&self.state);
        self.state = self.strategy.collapse(&self.state, now);
        debug!(strategy = %self.strategy.kind(), now, from, "timeout: window reset to 1");

        let mut probe = self.probe();
        probe.emit(TelemetryEvent::TimeoutReset { at: now, from });
        let to = self.strategy.window(&self.state);
        if to < from {
            self.record_cut(now, from, to, CutReason::Timeout, &mut probe);
        }
        self.flush(probe);
    }

    fn current_window(&self) -> u32 {
        truncate_window(self.strategy.window(&self.state))
    }

    fn retransmission_timeout(&self) -> u64 {
        self.strategy.retransmission_timeout()
    }

    fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    fn stats(&self) -> ControllerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::loss_aimd::LossAimd;
    use crate::telemetry::RecordingSink;

    #[test]
    fn garbled_ack_leaves_state_untouched() {
        let mut c = Controller::new(LossAimd::default());
        let before = c.state().clone();
        c.ack_received(AckEvent::new(1, 1_000, 0, 900));
        assert_eq!(c.state(), &before);
        assert_eq!(c.stats().samples_skipped, 1);
        assert_eq!(c.stats().acks_processed, 0);
    }

    #[test]
    fn recv_spacing_uses_receiver_clock() {
        let sink = RecordingSink::new();
        let mut c = Controller::new(LossAimd::default()).with_telemetry(sink.clone());
        c.ack_received(AckEvent::new(0, 100, 5_000_000, 120));
        c.ack_received(AckEvent::new(1, 110, 5_000_007, 130));

        let spacings: Vec<Option<u64>> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::AckProcessed { recv_spacing, .. } => Some(*recv_spacing),
                _ => None,
            })
            .collect();
        assert_eq!(spacings, vec![None, Some(7)]);
    }

    #[test]
    fn timeout_without_reset_keeps_window() {
        let mut c = Controller::new(LossAimd::default());
        c.on_timeout(1_000);
        assert_eq!(c.current_window(), 10);
        assert_eq!(c.stats().timeouts, 1);
        assert_eq!(c.stats().cuts, 0);
    }

    #[test]
    fn timeout_with_reset_collapses_and_counts_cut() {
        let sink = RecordingSink::new();
        let mut c = Controller::new(LossAimd::default())
            .with_reset_on_timeout(true)
            .with_telemetry(sink.clone());
        c.on_timeout(1_000);
        assert_eq!(c.current_window(), 1);
        assert_eq!(c.stats().cuts, 1);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, TelemetryEvent::TimeoutReset { at: 1_000, .. })));
    }

    #[test]
    fn sends_are_counted_but_do_not_move_window() {
        let mut c = Controller::new(LossAimd::default());
        for seq in 0..25 {
            c.datagram_sent(seq, seq * 2);
        }
        assert_eq!(c.stats().datagrams_sent, 25);
        assert_eq!(c.current_window(), 10);
    }
}
