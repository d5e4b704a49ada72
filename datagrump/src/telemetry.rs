//! Telemetry side channel.
//!
//! Controllers report window changes, cuts and intermediate values (RTT,
//! smoothed gradient, cubic `K`/`t`) to an optional [`TelemetrySink`]. Sinks
//! only observe; nothing they do feeds back into a window decision.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Clock;

/// Why a strategy cut the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    /// The gap since the previous ack exceeded the retransmission timeout.
    AckGap,
    /// The RTT exceeded the configured delay threshold.
    Delay,
    /// The RTT exceeded the outlier threshold.
    Outlier,
    /// A positive RTT gradient.
    Gradient,
    /// The transport reported a retransmission timeout.
    Timeout,
}

/// Why an ack was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `send_time` is later than `ack_time`.
    AckBeforeSend,
    /// `ack_time` precedes the strategy's reference time (previous ack or
    /// last cut).
    ClockRegression,
    /// `min_rtt` is zero, so the normalized gradient is undefined.
    ZeroMinRtt,
}

/// A single observation emitted by a controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    DatagramSent {
        sequence_number: u64,
        send_time: Clock,
    },
    AckProcessed {
        sequence_number: u64,
        ack_time: Clock,
        rtt: u64,
        /// Gap between this and the previous `recv_time`, receiver clock.
        recv_spacing: Option<u64>,
        window: u32,
    },
    Cut {
        at: Clock,
        from: f64,
        to: f64,
        reason: CutReason,
    },
    CubicEvaluated {
        k: f64,
        t: f64,
        w_cubic: f64,
        window: f64,
    },
    GradientEvaluated {
        rtt_diff: f64,
        normalized: f64,
        min_rtt: f64,
    },
    /// An RTT sample above the outlier threshold.
    Outlier {
        at: Clock,
        rtt: u64,
        threshold: u64,
    },
    SampleSkipped {
        sequence_number: u64,
        reason: SkipReason,
    },
    TimeoutReset {
        at: Clock,
        from: f64,
    },
}

/// Receiver of telemetry events.
pub trait TelemetrySink: Send {
    fn record(&mut self, event: &TelemetryEvent);
}

impl<F> TelemetrySink for F
where
    F: FnMut(&TelemetryEvent) + Send,
{
    fn record(&mut self, event: &TelemetryEvent) {
        self(event)
    }
}

/// Sink that keeps every event in memory.
///
/// Clones share the same buffer, so one handle can be given to a controller
/// and another kept for reading the trace back.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded cuts.
    pub fn cut_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::Cut { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&mut self, event: &TelemetryEvent) {
        self.events.lock().push(*event);
    }
}

/// Per-call event buffer handed to strategies.
///
/// Strategies stay pure: they push observations here and the controller
/// forwards them to its sink once the update is done.
#[derive(Debug, Default)]
pub struct Probe {
    enabled: bool,
    events: Vec<TelemetryEvent>,
}

impl Probe {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: TelemetryEvent) {
        if self.enabled {
            self.events.push(event);
        }
    }

    pub fn events(&self) -> &[TelemetryEvent] {
        &self.events
    }

    pub(crate) fn flush_into(&mut self, sink: &mut dyn TelemetrySink) {
        for event in self.events.drain(..) {
            sink.record(&event);
        }
    }
}
