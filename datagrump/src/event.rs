//! Event types exchanged between the transport and a controller.
//!
//! Timestamps are milliseconds since an arbitrary epoch. The sender and the
//! receiver each have their own clock; the two are never assumed to be
//! synchronized, so a sender timestamp is only ever compared with another
//! sender timestamp (and likewise for the receiver).

/// A millisecond clock reading.
pub type Clock = u64;

/// An acknowledgment as observed by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEvent {
    /// Sequence number of the acknowledged datagram.
    pub sequence_number: u64,
    /// When the datagram was sent (sender clock).
    pub send_time: Clock,
    /// When the datagram arrived (receiver clock).
    pub recv_time: Clock,
    /// When the ack arrived back at the sender (sender clock).
    pub ack_time: Clock,
}

impl AckEvent {
    pub fn new(sequence_number: u64, send_time: Clock, recv_time: Clock, ack_time: Clock) -> Self {
        Self {
            sequence_number,
            send_time,
            recv_time,
            ack_time,
        }
    }

    /// Round-trip time on the sender clock, or `None` if the ack claims to
    /// arrive before its datagram was sent.
    pub fn rtt(&self) -> Option<u64> {
        self.ack_time.checked_sub(self.send_time)
    }
}

/// An ack that passed timestamp validation, with its RTT precomputed.
///
/// Strategies only ever see samples, so none of them has to re-check that
/// the RTT is non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckSample {
    pub event: AckEvent,
    /// `ack_time - send_time`, in milliseconds.
    pub rtt: u64,
}

impl AckSample {
    /// Validate `event`. Returns `None` when `send_time > ack_time`.
    pub fn from_event(event: AckEvent) -> Option<Self> {
        event.rtt().map(|rtt| Self { event, rtt })
    }

    /// Sender-side arrival time of the ack.
    pub fn now(&self) -> Clock {
        self.event.ack_time
    }
}
