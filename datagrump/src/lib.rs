//! datagrump -- congestion-window control for datagram transports.
//!
//! A controller consumes send and acknowledgment events stamped with
//! millisecond clock readings and answers how many datagrams may be in
//! flight. Four interchangeable strategies are provided:
//! - **Loss AIMD**: halve on a long ack gap, +1 per window of acks
//! - **Delay AIMD**: halve when RTT crosses a threshold, rate-limited
//! - **Cubic**: cubic growth anchored at the window of the last cut
//! - **Gradient**: TIMELY-style reaction to the smoothed RTT gradient
//!
//! Controllers do no I/O and hold no global state; the transport drives
//! them and honours `current_window()` as a hard cap.

pub mod config;
pub mod congestion;
pub mod controller;
pub mod error;
pub mod event;
pub mod telemetry;

// Re-export key public types at crate root.
pub use config::{ControllerConfig, StrategyConfig};
pub use congestion::cubic::{Cubic, CubicConfig};
pub use congestion::delay_aimd::{DelayAimd, DelayAimdConfig};
pub use congestion::gradient::{Gradient, GradientConfig};
pub use congestion::loss_aimd::{LossAimd, LossAimdConfig};
pub use congestion::{CongestionController, StrategyKind, WindowStrategy};
pub use controller::{Controller, ControllerStats};
pub use error::{DatagrumpError, Result};
pub use event::{AckEvent, AckSample, Clock};
pub use telemetry::{RecordingSink, TelemetryEvent, TelemetrySink};
