//! Controller configuration.
//!
//! A configuration names one strategy and its parameters. It can be built
//! in code or loaded from JSON, e.g.
//!
//! ```json
//! { "strategy": { "kind": "cubic", "beta": 0.65 }, "reset_on_timeout": true }
//! ```
//!
//! Omitted fields take the strategy defaults.

use serde::{Deserialize, Serialize};

use crate::congestion::cubic::{Cubic, CubicConfig};
use crate::congestion::delay_aimd::{DelayAimd, DelayAimdConfig};
use crate::congestion::gradient::{Gradient, GradientConfig};
use crate::congestion::loss_aimd::{LossAimd, LossAimdConfig};
use crate::congestion::{CongestionController, StrategyKind};
use crate::controller::Controller;
use crate::error::Result;
use crate::telemetry::TelemetrySink;

/// Strategy selection plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategyConfig {
    LossAimd(LossAimdConfig),
    DelayAimd(DelayAimdConfig),
    Cubic(CubicConfig),
    Gradient(GradientConfig),
}

impl StrategyConfig {
    /// Default parameters for `kind`.
    pub fn defaults(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::LossAimd => Self::LossAimd(LossAimdConfig::default()),
            StrategyKind::DelayAimd => Self::DelayAimd(DelayAimdConfig::default()),
            StrategyKind::Cubic => Self::Cubic(CubicConfig::default()),
            StrategyKind::Gradient => Self::Gradient(GradientConfig::default()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::LossAimd(_) => StrategyKind::LossAimd,
            Self::DelayAimd(_) => StrategyKind::DelayAimd,
            Self::Cubic(_) => StrategyKind::Cubic,
            Self::Gradient(_) => StrategyKind::Gradient,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::LossAimd(cfg) => cfg.validate(),
            Self::DelayAimd(cfg) => cfg.validate(),
            Self::Cubic(cfg) => cfg.validate(),
            Self::Gradient(cfg) => cfg.validate(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::LossAimd(LossAimdConfig::default())
    }
}

/// Full controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub strategy: StrategyConfig,
    /// Collapse the window to one datagram on a retransmission timeout.
    pub reset_on_timeout: bool,
}

impl ControllerConfig {
    pub fn new(strategy: StrategyConfig) -> Self {
        Self {
            strategy,
            reset_on_timeout: false,
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()
    }

    /// Validate and construct a controller for a new flow.
    pub fn build(&self) -> Result<Box<dyn CongestionController>> {
        self.build_inner(None)
    }

    /// Like [`build`](Self::build), reporting telemetry to `sink`.
    pub fn build_with_telemetry<T: TelemetrySink + 'static>(
        &self,
        sink: T,
    ) -> Result<Box<dyn CongestionController>> {
        self.build_inner(Some(Box::new(sink)))
    }

    fn build_inner(
        &self,
        sink: Option<Box<dyn TelemetrySink>>,
    ) -> Result<Box<dyn CongestionController>> {
        self.validate()?;
        let reset = self.reset_on_timeout;
        let controller: Box<dyn CongestionController> = match self.strategy {
            StrategyConfig::LossAimd(cfg) => Box::new(
                Controller::new(LossAimd::new(cfg))
                    .with_reset_on_timeout(reset)
                    .with_boxed_telemetry(sink),
            ),
            StrategyConfig::DelayAimd(cfg) => Box::new(
                Controller::new(DelayAimd::new(cfg))
                    .with_reset_on_timeout(reset)
                    .with_boxed_telemetry(sink),
            ),
            StrategyConfig::Cubic(cfg) => Box::new(
                Controller::new(Cubic::new(cfg))
                    .with_reset_on_timeout(reset)
                    .with_boxed_telemetry(sink),
            ),
            StrategyConfig::Gradient(cfg) => Box::new(
                Controller::new(Gradient::new(cfg))
                    .with_reset_on_timeout(reset)
                    .with_boxed_telemetry(sink),
            ),
        };
        Ok(controller)
    }
}
