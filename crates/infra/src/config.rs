//! Engine settings.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `ORDERFLOW_*` environment variables (`ORDERFLOW_MAX_APPEND_RETRIES=5`).

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use orderflow_core::{KG_TO_LB, WEIGHT_PRECISION};
use orderflow_orders::OrderStatus;
use orderflow_packaging::DividerSettings;

pub const ENV_PREFIX: &str = "ORDERFLOW_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    /// Pounds per kilogram used when summing box weights.
    pub kg_to_lb_factor: f64,
    /// Decimal places kept on stored weights.
    pub weight_precision: u32,
    /// Attempts after the first when a product stream moved under a reservation.
    pub max_append_retries: u32,
    /// Whether a return also takes the units out of `qty_pending`.
    pub release_pending_on_return: bool,
    /// Order statuses in which packages may be created or changed.
    pub packable_statuses: Vec<OrderStatus>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            kg_to_lb_factor: KG_TO_LB,
            weight_precision: WEIGHT_PRECISION,
            max_append_retries: 3,
            release_pending_on_return: true,
            packable_statuses: vec![
                OrderStatus::Opened,
                OrderStatus::Acknowledged,
                OrderStatus::Backorder,
                OrderStatus::BypassedAcknowledge,
            ],
        }
    }
}

impl FulfillmentConfig {
    /// Defaults overlaid with `ORDERFLOW_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment(None))
    }

    /// Defaults, then `path`, then environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::extract(Self::figment(Some(path.as_ref())))
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.kg_to_lb_factor.is_finite() && self.kg_to_lb_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "kg_to_lb_factor must be positive, got {}",
                self.kg_to_lb_factor
            )));
        }
        if self.weight_precision > 6 {
            return Err(ConfigError::Invalid(format!(
                "weight_precision must be at most 6, got {}",
                self.weight_precision
            )));
        }
        if let Some(s) = self.packable_statuses.iter().find(|s| s.is_shipped() || s.is_terminal()) {
            return Err(ConfigError::Invalid(format!("'{s}' cannot be a packable status")));
        }
        Ok(())
    }

    pub fn divider_settings(&self) -> DividerSettings {
        DividerSettings {
            kg_to_lb: self.kg_to_lb_factor,
            weight_precision: self.weight_precision,
        }
    }

    pub fn is_packable(&self, status: OrderStatus) -> bool {
        self.packable_statuses.contains(&status)
    }
}
