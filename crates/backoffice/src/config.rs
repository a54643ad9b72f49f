//! Runtime configuration read from `STOCKROOM_*` environment variables.

use anyhow::{Context, bail};
use stockroom_inventory::DEFAULT_LOW_STOCK_THRESHOLD;
use stockroom_observability::LogFormat;
use stockroom_purchasing::DEFAULT_INVOICE_PREFIX;

pub const LOW_STOCK_THRESHOLD_VAR: &str = "STOCKROOM_LOW_STOCK_THRESHOLD";
pub const INVOICE_PREFIX_VAR: &str = "STOCKROOM_INVOICE_PREFIX";
pub const LOG_FORMAT_VAR: &str = "STOCKROOM_LOG_FORMAT";
pub const NOTIFICATIONS_VAR: &str = "STOCKROOM_NOTIFICATIONS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackOfficeConfig {
    /// Threshold given to newly created stock rows.
    pub low_stock_threshold: u32,
    pub invoice_prefix: String,
    pub log_format: LogFormat,
    /// When false, order notifications are dropped.
    pub notifications: bool,
}

impl Default for BackOfficeConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD as u32,
            invoice_prefix: DEFAULT_INVOICE_PREFIX.to_string(),
            log_format: LogFormat::default(),
            notifications: true,
        }
    }
}

impl BackOfficeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(LOW_STOCK_THRESHOLD_VAR) {
            config.low_stock_threshold = raw
                .parse()
                .with_context(|| format!("{LOW_STOCK_THRESHOLD_VAR} must be a non-negative integer, got `{raw}`"))?;
        }
        if let Some(prefix) = get(INVOICE_PREFIX_VAR) {
            config.invoice_prefix = prefix;
        }
        if let Some(raw) = get(LOG_FORMAT_VAR) {
            config.log_format = raw.parse().with_context(|| format!("invalid {LOG_FORMAT_VAR}"))?;
        }
        if let Some(raw) = get(NOTIFICATIONS_VAR) {
            config.notifications = parse_bool(&raw).with_context(|| format!("invalid {NOTIFICATIONS_VAR}"))?;
        }

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{other}`"),
    }
}
