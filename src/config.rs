//! Application configuration loading and validation.
//!
//! Loaded from a TOML file; every section has defaults so a missing file is
//! not an error. The mail access token never lives here: it is read from the
//! environment by the fetcher.
//!
//! ```toml
//! [mailbox]
//! sender = "no-reply@mail.foodpanda.pk"
//! lookback_days = 365
//! max_messages = 1000
//!
//! [report]
//! monthly_budget = 25000.0
//! ```

use serde::Deserialize;
use std::path::Path;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use crate::batch::BatchRequest;
use crate::error::ConfigError;
use crate::fetcher::MAX_MESSAGES_CAP;
use crate::gmail_fetcher::DEFAULT_API_BASE;
use crate::order_extract::{OrderExtractor, DEFAULT_MERCHANT};
use crate::spend_report::ReportOptions;

pub const DEFAULT_SENDER: &str = "no-reply@mail.foodpanda.pk";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 365;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub sender: String,
    pub lookback_days: u32,
    pub max_messages: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            sender: DEFAULT_SENDER.into(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            max_messages: MAX_MESSAGES_CAP,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Label used when no `Partner: Name:` line is found.
    pub merchant_default: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            merchant_default: DEFAULT_MERCHANT.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    pub api_base: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub monthly_budget: Option<f64>,
    pub top_merchants: usize,
    pub recent_orders: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let opts = ReportOptions::default();
        Self {
            monthly_budget: opts.monthly_budget,
            top_merchants: opts.top_merchants,
            recent_orders: opts.recent_orders,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Install the tracing subscriber. `RUST_LOG` wins over `level`; output
    /// goes to stderr so stdout stays machine-readable.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let result = match self.format.as_str() {
            "json" => fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
            _ => fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        };
        if let Err(e) = result {
            eprintln!("logging already initialized: {e}");
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mailbox: MailboxConfig,
    pub extract: ExtractConfig,
    pub gmail: GmailConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
    /// `max_messages` as written in the file, when it was above the cap.
    #[serde(skip)]
    clamped_max_messages: Option<usize>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        if config.mailbox.max_messages > MAX_MESSAGES_CAP {
            config.clamped_max_messages = Some(config.mailbox.max_messages);
            config.mailbox.max_messages = MAX_MESSAGES_CAP;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox.sender.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "mailbox.sender",
            });
        }
        if self.mailbox.lookback_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mailbox.lookback_days",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.mailbox.max_messages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mailbox.max_messages",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(budget) = self.report.monthly_budget {
            if !budget.is_finite() || budget < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "report.monthly_budget",
                    reason: format!("must be a non-negative amount, got {budget}"),
                });
            }
        }
        Ok(())
    }

    /// The requested `max_messages` if loading had to clamp it.
    pub fn clamped_max_messages(&self) -> Option<usize> {
        self.clamped_max_messages
    }

    /// Installs the subscriber, then reports anything adjusted while loading.
    pub fn init_logging(&self) {
        self.logging.init();
        if let Some(requested) = self.clamped_max_messages {
            warn!(
                requested,
                cap = MAX_MESSAGES_CAP,
                "mailbox.max_messages above cap; clamped"
            );
        }
    }

    pub fn batch_request(&self) -> BatchRequest {
        BatchRequest {
            sender: self.mailbox.sender.trim().to_string(),
            lookback_days: self.mailbox.lookback_days,
            max_messages: self.mailbox.max_messages,
        }
    }

    pub fn extractor(&self) -> OrderExtractor {
        OrderExtractor::new(self.extract.merchant_default.as_str())
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            monthly_budget: self.report.monthly_budget,
            top_merchants: self.report.top_merchants,
            recent_orders: self.report.recent_orders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").expect("defaults parse");
        assert_eq!(config.mailbox.sender, DEFAULT_SENDER);
        assert_eq!(config.mailbox.lookback_days, 365);
        assert_eq!(config.mailbox.max_messages, MAX_MESSAGES_CAP);
        assert_eq!(config.extract.merchant_default, DEFAULT_MERCHANT);
        assert_eq!(config.gmail.api_base, DEFAULT_API_BASE);
        assert_eq!(config.logging.level, "info");
        assert!(config.report.monthly_budget.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [mailbox]
            sender = "orders@example.pk"
            lookback_days = 30

            [extract]
            merchant_default = "Panda Mart"

            [report]
            monthly_budget = 25000.0
            top_merchants = 3

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .expect("parse config");
        let req = config.batch_request();
        assert_eq!(req.sender, "orders@example.pk");
        assert_eq!(req.lookback_days, 30);
        assert_eq!(req.max_messages, MAX_MESSAGES_CAP);
        assert_eq!(config.extractor().merchant_default(), "Panda Mart");
        let opts = config.report_options();
        assert_eq!(opts.monthly_budget, Some(25000.0));
        assert_eq!(opts.top_merchants, 3);
        assert_eq!(opts.recent_orders, 5);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn max_messages_above_cap_is_clamped() {
        let config =
            Config::from_toml("[mailbox]\nmax_messages = 5000\n").expect("parse config");
        assert_eq!(config.mailbox.max_messages, MAX_MESSAGES_CAP);
        assert_eq!(config.clamped_max_messages(), Some(5000));

        let within = Config::from_toml("[mailbox]\nmax_messages = 200\n").expect("parse config");
        assert_eq!(within.mailbox.max_messages, 200);
        assert_eq!(within.clamped_max_messages(), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_toml("[mailbox]\nsender = \"  \"\n"),
            Err(ConfigError::MissingField {
                field: "mailbox.sender"
            })
        ));
        assert!(matches!(
            Config::from_toml("[mailbox]\nlookback_days = 0\n"),
            Err(ConfigError::InvalidValue {
                field: "mailbox.lookback_days",
                ..
            })
        ));
        assert!(matches!(
            Config::from_toml("[report]\nmonthly_budget = -5.0\n"),
            Err(ConfigError::InvalidValue {
                field: "report.monthly_budget",
                ..
            })
        ));
        assert!(matches!(
            Config::from_toml("[mailbox\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            Config::load_or_default(dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(config.mailbox.sender, DEFAULT_SENDER);
        assert!(matches!(
            Config::load(dir.path().join("absent.toml")),
            Err(ConfigError::ReadFile(_))
        ));
    }
}
