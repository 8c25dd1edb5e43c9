use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::domain::{AssetId, ExchangeInstance, InstrumentMeta};
use crate::engine::IdGeneratorKind;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    /// Instruments and starting balances for replays
    #[serde(default)]
    pub backtest: BacktestSetup,
}

/// How logical time advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    Backtest,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Live => write!(f, "live"),
            RunMode::Backtest => write!(f, "backtest"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub mode: RunMode,
    /// Overrides the generator implied by `mode`
    #[serde(default)]
    pub id_generator: Option<IdGeneratorKind>,
    #[serde(default)]
    pub id_seed: u64,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

impl EngineSettings {
    /// Seeded ids for backtests, random ids for live trading, unless overridden
    pub fn effective_id_generator(&self) -> IdGeneratorKind {
        self.id_generator.unwrap_or(match self.mode {
            RunMode::Backtest => IdGeneratorKind::Seeded,
            RunMode::Live => IdGeneratorKind::Random,
        })
    }
}

fn default_id_prefix() -> String {
    "bot".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    /// How long to keep applying execution events after strategies stop
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BacktestSetup {
    #[serde(default)]
    pub exchanges: Vec<ExchangeInstance>,
    #[serde(default)]
    pub instruments: Vec<InstrumentMeta>,
    #[serde(default)]
    pub balances: Vec<BalanceSeed>,
}

/// Starting balance of one asset on one exchange instance
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceSeed {
    pub exchange: ExchangeInstance,
    pub asset: AssetId,
    pub total: Decimal,
}

impl EngineConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("engine.mode", "backtest")?
            .set_default("engine.id_seed", 0)?
            .set_default("engine.id_prefix", "bot")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("shutdown.drain_timeout_ms", 5_000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/live.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BOT_ENGINE__MODE, etc.)
            .add_source(
                Environment::with_prefix("BOT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(mode: RunMode) -> Self {
        Self {
            engine: EngineSettings {
                mode,
                id_generator: None,
                id_seed: 0,
                id_prefix: default_id_prefix(),
            },
            logging: LoggingConfig::default(),
            shutdown: ShutdownSettings::default(),
            backtest: BacktestSetup::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.id_prefix.trim().is_empty() {
            errors.push("engine.id_prefix must not be empty".to_string());
        }

        if self.engine.mode == RunMode::Live
            && self.engine.effective_id_generator() == IdGeneratorKind::Seeded
        {
            errors.push(
                "live mode requires the random id generator; seeded ids repeat across restarts"
                    .to_string(),
            );
        }

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(format!("logging.level '{}' is not a known level", self.logging.level));
        }

        for meta in &self.backtest.instruments {
            if meta.tick_size <= Decimal::ZERO || meta.lot_size <= Decimal::ZERO {
                errors.push(format!(
                    "instrument {} must have positive tick and lot sizes",
                    meta.instrument
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
