//! Deterministic strategy execution engine.
//!
//! Strategies are written against [`Strategy`] and [`StrategyContext`] and run
//! unchanged in backtests and live trading:
//!
//! ```no_run
//! use bot_core::*;
//!
//! fn replay(strategy: Box<dyn Strategy>, events: Vec<EventEnvelope>) -> bot_core::Result<()> {
//!     let config = EngineConfig::default_config(RunMode::Backtest);
//!     let mut engine = Engine::from_config(&config, Box::new(RecordingAdapter::new()));
//!     let id = strategy.id().clone();
//!     engine.add_strategy(strategy, StrategySubscription::all(&id))?;
//!     engine.run_backtest(events)
//! }
//! ```

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod strategies;

pub use config::{EngineConfig, RunMode};
pub use domain::*;
pub use engine::*;
pub use error::{EngineError, LedgerError, RejectReason, Result};
