use serde::{Deserialize, Serialize};

use super::context::StrategyContext;
use super::events::Event;
use crate::domain::{StrategyId, TimerId};

/// How a strategy's view of balances and positions is kept current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Read the engine's incrementally updated account book
    #[default]
    Poll,
    /// Keep a local belief, replaced wholesale by each account snapshot
    Snapshot,
}

/// A deterministic trading policy.
///
/// Callbacks are never invoked concurrently for one instance. `on_start` runs
/// once before anything else; after `on_stop` nothing is delivered.
pub trait Strategy: Send {
    fn id(&self) -> &StrategyId;

    fn sync_mode(&self) -> SyncMode {
        SyncMode::Poll
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext);

    fn on_event(&mut self, ctx: &mut dyn StrategyContext, event: &Event);

    fn on_timer(&mut self, ctx: &mut dyn StrategyContext, timer_id: TimerId);

    fn on_stop(&mut self, ctx: &mut dyn StrategyContext);
}
