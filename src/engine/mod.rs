//! Execution Engine - 策略執行引擎
//!
//! 事件路由、訂單賬本、命令分發、策略運行時與計時器。
//!
//! ## 架構
//!
//! ```text
//!  EventFeed ──▶ EventRouter ──▶ OrderLedger / AccountBook
//!                     │
//!                     ▼
//!              StrategyRuntime ──▶ CommandDispatcher ──▶ ExecutionAdapter
//!                     ▲
//!               TimerService
//! ```

pub mod adapter;
pub mod clock;
pub mod commands;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod id_gen;
pub mod ledger;
pub mod live;
pub mod router;
pub mod runtime;
pub mod shutdown;
pub mod state;
pub mod strategy;
pub mod supervisor;

// Re-exports
pub use adapter::{ChannelAdapter, ExecutionAdapter, RecordingAdapter};
pub use clock::{Clock, FiredTimer, LiveClock, ManualClock, TimerService};
pub use commands::{
    AdapterRequest, AssignedOrder, CancelAll, CancelOrder, CancelRequest, Command, OrderRequest,
    PlaceOrder,
};
pub use context::{RuntimeContext, StrategyContext};
pub use dispatcher::{CommandDispatcher, DispatchOutcome, DispatchStats};
pub use events::{
    AccountSnapshot, CommandRejected, Event, EventEnvelope, ExchangeHealth, ExchangeStateChanged,
    FundingRate, OrderAccepted, OrderCanceled, OrderCompleted, OrderFilled, OrderRejected, Quote,
};
pub use id_gen::{
    build_generator, ClientIdGenerator, IdGeneratorKind, RandomIdGenerator, SeededIdGenerator,
};
pub use ledger::{LedgerUpdate, OrderLedger};
pub use live::{ChannelFeed, EventFeed, LiveDriver, ReplayFeed};
pub use router::{EventRouter, RouterStats, StrategySubscription};
pub use runtime::{CallbackEnv, RuntimeState, RuntimeStats, StrategyRuntime};
pub use shutdown::{GracefulShutdown, ShutdownPhase, ShutdownSignal};
pub use state::{EngineState, ExchangeState};
pub use strategy::{Strategy, SyncMode};
pub use supervisor::{Engine, EnginePhase};
