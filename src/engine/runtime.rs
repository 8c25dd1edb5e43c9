//! Strategy Runtime - 單一策略的生命週期
//!
//! Owns one strategy instance and enforces its callback contract: `on_start`
//! first and once, strictly sequential callbacks, deferred stop, `on_stop` last
//! and once.

use std::collections::HashMap;
use tracing::{debug, info};

use super::clock::TimerService;
use super::commands::Command;
use super::context::{RuntimeContext, StrategyContext};
use super::events::Event;
use super::id_gen::ClientIdGenerator;
use super::state::EngineState;
use super::strategy::{Strategy, SyncMode};
use crate::domain::{AccountBook, ExchangeInstance, StrategyId, TimerId};

/// Runtime lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    /// Registered, `on_start` not yet called
    Created,
    Running,
    /// Stop requested; `on_stop` runs next
    Stopping,
    Stopped,
}

impl RuntimeState {
    pub fn can_transition_to(&self, target: RuntimeState) -> bool {
        use RuntimeState::*;

        matches!(
            (self, target),
            (Created, Running) | (Created, Stopped) | (Running, Stopping) | (Stopping, Stopped)
        )
    }

    pub fn accepts_callbacks(&self) -> bool {
        matches!(self, RuntimeState::Running)
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeState::Created => write!(f, "created"),
            RuntimeState::Running => write!(f, "running"),
            RuntimeState::Stopping => write!(f, "stopping"),
            RuntimeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Engine resources lent to a callback
pub struct CallbackEnv<'a> {
    pub state: &'a EngineState,
    pub timers: &'a mut TimerService,
    pub ids: &'a mut dyn ClientIdGenerator,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    pub events_delivered: u64,
    pub timers_fired: u64,
    pub commands_issued: u64,
}

pub struct StrategyRuntime {
    id: StrategyId,
    strategy: Box<dyn Strategy>,
    sync_mode: SyncMode,
    state: RuntimeState,
    /// Snapshot-mode view of each exchange's account
    belief: HashMap<ExchangeInstance, AccountBook>,
    stop_reason: Option<String>,
    stats: RuntimeStats,
}

impl StrategyRuntime {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self {
            id: strategy.id().clone(),
            sync_mode: strategy.sync_mode(),
            strategy,
            state: RuntimeState::Created,
            belief: HashMap::new(),
            stop_reason: None,
            stats: RuntimeStats::default(),
        }
    }

    pub fn id(&self) -> &StrategyId {
        &self.id
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn is_running(&self) -> bool {
        self.state.accepts_callbacks()
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn belief(&self, exchange: &ExchangeInstance) -> Option<&AccountBook> {
        self.belief.get(exchange)
    }

    pub fn start(&mut self, env: &mut CallbackEnv<'_>) -> Vec<Command> {
        if !self.transition(RuntimeState::Running) {
            return Vec::new();
        }
        info!(strategy = %self.id, mode = ?self.sync_mode, "starting strategy");
        self.invoke(env, |strategy, ctx| strategy.on_start(ctx))
    }

    pub fn on_event(
        &mut self,
        env: &mut CallbackEnv<'_>,
        exchange: &ExchangeInstance,
        event: &Event,
    ) -> Vec<Command> {
        if !self.is_running() {
            debug!(strategy = %self.id, state = %self.state, kind = event.kind(), "event skipped");
            return Vec::new();
        }
        if let (SyncMode::Snapshot, Event::AccountSnapshot(snapshot)) = (self.sync_mode, event) {
            self.belief.insert(
                exchange.clone(),
                AccountBook::from_snapshot(&snapshot.balances, &snapshot.positions),
            );
        }
        self.stats.events_delivered += 1;
        self.invoke(env, |strategy, ctx| strategy.on_event(ctx, event))
    }

    pub fn on_timer(&mut self, env: &mut CallbackEnv<'_>, timer_id: TimerId) -> Vec<Command> {
        if !self.is_running() {
            return Vec::new();
        }
        self.stats.timers_fired += 1;
        self.invoke(env, |strategy, ctx| strategy.on_timer(ctx, timer_id))
    }

    /// Mark for stopping. Returns true when `on_stop` is now owed.
    ///
    /// A strategy that never started goes straight to `Stopped`.
    pub fn request_stop(&mut self, reason: &str) -> bool {
        match self.state {
            RuntimeState::Created => {
                self.stop_reason = Some(reason.to_string());
                self.transition(RuntimeState::Stopped);
                false
            }
            RuntimeState::Running => {
                self.stop_reason = Some(reason.to_string());
                self.transition(RuntimeState::Stopping)
            }
            RuntimeState::Stopping | RuntimeState::Stopped => false,
        }
    }

    /// Run `on_stop` if a stop is pending
    pub fn finish_stop(&mut self, env: &mut CallbackEnv<'_>) -> Vec<Command> {
        if self.state != RuntimeState::Stopping {
            return Vec::new();
        }
        info!(
            strategy = %self.id,
            reason = self.stop_reason.as_deref().unwrap_or(""),
            "stopping strategy"
        );
        let commands = self.invoke(env, |strategy, ctx| strategy.on_stop(ctx));
        self.transition(RuntimeState::Stopped);
        commands
    }

    fn transition(&mut self, target: RuntimeState) -> bool {
        if !self.state.can_transition_to(target) {
            debug!(strategy = %self.id, from = %self.state, to = %target, "runtime transition refused");
            return false;
        }
        self.state = target;
        true
    }

    fn invoke<F>(&mut self, env: &mut CallbackEnv<'_>, callback: F) -> Vec<Command>
    where
        F: FnOnce(&mut dyn Strategy, &mut dyn StrategyContext),
    {
        let mut ctx = RuntimeContext::new(
            &self.id,
            self.sync_mode,
            env.state,
            &self.belief,
            &mut *env.timers,
            &mut *env.ids,
        );
        callback(self.strategy.as_mut(), &mut ctx);
        let commands = ctx.into_commands();
        self.stats.commands_issued += commands.len() as u64;
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetId, Balance};
    use crate::engine::events::AccountSnapshot;
    use crate::engine::id_gen::SeededIdGenerator;
    use crate::domain::Environment;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    struct Probe {
        id: StrategyId,
        mode: SyncMode,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Strategy for Probe {
        fn id(&self) -> &StrategyId {
            &self.id
        }

        fn sync_mode(&self) -> SyncMode {
            self.mode
        }

        fn on_start(&mut self, _ctx: &mut dyn StrategyContext) {
            self.calls.lock().unwrap().push("start".into());
        }

        fn on_event(&mut self, ctx: &mut dyn StrategyContext, event: &Event) {
            self.calls.lock().unwrap().push(event.kind().into());
            ctx.stop_strategy(self.id.clone(), "from event");
        }

        fn on_timer(&mut self, _ctx: &mut dyn StrategyContext, timer_id: TimerId) {
            self.calls.lock().unwrap().push(timer_id.to_string());
        }

        fn on_stop(&mut self, _ctx: &mut dyn StrategyContext) {
            self.calls.lock().unwrap().push("stop".into());
        }
    }

    fn recorder(mode: SyncMode) -> (StrategyRuntime, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let runtime = StrategyRuntime::new(Box::new(Probe {
            id: StrategyId::new("recorder"),
            mode,
            calls: calls.clone(),
        }));
        (runtime, calls)
    }

    #[test]
    fn test_lifecycle_order_and_single_stop() {
        let (mut runtime, calls) = recorder(SyncMode::Poll);
        let state = EngineState::new();
        let mut timers = TimerService::new();
        let mut ids = SeededIdGenerator::new(1, "t");
        let mut env = CallbackEnv {
            state: &state,
            timers: &mut timers,
            ids: &mut ids,
        };
        let exchange = ExchangeInstance::new("x", Environment::Testnet);

        // nothing before start
        assert!(runtime.on_timer(&mut env, TimerId(1)).is_empty());

        runtime.start(&mut env);
        let commands = runtime.on_event(&mut env, &exchange, &Event::AccountSnapshot(AccountSnapshot::default()));
        assert!(matches!(commands[0], Command::StopStrategy { .. }));

        assert!(runtime.request_stop("from event"));
        assert!(!runtime.request_stop("again"));
        assert_eq!(runtime.state(), RuntimeState::Stopping);
        // no delivery while a stop is pending
        assert!(runtime.on_timer(&mut env, TimerId(2)).is_empty());

        runtime.finish_stop(&mut env);
        runtime.finish_stop(&mut env);
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert_eq!(*calls.lock().unwrap(), vec!["start", "account_snapshot", "stop"]);
        assert_eq!(runtime.stop_reason(), Some("from event"));
    }

    #[test]
    fn test_stop_before_start_skips_callbacks() {
        let (mut runtime, calls) = recorder(SyncMode::Poll);
        assert!(!runtime.request_stop("never started"));
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_replaces_belief_wholesale() {
        let (mut runtime, _) = recorder(SyncMode::Snapshot);
        let state = EngineState::new();
        let mut timers = TimerService::new();
        let mut ids = SeededIdGenerator::new(1, "t");
        let mut env = CallbackEnv {
            state: &state,
            timers: &mut timers,
            ids: &mut ids,
        };
        let exchange = ExchangeInstance::new("x", Environment::Testnet);
        runtime.start(&mut env);

        let usdc = AssetId::new("USDC");
        let snapshot = AccountSnapshot {
            balances: vec![Balance::new(usdc.clone(), dec!(250))],
            positions: vec![],
        };
        runtime.on_event(&mut env, &exchange, &Event::AccountSnapshot(snapshot));

        let belief = runtime.belief(&exchange).unwrap();
        assert_eq!(belief.balance(&usdc).unwrap().total, dec!(250));
    }

    #[test]
    fn test_transition_table() {
        use RuntimeState::*;
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
    }
}
