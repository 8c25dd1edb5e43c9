//! Engine Supervisor - 引擎主循環
//!
//! Owns every strategy runtime and all engine state, and drives the single
//! deterministic loop: timers and queued events are interleaved by logical
//! time, state is updated before delivery, and each callback's commands are
//! dispatched as soon as it returns.
//!
//! The same [`Engine`] value runs backtests (`run_backtest`) and live trading
//! (driven by [`super::live::LiveDriver`]); only the source of time differs.

use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

use super::adapter::ExecutionAdapter;
use super::clock::{FiredTimer, TimerService};
use super::commands::Command;
use super::dispatcher::{CommandDispatcher, DispatchStats};
use super::events::{Event, EventEnvelope, ExchangeHealth};
use super::id_gen::{build_generator, ClientIdGenerator};
use super::router::{EventRouter, RouterStats, StrategySubscription};
use super::runtime::{CallbackEnv, RuntimeState, RuntimeStats, StrategyRuntime};
use super::state::EngineState;
use super::strategy::Strategy;
use crate::config::EngineConfig;
use crate::domain::{
    AssetId, Balance, ClientOrderId, ExchangeInstance, InstrumentId, InstrumentMeta, LiveOrder,
    Position, StrategyId,
};
use crate::error::{EngineError, LedgerError, Result};

/// Synthetic rejections one strategy may receive in a single step before it
/// is considered stuck in a place/reject loop.
const MAX_SYNTHETIC_CHAIN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Running,
    /// Strategies stopped; execution events are still applied
    Stopped,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnginePhase::Idle => write!(f, "idle"),
            EnginePhase::Running => write!(f, "running"),
            EnginePhase::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Engine {
    phase: EnginePhase,
    state: EngineState,
    runtimes: HashMap<StrategyId, StrategyRuntime>,
    router: EventRouter,
    timers: TimerService,
    dispatcher: CommandDispatcher,
    ids: Box<dyn ClientIdGenerator>,
    /// Synthetic rejections owed to strategies
    pending: VecDeque<(StrategyId, ExchangeInstance, Event)>,
    /// Strategies whose `on_stop` is owed
    stopping: VecDeque<StrategyId>,
}

impl Engine {
    pub fn new(adapter: Box<dyn ExecutionAdapter>, ids: Box<dyn ClientIdGenerator>) -> Self {
        Self {
            phase: EnginePhase::Idle,
            state: EngineState::new(),
            runtimes: HashMap::new(),
            router: EventRouter::new(),
            timers: TimerService::new(),
            dispatcher: CommandDispatcher::new(adapter),
            ids,
            pending: VecDeque::new(),
            stopping: VecDeque::new(),
        }
    }

    /// Engine with the client id generator selected by configuration
    pub fn from_config(config: &EngineConfig, adapter: Box<dyn ExecutionAdapter>) -> Self {
        let settings = &config.engine;
        let kind = settings.effective_id_generator();
        info!(mode = %settings.mode, id_generator = ?kind, "engine created");
        Self::new(
            adapter,
            build_generator(kind, settings.id_seed, &settings.id_prefix),
        )
    }

    // ==================== Setup ====================

    pub fn register_exchange(&mut self, exchange: &ExchangeInstance) {
        self.state.register_exchange(exchange);
    }

    pub fn register_instrument(&mut self, meta: InstrumentMeta) {
        debug!(instrument = %meta.instrument, "instrument registered");
        self.state.instruments.insert(meta.instrument.clone(), meta);
    }

    pub fn set_balance(&mut self, exchange: &ExchangeInstance, asset: AssetId, total: Decimal) {
        self.state
            .register_exchange(exchange)
            .account
            .set_balance(asset, total);
    }

    /// Register a strategy. Started immediately when the engine is running.
    pub fn add_strategy(
        &mut self,
        strategy: Box<dyn Strategy>,
        subscription: StrategySubscription,
    ) -> Result<()> {
        let id = strategy.id().clone();
        if self.runtimes.contains_key(&id) {
            return Err(EngineError::DuplicateStrategy(id));
        }
        if self.phase == EnginePhase::Stopped {
            return Err(EngineError::InvalidState(format!(
                "cannot add strategy {id} to a stopped engine"
            )));
        }

        self.router.subscribe(StrategySubscription {
            strategy_id: id.clone(),
            ..subscription
        });
        self.runtimes
            .insert(id.clone(), StrategyRuntime::new(strategy));
        info!(strategy = %id, "strategy registered");

        if self.phase == EnginePhase::Running {
            self.start_runtime(&id);
            self.drain_pending();
        }
        Ok(())
    }

    /// Run every registered strategy's `on_start`, in registration order
    pub fn start(&mut self, now_ms: i64) -> Result<()> {
        if self.phase != EnginePhase::Idle {
            return Err(EngineError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: EnginePhase::Running.to_string(),
            });
        }
        self.state.now_ms = now_ms;
        self.phase = EnginePhase::Running;
        info!(now_ms, strategies = self.runtimes.len(), "engine started");

        for id in self.router.strategies() {
            self.start_runtime(&id);
            self.drain_pending();
        }
        Ok(())
    }

    // ==================== Event loop ====================

    /// Queue an inbound event. Nothing is applied until time advances past it.
    pub fn ingest(&mut self, envelope: EventEnvelope) {
        self.router.enqueue(envelope);
    }

    /// Process every timer and queued event at or before `until_ms`.
    ///
    /// Timers due at or before an event's timestamp fire first.
    pub fn advance_to(&mut self, until_ms: i64) {
        if self.phase == EnginePhase::Idle {
            debug!(until_ms, "engine not started, nothing advanced");
            return;
        }
        loop {
            let next_timer = self.timers.next_due().filter(|due| *due <= until_ms);
            let next_event = self.router.peek_ts().filter(|ts| *ts <= until_ms);
            match (next_timer, next_event) {
                (Some(due), Some(ts)) if due <= ts => self.fire_next_timer(due),
                (Some(due), None) => self.fire_next_timer(due),
                (_, Some(_)) => match self.router.pop_ready(until_ms) {
                    Some(envelope) => self.process(envelope),
                    None => break,
                },
                (None, None) => break,
            }
        }
        self.state.now_ms = self.state.now_ms.max(until_ms);
    }

    /// Replay a finite event stream, then shut down.
    ///
    /// Logical time starts at the earliest event unless the engine was
    /// already started.
    pub fn run_backtest<I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = EventEnvelope>,
    {
        let events: Vec<EventEnvelope> = events.into_iter().collect();
        if self.phase == EnginePhase::Idle {
            let start = events.iter().map(|e| e.ts_ms).min().unwrap_or(0);
            self.start(start)?;
        }
        if self.phase != EnginePhase::Running {
            return Err(EngineError::InvalidState(format!(
                "backtest needs a running engine, engine is {}",
                self.phase
            )));
        }

        let horizon = events.iter().map(|e| e.ts_ms).max();
        info!(events = events.len(), "backtest replay started");
        for envelope in events {
            self.ingest(envelope);
        }
        if let Some(horizon) = horizon {
            self.advance_to(horizon);
        }
        self.shutdown();
        info!(
            delivered = self.router.stats().events_delivered,
            dropped = self.router.stats().events_dropped,
            "backtest replay finished"
        );
        Ok(())
    }

    /// Stop every running strategy. Each in-flight callback has already
    /// returned; `on_stop` runs once per strategy in registration order.
    pub fn shutdown(&mut self) {
        if self.phase != EnginePhase::Running {
            return;
        }
        info!("engine shutting down");
        for id in self.router.strategies() {
            self.mark_stopping(&id, "engine shutdown");
            self.drain_pending();
        }
        self.phase = EnginePhase::Stopped;
    }

    /// Stop one strategy from outside the engine
    pub fn stop_strategy(&mut self, id: &StrategyId, reason: &str) -> Result<()> {
        if !self.runtimes.contains_key(id) {
            return Err(EngineError::UnknownStrategy(id.clone()));
        }
        info!(strategy = %id, reason, "stop requested by operator");
        self.after_callback(
            id,
            vec![Command::StopStrategy {
                strategy: id.clone(),
                reason: reason.to_string(),
            }],
        );
        self.drain_pending();
        Ok(())
    }

    // ==================== Queries ====================

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn now_ms(&self) -> i64 {
        self.state.now_ms
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn order(&self, client_id: &ClientOrderId) -> Option<&LiveOrder> {
        self.state.find_order(client_id)
    }

    pub fn live_orders(&self, exchange: &ExchangeInstance) -> Vec<&LiveOrder> {
        self.state
            .exchange(exchange)
            .map(|x| x.ledger.live_orders())
            .unwrap_or_default()
    }

    pub fn balance(&self, exchange: &ExchangeInstance, asset: &AssetId) -> Option<&Balance> {
        self.state.exchange(exchange)?.account.balance(asset)
    }

    pub fn position(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<&Position> {
        self.state.exchange(exchange)?.account.position(instrument)
    }

    pub fn exchange_health(&self, exchange: &ExchangeInstance) -> Option<ExchangeHealth> {
        self.state.health(exchange)
    }

    pub fn runtime_state(&self, id: &StrategyId) -> Option<RuntimeState> {
        self.runtimes.get(id).map(|r| r.state())
    }

    pub fn runtime_stats(&self, id: &StrategyId) -> Option<&RuntimeStats> {
        self.runtimes.get(id).map(|r| r.stats())
    }

    pub fn stop_reason(&self, id: &StrategyId) -> Option<&str> {
        self.runtimes.get(id).and_then(|r| r.stop_reason())
    }

    pub fn router_stats(&self) -> &RouterStats {
        self.router.stats()
    }

    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    pub fn next_event_ts(&self) -> Option<i64> {
        self.router.peek_ts()
    }

    pub fn next_timer_due(&mut self) -> Option<i64> {
        self.timers.next_due()
    }

    /// Live orders across all exchanges
    pub fn live_order_count(&self) -> usize {
        self.state
            .exchanges
            .values()
            .map(|x| x.ledger.live_count())
            .sum()
    }

    // ==================== Internals ====================

    fn process(&mut self, envelope: EventEnvelope) {
        self.state.now_ms = self.state.now_ms.max(envelope.ts_ms);
        if !self.router.admit(&envelope, &mut self.state) {
            return;
        }

        let EventEnvelope {
            exchange,
            ts_ms,
            event,
        } = envelope;
        let targets: Vec<StrategyId> = if event.is_order_event() {
            self.apply_execution(&exchange, &event, ts_ms)
                .into_iter()
                .collect()
        } else {
            self.apply_market(&exchange, &event);
            self.router.targets(&exchange, &event)
        };

        for id in targets {
            self.deliver(&id, &exchange, &event);
        }
        self.drain_pending();
    }

    fn apply_market(&mut self, exchange: &ExchangeInstance, event: &Event) {
        let Some(x) = self.state.exchange_mut(exchange) else {
            return;
        };
        match event {
            Event::Quote(quote) => {
                x.account.mark(&quote.instrument, quote.mid());
                x.quotes.insert(quote.instrument.clone(), quote.clone());
            }
            Event::FundingRate(funding) => {
                x.funding.insert(funding.instrument.clone(), funding.clone());
            }
            Event::ExchangeStateChanged(change) => {
                info!(
                    exchange = %exchange,
                    from = %x.health,
                    to = %change.new_state,
                    reason = %change.reason,
                    "exchange health changed"
                );
                x.health = change.new_state;
            }
            Event::AccountSnapshot(_) => {
                debug!(exchange = %exchange, "account snapshot passed to snapshot-mode strategies");
            }
            _ => {}
        }
    }

    /// Apply an execution event to ledger and account. Returns the owner to notify.
    fn apply_execution(
        &mut self,
        exchange: &ExchangeInstance,
        event: &Event,
        ts_ms: i64,
    ) -> Option<StrategyId> {
        let EngineState {
            exchanges,
            instruments,
            ..
        } = &mut self.state;
        let x = exchanges.get_mut(exchange)?;
        let owner = event
            .client_id()
            .and_then(|id| x.ledger.owner_of(id))
            .cloned();

        match x.ledger.apply(event, ts_ms)? {
            Ok(update) => {
                if let Some(asset) = &update.order.reserve_asset {
                    x.account.release(asset, update.released);
                }
                if let Event::OrderFilled(fill) = event {
                    match instruments.get(&update.order.instrument) {
                        Some(meta) => {
                            let realized = x.account.apply_fill(meta, &fill.as_fill());
                            if let Some(quote) = x.quotes.get(&meta.instrument) {
                                x.account.mark(&meta.instrument, quote.mid());
                            }
                            debug!(
                                client_id = %fill.client_id,
                                qty = %fill.qty,
                                price = %fill.price,
                                %realized,
                                "fill applied"
                            );
                        }
                        None => warn!(
                            instrument = %update.order.instrument,
                            "fill for instrument without metadata, account not updated"
                        ),
                    }
                }
                Some(update.order.strategy)
            }
            Err(e) if e.is_fatal() => {
                error!(exchange = %exchange, error = %e, "ledger invariant violated");
                self.router.record_drop();
                if let Some(owner) = owner {
                    self.force_stop(&owner, &e.to_string());
                }
                None
            }
            Err(e) => {
                match &e {
                    LedgerError::AlreadyTerminal(_) => {
                        debug!(exchange = %exchange, error = %e, "duplicate event for terminal order dropped")
                    }
                    LedgerError::DuplicateTrade { .. } => {
                        debug!(exchange = %exchange, error = %e, "redelivered fill dropped")
                    }
                    _ => warn!(exchange = %exchange, error = %e, "execution event dropped"),
                }
                self.router.record_drop();
                None
            }
        }
    }

    fn deliver(&mut self, id: &StrategyId, exchange: &ExchangeInstance, event: &Event) {
        let Some(runtime) = self.runtimes.get_mut(id) else {
            debug!(strategy = %id, kind = event.kind(), "event for unregistered strategy dropped");
            self.router.record_drop();
            return;
        };
        if !runtime.is_running() {
            debug!(strategy = %id, kind = event.kind(), "event for inactive strategy dropped");
            self.router.record_drop();
            return;
        }

        let mut env = CallbackEnv {
            state: &self.state,
            timers: &mut self.timers,
            ids: self.ids.as_mut(),
        };
        let commands = runtime.on_event(&mut env, exchange, event);
        self.router.record_delivery(id);
        self.after_callback(id, commands);
    }

    fn fire_next_timer(&mut self, due_ms: i64) {
        if let Some(fired) = self.timers.pop_due(due_ms) {
            self.fire(fired);
        }
    }

    fn fire(&mut self, fired: FiredTimer) {
        self.state.now_ms = self.state.now_ms.max(fired.due_ms);
        let Some(runtime) = self.runtimes.get_mut(&fired.owner) else {
            return;
        };
        let mut env = CallbackEnv {
            state: &self.state,
            timers: &mut self.timers,
            ids: self.ids.as_mut(),
        };
        let commands = runtime.on_timer(&mut env, fired.id);
        self.after_callback(&fired.owner, commands);
        self.drain_pending();
    }

    fn start_runtime(&mut self, id: &StrategyId) {
        let Some(runtime) = self.runtimes.get_mut(id) else {
            return;
        };
        let mut env = CallbackEnv {
            state: &self.state,
            timers: &mut self.timers,
            ids: self.ids.as_mut(),
        };
        let commands = runtime.start(&mut env);
        self.after_callback(id, commands);
    }

    /// Dispatch a callback's commands and queue what it owes back
    fn after_callback(&mut self, owner: &StrategyId, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }

        let mut venues: HashMap<ClientOrderId, ExchangeInstance> = HashMap::new();
        for command in &commands {
            match command {
                Command::PlaceOrder(a) => {
                    venues.insert(a.client_id.clone(), a.order.exchange.clone());
                }
                Command::PlaceOrders(batch) => {
                    for a in batch {
                        venues.insert(a.client_id.clone(), a.order.exchange.clone());
                    }
                }
                _ => {}
            }
        }

        let outcome = self.dispatcher.dispatch(owner, commands, &mut self.state);
        for rejection in outcome.rejections {
            let Some(exchange) = venues.get(&rejection.client_id).cloned() else {
                continue;
            };
            self.pending
                .push_back((owner.clone(), exchange, Event::CommandRejected(rejection)));
        }
        for (strategy, reason) in outcome.stops {
            self.mark_stopping(&strategy, &reason);
        }
    }

    fn mark_stopping(&mut self, id: &StrategyId, reason: &str) {
        let Some(runtime) = self.runtimes.get_mut(id) else {
            warn!(strategy = %id, "stop for unregistered strategy ignored");
            return;
        };
        if runtime.request_stop(reason) {
            self.stopping.push_back(id.clone());
        } else if runtime.state() == RuntimeState::Stopped {
            self.timers.cancel_owned_by(id);
        }
    }

    fn force_stop(&mut self, id: &StrategyId, reason: &str) {
        let state = self.runtimes.get(id).map(|r| r.state());
        if state != Some(RuntimeState::Running) {
            warn!(strategy = %id, reason, ?state, "strategy not running, force-stop skipped");
            return;
        }
        error!(strategy = %id, reason, "force-stopping strategy");
        self.after_callback(
            id,
            vec![Command::StopStrategy {
                strategy: id.clone(),
                reason: reason.to_string(),
            }],
        );
    }

    /// Run owed `on_stop` callbacks and deliver synthetic rejections until
    /// nothing is left.
    fn drain_pending(&mut self) {
        let mut chain: HashMap<StrategyId, usize> = HashMap::new();
        loop {
            if let Some(id) = self.stopping.pop_front() {
                self.finish_stop(&id);
                continue;
            }
            let Some((id, exchange, event)) = self.pending.pop_front() else {
                break;
            };

            let depth = chain.entry(id.clone()).or_insert(0);
            *depth += 1;
            if *depth > MAX_SYNTHETIC_CHAIN {
                error!(strategy = %id, limit = MAX_SYNTHETIC_CHAIN, "rejection loop detected");
                self.pending.retain(|(owner, _, _)| owner != &id);
                self.force_stop(&id, "rejection loop");
                continue;
            }
            self.deliver(&id, &exchange, &event);
        }
    }

    fn finish_stop(&mut self, id: &StrategyId) {
        let Some(runtime) = self.runtimes.get_mut(id) else {
            return;
        };
        let mut env = CallbackEnv {
            state: &self.state,
            timers: &mut self.timers,
            ids: self.ids.as_mut(),
        };
        let commands = runtime.finish_stop(&mut env);
        let discarded = self.timers.cancel_owned_by(id);
        debug!(strategy = %id, timers = discarded, "strategy timers discarded");
        self.after_callback(id, commands);
    }
}
