//! The only handle a strategy has on the engine.
//!
//! Commands are buffered and dispatched once the callback returns, so a
//! strategy never re-enters itself. Client ids and timer ids are assigned
//! immediately so the strategy can track them.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::clock::TimerService;
use super::commands::{AssignedOrder, CancelAll, CancelOrder, Command, PlaceOrder};
use super::events::{ExchangeHealth, Quote};
use super::id_gen::ClientIdGenerator;
use super::state::EngineState;
use super::strategy::SyncMode;
use crate::domain::{
    AccountBook, AssetId, Balance, ClientOrderId, ExchangeInstance, InstrumentId, InstrumentMeta,
    LiveOrder, Position, Price, StrategyId, TimerId,
};

pub trait StrategyContext {
    fn strategy_id(&self) -> &StrategyId;

    /// Deterministic engine time (ms)
    fn now_ms(&self) -> i64;

    // ==================== Commands ====================

    /// Queue an order; returns the client id it will carry
    fn place_order(&mut self, order: PlaceOrder) -> ClientOrderId;

    fn place_orders(&mut self, orders: Vec<PlaceOrder>) -> Vec<ClientOrderId>;

    fn cancel_order(&mut self, cancel: CancelOrder);

    fn cancel_all(&mut self, cancel_all: CancelAll);

    /// Takes effect after the current callback returns
    fn stop_strategy(&mut self, strategy: StrategyId, reason: &str);

    // ==================== Timers ====================

    fn set_timer(&mut self, delay: Duration) -> TimerId;

    fn set_interval(&mut self, period: Duration) -> TimerId;

    fn cancel_timer(&mut self, timer_id: TimerId);

    // ==================== Queries ====================

    fn instrument_meta(&self, instrument: &InstrumentId) -> Option<&InstrumentMeta>;

    fn quote(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<&Quote>;

    fn mid(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<Price> {
        self.quote(exchange, instrument).map(|q| q.mid())
    }

    fn balance(&self, exchange: &ExchangeInstance, asset: &AssetId) -> Option<&Balance>;

    fn position(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<&Position>;

    fn exchange_health(&self, exchange: &ExchangeInstance) -> Option<ExchangeHealth>;

    /// Live or terminal order by client id
    fn order(&self, client_id: &ClientOrderId) -> Option<&LiveOrder>;

    /// This strategy's live orders on one exchange, in placement order
    fn open_orders(&self, exchange: &ExchangeInstance) -> Vec<&LiveOrder>;

    // ==================== Logging ====================

    fn log_info(&self, message: &str);

    fn log_warn(&self, message: &str);

    fn log_error(&self, message: &str);
}

/// Context handed to one callback invocation
pub struct RuntimeContext<'a> {
    strategy: &'a StrategyId,
    sync_mode: SyncMode,
    state: &'a EngineState,
    belief: &'a HashMap<ExchangeInstance, AccountBook>,
    timers: &'a mut TimerService,
    ids: &'a mut dyn ClientIdGenerator,
    commands: Vec<Command>,
}

impl<'a> RuntimeContext<'a> {
    pub fn new(
        strategy: &'a StrategyId,
        sync_mode: SyncMode,
        state: &'a EngineState,
        belief: &'a HashMap<ExchangeInstance, AccountBook>,
        timers: &'a mut TimerService,
        ids: &'a mut dyn ClientIdGenerator,
    ) -> Self {
        Self {
            strategy,
            sync_mode,
            state,
            belief,
            timers,
            ids,
            commands: Vec::new(),
        }
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    fn assign(&mut self, order: PlaceOrder) -> AssignedOrder {
        let client_id = match &order.client_id {
            Some(id) => id.clone(),
            None => self.ids.next_id(),
        };
        AssignedOrder { client_id, order }
    }

    fn account(&self, exchange: &ExchangeInstance) -> Option<&AccountBook> {
        match self.sync_mode {
            SyncMode::Poll => self.state.exchange(exchange).map(|x| &x.account),
            SyncMode::Snapshot => self.belief.get(exchange),
        }
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl StrategyContext for RuntimeContext<'_> {
    fn strategy_id(&self) -> &StrategyId {
        self.strategy
    }

    fn now_ms(&self) -> i64 {
        self.state.now_ms
    }

    fn place_order(&mut self, order: PlaceOrder) -> ClientOrderId {
        let assigned = self.assign(order);
        let client_id = assigned.client_id.clone();
        self.commands.push(Command::PlaceOrder(assigned));
        client_id
    }

    fn place_orders(&mut self, orders: Vec<PlaceOrder>) -> Vec<ClientOrderId> {
        let assigned: Vec<AssignedOrder> = orders.into_iter().map(|o| self.assign(o)).collect();
        let ids = assigned.iter().map(|a| a.client_id.clone()).collect();
        self.commands.push(Command::PlaceOrders(assigned));
        ids
    }

    fn cancel_order(&mut self, cancel: CancelOrder) {
        self.commands.push(Command::CancelOrder(cancel));
    }

    fn cancel_all(&mut self, cancel_all: CancelAll) {
        self.commands.push(Command::CancelAll(cancel_all));
    }

    fn stop_strategy(&mut self, strategy: StrategyId, reason: &str) {
        self.commands.push(Command::StopStrategy {
            strategy,
            reason: reason.to_string(),
        });
    }

    fn set_timer(&mut self, delay: Duration) -> TimerId {
        self.timers
            .set_timer(self.strategy, self.state.now_ms, duration_ms(delay))
    }

    fn set_interval(&mut self, period: Duration) -> TimerId {
        self.timers
            .set_interval(self.strategy, self.state.now_ms, duration_ms(period))
    }

    fn cancel_timer(&mut self, timer_id: TimerId) {
        if self.timers.is_owned_by(timer_id, self.strategy) {
            self.timers.cancel(timer_id);
        } else {
            debug!(strategy = %self.strategy, timer = %timer_id, "cancel of inactive or foreign timer ignored");
        }
    }

    fn instrument_meta(&self, instrument: &InstrumentId) -> Option<&InstrumentMeta> {
        self.state.instrument(instrument)
    }

    fn quote(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<&Quote> {
        self.state.quote(exchange, instrument)
    }

    fn balance(&self, exchange: &ExchangeInstance, asset: &AssetId) -> Option<&Balance> {
        self.account(exchange)?.balance(asset)
    }

    fn position(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<&Position> {
        self.account(exchange)?.position(instrument)
    }

    fn exchange_health(&self, exchange: &ExchangeInstance) -> Option<ExchangeHealth> {
        self.state.health(exchange)
    }

    fn order(&self, client_id: &ClientOrderId) -> Option<&LiveOrder> {
        self.state.find_order(client_id)
    }

    fn open_orders(&self, exchange: &ExchangeInstance) -> Vec<&LiveOrder> {
        self.state
            .exchange(exchange)
            .map(|x| x.ledger.live_for(self.strategy, None))
            .unwrap_or_default()
    }

    fn log_info(&self, message: &str) {
        info!(strategy = %self.strategy, "{}", message);
    }

    fn log_warn(&self, message: &str) {
        warn!(strategy = %self.strategy, "{}", message);
    }

    fn log_error(&self, message: &str) {
        error!(strategy = %self.strategy, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::fixtures::btc_perp;
    use crate::domain::{Environment, OrderSide, Qty};
    use crate::engine::id_gen::SeededIdGenerator;
    use rust_decimal_macros::dec;

    fn exchange() -> ExchangeInstance {
        ExchangeInstance::new("hyperliquid", Environment::Testnet)
    }

    fn order() -> PlaceOrder {
        PlaceOrder::limit(
            exchange(),
            InstrumentId::new("BTC-PERP"),
            OrderSide::Buy,
            Price::new(dec!(85000)),
            Qty::new(dec!(0.01)),
        )
    }

    #[test]
    fn test_commands_buffer_with_assigned_ids() {
        let strategy = StrategyId::new("s1");
        let mut state = EngineState::new();
        state.register_exchange(&exchange());
        state.instruments.insert(InstrumentId::new("BTC-PERP"), btc_perp());
        let belief = HashMap::new();
        let mut timers = TimerService::new();
        let mut ids = SeededIdGenerator::new(7, "bt");

        let mut ctx = RuntimeContext::new(&strategy, SyncMode::Poll, &state, &belief, &mut timers, &mut ids);
        let generated = ctx.place_order(order());
        let chosen = ctx.place_order(order().with_client_id(ClientOrderId::new("mine")));
        ctx.cancel_all(CancelAll::new(exchange()));
        ctx.stop_strategy(strategy.clone(), "done");
        assert!(ctx.instrument_meta(&InstrumentId::new("BTC-PERP")).is_some());
        assert_eq!(ctx.exchange_health(&exchange()), Some(ExchangeHealth::Active));

        let commands = ctx.into_commands();
        assert_eq!(commands.len(), 4);
        assert!(generated.as_str().starts_with("bt-"));
        assert_eq!(chosen, ClientOrderId::new("mine"));
        match &commands[0] {
            Command::PlaceOrder(a) => assert_eq!(a.client_id, generated),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_mode_reads_belief() {
        let strategy = StrategyId::new("s1");
        let mut state = EngineState::new();
        let usdc = AssetId::new("USDC");
        state
            .register_exchange(&exchange())
            .account
            .set_balance(usdc.clone(), dec!(100));

        let mut belief = HashMap::new();
        belief.insert(
            exchange(),
            AccountBook::from_snapshot(&[Balance::new(usdc.clone(), dec!(42))], &[]),
        );
        let mut timers = TimerService::new();
        let mut ids = SeededIdGenerator::new(7, "bt");

        let poll = RuntimeContext::new(&strategy, SyncMode::Poll, &state, &belief, &mut timers, &mut ids);
        assert_eq!(poll.balance(&exchange(), &usdc).unwrap().total, dec!(100));
        drop(poll);

        let snap = RuntimeContext::new(&strategy, SyncMode::Snapshot, &state, &belief, &mut timers, &mut ids);
        assert_eq!(snap.balance(&exchange(), &usdc).unwrap().total, dec!(42));
    }

    #[test]
    fn test_foreign_timer_cannot_be_canceled() {
        let strategy = StrategyId::new("s1");
        let state = EngineState::new();
        let belief = HashMap::new();
        let mut timers = TimerService::new();
        let foreign = timers.set_interval(&StrategyId::new("s2"), 0, 1_000);
        let mut ids = SeededIdGenerator::new(7, "bt");

        let mut ctx = RuntimeContext::new(&strategy, SyncMode::Poll, &state, &belief, &mut timers, &mut ids);
        let own = ctx.set_timer(Duration::from_secs(1));
        ctx.cancel_timer(foreign);
        ctx.cancel_timer(own);
        drop(ctx);

        assert_eq!(timers.active_count(), 1);
    }
}
