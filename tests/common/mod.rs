#![allow(dead_code)]

use bot_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn hl() -> ExchangeInstance {
    ExchangeInstance::new("hyperliquid", Environment::Testnet)
}

pub fn btc() -> InstrumentId {
    InstrumentId::new("BTC-PERP")
}

pub fn eth() -> InstrumentId {
    InstrumentId::new("ETH/USDC")
}

pub fn btc_perp() -> InstrumentMeta {
    InstrumentMeta {
        instrument: btc(),
        base: AssetId::new("BTC"),
        quote: AssetId::new("USDC"),
        kind: InstrumentKind::Derivative,
        tick_size: dec!(0.1),
        lot_size: dec!(0.001),
        min_qty: dec!(0.001),
        min_notional: dec!(10),
        max_sig_figs: Some(6),
    }
}

pub fn eth_spot() -> InstrumentMeta {
    InstrumentMeta {
        instrument: eth(),
        base: AssetId::new("ETH"),
        quote: AssetId::new("USDC"),
        kind: InstrumentKind::Spot,
        tick_size: dec!(0.01),
        lot_size: dec!(0.0001),
        min_qty: dec!(0.0001),
        min_notional: dec!(10),
        max_sig_figs: None,
    }
}

/// Engine on one exchange with BTC-PERP and ETH/USDC, 10 000 USDC and 1 ETH
pub fn engine() -> (Engine, mpsc::UnboundedReceiver<AdapterRequest>) {
    let (adapter, rx) = ChannelAdapter::new(false);
    let mut engine = Engine::new(
        Box::new(adapter),
        Box::new(SeededIdGenerator::new(7, "test")),
    );
    engine.register_exchange(&hl());
    engine.register_instrument(btc_perp());
    engine.register_instrument(eth_spot());
    engine.set_balance(&hl(), AssetId::new("USDC"), dec!(10000));
    engine.set_balance(&hl(), AssetId::new("ETH"), dec!(1));
    (engine, rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<AdapterRequest>) -> Vec<AdapterRequest> {
    let mut requests = Vec::new();
    while let Ok(request) = rx.try_recv() {
        requests.push(request);
    }
    requests
}

pub fn placed_ids(requests: &[AdapterRequest]) -> Vec<ClientOrderId> {
    requests
        .iter()
        .filter_map(|r| match r {
            AdapterRequest::Place { order } => Some(order.client_id.clone()),
            _ => None,
        })
        .collect()
}

// ==================== Orders ====================

pub fn limit(
    instrument: InstrumentId,
    side: OrderSide,
    price: Decimal,
    qty: Decimal,
    id: &str,
) -> PlaceOrder {
    PlaceOrder::limit(hl(), instrument, side, Price::new(price), Qty::new(qty))
        .with_client_id(ClientOrderId::new(id))
}

// ==================== Events ====================

pub fn at(ts_ms: i64, event: Event) -> EventEnvelope {
    EventEnvelope::new(hl(), ts_ms, event)
}

pub fn accepted(id: &str) -> Event {
    Event::OrderAccepted(OrderAccepted {
        client_id: ClientOrderId::new(id),
        exchange_order_id: Some(ExchangeOrderId::new(format!("x-{id}"))),
    })
}

pub fn filled(id: &str, side: OrderSide, price: Decimal, qty: Decimal) -> Event {
    Event::OrderFilled(OrderFilled {
        client_id: ClientOrderId::new(id),
        trade_id: TradeId::new(format!("t-{id}-{qty}")),
        side,
        price: Price::new(price),
        qty: Qty::new(qty),
        net_qty: Qty::new(qty),
        fee: Decimal::ZERO,
        fee_asset: None,
    })
}

pub fn completed(id: &str, qty: Decimal, avg: Decimal) -> Event {
    Event::OrderCompleted(OrderCompleted {
        client_id: ClientOrderId::new(id),
        filled_qty: Qty::new(qty),
        avg_fill_px: Some(Price::new(avg)),
    })
}

pub fn canceled(id: &str) -> Event {
    Event::OrderCanceled(OrderCanceled {
        client_id: ClientOrderId::new(id),
        reason: None,
    })
}

pub fn quote(instrument: InstrumentId, bid: Decimal, ask: Decimal) -> Event {
    Event::Quote(Quote {
        instrument,
        bid: Price::new(bid),
        ask: Price::new(ask),
        bid_qty: None,
        ask_qty: None,
    })
}

pub fn health(old_state: ExchangeHealth, new_state: ExchangeHealth) -> Event {
    Event::ExchangeStateChanged(ExchangeStateChanged {
        old_state,
        new_state,
        reason: "venue maintenance".to_string(),
    })
}

// ==================== Scripted strategy ====================

#[derive(Debug, Clone)]
pub enum Action {
    Place(PlaceOrder),
    CancelAll(CancelAll),
    Stop(String),
}

/// Places its start orders, then runs each reaction once on the first event
/// of the matching kind. Every callback is appended to the shared log.
pub struct Scripted {
    id: StrategyId,
    start_orders: Vec<PlaceOrder>,
    reactions: Vec<(&'static str, Action)>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    pub fn new(id: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let strategy = Self {
            id: StrategyId::new(id),
            start_orders: Vec::new(),
            reactions: Vec::new(),
            log: log.clone(),
        };
        (strategy, log)
    }

    pub fn on_start_place(mut self, order: PlaceOrder) -> Self {
        self.start_orders.push(order);
        self
    }

    pub fn react(mut self, kind: &'static str, action: Action) -> Self {
        self.reactions.push((kind, action));
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn run(ctx: &mut dyn StrategyContext, action: Action) {
        match action {
            Action::Place(order) => {
                ctx.place_order(order);
            }
            Action::CancelAll(cancel_all) => ctx.cancel_all(cancel_all),
            Action::Stop(reason) => {
                let id = ctx.strategy_id().clone();
                ctx.stop_strategy(id, &reason);
            }
        }
    }
}

impl Strategy for Scripted {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext) {
        self.record(format!("start@{}", ctx.now_ms()));
        for order in std::mem::take(&mut self.start_orders) {
            ctx.place_order(order);
        }
    }

    fn on_event(&mut self, ctx: &mut dyn StrategyContext, event: &Event) {
        self.record(format!("{}@{}", event.kind(), ctx.now_ms()));
        if let Some(pos) = self.reactions.iter().position(|(k, _)| *k == event.kind()) {
            let (_, action) = self.reactions.remove(pos);
            Self::run(ctx, action);
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn StrategyContext, timer_id: TimerId) {
        self.record(format!("{timer_id}@{}", ctx.now_ms()));
    }

    fn on_stop(&mut self, _ctx: &mut dyn StrategyContext) {
        self.record("stop".to_string());
    }
}

pub fn kinds(log: &Arc<Mutex<Vec<String>>>, prefix: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|l| l.starts_with(prefix))
        .count()
}
