//! Normalized inbound events.
//!
//! Every event reaches the engine wrapped in an [`EventEnvelope`] carrying the
//! exchange instance it came from and its exchange timestamp (ms).
//!
//! [`Event::CommandRejected`] is the one kind the engine raises itself: a
//! command that failed validation and never became an order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AssetId, Balance, ClientOrderId, ExchangeInstance, ExchangeOrderId, Fill, InstrumentId,
    OrderSide, Position, Price, Qty, TradeId,
};

/// Top-of-book quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: InstrumentId,
    pub bid: Price,
    pub ask: Price,
    #[serde(default)]
    pub bid_qty: Option<Qty>,
    #[serde(default)]
    pub ask_qty: Option<Qty>,
}

impl Quote {
    pub fn mid(&self) -> Price {
        Price::new((self.bid.value() + self.ask.value()) / Decimal::TWO)
    }

    pub fn spread(&self) -> Decimal {
        self.ask.value() - self.bid.value()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRate {
    pub instrument: InstrumentId,
    pub rate: Decimal,
    #[serde(default)]
    pub next_funding_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub client_id: ClientOrderId,
    #[serde(default)]
    pub exchange_order_id: Option<ExchangeOrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub client_id: ClientOrderId,
    pub reason: String,
}

/// A place command refused before it reached the adapter. The id is never
/// booked, so no order lifecycle event follows for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRejected {
    pub client_id: ClientOrderId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilled {
    pub client_id: ClientOrderId,
    pub trade_id: TradeId,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Qty,
    /// Quantity credited to the position after base-asset fees
    pub net_qty: Qty,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub fee_asset: Option<AssetId>,
}

impl OrderFilled {
    pub fn as_fill(&self) -> Fill {
        Fill {
            side: self.side,
            price: self.price,
            qty: self.qty.value(),
            net_qty: self.net_qty.value(),
            fee: self.fee,
            fee_asset: self.fee_asset.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub client_id: ClientOrderId,
    pub filled_qty: Qty,
    #[serde(default)]
    pub avg_fill_px: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCanceled {
    pub client_id: ClientOrderId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Exchange trading health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExchangeHealth {
    #[default]
    Active,
    Halted,
}

impl std::fmt::Display for ExchangeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeHealth::Active => write!(f, "Active"),
            ExchangeHealth::Halted => write!(f, "Halted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStateChanged {
    pub old_state: ExchangeHealth,
    pub new_state: ExchangeHealth,
    #[serde(default)]
    pub reason: String,
}

/// Authoritative account state, consumed by snapshot-synchronized strategies
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default)]
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    Quote(Quote),
    FundingRate(FundingRate),
    OrderAccepted(OrderAccepted),
    OrderRejected(OrderRejected),
    OrderFilled(OrderFilled),
    OrderCompleted(OrderCompleted),
    OrderCanceled(OrderCanceled),
    ExchangeStateChanged(ExchangeStateChanged),
    AccountSnapshot(AccountSnapshot),
    CommandRejected(CommandRejected),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Quote(_) => "quote",
            Event::FundingRate(_) => "funding_rate",
            Event::OrderAccepted(_) => "order_accepted",
            Event::OrderRejected(_) => "order_rejected",
            Event::OrderFilled(_) => "order_filled",
            Event::OrderCompleted(_) => "order_completed",
            Event::OrderCanceled(_) => "order_canceled",
            Event::ExchangeStateChanged(_) => "exchange_state_changed",
            Event::AccountSnapshot(_) => "account_snapshot",
            Event::CommandRejected(_) => "command_rejected",
        }
    }

    /// Client order id for order-lifecycle events and command rejections
    pub fn client_id(&self) -> Option<&ClientOrderId> {
        match self {
            Event::CommandRejected(e) => Some(&e.client_id),
            Event::OrderAccepted(e) => Some(&e.client_id),
            Event::OrderRejected(e) => Some(&e.client_id),
            Event::OrderFilled(e) => Some(&e.client_id),
            Event::OrderCompleted(e) => Some(&e.client_id),
            Event::OrderCanceled(e) => Some(&e.client_id),
            Event::Quote(_)
            | Event::FundingRate(_)
            | Event::ExchangeStateChanged(_)
            | Event::AccountSnapshot(_) => None,
        }
    }

    /// Instrument for market-data events
    pub fn instrument(&self) -> Option<&InstrumentId> {
        match self {
            Event::Quote(q) => Some(&q.instrument),
            Event::FundingRate(f) => Some(&f.instrument),
            _ => None,
        }
    }

    /// Lifecycle events the ledger applies
    pub fn is_order_event(&self) -> bool {
        matches!(
            self,
            Event::OrderAccepted(_)
                | Event::OrderRejected(_)
                | Event::OrderFilled(_)
                | Event::OrderCompleted(_)
                | Event::OrderCanceled(_)
        )
    }

    /// Raised by the engine, never accepted from a feed
    pub fn is_engine_generated(&self) -> bool {
        matches!(self, Event::CommandRejected(_))
    }

    /// True for events that end an order's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrderRejected(_) | Event::OrderCompleted(_) | Event::OrderCanceled(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub exchange: ExchangeInstance,
    pub ts_ms: i64,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(exchange: ExchangeInstance, ts_ms: i64, event: Event) -> Self {
        Self {
            exchange,
            ts_ms,
            event,
        }
    }
}
