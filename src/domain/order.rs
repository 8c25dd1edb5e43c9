use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{AssetId, ClientOrderId, ExchangeInstance, ExchangeOrderId, InstrumentId, StrategyId};
use super::money::{Price, Qty};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good Till Cancelled
    #[default]
    Gtc,
    /// Immediate Or Cancel
    Ioc,
    /// Fill Or Kill
    Fok,
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Forwarded to the adapter, not yet acknowledged
    New,
    /// Acknowledged by the exchange
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if this status can transition to another status
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, target) {
            (New, Accepted) => true,

            // A fill or completion on an unacknowledged order implies acceptance
            (New | Accepted | PartiallyFilled, PartiallyFilled) => true,
            (New | Accepted | PartiallyFilled, Filled) => true,

            (New | Accepted | PartiallyFilled, Canceled) => true,
            (New | Accepted, Rejected) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-flight order as tracked by the ledger.
///
/// Strategies only ever see clones of this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOrder {
    pub client_id: ClientOrderId,
    pub exchange_order_id: Option<ExchangeOrderId>,
    pub strategy: StrategyId,
    pub exchange: ExchangeInstance,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Option<Price>,
    pub qty: Qty,
    pub filled_qty: Qty,
    /// Volume-weighted average fill price
    pub avg_fill_price: Option<Price>,
    pub status: OrderStatus,
    pub created_ms: i64,
    pub updated_ms: i64,
    /// Placement order within the engine
    pub sequence: u64,
    pub reserve_asset: Option<AssetId>,
    pub reserve_total: Decimal,
    pub reserve_remaining: Decimal,
}

impl LiveOrder {
    pub fn remaining_qty(&self) -> Qty {
        self.qty - self.filled_qty
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Calculate fill percentage
    pub fn fill_pct(&self) -> Decimal {
        if self.qty.is_zero() {
            return Decimal::ZERO;
        }
        self.filled_qty.value() / self.qty.value() * Decimal::from(100)
    }
}
