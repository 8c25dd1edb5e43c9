//! Commands issued by strategies and the requests forwarded to the adapter.

use serde::{Deserialize, Serialize};

use crate::domain::{
    ClientOrderId, ExchangeInstance, ExchangeOrderId, InstrumentId, OrderSide, OrderType, Price,
    Qty, StrategyId, TimeInForce,
};

/// Order placement request from a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub exchange: ExchangeInstance,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub qty: Qty,
    pub time_in_force: TimeInForce,
    /// Caller-chosen id; the engine assigns one when absent
    pub client_id: Option<ClientOrderId>,
}

impl PlaceOrder {
    pub fn limit(
        exchange: ExchangeInstance,
        instrument: InstrumentId,
        side: OrderSide,
        price: Price,
        qty: Qty,
    ) -> Self {
        Self {
            exchange,
            instrument,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            qty,
            time_in_force: TimeInForce::Gtc,
            client_id: None,
        }
    }

    pub fn market(
        exchange: ExchangeInstance,
        instrument: InstrumentId,
        side: OrderSide,
        qty: Qty,
    ) -> Self {
        Self {
            exchange,
            instrument,
            side,
            order_type: OrderType::Market,
            price: None,
            qty,
            time_in_force: TimeInForce::Ioc,
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: ClientOrderId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub exchange: ExchangeInstance,
    pub client_id: ClientOrderId,
}

impl CancelOrder {
    pub fn new(exchange: ExchangeInstance, client_id: ClientOrderId) -> Self {
        Self {
            exchange,
            client_id,
        }
    }
}

/// Cancel every open order of the issuing strategy on one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAll {
    pub exchange: ExchangeInstance,
    pub instrument: Option<InstrumentId>,
}

impl CancelAll {
    pub fn new(exchange: ExchangeInstance) -> Self {
        Self {
            exchange,
            instrument: None,
        }
    }

    pub fn for_instrument(mut self, instrument: InstrumentId) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn matches(&self, instrument: &InstrumentId) -> bool {
        self.instrument.as_ref().map_or(true, |i| i == instrument)
    }
}

/// Placement with its client id fixed at submission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedOrder {
    pub client_id: ClientOrderId,
    pub order: PlaceOrder,
}

/// Buffered strategy command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    PlaceOrder(AssignedOrder),
    PlaceOrders(Vec<AssignedOrder>),
    CancelOrder(CancelOrder),
    CancelAll(CancelAll),
    StopStrategy { strategy: StrategyId, reason: String },
}

/// Validated order as handed to the exchange adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub strategy: StrategyId,
    pub exchange: ExchangeInstance,
    pub instrument: InstrumentId,
    pub client_id: ClientOrderId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub qty: Qty,
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub strategy: StrategyId,
    pub exchange: ExchangeInstance,
    pub instrument: InstrumentId,
    pub client_id: ClientOrderId,
    pub exchange_order_id: Option<ExchangeOrderId>,
}

/// Everything that crosses the outbound boundary, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterRequest {
    Place { order: OrderRequest },
    PlaceBatch { orders: Vec<OrderRequest> },
    Cancel { cancel: CancelRequest },
    StopStrategy { strategy: StrategyId, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Environment;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_builder_defaults() {
        let exchange = ExchangeInstance::new("hyperliquid", Environment::Testnet);
        let order = PlaceOrder::limit(
            exchange,
            InstrumentId::new("BTC-PERP"),
            OrderSide::Buy,
            Price::new(dec!(85000)),
            Qty::new(dec!(0.01)),
        );
        assert_eq!(order.time_in_force, TimeInForce::Gtc);
        assert_eq!(order.order_type, OrderType::Limit);
        assert!(order.client_id.is_none());

        let order = order
            .with_client_id(ClientOrderId::new("mine-1"))
            .with_time_in_force(TimeInForce::Ioc);
        assert_eq!(order.client_id, Some(ClientOrderId::new("mine-1")));
        assert_eq!(order.time_in_force, TimeInForce::Ioc);
    }

    #[test]
    fn test_cancel_all_filter() {
        let exchange = ExchangeInstance::new("hyperliquid", Environment::Testnet);
        let all = CancelAll::new(exchange.clone());
        let btc = InstrumentId::new("BTC-PERP");
        let eth = InstrumentId::new("ETH-PERP");
        assert!(all.matches(&btc) && all.matches(&eth));

        let only_btc = CancelAll::new(exchange).for_instrument(btc.clone());
        assert!(only_btc.matches(&btc));
        assert!(!only_btc.matches(&eth));
    }
}
