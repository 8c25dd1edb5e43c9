//! Buy-low/sell-high cycle on one market.
//!
//! `WaitingToBuy → BuyPlaced → WaitingToSell → SellPlaced → WaitingToBuy`

use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ClientOrderId, Environment, ExchangeInstance, InstrumentId, InstrumentMeta, Market,
    OrderSide, Price, Qty, StrategyId, TimerId,
};
use crate::engine::{CancelAll, Event, PlaceOrder, Strategy, StrategyContext};

/// Strategy config file. `bot-engine schema` prints its JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SimpleConfig {
    pub strategy_id: StrategyId,
    pub environment: Environment,
    pub market: Market,

    /// Price at which to place a BUY order
    pub buy_price: Decimal,
    /// Price at which to place a SELL order (take profit)
    pub sell_price: Decimal,
    /// Order quantity in base asset
    pub order_size: Decimal,
}

impl SimpleConfig {
    /// Pretty-printed JSON schema of the config file
    pub fn json_schema() -> serde_json::Result<String> {
        serde_json::to_string_pretty(&schemars::schema_for!(SimpleConfig))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.buy_price >= self.sell_price {
            errors.push("buy_price must be < sell_price".into());
        }
        if self.order_size <= Decimal::ZERO {
            errors.push("order_size must be > 0".into());
        }
        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No position, buy not yet placed
    WaitingToBuy,
    BuyPlaced,
    /// Holding the bought quantity
    WaitingToSell,
    SellPlaced,
}

pub struct SimpleStrategy {
    config: SimpleConfig,
    phase: Phase,
    active_order: Option<ClientOrderId>,
    meta: Option<InstrumentMeta>,
    cycles: u64,
}

impl SimpleStrategy {
    pub fn new(config: SimpleConfig) -> Self {
        Self {
            config,
            phase: Phase::WaitingToBuy,
            active_order: None,
            meta: None,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_order(&self) -> Option<&ClientOrderId> {
        self.active_order.as_ref()
    }

    /// Completed buy+sell round trips
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn exchange(&self) -> ExchangeInstance {
        self.config.market.exchange_instance(self.config.environment)
    }

    fn instrument(&self) -> InstrumentId {
        self.config.market.instrument_id()
    }

    fn place(&mut self, ctx: &mut dyn StrategyContext, side: OrderSide) {
        let Some(meta) = self.meta.as_ref() else {
            return;
        };
        let (price, qty, next) = match side {
            OrderSide::Buy => (
                meta.round_price(Price::new(self.config.buy_price)),
                meta.round_qty(Qty::new(self.config.order_size)),
                Phase::BuyPlaced,
            ),
            // never sell more than was bought
            OrderSide::Sell => (
                meta.round_price(Price::new(self.config.sell_price)),
                meta.trunc_qty(Qty::new(self.config.order_size)),
                Phase::SellPlaced,
            ),
        };

        let order = PlaceOrder::limit(self.exchange(), self.instrument(), side, price, qty);
        self.active_order = Some(ctx.place_order(order));
        self.phase = next;
        ctx.log_info(&format!("{} order placed @ {} qty={}", side, price, qty));
    }

    fn is_active(&self, client_id: &ClientOrderId) -> bool {
        self.active_order.as_ref() == Some(client_id)
    }
}

impl Strategy for SimpleStrategy {
    fn id(&self) -> &StrategyId {
        &self.config.strategy_id
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext) {
        self.meta = ctx.instrument_meta(&self.instrument()).cloned();
        if self.meta.is_none() {
            ctx.stop_strategy(self.config.strategy_id.clone(), "Instrument not found");
            return;
        }
        let errors = self.config.validate();
        if !errors.is_empty() {
            ctx.stop_strategy(self.config.strategy_id.clone(), &errors.join("; "));
            return;
        }
        ctx.log_info(&format!(
            "SimpleStrategy started: buy@{} sell@{} qty={}",
            self.config.buy_price, self.config.sell_price, self.config.order_size
        ));
        self.place(ctx, OrderSide::Buy);
    }

    fn on_event(&mut self, ctx: &mut dyn StrategyContext, event: &Event) {
        match event {
            Event::OrderCompleted(c) if self.is_active(&c.client_id) => match self.phase {
                Phase::BuyPlaced => {
                    ctx.log_info(&format!("Buy filled @ avg={:?}", c.avg_fill_px));
                    self.phase = Phase::WaitingToSell;
                    self.place(ctx, OrderSide::Sell);
                }
                Phase::SellPlaced => {
                    self.cycles += 1;
                    ctx.log_info(&format!(
                        "Sell filled @ avg={:?}, cycle {} complete",
                        c.avg_fill_px, self.cycles
                    ));
                    self.phase = Phase::WaitingToBuy;
                    self.place(ctx, OrderSide::Buy);
                }
                Phase::WaitingToBuy | Phase::WaitingToSell => {}
            },
            Event::OrderCanceled(e) if self.is_active(&e.client_id) => {
                ctx.log_warn("Order canceled, resetting to buy phase");
                self.reset_to_buy(ctx);
            }
            Event::OrderRejected(e) if self.is_active(&e.client_id) => {
                ctx.log_warn(&format!("Order rejected ({}), resetting to buy phase", e.reason));
                self.reset_to_buy(ctx);
            }
            // the same order would be refused again, so retrying cannot help
            Event::CommandRejected(e) if self.is_active(&e.client_id) => {
                ctx.log_error(&format!("Order refused before submission: {}", e.reason));
                self.active_order = None;
                self.phase = match self.phase {
                    Phase::SellPlaced => Phase::WaitingToSell,
                    _ => Phase::WaitingToBuy,
                };
                ctx.stop_strategy(self.config.strategy_id.clone(), &e.reason);
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn StrategyContext, _timer_id: TimerId) {}

    fn on_stop(&mut self, ctx: &mut dyn StrategyContext) {
        ctx.cancel_all(CancelAll::new(self.exchange()));
        ctx.log_info("SimpleStrategy stopped");
    }
}

impl SimpleStrategy {
    fn reset_to_buy(&mut self, ctx: &mut dyn StrategyContext) {
        self.active_order = None;
        self.phase = Phase::WaitingToBuy;
        self.place(ctx, OrderSide::Buy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetId, InstrumentKind};
    use rust_decimal_macros::dec;

    fn config() -> SimpleConfig {
        SimpleConfig {
            strategy_id: StrategyId::new("simple"),
            environment: Environment::Testnet,
            market: Market {
                exchange: "hyperliquid".to_string(),
                base: AssetId::new("BTC"),
                quote: AssetId::new("USDC"),
                kind: InstrumentKind::Derivative,
            },
            buy_price: dec!(85000),
            sell_price: dec!(86000),
            order_size: dec!(0.01),
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_empty());

        let mut bad = config();
        bad.buy_price = dec!(90000);
        bad.order_size = dec!(0);
        assert_eq!(
            bad.validate(),
            vec!["buy_price must be < sell_price", "order_size must be > 0"]
        );
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "strategy_id": "simple-btc",
            "environment": "testnet",
            "market": {"exchange": "hyperliquid", "base": "BTC", "quote": "USDC", "kind": "derivative"},
            "buy_price": "85000",
            "sell_price": "86000",
            "order_size": "0.01"
        }"#;
        let config: SimpleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.market.instrument_id().as_str(), "BTC-PERP");
        assert_eq!(config.order_size, dec!(0.01));
        assert_eq!(SimpleStrategy::new(config).phase(), Phase::WaitingToBuy);
    }

    #[test]
    fn test_json_schema_describes_config() {
        let schema: serde_json::Value =
            serde_json::from_str(&SimpleConfig::json_schema().unwrap()).unwrap();
        assert_eq!(schema["title"], "SimpleConfig");
        assert_eq!(
            schema["properties"]["buy_price"]["description"],
            "Price at which to place a BUY order"
        );
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"market"));
        assert!(required.contains(&"order_size"));
        assert!(schema["definitions"]["Market"].is_object());
        assert!(schema["definitions"]["Environment"].is_object());
    }
}
