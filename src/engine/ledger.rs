//! Per-exchange table of in-flight orders.
//!
//! Only the engine mutates the ledger, and only by applying execution events.
//! Every transition goes through [`OrderStatus::can_transition_to`]; events for
//! unknown or already-terminal ids are refused so duplicated adapter deliveries
//! are applied at most once. Fills are additionally keyed by trade id while the
//! order is live, and a fill must carry a positive quantity.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::commands::OrderRequest;
use super::events::{Event, OrderAccepted, OrderCanceled, OrderCompleted, OrderFilled, OrderRejected};
use crate::domain::{
    AssetId, ClientOrderId, ExchangeInstance, InstrumentId, LiveOrder, OrderStatus, Price,
    StrategyId, TradeId,
};
use crate::error::LedgerError;

/// Result of applying one execution event
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    /// Order state after the event
    pub order: LiveOrder,
    pub previous: OrderStatus,
    /// Reserve released by this event
    pub released: Decimal,
}

impl LedgerUpdate {
    pub fn is_terminal(&self) -> bool {
        self.order.status.is_terminal()
    }
}

#[derive(Debug)]
pub struct OrderLedger {
    exchange: ExchangeInstance,
    live: HashMap<ClientOrderId, LiveOrder>,
    closed: HashMap<ClientOrderId, LiveOrder>,
    /// Trade ids already applied, per live order
    trades: HashMap<ClientOrderId, HashSet<TradeId>>,
    next_sequence: u64,
}

impl OrderLedger {
    pub fn new(exchange: ExchangeInstance) -> Self {
        Self {
            exchange,
            live: HashMap::new(),
            closed: HashMap::new(),
            trades: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn exchange(&self) -> &ExchangeInstance {
        &self.exchange
    }

    /// Start tracking a forwarded order in `New`
    pub fn open(
        &mut self,
        request: &OrderRequest,
        now_ms: i64,
        reserve_asset: Option<AssetId>,
        reserve: Decimal,
    ) -> Result<&LiveOrder, LedgerError> {
        if self.live.contains_key(&request.client_id) || self.closed.contains_key(&request.client_id) {
            return Err(LedgerError::DuplicateClientId(request.client_id.clone()));
        }
        self.next_sequence += 1;
        let order = LiveOrder {
            client_id: request.client_id.clone(),
            exchange_order_id: None,
            strategy: request.strategy.clone(),
            exchange: request.exchange.clone(),
            instrument: request.instrument.clone(),
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            price: request.price,
            qty: request.qty,
            filled_qty: Default::default(),
            avg_fill_price: None,
            status: OrderStatus::New,
            created_ms: now_ms,
            updated_ms: now_ms,
            sequence: self.next_sequence,
            reserve_asset,
            reserve_total: reserve,
            reserve_remaining: reserve,
        };
        debug!(
            exchange = %self.exchange,
            client_id = %order.client_id,
            strategy = %order.strategy,
            "order opened"
        );
        Ok(self.live.entry(request.client_id.clone()).or_insert(order))
    }

    /// Apply an order-lifecycle event. `None` for events that are not about orders.
    pub fn apply(&mut self, event: &Event, ts_ms: i64) -> Option<Result<LedgerUpdate, LedgerError>> {
        let result = match event {
            Event::OrderAccepted(e) => self.accept(e, ts_ms),
            Event::OrderFilled(e) => self.fill(e, ts_ms),
            Event::OrderCompleted(e) => self.complete(e, ts_ms),
            Event::OrderCanceled(e) => self.cancel(e, ts_ms),
            Event::OrderRejected(e) => self.reject(e, ts_ms),
            Event::Quote(_)
            | Event::FundingRate(_)
            | Event::ExchangeStateChanged(_)
            | Event::AccountSnapshot(_)
            | Event::CommandRejected(_) => return None,
        };
        Some(result)
    }

    pub fn accept(&mut self, e: &OrderAccepted, ts_ms: i64) -> Result<LedgerUpdate, LedgerError> {
        let order = self.transition(&e.client_id, OrderStatus::Accepted, "accepted")?;
        let previous = order.status;
        order.status = OrderStatus::Accepted;
        if e.exchange_order_id.is_some() {
            order.exchange_order_id = e.exchange_order_id.clone();
        }
        order.updated_ms = ts_ms;
        Ok(LedgerUpdate {
            order: order.clone(),
            previous,
            released: Decimal::ZERO,
        })
    }

    pub fn fill(&mut self, e: &OrderFilled, ts_ms: i64) -> Result<LedgerUpdate, LedgerError> {
        if self
            .trades
            .get(&e.client_id)
            .is_some_and(|seen| seen.contains(&e.trade_id))
        {
            return Err(LedgerError::DuplicateTrade {
                client_id: e.client_id.clone(),
                trade_id: e.trade_id.clone(),
            });
        }

        let order = self.transition(&e.client_id, OrderStatus::PartiallyFilled, "filled")?;
        if !e.qty.is_positive() || e.net_qty.value() < Decimal::ZERO {
            return Err(LedgerError::InvalidFillQty {
                client_id: e.client_id.clone(),
                qty: e.qty,
                net_qty: e.net_qty,
            });
        }
        let filled = order.filled_qty + e.qty;
        if filled > order.qty {
            return Err(LedgerError::Overfill {
                client_id: e.client_id.clone(),
                requested: order.qty,
                filled,
            });
        }

        let prior_notional = order
            .avg_fill_price
            .map_or(Decimal::ZERO, |p| p * order.filled_qty);
        let avg = (prior_notional + e.price * e.qty) / filled.value();
        order.avg_fill_price = Some(Price::new(avg));

        let released = if order.qty.is_positive() {
            (order.reserve_total * e.qty.value() / order.qty.value()).min(order.reserve_remaining)
        } else {
            Decimal::ZERO
        };
        order.reserve_remaining -= released;

        let previous = order.status;
        order.filled_qty = filled;
        order.status = OrderStatus::PartiallyFilled;
        order.updated_ms = ts_ms;
        let update = LedgerUpdate {
            order: order.clone(),
            previous,
            released,
        };

        self.trades
            .entry(e.client_id.clone())
            .or_default()
            .insert(e.trade_id.clone());
        Ok(update)
    }

    pub fn complete(&mut self, e: &OrderCompleted, ts_ms: i64) -> Result<LedgerUpdate, LedgerError> {
        let order = self.transition(&e.client_id, OrderStatus::Filled, "completed")?;
        if e.filled_qty > order.qty {
            return Err(LedgerError::Overfill {
                client_id: e.client_id.clone(),
                requested: order.qty,
                filled: e.filled_qty,
            });
        }
        // the completion is authoritative when fills were not all reported
        if e.filled_qty > order.filled_qty {
            order.filled_qty = e.filled_qty;
        }
        if e.avg_fill_px.is_some() {
            order.avg_fill_price = e.avg_fill_px;
        }
        self.close(&e.client_id, OrderStatus::Filled, ts_ms)
    }

    pub fn cancel(&mut self, e: &OrderCanceled, ts_ms: i64) -> Result<LedgerUpdate, LedgerError> {
        self.transition(&e.client_id, OrderStatus::Canceled, "canceled")?;
        self.close(&e.client_id, OrderStatus::Canceled, ts_ms)
    }

    pub fn reject(&mut self, e: &OrderRejected, ts_ms: i64) -> Result<LedgerUpdate, LedgerError> {
        self.transition(&e.client_id, OrderStatus::Rejected, "rejected")?;
        self.close(&e.client_id, OrderStatus::Rejected, ts_ms)
    }

    // ==================== Queries ====================

    /// Live or terminal order by client id
    pub fn get(&self, client_id: &ClientOrderId) -> Option<&LiveOrder> {
        self.live.get(client_id).or_else(|| self.closed.get(client_id))
    }

    pub fn is_live(&self, client_id: &ClientOrderId) -> bool {
        self.live.contains_key(client_id)
    }

    pub fn is_terminal(&self, client_id: &ClientOrderId) -> bool {
        self.closed.contains_key(client_id)
    }

    /// Owning strategy of a live order
    pub fn owner_of(&self, client_id: &ClientOrderId) -> Option<&StrategyId> {
        self.live.get(client_id).map(|o| &o.strategy)
    }

    /// Live orders in placement order
    pub fn live_orders(&self) -> Vec<&LiveOrder> {
        let mut orders: Vec<_> = self.live.values().collect();
        orders.sort_by_key(|o| o.sequence);
        orders
    }

    /// Live orders of one strategy, optionally restricted to an instrument
    pub fn live_for(&self, strategy: &StrategyId, instrument: Option<&InstrumentId>) -> Vec<&LiveOrder> {
        self.live_orders()
            .into_iter()
            .filter(|o| &o.strategy == strategy)
            .filter(|o| instrument.map_or(true, |i| &o.instrument == i))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Reserve still held by live orders
    pub fn outstanding_reserve(&self) -> Decimal {
        self.live.values().map(|o| o.reserve_remaining).sum()
    }

    // ==================== Internals ====================

    fn transition(
        &mut self,
        client_id: &ClientOrderId,
        target: OrderStatus,
        event: &'static str,
    ) -> Result<&mut LiveOrder, LedgerError> {
        if !self.live.contains_key(client_id) {
            return Err(if self.closed.contains_key(client_id) {
                LedgerError::AlreadyTerminal(client_id.clone())
            } else {
                LedgerError::UnknownOrder(client_id.clone())
            });
        }
        let order = self
            .live
            .get_mut(client_id)
            .ok_or_else(|| LedgerError::UnknownOrder(client_id.clone()))?;
        if !order.status.can_transition_to(target) {
            return Err(LedgerError::InvalidTransition {
                client_id: client_id.clone(),
                from: order.status,
                event,
            });
        }
        Ok(order)
    }

    // Terminal transition: releases whatever reserve is left, exactly once
    fn close(
        &mut self,
        client_id: &ClientOrderId,
        status: OrderStatus,
        ts_ms: i64,
    ) -> Result<LedgerUpdate, LedgerError> {
        let mut order = self
            .live
            .remove(client_id)
            .ok_or_else(|| LedgerError::UnknownOrder(client_id.clone()))?;
        self.trades.remove(client_id);
        let previous = order.status;
        let released = order.reserve_remaining;
        order.reserve_remaining = Decimal::ZERO;
        order.status = status;
        order.updated_ms = ts_ms;
        debug!(
            exchange = %self.exchange,
            client_id = %client_id,
            status = %status,
            "order closed"
        );
        self.closed.insert(client_id.clone(), order.clone());
        Ok(LedgerUpdate {
            order,
            previous,
            released,
        })
    }
}
