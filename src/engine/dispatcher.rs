//! Command Dispatcher - 命令驗證與轉發
//!
//! Validates strategy commands against instrument rules, books accepted orders
//! into the ledger with their balance reserve, and forwards them to the
//! execution adapter. Validation failures never surface as errors: they come
//! back to the issuing strategy as `CommandRejected` events.

use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::adapter::ExecutionAdapter;
use super::commands::{
    AssignedOrder, CancelAll, CancelOrder, CancelRequest, Command, OrderRequest, PlaceOrder,
};
use super::events::CommandRejected;
use super::state::EngineState;
use crate::domain::{
    significant_figures, AssetId, ClientOrderId, InstrumentMeta, LiveOrder, OrderSide, OrderType,
    Price, StrategyId,
};
use crate::error::RejectReason;

/// Dispatch counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub orders_forwarded: u64,
    pub batches_forwarded: u64,
    pub orders_rejected: u64,
    pub cancels_forwarded: u64,
    pub cancels_skipped: u64,
    pub stops_forwarded: u64,
}

/// Follow-up work for the engine after one command cycle
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Synthetic rejections owed to the issuing strategy
    pub rejections: Vec<CommandRejected>,
    /// Strategies asked to stop, with reason
    pub stops: Vec<(StrategyId, String)>,
}

impl DispatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.rejections.is_empty() && self.stops.is_empty()
    }
}

pub struct CommandDispatcher {
    adapter: Box<dyn ExecutionAdapter>,
    /// Every client id ever submitted, accepted or not
    issued: HashSet<ClientOrderId>,
    stats: DispatchStats,
}

impl CommandDispatcher {
    pub fn new(adapter: Box<dyn ExecutionAdapter>) -> Self {
        Self {
            adapter,
            issued: HashSet::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Process a strategy's buffered commands in issue order
    pub fn dispatch(
        &mut self,
        owner: &StrategyId,
        commands: Vec<Command>,
        state: &mut EngineState,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for command in commands {
            match command {
                Command::PlaceOrder(order) => {
                    if let Err(rejection) = self.submit(owner, order, state) {
                        outcome.rejections.push(rejection);
                    }
                }
                Command::PlaceOrders(orders) => {
                    outcome
                        .rejections
                        .extend(self.submit_batch(owner, orders, state));
                }
                Command::CancelOrder(cancel) => {
                    self.cancel_order(owner, &cancel, state);
                }
                Command::CancelAll(cancel_all) => {
                    self.cancel_all(owner, &cancel_all, state);
                }
                Command::StopStrategy { strategy, reason } => {
                    info!(strategy = %strategy, requested_by = %owner, reason = %reason, "stop requested");
                    self.adapter.stop_strategy(&strategy, &reason);
                    self.stats.stops_forwarded += 1;
                    outcome.stops.push((strategy, reason));
                }
            }
        }
        outcome
    }

    /// Validate, book and forward one order
    pub fn submit(
        &mut self,
        owner: &StrategyId,
        order: AssignedOrder,
        state: &mut EngineState,
    ) -> Result<ClientOrderId, CommandRejected> {
        let request = self.book(owner, order, state)?;
        debug!(strategy = %owner, client_id = %request.client_id, side = %request.side, "forwarding order");
        self.adapter.place(&request);
        self.stats.orders_forwarded += 1;
        Ok(request.client_id)
    }

    /// Validate every entry; forward the valid ones together.
    ///
    /// Returns the rejections for invalid entries.
    pub fn submit_batch(
        &mut self,
        owner: &StrategyId,
        orders: Vec<AssignedOrder>,
        state: &mut EngineState,
    ) -> Vec<CommandRejected> {
        if orders.is_empty() {
            debug!(strategy = %owner, "{}", RejectReason::EmptyBatch);
            return Vec::new();
        }

        let mut accepted = Vec::with_capacity(orders.len());
        let mut rejections = Vec::new();
        for order in orders {
            match self.book(owner, order, state) {
                Ok(request) => accepted.push(request),
                Err(rejection) => rejections.push(rejection),
            }
        }

        if accepted.len() > 1 && self.adapter.supports_batch() {
            debug!(strategy = %owner, count = accepted.len(), "forwarding order batch");
            self.adapter.place_batch(&accepted);
            self.stats.batches_forwarded += 1;
        } else {
            for request in &accepted {
                self.adapter.place(request);
            }
        }
        self.stats.orders_forwarded += accepted.len() as u64;
        rejections
    }

    /// Returns whether a cancel was forwarded
    pub fn cancel_order(&mut self, owner: &StrategyId, cancel: &CancelOrder, state: &EngineState) -> bool {
        let live = state
            .exchange(&cancel.exchange)
            .and_then(|x| x.ledger.get(&cancel.client_id))
            .filter(|o| !o.is_terminal());

        let Some(order) = live else {
            debug!(strategy = %owner, client_id = %cancel.client_id, "cancel for unknown or terminal order ignored");
            self.stats.cancels_skipped += 1;
            return false;
        };
        if &order.strategy != owner {
            warn!(
                strategy = %owner,
                client_id = %cancel.client_id,
                owner = %order.strategy,
                "cancel for another strategy's order ignored"
            );
            self.stats.cancels_skipped += 1;
            return false;
        }

        let request = cancel_request(order);
        self.adapter.cancel(&request);
        self.stats.cancels_forwarded += 1;
        true
    }

    /// Cancel every non-terminal order of `owner` matching the filter. Returns the count.
    pub fn cancel_all(&mut self, owner: &StrategyId, cancel_all: &CancelAll, state: &EngineState) -> usize {
        let Some(exchange) = state.exchange(&cancel_all.exchange) else {
            debug!(strategy = %owner, exchange = %cancel_all.exchange, "cancel_all on unknown exchange ignored");
            return 0;
        };

        let requests: Vec<CancelRequest> = exchange
            .ledger
            .live_for(owner, None)
            .into_iter()
            .filter(|o| cancel_all.matches(&o.instrument))
            .map(cancel_request)
            .collect();

        for request in &requests {
            self.adapter.cancel(request);
        }
        self.stats.cancels_forwarded += requests.len() as u64;
        debug!(strategy = %owner, exchange = %cancel_all.exchange, count = requests.len(), "cancel_all expanded");
        requests.len()
    }

    // ==================== Internals ====================

    fn book(
        &mut self,
        owner: &StrategyId,
        assigned: AssignedOrder,
        state: &mut EngineState,
    ) -> Result<OrderRequest, CommandRejected> {
        let AssignedOrder { client_id, order } = assigned;
        let fresh = self.issued.insert(client_id.clone());

        let checked = if fresh {
            validate(&order, state)
        } else {
            Err(RejectReason::DuplicateClientId(client_id.clone()))
        };
        let (meta, reference_price) = match checked {
            Ok(v) => v,
            Err(reason) => {
                warn!(strategy = %owner, client_id = %client_id, reason = %reason, "order rejected before submission");
                self.stats.orders_rejected += 1;
                return Err(CommandRejected {
                    client_id,
                    reason: reason.to_string(),
                });
            }
        };

        let request = OrderRequest {
            strategy: owner.clone(),
            exchange: order.exchange,
            instrument: order.instrument,
            client_id,
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            qty: order.qty,
            time_in_force: order.time_in_force,
        };
        let (asset, amount) = reserve_for(&meta, &request, reference_price);

        let now_ms = state.now_ms;
        let exchange = state.register_exchange(&request.exchange);
        if let Err(e) = exchange.ledger.open(&request, now_ms, Some(asset.clone()), amount) {
            self.stats.orders_rejected += 1;
            return Err(CommandRejected {
                client_id: request.client_id,
                reason: e.to_string(),
            });
        }
        exchange.account.reserve(&asset, amount);
        Ok(request)
    }
}

/// Structural checks. Returns instrument rules and the price used for notional and reserve.
fn validate(
    order: &PlaceOrder,
    state: &EngineState,
) -> Result<(InstrumentMeta, Option<Price>), RejectReason> {
    let exchange = state
        .exchange(&order.exchange)
        .ok_or_else(|| RejectReason::UnknownExchange(order.exchange.to_string()))?;
    let meta = state
        .instrument(&order.instrument)
        .ok_or_else(|| RejectReason::UnknownInstrument(order.instrument.clone()))?;

    if !order.qty.is_positive() {
        return Err(RejectReason::NonPositiveQty(order.qty));
    }

    match (order.order_type, order.price) {
        (OrderType::Limit, None) => return Err(RejectReason::MissingPrice),
        (_, Some(price)) if !price.is_positive() => {
            return Err(RejectReason::NonPositivePrice(price.value()))
        }
        _ => {}
    }

    if let Some(price) = order.price {
        if !meta.is_price_aligned(price) {
            return Err(RejectReason::TickMisaligned {
                price: price.value(),
                tick: meta.tick_size,
            });
        }
        if let Some(max) = meta.max_sig_figs {
            if significant_figures(price.value()) > max {
                return Err(RejectReason::TooManySigFigs {
                    price: price.value(),
                    max,
                });
            }
        }
    }

    if !meta.is_qty_aligned(order.qty) {
        return Err(RejectReason::LotMisaligned {
            qty: order.qty.value(),
            lot: meta.lot_size,
        });
    }
    if order.qty.value() < meta.min_qty {
        return Err(RejectReason::BelowMinQty {
            qty: order.qty.value(),
            min: meta.min_qty,
        });
    }

    // market orders are checked against the last mid when one is known
    let reference = order
        .price
        .or_else(|| exchange.quotes.get(&order.instrument).map(|q| q.mid()));
    if let Some(price) = reference {
        let notional = price * order.qty;
        if notional < meta.min_notional {
            return Err(RejectReason::BelowMinNotional {
                notional,
                min: meta.min_notional,
            });
        }
    }

    Ok((meta.clone(), reference))
}

/// Asset and amount held against an open order.
///
/// Spot sells hold the base asset; everything else holds quote notional.
fn reserve_for(meta: &InstrumentMeta, request: &OrderRequest, reference: Option<Price>) -> (AssetId, Decimal) {
    if meta.is_spot() && request.side == OrderSide::Sell {
        return (meta.base.clone(), request.qty.value());
    }
    let notional = reference.map_or(Decimal::ZERO, |p| p * request.qty);
    (meta.quote.clone(), notional)
}

fn cancel_request(order: &LiveOrder) -> CancelRequest {
    CancelRequest {
        strategy: order.strategy.clone(),
        exchange: order.exchange.clone(),
        instrument: order.instrument.clone(),
        client_id: order.client_id.clone(),
        exchange_order_id: order.exchange_order_id.clone(),
    }
}
