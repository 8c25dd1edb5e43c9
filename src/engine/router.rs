//! Event Router - 事件排序與路由
//!
//! 將交易所事件按時間排序後分發給訂閱的策略。
//! Per exchange instance, events leave in timestamp order with arrival order
//! breaking ties. Order events are routed by ledger ownership, everything else
//! by subscription.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

use super::events::{Event, EventEnvelope};
use super::state::EngineState;
use crate::domain::{ExchangeInstance, InstrumentId, StrategyId};

/// 策略訂閱配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySubscription {
    pub strategy_id: StrategyId,
    /// 訂閱的交易所 (空 = 全部)
    pub exchanges: HashSet<ExchangeInstance>,
    /// 訂閱的品種 (空 = 全部)
    pub instruments: HashSet<InstrumentId>,
    /// 是否接收資金費率
    pub receive_funding: bool,
}

impl StrategySubscription {
    /// 訂閱所有事件
    pub fn all(strategy_id: &StrategyId) -> Self {
        Self {
            strategy_id: strategy_id.clone(),
            exchanges: HashSet::new(),
            instruments: HashSet::new(),
            receive_funding: true,
        }
    }

    pub fn for_exchange(strategy_id: &StrategyId, exchange: ExchangeInstance) -> Self {
        Self::all(strategy_id).with_exchange(exchange)
    }

    pub fn with_exchange(mut self, exchange: ExchangeInstance) -> Self {
        self.exchanges.insert(exchange);
        self
    }

    pub fn with_instrument(mut self, instrument: InstrumentId) -> Self {
        self.instruments.insert(instrument);
        self
    }

    pub fn with_funding(mut self, receive: bool) -> Self {
        self.receive_funding = receive;
        self
    }

    pub fn covers_exchange(&self, exchange: &ExchangeInstance) -> bool {
        self.exchanges.is_empty() || self.exchanges.contains(exchange)
    }

    /// 檢查是否應該接收此非訂單事件
    fn should_receive(&self, exchange: &ExchangeInstance, event: &Event) -> bool {
        if !self.covers_exchange(exchange) {
            return false;
        }
        match event {
            Event::FundingRate(f) if !self.receive_funding => {
                debug!(strategy = %self.strategy_id, instrument = %f.instrument, "funding filtered");
                false
            }
            Event::Quote(_) | Event::FundingRate(_) => event
                .instrument()
                .map_or(true, |i| self.instruments.is_empty() || self.instruments.contains(i)),
            // health changes and snapshots go to everyone on the exchange
            _ => true,
        }
    }
}

/// 路由統計
#[derive(Debug, Default, Clone)]
pub struct RouterStats {
    /// 收到的事件總數
    pub events_received: u64,
    /// 成功分發數 (per target)
    pub events_delivered: u64,
    pub events_dropped: u64,
    /// Delivered after a later event on the same exchange
    pub late_events: u64,
    /// 按類型統計
    pub events_by_kind: HashMap<&'static str, u64>,
    /// 按策略統計
    pub events_by_strategy: HashMap<StrategyId, u64>,
}

// ==================== Ordering queue ====================

#[derive(Debug)]
struct QueuedEvent {
    envelope: EventEnvelope,
    sequence: u64, // arrival order among equal timestamps
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.envelope.ts_ms == other.envelope.ts_ms && self.sequence == other.sequence
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // earliest timestamp first, then first arrived
        match other.envelope.ts_ms.cmp(&self.envelope.ts_ms) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// 事件路由器
#[derive(Debug, Default)]
pub struct EventRouter {
    /// Registration order is delivery order
    subscriptions: Vec<StrategySubscription>,
    queues: BTreeMap<ExchangeInstance, BinaryHeap<QueuedEvent>>,
    sequence: u64,
    stats: RouterStats,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Subscriptions ====================

    pub fn subscribe(&mut self, subscription: StrategySubscription) {
        self.subscriptions
            .retain(|s| s.strategy_id != subscription.strategy_id);
        self.subscriptions.push(subscription);
    }

    pub fn unsubscribe(&mut self, strategy_id: &StrategyId) {
        self.subscriptions.retain(|s| &s.strategy_id != strategy_id);
    }

    pub fn subscription(&self, strategy_id: &StrategyId) -> Option<&StrategySubscription> {
        self.subscriptions
            .iter()
            .find(|s| &s.strategy_id == strategy_id)
    }

    /// Registered strategies in delivery order
    pub fn strategies(&self) -> Vec<StrategyId> {
        self.subscriptions
            .iter()
            .map(|s| s.strategy_id.clone())
            .collect()
    }

    // ==================== Queue ====================

    pub fn enqueue(&mut self, envelope: EventEnvelope) {
        self.sequence += 1;
        self.stats.events_received += 1;
        *self
            .stats
            .events_by_kind
            .entry(envelope.event.kind())
            .or_insert(0) += 1;
        self.queues
            .entry(envelope.exchange.clone())
            .or_default()
            .push(QueuedEvent {
                envelope,
                sequence: self.sequence,
            });
    }

    /// Timestamp of the earliest queued event across exchanges
    pub fn peek_ts(&self) -> Option<i64> {
        self.head().map(|(_, ts, _)| ts)
    }

    /// Earliest queued event with `ts <= until_ms`
    pub fn pop_ready(&mut self, until_ms: i64) -> Option<EventEnvelope> {
        let (exchange, ts, _) = self.head()?;
        if ts > until_ms {
            return None;
        }
        let exchange = exchange.clone();
        self.queues
            .get_mut(&exchange)
            .and_then(|q| q.pop())
            .map(|q| q.envelope)
    }

    pub fn pending(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    fn head(&self) -> Option<(&ExchangeInstance, i64, u64)> {
        self.queues
            .iter()
            .filter_map(|(x, q)| q.peek().map(|e| (x, e.envelope.ts_ms, e.sequence)))
            .min_by_key(|(_, ts, seq)| (*ts, *seq))
    }

    // ==================== Routing ====================

    /// Gate an event before any state is touched.
    ///
    /// Unknown exchanges, market data for unknown instruments and
    /// engine-generated kinds arriving from a feed are dropped.
    /// Late events pass with a warning and advance nothing.
    pub fn admit(&mut self, envelope: &EventEnvelope, state: &mut EngineState) -> bool {
        if envelope.event.is_engine_generated() {
            warn!(exchange = %envelope.exchange, kind = envelope.event.kind(), "engine-only event from feed dropped");
            self.stats.events_dropped += 1;
            return false;
        }
        let known_instrument = envelope
            .event
            .instrument()
            .map_or(true, |i| state.instrument(i).is_some());
        let Some(exchange) = state.exchange_mut(&envelope.exchange) else {
            warn!(exchange = %envelope.exchange, kind = envelope.event.kind(), "event for unknown exchange dropped");
            self.stats.events_dropped += 1;
            return false;
        };
        if !known_instrument {
            warn!(
                exchange = %envelope.exchange,
                instrument = ?envelope.event.instrument(),
                "market event for unknown instrument dropped"
            );
            self.stats.events_dropped += 1;
            return false;
        }

        match exchange.watermark_ms {
            Some(mark) if envelope.ts_ms < mark => {
                warn!(
                    exchange = %envelope.exchange,
                    ts_ms = envelope.ts_ms,
                    watermark_ms = mark,
                    kind = envelope.event.kind(),
                    "late event delivered out of order"
                );
                self.stats.late_events += 1;
            }
            _ => exchange.watermark_ms = Some(envelope.ts_ms),
        }
        true
    }

    /// Subscribers of a market, health or snapshot event, in delivery order
    pub fn targets(&self, exchange: &ExchangeInstance, event: &Event) -> Vec<StrategyId> {
        self.subscriptions
            .iter()
            .filter(|s| s.should_receive(exchange, event))
            .map(|s| s.strategy_id.clone())
            .collect()
    }

    pub fn record_delivery(&mut self, strategy_id: &StrategyId) {
        self.stats.events_delivered += 1;
        *self
            .stats
            .events_by_strategy
            .entry(strategy_id.clone())
            .or_insert(0) += 1;
    }

    pub fn record_drop(&mut self) {
        self.stats.events_dropped += 1;
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::fixtures::btc_perp;
    use crate::domain::{Environment, Price};
    use crate::domain::ClientOrderId;
    use crate::engine::events::{
        CommandRejected, ExchangeHealth, ExchangeStateChanged, FundingRate, Quote,
    };
    use rust_decimal_macros::dec;

    fn hl() -> ExchangeInstance {
        ExchangeInstance::new("hyperliquid", Environment::Testnet)
    }

    fn other() -> ExchangeInstance {
        ExchangeInstance::new("binance", Environment::Mainnet)
    }

    fn quote(instrument: &str, bid: rust_decimal::Decimal) -> Event {
        Event::Quote(Quote {
            instrument: InstrumentId::new(instrument),
            bid: Price::new(bid),
            ask: Price::new(bid + dec!(1)),
            bid_qty: None,
            ask_qty: None,
        })
    }

    fn state() -> EngineState {
        let mut state = EngineState::new();
        state.register_exchange(&hl());
        state.instruments.insert(InstrumentId::new("BTC-PERP"), btc_perp());
        state
    }

    #[test]
    fn test_timestamp_order_with_arrival_tiebreak() {
        let mut router = EventRouter::new();
        router.enqueue(EventEnvelope::new(hl(), 20, quote("BTC-PERP", dec!(3))));
        router.enqueue(EventEnvelope::new(hl(), 10, quote("BTC-PERP", dec!(1))));
        router.enqueue(EventEnvelope::new(other(), 10, quote("BTC-PERP", dec!(9))));
        router.enqueue(EventEnvelope::new(hl(), 10, quote("BTC-PERP", dec!(2))));

        let mut bids = Vec::new();
        while let Some(envelope) = router.pop_ready(i64::MAX) {
            if let Event::Quote(q) = envelope.event {
                bids.push(q.bid.value());
            }
        }
        assert_eq!(bids, vec![dec!(1), dec!(9), dec!(2), dec!(3)]);
        assert_eq!(router.stats().events_received, 4);
    }

    #[test]
    fn test_pop_ready_respects_horizon() {
        let mut router = EventRouter::new();
        router.enqueue(EventEnvelope::new(hl(), 50, quote("BTC-PERP", dec!(1))));
        assert!(router.pop_ready(49).is_none());
        assert_eq!(router.peek_ts(), Some(50));
        assert!(router.pop_ready(50).is_some());
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn test_subscription_filters() {
        let mut router = EventRouter::new();
        let a = StrategyId::new("a");
        let b = StrategyId::new("b");
        let c = StrategyId::new("c");
        router.subscribe(StrategySubscription::for_exchange(&a, hl()));
        router.subscribe(
            StrategySubscription::all(&b)
                .with_instrument(InstrumentId::new("ETH-PERP"))
                .with_funding(false),
        );
        router.subscribe(StrategySubscription::for_exchange(&c, other()));

        assert_eq!(router.targets(&hl(), &quote("BTC-PERP", dec!(1))), vec![a.clone()]);

        let funding = Event::FundingRate(FundingRate {
            instrument: InstrumentId::new("ETH-PERP"),
            rate: dec!(0.0001),
            next_funding_ms: None,
        });
        assert_eq!(router.targets(&hl(), &funding), vec![a.clone()]);

        let halted = Event::ExchangeStateChanged(ExchangeStateChanged {
            old_state: ExchangeHealth::Active,
            new_state: ExchangeHealth::Halted,
            reason: "maintenance".into(),
        });
        assert_eq!(router.targets(&hl(), &halted), vec![a, b]);
    }

    #[test]
    fn test_admit_drops_unknown_and_flags_late() {
        let mut router = EventRouter::new();
        let mut state = state();

        assert!(!router.admit(&EventEnvelope::new(other(), 1, quote("BTC-PERP", dec!(1))), &mut state));
        assert!(!router.admit(&EventEnvelope::new(hl(), 1, quote("DOGE-PERP", dec!(1))), &mut state));
        assert_eq!(router.stats().events_dropped, 2);

        assert!(router.admit(&EventEnvelope::new(hl(), 100, quote("BTC-PERP", dec!(1))), &mut state));
        assert!(router.admit(&EventEnvelope::new(hl(), 90, quote("BTC-PERP", dec!(1))), &mut state));
        assert_eq!(router.stats().late_events, 1);
        assert_eq!(state.exchange(&hl()).unwrap().watermark_ms, Some(100));
    }

    #[test]
    fn test_admit_refuses_engine_generated_events() {
        let mut router = EventRouter::new();
        let mut state = state();
        let forged = Event::CommandRejected(CommandRejected {
            client_id: ClientOrderId::new("c-1"),
            reason: "from the wire".into(),
        });

        assert!(!router.admit(&EventEnvelope::new(hl(), 5, forged), &mut state));
        assert_eq!(router.stats().events_dropped, 1);
        // the watermark is untouched
        assert_eq!(state.exchange(&hl()).unwrap().watermark_ms, None);
    }
}
