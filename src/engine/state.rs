//! Engine-owned market and account state, partitioned by exchange instance.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use super::events::{ExchangeHealth, FundingRate, Quote};
use super::ledger::OrderLedger;
use crate::domain::{
    AccountBook, ClientOrderId, ExchangeInstance, InstrumentId, InstrumentMeta, LiveOrder,
};

/// Everything the engine knows about one exchange instance
#[derive(Debug)]
pub struct ExchangeState {
    pub ledger: OrderLedger,
    pub account: AccountBook,
    pub health: ExchangeHealth,
    pub quotes: HashMap<InstrumentId, Quote>,
    pub funding: HashMap<InstrumentId, FundingRate>,
    /// Highest event timestamp delivered so far
    pub watermark_ms: Option<i64>,
}

impl ExchangeState {
    pub fn new(exchange: ExchangeInstance) -> Self {
        Self {
            ledger: OrderLedger::new(exchange),
            account: AccountBook::new(),
            health: ExchangeHealth::Active,
            quotes: HashMap::new(),
            funding: HashMap::new(),
            watermark_ms: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub exchanges: BTreeMap<ExchangeInstance, ExchangeState>,
    pub instruments: HashMap<InstrumentId, InstrumentMeta>,
    pub now_ms: i64,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_exchange(&mut self, exchange: &ExchangeInstance) -> &mut ExchangeState {
        self.exchanges
            .entry(exchange.clone())
            .or_insert_with(|| ExchangeState::new(exchange.clone()))
    }

    pub fn exchange(&self, exchange: &ExchangeInstance) -> Option<&ExchangeState> {
        self.exchanges.get(exchange)
    }

    pub fn exchange_mut(&mut self, exchange: &ExchangeInstance) -> Option<&mut ExchangeState> {
        self.exchanges.get_mut(exchange)
    }

    pub fn instrument(&self, instrument: &InstrumentId) -> Option<&InstrumentMeta> {
        self.instruments.get(instrument)
    }

    /// Client ids are unique per process, so every ledger can be searched
    pub fn find_order(&self, client_id: &ClientOrderId) -> Option<&LiveOrder> {
        self.exchanges.values().find_map(|x| x.ledger.get(client_id))
    }

    pub fn quote(&self, exchange: &ExchangeInstance, instrument: &InstrumentId) -> Option<&Quote> {
        self.exchange(exchange)?.quotes.get(instrument)
    }

    pub fn health(&self, exchange: &ExchangeInstance) -> Option<ExchangeHealth> {
        self.exchange(exchange).map(|x| x.health)
    }

    pub fn outstanding_reserve(&self) -> Decimal {
        self.exchanges
            .values()
            .map(|x| x.ledger.outstanding_reserve())
            .sum()
    }
}
