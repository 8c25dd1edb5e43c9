use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{ClientOrderId, InstrumentId, OrderStatus, Qty, StrategyId, TradeId};

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Strategy registry errors
    #[error("Strategy already registered: {0}")]
    DuplicateStrategy(StrategyId),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(StrategyId),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Structural reasons a command never reaches the exchange.
///
/// These are turned into `CommandRejected` events for the issuing
/// strategy; they are never surfaced as errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("unknown exchange instance: {0}")]
    UnknownExchange(String),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQty(Qty),

    #[error("limit order requires a positive price")]
    MissingPrice,

    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("price {price} is not a multiple of tick size {tick}")]
    TickMisaligned { price: Decimal, tick: Decimal },

    #[error("quantity {qty} is not a multiple of lot size {lot}")]
    LotMisaligned { qty: Decimal, lot: Decimal },

    #[error("quantity {qty} below minimum {min}")]
    BelowMinQty { qty: Decimal, min: Decimal },

    #[error("notional {notional} below minimum {min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },

    #[error("price {price} exceeds {max} significant figures")]
    TooManySigFigs { price: Decimal, max: u32 },

    #[error("client order id already used: {0}")]
    DuplicateClientId(ClientOrderId),

    #[error("empty batch")]
    EmptyBatch,
}

/// Errors raised while applying an execution event to the order ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Order not found: {0}")]
    UnknownOrder(ClientOrderId),

    #[error("Order already terminal: {0}")]
    AlreadyTerminal(ClientOrderId),

    #[error("Invalid order transition for {client_id}: {event} while {from}")]
    InvalidTransition {
        client_id: ClientOrderId,
        from: OrderStatus,
        event: &'static str,
    },

    #[error("Overfill on {client_id}: requested {requested}, filled {filled}")]
    Overfill {
        client_id: ClientOrderId,
        requested: Qty,
        filled: Qty,
    },

    #[error("Non-positive fill on {client_id}: qty {qty}, net {net_qty}")]
    InvalidFillQty {
        client_id: ClientOrderId,
        qty: Qty,
        net_qty: Qty,
    },

    #[error("Trade {trade_id} already applied to {client_id}")]
    DuplicateTrade {
        client_id: ClientOrderId,
        trade_id: TradeId,
    },

    #[error("Client order id already tracked: {0}")]
    DuplicateClientId(ClientOrderId),
}

impl LedgerError {
    /// Ledger corruption that must stop the owning strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::Overfill { .. } | LedgerError::InvalidFillQty { .. }
        )
    }

    pub fn client_id(&self) -> &ClientOrderId {
        match self {
            LedgerError::UnknownOrder(id)
            | LedgerError::AlreadyTerminal(id)
            | LedgerError::DuplicateClientId(id) => id,
            LedgerError::InvalidTransition { client_id, .. }
            | LedgerError::Overfill { client_id, .. }
            | LedgerError::InvalidFillQty { client_id, .. }
            | LedgerError::DuplicateTrade { client_id, .. } => client_id,
        }
    }
}

impl From<Vec<String>> for EngineError {
    fn from(errors: Vec<String>) -> Self {
        EngineError::InvalidConfig(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_only_corrupting_fills_are_fatal() {
        let id = ClientOrderId::new("c-1");
        let overfill = LedgerError::Overfill {
            client_id: id.clone(),
            requested: Qty::new(dec!(1)),
            filled: Qty::new(dec!(1.5)),
        };
        assert!(overfill.is_fatal());
        assert!(!LedgerError::AlreadyTerminal(id.clone()).is_fatal());
        assert!(!LedgerError::UnknownOrder(id.clone()).is_fatal());
        assert_eq!(overfill.client_id(), &id);

        let negative = LedgerError::InvalidFillQty {
            client_id: id.clone(),
            qty: Qty::new(dec!(-0.004)),
            net_qty: Qty::new(dec!(-0.004)),
        };
        assert!(negative.is_fatal());
        let repeat = LedgerError::DuplicateTrade {
            client_id: id.clone(),
            trade_id: TradeId::new("t-1"),
        };
        assert!(!repeat.is_fatal());
        assert_eq!(repeat.client_id(), &id);
    }

    #[test]
    fn test_reject_reason_message() {
        let reason = RejectReason::TickMisaligned {
            price: dec!(85000.05),
            tick: dec!(0.1),
        };
        assert_eq!(
            reason.to_string(),
            "price 85000.05 is not a multiple of tick size 0.1"
        );
    }

    #[test]
    fn test_invalid_config_joins_messages() {
        let err: EngineError = vec!["a".to_string(), "b".to_string()].into();
        assert_eq!(err.to_string(), "Invalid configuration: a; b");
    }
}
