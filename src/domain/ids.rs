use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Tradable instrument, e.g. `BTC-PERP` or `ETH/USDC`
    InstrumentId
);
string_id!(
    /// Engine-assigned order id, unique for the lifetime of the process
    ClientOrderId
);
string_id!(
    /// Exchange-assigned order id, known once the order is acknowledged
    ExchangeOrderId
);
string_id!(TradeId);
string_id!(StrategyId);
string_id!(
    /// Asset symbol used for balances and fees
    AssetId
);

/// Timer handle. Monotonically increasing per engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Trading environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Testnet,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Mainnet => write!(f, "mainnet"),
            Environment::Testnet => write!(f, "testnet"),
        }
    }
}

/// One connection target: an exchange in a specific environment.
///
/// Ledgers, account books and event ordering are all partitioned by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeInstance {
    pub exchange: String,
    pub environment: Environment,
}

impl ExchangeInstance {
    pub fn new(exchange: impl Into<String>, environment: Environment) -> Self {
        Self {
            exchange: exchange.into(),
            environment,
        }
    }
}

impl fmt::Display for ExchangeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.environment)
    }
}

/// Instrument kind. Decides which asset an open order reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Spot,
    Derivative,
}

/// Market selection as it appears in strategy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Market {
    pub exchange: String,
    pub base: AssetId,
    pub quote: AssetId,
    pub kind: InstrumentKind,
}

impl Market {
    pub fn exchange_instance(&self, environment: Environment) -> ExchangeInstance {
        ExchangeInstance::new(self.exchange.clone(), environment)
    }

    /// `BASE/QUOTE` for spot, `BASE-PERP` for derivatives
    pub fn instrument_id(&self) -> InstrumentId {
        match self.kind {
            InstrumentKind::Spot => InstrumentId::new(format!("{}/{}", self.base, self.quote)),
            InstrumentKind::Derivative => InstrumentId::new(format!("{}-PERP", self.base)),
        }
    }
}
