use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{AssetId, InstrumentId, InstrumentKind};
use super::money::{is_multiple_of, significant_figures, Price, Qty, RoundingPolicy};

/// Immutable trading rules of one instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub instrument: InstrumentId,
    pub base: AssetId,
    pub quote: AssetId,
    pub kind: InstrumentKind,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    #[serde(default)]
    pub min_qty: Decimal,
    #[serde(default)]
    pub min_notional: Decimal,
    /// Significant-figure cap on prices, if the venue enforces one
    #[serde(default)]
    pub max_sig_figs: Option<u32>,
}

impl InstrumentMeta {
    /// Round price to tick, then to the significant-figure cap
    pub fn round_price(&self, price: Price) -> Price {
        let rounded = price.round_to_tick(self.tick_size, RoundingPolicy::Round);
        match self.max_sig_figs {
            Some(figures) if significant_figures(rounded.value()) > figures => rounded
                .trim_to_sig_figs(figures)
                .round_to_tick(self.tick_size, RoundingPolicy::Truncate),
            _ => rounded,
        }
    }

    /// Round quantity to the nearest lot
    pub fn round_qty(&self, qty: Qty) -> Qty {
        qty.round_to_lot(self.lot_size, RoundingPolicy::Round)
    }

    /// Truncate quantity to a whole number of lots
    pub fn trunc_qty(&self, qty: Qty) -> Qty {
        qty.round_to_lot(self.lot_size, RoundingPolicy::Truncate)
    }

    pub fn is_price_aligned(&self, price: Price) -> bool {
        is_multiple_of(price.value(), self.tick_size)
    }

    pub fn is_qty_aligned(&self, qty: Qty) -> bool {
        is_multiple_of(qty.value(), self.lot_size)
    }

    pub fn is_spot(&self) -> bool {
        self.kind == InstrumentKind::Spot
    }
}
