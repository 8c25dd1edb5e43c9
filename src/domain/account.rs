//! Balances and positions for one exchange instance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{AssetId, InstrumentId};
use super::instrument::InstrumentMeta;
use super::money::Price;
use super::order::OrderSide;

/// Per-asset balance. `available = total - reserved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: AssetId,
    pub total: Decimal,
    #[serde(default)]
    pub reserved: Decimal,
}

impl Balance {
    pub fn new(asset: AssetId, total: Decimal) -> Self {
        Self {
            asset,
            total,
            reserved: Decimal::ZERO,
        }
    }

    pub fn available(&self) -> Decimal {
        self.total - self.reserved
    }
}

/// Per-instrument position with signed quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: InstrumentId,
    pub qty: Decimal,
    pub avg_entry_price: Option<Price>,
    #[serde(default)]
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub fees: Decimal,
}

impl Position {
    pub fn flat(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            qty: Decimal::ZERO,
            avg_entry_price: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            fees: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    /// Apply a fill of `qty` (unsigned) on `side`; returns the realized PnL delta.
    pub fn apply_fill(&mut self, side: OrderSide, price: Price, qty: Decimal) -> Decimal {
        let signed = qty * side.sign();
        let entry = self.avg_entry_price.map(|p| p.value()).unwrap_or(price.value());

        if self.qty.is_zero() || self.qty.is_sign_positive() == signed.is_sign_positive() {
            let new_qty = self.qty + signed;
            let cost = self.qty.abs() * entry + qty * price.value();
            self.avg_entry_price = if new_qty.is_zero() {
                None
            } else {
                Some(Price::new(cost / new_qty.abs()))
            };
            self.qty = new_qty;
            return Decimal::ZERO;
        }

        let closing = qty.min(self.qty.abs());
        let direction = if self.qty.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let realized = closing * (price.value() - entry) * direction;
        self.realized_pnl += realized;

        let new_qty = self.qty + signed;
        self.avg_entry_price = if new_qty.is_zero() {
            None
        } else if new_qty.is_sign_positive() != self.qty.is_sign_positive() {
            // flipped through zero: the remainder opens at the fill price
            Some(price)
        } else {
            self.avg_entry_price
        };
        self.qty = new_qty;
        realized
    }

    pub fn mark(&mut self, mid: Price) {
        self.unrealized_pnl = match self.avg_entry_price {
            Some(entry) => self.qty * (mid.value() - entry.value()),
            None => Decimal::ZERO,
        };
    }
}

/// Fill as applied to balances and positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub side: OrderSide,
    pub price: Price,
    pub qty: Decimal,
    /// Quantity credited after base-asset fees
    pub net_qty: Decimal,
    pub fee: Decimal,
    pub fee_asset: Option<AssetId>,
}

/// Balances and positions of one exchange instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBook {
    balances: BTreeMap<AssetId, Balance>,
    positions: BTreeMap<InstrumentId, Position>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale replacement, used for snapshot-synchronized beliefs
    pub fn from_snapshot(balances: &[Balance], positions: &[Position]) -> Self {
        Self {
            balances: balances
                .iter()
                .map(|b| (b.asset.clone(), b.clone()))
                .collect(),
            positions: positions
                .iter()
                .map(|p| (p.instrument.clone(), p.clone()))
                .collect(),
        }
    }

    pub fn balance(&self, asset: &AssetId) -> Option<&Balance> {
        self.balances.get(asset)
    }

    pub fn position(&self, instrument: &InstrumentId) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn balances(&self) -> impl Iterator<Item = &Balance> {
        self.balances.values()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn set_balance(&mut self, asset: AssetId, total: Decimal) {
        self.balance_mut(&asset).total = total;
    }

    pub fn reserve(&mut self, asset: &AssetId, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.balance_mut(asset).reserved += amount;
        }
    }

    pub fn release(&mut self, asset: &AssetId, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let balance = self.balance_mut(asset);
        balance.reserved = (balance.reserved - amount).max(Decimal::ZERO);
    }

    /// Apply a fill to balances and the instrument position. Returns realized PnL delta.
    pub fn apply_fill(&mut self, meta: &InstrumentMeta, fill: &Fill) -> Decimal {
        let notional = fill.price.value() * fill.qty;
        let position = self
            .positions
            .entry(meta.instrument.clone())
            .or_insert_with(|| Position::flat(meta.instrument.clone()));
        let realized = position.apply_fill(fill.side, fill.price, fill.net_qty);
        position.fees += fill.fee;

        if meta.is_spot() {
            match fill.side {
                OrderSide::Buy => {
                    self.balance_mut(&meta.quote).total -= notional;
                    self.balance_mut(&meta.base).total += fill.net_qty;
                }
                OrderSide::Sell => {
                    self.balance_mut(&meta.base).total -= fill.qty;
                    self.balance_mut(&meta.quote).total += notional;
                }
            }
        } else {
            self.balance_mut(&meta.quote).total += realized;
        }

        if !fill.fee.is_zero() {
            let fee_asset = fill.fee_asset.clone().unwrap_or_else(|| meta.quote.clone());
            // base-asset fees on spot buys are already netted out of net_qty
            let netted = meta.is_spot() && fill.side == OrderSide::Buy && fee_asset == meta.base;
            if !netted {
                self.balance_mut(&fee_asset).total -= fill.fee;
            }
        }
        realized
    }

    pub fn mark(&mut self, instrument: &InstrumentId, mid: Price) {
        if let Some(position) = self.positions.get_mut(instrument) {
            position.mark(mid);
        }
    }

    fn balance_mut(&mut self, asset: &AssetId) -> &mut Balance {
        self.balances
            .entry(asset.clone())
            .or_insert_with(|| Balance::new(asset.clone(), Decimal::ZERO))
    }
}
