//! Fixed-point price and quantity values with tick/lot rounding.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// How a value is snapped to an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingPolicy {
    /// Nearest increment, midpoint away from zero (buy-side sizing)
    Round,
    /// Toward zero (sell-side sizing, never exceeds holdings)
    Truncate,
}

impl RoundingPolicy {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingPolicy::Round => RoundingStrategy::MidpointAwayFromZero,
            RoundingPolicy::Truncate => RoundingStrategy::ToZero,
        }
    }
}

/// Snap `value` to a multiple of `step`. A non-positive step leaves the value untouched.
pub fn round_to_step(value: Decimal, step: Decimal, policy: RoundingPolicy) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let units = (value / step).round_dp_with_strategy(0, policy.strategy());
    (units * step).normalize()
}

/// True when `value` is an exact multiple of `step`
pub fn is_multiple_of(value: Decimal, step: Decimal) -> bool {
    if step <= Decimal::ZERO {
        return true;
    }
    (value % step).is_zero()
}

/// Number of significant figures, ignoring trailing zeros of integers
pub fn significant_figures(value: Decimal) -> u32 {
    let mut mantissa = value.normalize().mantissa().unsigned_abs();
    if mantissa == 0 {
        return 0;
    }
    while mantissa % 10 == 0 {
        mantissa /= 10;
    }
    let mut digits = 0;
    while mantissa > 0 {
        mantissa /= 10;
        digits += 1;
    }
    digits
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn round_to_tick(&self, tick: Decimal, policy: RoundingPolicy) -> Price {
        Price(round_to_step(self.0, tick, policy))
    }

    /// Round to at most `figures` significant figures
    pub fn trim_to_sig_figs(&self, figures: u32) -> Price {
        if figures == 0 || self.0.is_zero() {
            return *self;
        }
        match self
            .0
            .round_sf_with_strategy(figures, RoundingStrategy::MidpointAwayFromZero)
        {
            Some(v) => Price(v.normalize()),
            None => *self,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qty(Decimal);

impl Qty {
    pub const ZERO: Qty = Qty(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn round_to_lot(&self, lot: Decimal, policy: RoundingPolicy) -> Qty {
        Qty(round_to_step(self.0, lot, policy))
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Qty {
    type Output = Qty;

    fn add(self, rhs: Qty) -> Qty {
        Qty(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Qty;

    fn sub(self, rhs: Qty) -> Qty {
        Qty(self.0 - rhs.0)
    }
}

/// Notional value
impl Mul<Qty> for Price {
    type Output = Decimal;

    fn mul(self, rhs: Qty) -> Decimal {
        self.0 * rhs.0
    }
}
