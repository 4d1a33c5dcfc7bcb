//! Core types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unique identifier for a node in the mesh
pub type PeerId = String;

/// Fixed-point currency amount with 8 decimal places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

/// Amount parse failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid amount literal: {0}")]
    Invalid(String),

    #[error("Too many decimal places in {0} (max 8)")]
    Precision(String),

    #[error("Amount out of range: {0}")]
    Overflow(String),
}

impl Amount {
    /// Units per whole coin
    pub const SCALE: i64 = 100_000_000;

    /// Zero amount
    pub const ZERO: Amount = Amount(0);

    /// From raw base units
    pub const fn from_units(units: i64) -> Self {
        Amount(units)
    }

    /// From whole coins
    pub fn from_coins(coins: i64) -> Option<Self> {
        coins.checked_mul(Self::SCALE).map(Amount)
    }

    /// Raw base units
    pub const fn units(self) -> i64 {
        self.0
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Strictly greater than zero
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Strictly less than zero
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{}{}.{:08}", sign, abs / scale, abs % scale)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if frac.len() > 8 {
            return Err(AmountError::Precision(s.to_string()));
        }

        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<i64>()
                .map_err(|_| AmountError::Overflow(s.to_string()))?
        };
        let frac_units: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<8}", frac)
                .parse::<i64>()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };

        let units = whole_units
            .checked_mul(Self::SCALE)
            .and_then(|u| u.checked_add(frac_units))
            .ok_or_else(|| AmountError::Overflow(s.to_string()))?;

        Ok(Amount(if negative { -units } else { units }))
    }
}
