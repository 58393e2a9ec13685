//! Integer money in minor currency units.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

/// Currencies the payment provider settles in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    NGN,
    GHS,
    ZAR,
    KES,
    USD,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::NGN => "NGN",
            Currency::GHS => "GHS",
            Currency::ZAR => "ZAR",
            Currency::KES => "KES",
            Currency::USD => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NGN" => Ok(Currency::NGN),
            "GHS" => Ok(Currency::GHS),
            "ZAR" => Ok(Currency::ZAR),
            "KES" => Ok(Currency::KES),
            "USD" => Ok(Currency::USD),
            other => Err(DomainError::Validation(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}

/// Non-negative amount stored as a count of minor units (kobo, cents).
///
/// All arithmetic stays in integers; the only float path is
/// [`Money::from_major`], which rounds to the nearest minor unit once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Builds a value from minor units.
    pub fn from_minor(amount: i64) -> Result<Self, DomainError> {
        if amount < 0 {
            return Err(DomainError::NegativeAmount);
        }
        Ok(Self(amount))
    }

    /// Builds a value from major units, rounding `amount * 100` to the
    /// nearest integer.
    pub fn from_major(amount: f64) -> Result<Self, DomainError> {
        if !amount.is_finite() {
            return Err(DomainError::Validation("Amount must be a finite number".into()));
        }
        if amount < 0.0 {
            return Err(DomainError::NegativeAmount);
        }
        let minor = (amount * 100.0).round();
        if minor >= i64::MAX as f64 {
            return Err(DomainError::AmountOverflow);
        }
        Ok(Self(minor as i64))
    }

    /// Amount in minor units.
    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Amount in major units. Presentation only.
    pub fn major(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, DomainError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(DomainError::AmountOverflow)
    }

    /// Subtracts `other`, or returns `None` when the result would be negative.
    ///
    /// Callers holding a balance turn `None` into
    /// [`DomainError::InsufficientFunds`].
    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        if other.0 > self.0 {
            return None;
        }
        Some(Money(self.0 - other.0))
    }
}

impl TryFrom<i64> for Money {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Money::from_minor(value)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
