use std::{cmp::Ordering, fmt, fmt::Display, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of fractional sub-units in one currency unit.
pub const AMOUNT_FRACTION_BASE: u32 = 1_000_000;

/// Maximum length of a currency tag, in bytes.
pub const MAX_CURRENCY_LEN: usize = 12;

//--------------------------------------     Amount       ------------------------------------------------------------

/// A monetary amount. Carries an ISO-like currency tag of up to 12 bytes, an integer unit count and fractional
/// sub-units in base 10^6.
///
/// Arithmetic never silently wraps: addition and subtraction return an error on overflow, underflow or a currency
/// mismatch. Ordering across currencies is likewise refused; use [`Amount::cmp_currency`].
///
/// The canonical string rendering is `CUR:units.fraction`, e.g. `EUR:1.5` or `XTR:420`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    currency: String,
    value: u64,
    fraction: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Currency mismatch: {0} vs {1}")]
    CurrencyMismatch(String, String),
    #[error("Amount overflow")]
    Overflow,
    #[error("Amount underflow")]
    Underflow,
    #[error("Not a valid amount: {0}")]
    Invalid(String),
}

impl Amount {
    pub fn new(currency: &str, value: u64, fraction: u32) -> Result<Self, AmountError> {
        if currency.is_empty() || currency.len() > MAX_CURRENCY_LEN {
            return Err(AmountError::Invalid(format!("bad currency tag: {currency}")));
        }
        if !currency.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AmountError::Invalid(format!("bad currency tag: {currency}")));
        }
        if fraction >= AMOUNT_FRACTION_BASE {
            return Err(AmountError::Invalid(format!("fraction out of range: {fraction}")));
        }
        Ok(Self { currency: currency.to_string(), value, fraction })
    }

    pub fn zero(currency: &str) -> Result<Self, AmountError> {
        Self::new(currency, 0, 0)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0 && self.fraction == 0
    }

    fn require_same_currency(&self, other: &Self) -> Result<(), AmountError> {
        if self.currency != other.currency {
            return Err(AmountError::CurrencyMismatch(self.currency.clone(), other.currency.clone()));
        }
        Ok(())
    }

    /// `self + other`, failing on currency mismatch or overflow.
    pub fn checked_add(&self, other: &Self) -> Result<Self, AmountError> {
        self.require_same_currency(other)?;
        let mut fraction = self.fraction + other.fraction;
        let mut carry = 0u64;
        if fraction >= AMOUNT_FRACTION_BASE {
            fraction -= AMOUNT_FRACTION_BASE;
            carry = 1;
        }
        let value =
            self.value.checked_add(other.value).and_then(|v| v.checked_add(carry)).ok_or(AmountError::Overflow)?;
        Ok(Self { currency: self.currency.clone(), value, fraction })
    }

    /// `self - other`, failing on currency mismatch or if `other > self`.
    pub fn checked_sub(&self, other: &Self) -> Result<Self, AmountError> {
        self.require_same_currency(other)?;
        let (mut value, mut fraction) = (self.value, self.fraction);
        if fraction < other.fraction {
            value = value.checked_sub(1).ok_or(AmountError::Underflow)?;
            fraction += AMOUNT_FRACTION_BASE;
        }
        fraction -= other.fraction;
        value = value.checked_sub(other.value).ok_or(AmountError::Underflow)?;
        Ok(Self { currency: self.currency.clone(), value, fraction })
    }

    /// Total order within one currency; refuses to compare across currencies.
    pub fn cmp_currency(&self, other: &Self) -> Result<Ordering, AmountError> {
        self.require_same_currency(other)?;
        Ok(self.value.cmp(&other.value).then(self.fraction.cmp(&other.fraction)))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fraction == 0 {
            write!(f, "{}:{}", self.currency, self.value)
        } else {
            let frac = format!("{:06}", self.fraction);
            write!(f, "{}:{}.{}", self.currency, self.value, frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (currency, rest) = s.split_once(':').ok_or_else(|| AmountError::Invalid(s.to_string()))?;
        let (units, frac) = match rest.split_once('.') {
            Some((u, f)) => (u, Some(f)),
            None => (rest, None),
        };
        let value = units.parse::<u64>().map_err(|_| AmountError::Invalid(s.to_string()))?;
        let fraction = match frac {
            None => 0,
            Some(f) if f.is_empty() || f.len() > 6 => return Err(AmountError::Invalid(s.to_string())),
            Some(f) => {
                let digits = f.parse::<u32>().map_err(|_| AmountError::Invalid(s.to_string()))?;
                digits * 10u32.pow(6 - f.len() as u32)
            },
        };
        Self::new(currency, value, fraction)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// Stored as TEXT in the database, in the canonical string rendering.
impl sqlx::Type<sqlx::Sqlite> for Amount {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Amount {
    fn encode_by_ref(&self, buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>) -> sqlx::encode::IsNull {
        <String as sqlx::Encode<'q, sqlx::Sqlite>>::encode(self.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Amount {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<'r, sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<Amount>()?)
    }
}
