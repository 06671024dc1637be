//! Value Objects for the marketplace

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// URL slug value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slug(String);

impl Slug {
    /// Lowercases the text, joins alphanumeric runs with `-`.
    pub fn new(text: &str) -> Result<Self, SlugError> {
        let mut out = String::with_capacity(text.len());
        for c in text.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() { out.push(c); }
            else if !out.is_empty() && !out.ends_with('-') { out.push('-'); }
        }
        let trimmed = out.trim_end_matches('-');
        if trimmed.is_empty() { return Err(SlugError::Empty); }
        Ok(Self(trimmed.to_string()))
    }

    /// Slug with a base36 millisecond suffix, used where names may repeat.
    pub fn unique(text: &str, now: DateTime<Utc>) -> Result<Self, SlugError> {
        let base = Self::new(text)?;
        Ok(Self(format!("{}-{}", base.0, to_base36(now.timestamp_millis().max(0) as u64))))
    }

    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_inner(self) -> String { self.0 }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SlugError { Empty }
impl std::error::Error for SlugError {}
impl fmt::Display for SlugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "name must contain letters or digits") }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 { return "0".to_string(); }
    let mut buf = Vec::new();
    while n > 0 { buf.push(DIGITS[(n % 36) as usize]); n /= 36; }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Money value object, INR with two decimal places
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn inr(amount: Decimal) -> Self { Self(amount.round_dp(2)) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn add(&self, other: Money) -> Money { Money(self.0 + other.0) }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0 * Decimal::from(qty)) }

    /// `pct` percent of this amount, rounded half away from zero to whole rupees.
    pub fn percent_rounded(&self, pct: u32) -> Money {
        let raw = self.0 * Decimal::from(pct) / Decimal::ONE_HUNDRED;
        Money(raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Amount in paise, as payment gateways expect.
    pub fn to_paise(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

impl Default for Money { fn default() -> Self { Self::zero() } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "₹{}", self.0.normalize()) }
}

/// Indian postal PIN code, six digits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCode(String);

impl PinCode {
    pub fn new(value: &str) -> Result<Self, PinCodeError> {
        let value = value.trim();
        if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) { return Err(PinCodeError::Malformed); }
        Ok(Self(value.to_string()))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

#[derive(Debug, Clone)] pub enum PinCodeError { Malformed }
impl std::error::Error for PinCodeError {}
impl fmt::Display for PinCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "PIN Code must be exactly 6 digits") }
}

/// Human-facing order reference, `SPH-YYMMDD-XXXXX`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn generate(now: DateTime<Utc>) -> Self {
        const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..5).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
        Self(format!("SPH-{}-{}", now.format("%y%m%d"), suffix))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_inner(self) -> String { self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Quantity value object, always at least one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: i32) -> Option<Self> { u32::try_from(value).ok().filter(|v| *v > 0).map(Self) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
    pub fn fits_within(&self, stock: i32) -> bool { i64::from(self.0) <= i64::from(stock) }
}
