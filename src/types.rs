//! Shared value types: timestamps, money, parties and coordinates
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
    pub fn plus_hours(&self, hours: u32) -> Self {
        self.plus(Duration::hours(i64::from(hours)))
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// An amount in minor currency units (paise, cents).
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[cbor(transparent)]
pub struct Money(#[n(0)] i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }
    /// Whole major units, e.g. `Money::from_major(100)` is 100.00
    pub const fn from_major(major: i64) -> Self {
        Self(major * 100)
    }
    pub fn minor(&self) -> i64 {
        self.0
    }
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
    /// Multiplies a unit price by a (possibly fractional) quantity, rounding to the nearest minor unit.
    pub fn times_quantity(self, quantity: f64) -> Option<Money> {
        let product = (self.0 as f64 * quantity).round();
        if product.is_finite() && product.abs() < i64::MAX as f64 {
            Some(Money(product as i64))
        } else {
            None
        }
    }
    /// Splits into (first half rounded up, remainder). The parts always sum to `self`.
    pub fn halves(self) -> (Money, Money) {
        let lower = self.0 / 2;
        (Money(self.0 - lower), Money(lower))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Buyer,
    #[n(1)]
    Seller,
    #[n(2)]
    Admin,
    #[n(3)]
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "BUYER",
            Role::Seller => "SELLER",
            Role::Admin => "ADMIN",
            Role::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-authenticated user acting in a given role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
    pub fn buyer(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Buyer)
    }
    pub fn seller(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Seller)
    }
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }
    pub fn system() -> Self {
        Self::new("system", Role::System)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    #[n(0)]
    pub lat: f64,
    #[n(1)]
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn halves_round_the_first_part_up() {
        assert_eq!(
            Money::from_minor(102_500).halves(),
            (Money::from_minor(51_250), Money::from_minor(51_250))
        );
        assert_eq!(
            Money::from_minor(101).halves(),
            (Money::from_minor(51), Money::from_minor(50))
        );
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_minor(51_250).to_string(), "512.50");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
        assert_eq!(Money::from_major(3).to_string(), "3.00");
    }

    #[test]
    fn quantity_product_rounds_to_minor_units() {
        assert_eq!(
            Money::from_major(100).times_quantity(10.0),
            Some(Money::from_major(1_000))
        );
        assert_eq!(
            Money::from_minor(333).times_quantity(1.5),
            Some(Money::from_minor(500))
        );
        assert_eq!(Money::from_minor(i64::MAX).times_quantity(4.0), None);
    }
}
