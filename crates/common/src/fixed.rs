//! Fixed-point prices and sizes from prediction-market feeds.
//!
//! Venues quote prices in [0, 1] as decimal strings with up to six
//! fractional digits. Values are stored as `i64` scaled by 10^6 so that
//! arithmetic stays exact; fractional digits past the sixth are truncated.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One whole unit ($1 or 1 share) in scaled representation.
pub const SCALE: i64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseFixedError {
    #[error("empty decimal value")]
    Empty,
    #[error("invalid character {0:?} in decimal value")]
    InvalidChar(char),
}

/// A price scaled by 10^6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(pub i64);

/// A quantity scaled by 10^6. Signed, so it can also carry deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Size(pub i64);

/// Parses a decimal string into the scaled representation.
///
/// Integer digits are accumulated left-to-right, then fractional digits are
/// added with decreasing powers of ten. Digits past the sixth fractional
/// place contribute nothing (truncation, not rounding).
pub fn parse_scaled(s: &str) -> Result<i64, ParseFixedError> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return Err(ParseFixedError::Empty);
    }

    let mut result: i64 = 0;
    let mut bytes = digits.bytes();

    for b in bytes.by_ref() {
        if b == b'.' {
            break;
        }
        if !b.is_ascii_digit() {
            return Err(ParseFixedError::InvalidChar(b as char));
        }
        result = result * 10 + i64::from(b - b'0') * SCALE;
    }

    let mut mult = SCALE;
    for b in bytes {
        if !b.is_ascii_digit() {
            return Err(ParseFixedError::InvalidChar(b as char));
        }
        mult /= 10;
        result += i64::from(b - b'0') * mult;
    }

    Ok(if negative { -result } else { result })
}

fn format_scaled(v: i64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let sign = if v < 0 { "-" } else { "" };
    let abs = v.unsigned_abs();
    let whole = abs / SCALE as u64;
    let frac = abs % SCALE as u64;
    if frac == 0 {
        return write!(f, "{sign}{whole}");
    }
    let frac = format!("{frac:06}");
    write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
}

struct ScaledVisitor;

impl Visitor<'_> for ScaledVisitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        parse_scaled(v).map_err(de::Error::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
        // unquoted numbers truncate exactly like quoted strings
        parse_scaled(&format!("{v}")).map_err(de::Error::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        Ok(v as i64 * SCALE)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v * SCALE)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScaledVisitor).map(Price)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScaledVisitor).map(Size)
    }
}

impl FromStr for Price {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s).map(Price)
    }
}

impl FromStr for Size {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s).map(Size)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_scaled(self.0, f)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_scaled(self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scaled_table() {
        let cases = [
            ("0", 0),
            ("1", 1_000_000),
            ("0.5", 500_000),
            ("0.25", 250_000),
            ("0.123456", 123_456),
            ("0.1", 100_000),
            ("0.12", 120_000),
            ("0.123", 123_000),
            ("0.1234567", 123_456), // truncated, not rounded
            ("1.5", 1_500_000),
            ("2.0", 2_000_000),
            ("0.000001", 1),
            ("0.999999", 999_999),
            ("-0.25", -250_000),
        ];
        for (input, want) in cases {
            assert_eq!(parse_scaled(input), Ok(want), "input {input:?}");
        }
    }

    #[test]
    fn parse_scaled_rejects_garbage() {
        assert_eq!(parse_scaled(""), Err(ParseFixedError::Empty));
        assert_eq!(parse_scaled("1.2x"), Err(ParseFixedError::InvalidChar('x')));
        assert_eq!(parse_scaled("abc"), Err(ParseFixedError::InvalidChar('a')));
    }

    #[test]
    fn deserialize_quoted_string() {
        let p: Price = serde_json::from_str(r#""0.75""#).unwrap();
        assert_eq!(p, Price(750_000));
    }

    #[test]
    fn deserialize_raw_number() {
        let p: Price = serde_json::from_str("0.25").unwrap();
        assert_eq!(p, Price(250_000));
        let s: Size = serde_json::from_str("100").unwrap();
        assert_eq!(s, Size(100_000_000));
    }

    #[test]
    fn deserialize_raw_number_truncates_extra_digits() {
        let p: Price = serde_json::from_str("0.1234567").unwrap();
        assert_eq!(p, Price(123_456));
    }

    #[test]
    fn deserialize_in_struct() {
        #[derive(serde::Deserialize)]
        struct Order {
            price: Price,
            size: Size,
        }
        let o: Order = serde_json::from_str(r#"{"price": "0.75", "size": "12.5"}"#).unwrap();
        assert_eq!(o.price, Price(750_000));
        assert_eq!(o.size, Size(12_500_000));
    }

    #[test]
    fn display_trims_trailing_zeros() {
        assert_eq!(Price(500_000).to_string(), "0.5");
        assert_eq!(Price(1_000_000).to_string(), "1");
        assert_eq!(Size(-250_000).to_string(), "-0.25");
        assert_eq!(Price(123_456).to_string(), "0.123456");
    }
}
