//! Sorted bid/ask levels for one token.
//!
//! Uses a BTreeMap per side for O(log n) level operations:
//! - Bids: best = highest price (iterated in reverse).
//! - Asks: best = lowest price.
//!
//! Every stored level has size > 0; a set or update that leaves a level at
//! zero or below removes it. The two sides are independent — a transiently
//! crossed book from the feed is preserved as sent.

use chrono::{DateTime, Utc};
use common::{Price, Size};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid side: {0}")]
pub struct InvalidSide(pub String);

/// Book side. Venue strings (BUY/SELL, bid/ask) parse case-insensitively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = InvalidSide;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("bid") || s.eq_ignore_ascii_case("buy") {
            Ok(Side::Bid)
        } else if s.eq_ignore_ascii_case("ask") || s.eq_ignore_ascii_case("sell") {
            Ok(Side::Ask)
        } else {
            Err(InvalidSide(s.to_string()))
        }
    }
}

/// One price level. `updated_at` is the event time from the source, or the
/// local reception time when the source did not provide one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Level {
    pub price: Price,
    pub size: Size,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
struct LevelEntry {
    size: Size,
    updated_at: DateTime<Utc>,
}

/// Order book for a single token.
#[derive(Debug, Default)]
pub struct Orderbook {
    bids: BTreeMap<Price, LevelEntry>,
    asks: BTreeMap<Price, LevelEntry>,
}

impl Orderbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the absolute size at a price level. Size <= 0 removes the level.
    pub fn set(&mut self, price: Price, size: Size, side: Side, at: DateTime<Utc>) {
        let levels = self.side_mut(side);
        if size.0 <= 0 {
            levels.remove(&price);
        } else {
            levels.insert(price, LevelEntry { size, updated_at: at });
        }
    }

    /// Applies a signed delta to a price level. A resulting size <= 0
    /// removes the level.
    pub fn update(&mut self, price: Price, delta: Size, side: Side, at: DateTime<Utc>) {
        let levels = self.side_mut(side);
        let new_size = match levels.get(&price) {
            Some(entry) => entry.size.0 + delta.0,
            None => delta.0,
        };
        if new_size <= 0 {
            levels.remove(&price);
        } else {
            levels.insert(
                price,
                LevelEntry {
                    size: Size(new_size),
                    updated_at: at,
                },
            );
        }
    }

    /// Returns up to `n` levels, best first.
    pub fn top_n(&self, side: Side, n: usize) -> Vec<Level> {
        let to_level = |(price, entry): (&Price, &LevelEntry)| Level {
            price: *price,
            size: entry.size,
            updated_at: entry.updated_at,
        };
        match side {
            Side::Bid => self.bids.iter().rev().take(n).map(to_level).collect(),
            Side::Ask => self.asks.iter().take(n).map(to_level).collect(),
        }
    }

    /// Number of levels on a side.
    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    fn side(&self, side: Side) -> &BTreeMap<Price, LevelEntry> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Price, LevelEntry> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}
