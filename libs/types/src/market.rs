//! Market data primitives: ticks, timeframes, and OHLCV candles

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle timeframes supported by the aggregator.
///
/// Ordered by duration so `Timeframe::ALL.last()` is always the largest,
/// which the staleness bound is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1];

    /// Duration of one bucket in seconds
    pub fn secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3600,
        }
    }

    /// Bucket index for a timestamp: `floor(unix_ts / timeframe_secs)`
    pub fn bucket_index(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.secs())
    }

    /// Start of the bucket containing `ts`
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.bucket_index(ts) * self.secs();
        Utc.timestamp_opt(start, 0).single().unwrap_or(ts)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::H1 => "H1",
        };
        write!(f, "{}", s)
    }
}

/// A single price tick from the feed.
///
/// Ordered per symbol; no ordering guarantee across symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Spread in price units (may be negative for inverted quotes,
    /// which the aggregator rejects)
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Bid/ask midpoint, used for cross-source agreement checks
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }
}

/// An OHLCV candle for one symbol and timeframe. Immutable once closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Full high-to-low range
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Absolute body size
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// Wick above the body
    pub fn upper_wick(&self) -> Decimal {
        self.high - self.open.max(self.close)
    }

    /// Wick below the body
    pub fn lower_wick(&self) -> Decimal {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// True range against the previous close (ATR building block)
    pub fn true_range(&self, prev_close: Decimal) -> Decimal {
        let hl = self.range();
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::M1,
            open_time: Utc.timestamp_opt(1_700_000_040, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(100),
        }
    }

    #[test]
    fn test_bucket_index_floors_timestamp() {
        let ts = Utc.timestamp_opt(125, 0).unwrap();
        assert_eq!(Timeframe::M1.bucket_index(ts), 2);
        assert_eq!(
            Timeframe::M1.bucket_start(ts),
            Utc.timestamp_opt(120, 0).unwrap()
        );
    }

    #[test]
    fn test_largest_timeframe_is_last() {
        assert_eq!(*Timeframe::ALL.last().unwrap(), Timeframe::H1);
        assert!(Timeframe::ALL.windows(2).all(|w| w[0].secs() < w[1].secs()));
    }

    #[test]
    fn test_candle_geometry() {
        let c = candle(dec!(1.1000), dec!(1.1010), dec!(1.0995), dec!(1.1008));
        assert_eq!(c.range(), dec!(0.0015));
        assert_eq!(c.body(), dec!(0.0008));
        assert_eq!(c.upper_wick(), dec!(0.0002));
        assert_eq!(c.lower_wick(), dec!(0.0005));
        assert!(c.is_bullish());
    }

    #[test]
    fn test_true_range_includes_gap() {
        let c = candle(dec!(1.2000), dec!(1.2010), dec!(1.1990), dec!(1.2005));
        // Gap up from 1.1950: |high - prev_close| dominates
        assert_eq!(c.true_range(dec!(1.1950)), dec!(0.0060));
    }
}
