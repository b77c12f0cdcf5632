//! Indicator toolkit shared by the pattern detectors
//!
//! Window-based helpers operate on slices of closed candles, oldest first.
//! The streaming `MovingAverage` mirrors the classic incremental form and is
//! used where a detector walks a window candle by candle.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use types::Candle;

/// Lossy conversion for derived statistics; prices stay Decimal
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Price distance expressed in pips
pub fn pips(distance: Decimal, pip_size: Decimal) -> f64 {
    if pip_size.is_zero() {
        return 0.0;
    }
    to_f64(distance / pip_size)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return None;
    }
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

pub fn closes(window: &[Candle]) -> Vec<f64> {
    window.iter().map(|c| to_f64(c.close)).collect()
}

/// Average high-low range over the window
pub fn average_range(window: &[Candle]) -> Option<Decimal> {
    if window.is_empty() {
        return None;
    }
    let sum: Decimal = window.iter().map(|c| c.range()).sum();
    Some(sum / Decimal::from(window.len()))
}

pub fn average_volume(window: &[Candle]) -> Option<Decimal> {
    if window.is_empty() {
        return None;
    }
    let sum: Decimal = window.iter().map(|c| c.volume).sum();
    Some(sum / Decimal::from(window.len()))
}

/// Average true range over the last `period` candles
pub fn atr(window: &[Candle], period: usize) -> Option<Decimal> {
    if window.len() < period + 1 {
        return None;
    }
    let tail = &window[window.len() - period - 1..];
    let mut sum = Decimal::ZERO;
    for pair in tail.windows(2) {
        sum += pair[1].true_range(pair[0].close);
    }
    Some(sum / Decimal::from(period))
}

/// Highest high over the last `lookback` candles, excluding the final candle
pub fn swing_high(window: &[Candle], lookback: usize) -> Option<Decimal> {
    if window.len() < lookback + 1 {
        return None;
    }
    window[window.len() - lookback - 1..window.len() - 1]
        .iter()
        .map(|c| c.high)
        .max()
}

/// Lowest low over the last `lookback` candles, excluding the final candle
pub fn swing_low(window: &[Candle], lookback: usize) -> Option<Decimal> {
    if window.len() < lookback + 1 {
        return None;
    }
    window[window.len() - lookback - 1..window.len() - 1]
        .iter()
        .map(|c| c.low)
        .min()
}

/// Net close-to-close change over the last `n` candles
pub fn net_change(window: &[Candle], n: usize) -> Option<Decimal> {
    if window.len() < n + 1 {
        return None;
    }
    let last = window[window.len() - 1].close;
    let base = window[window.len() - 1 - n].close;
    Some(last - base)
}

/// Z-score of the last close against the rolling baseline of the preceding
/// `period` closes
pub fn close_z_score(window: &[Candle], period: usize) -> Option<f64> {
    if window.len() < period + 1 {
        return None;
    }
    let baseline: Vec<f64> = window[window.len() - 1 - period..window.len() - 1]
        .iter()
        .map(|c| to_f64(c.close))
        .collect();
    let m = mean(&baseline)?;
    let sd = std_dev(&baseline)?;
    if sd == 0.0 {
        return None;
    }
    Some((to_f64(window[window.len() - 1].close) - m) / sd)
}

/// Volume-weighted average price over the window
pub fn vwap(window: &[Candle]) -> Option<Decimal> {
    let total_volume: Decimal = window.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        return None;
    }
    let weighted: Decimal = window
        .iter()
        .map(|c| (c.high + c.low + c.close) / Decimal::from(3) * c.volume)
        .sum();
    Some(weighted / total_volume)
}

/// Simple Moving Average calculator (incremental form)
#[derive(Debug, Clone)]
pub struct MovingAverage {
    period: usize,
    values: VecDeque<Decimal>,
    sum: Decimal,
}

impl MovingAverage {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: Decimal::ZERO,
        }
    }

    /// Add a new value and return the current MA once warm
    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.values.push_back(value);
        self.sum += value;

        if self.values.len() > self.period {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }

        if self.values.len() == self.period {
            Some(self.sum / Decimal::from(self.period))
        } else {
            None
        }
    }

    pub fn current(&self) -> Option<Decimal> {
        if self.values.len() == self.period {
            Some(self.sum / Decimal::from(self.period))
        } else {
            None
        }
    }

    pub fn is_ready(&self) -> bool {
        self.values.len() == self.period
    }
}
