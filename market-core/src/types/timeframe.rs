use crate::error::CoreError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of a bar aggregation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrameUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeFrameUnit {
    /// Suffix used by the Alpaca `timeframe` query parameter
    pub fn api_suffix(&self) -> &'static str {
        match self {
            TimeFrameUnit::Minute => "Min",
            TimeFrameUnit::Hour => "Hour",
            TimeFrameUnit::Day => "Day",
            TimeFrameUnit::Week => "Week",
            TimeFrameUnit::Month => "Month",
        }
    }
}

/// Bar aggregation window, e.g. `15Min`, `1Hour`, `1Day`.
///
/// Amounts follow the limits enforced by the Alpaca bars endpoints:
/// minutes 1-59, hours 1-23, a single day or week, and months of
/// 1, 2, 3, 6 or 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeFrame {
    pub amount: u32,
    pub unit: TimeFrameUnit,
}

impl TimeFrame {
    pub fn new(amount: u32, unit: TimeFrameUnit) -> Result<Self, CoreError> {
        let valid = match unit {
            TimeFrameUnit::Minute => (1..=59).contains(&amount),
            TimeFrameUnit::Hour => (1..=23).contains(&amount),
            TimeFrameUnit::Day | TimeFrameUnit::Week => amount == 1,
            TimeFrameUnit::Month => matches!(amount, 1 | 2 | 3 | 6 | 12),
        };

        if !valid {
            return Err(CoreError::InvalidTimeframe(format!(
                "{} is not a valid amount for unit {:?}",
                amount, unit
            )));
        }

        Ok(Self { amount, unit })
    }

    pub fn minute() -> Self {
        Self { amount: 1, unit: TimeFrameUnit::Minute }
    }

    pub fn hour() -> Self {
        Self { amount: 1, unit: TimeFrameUnit::Hour }
    }

    pub fn day() -> Self {
        Self { amount: 1, unit: TimeFrameUnit::Day }
    }

    /// Value for the `timeframe` query parameter (`1Day`, `15Min`, ...)
    pub fn as_api_str(&self) -> String {
        format!("{}{}", self.amount, self.unit.api_suffix())
    }

    /// Nominal length of one bar. Months count as 30 days.
    pub fn duration(&self) -> Duration {
        let amount = self.amount as i64;
        match self.unit {
            TimeFrameUnit::Minute => Duration::minutes(amount),
            TimeFrameUnit::Hour => Duration::hours(amount),
            TimeFrameUnit::Day => Duration::days(amount),
            TimeFrameUnit::Week => Duration::weeks(amount),
            TimeFrameUnit::Month => Duration::days(30 * amount),
        }
    }

    /// True for daily and longer bars (which close outside regular session gaps)
    pub fn is_daily_or_longer(&self) -> bool {
        matches!(
            self.unit,
            TimeFrameUnit::Day | TimeFrameUnit::Week | TimeFrameUnit::Month
        )
    }
}

impl Default for TimeFrame {
    fn default() -> Self {
        Self::day()
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_api_str())
    }
}

impl FromStr for TimeFrame {
    type Err = CoreError;

    /// Parse shorthand (`1D`, `4H`, `15T`) or API form (`1Day`, `15Min`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);

        if unit.is_empty() {
            return Err(CoreError::InvalidTimeframe(format!(
                "missing unit in '{}'",
                s
            )));
        }

        let amount = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|e| CoreError::InvalidTimeframe(format!("'{}': {}", s, e)))?
        };

        // Single letters are case-sensitive (`M` is a month, `T` a minute)
        let unit = match unit {
            "T" => TimeFrameUnit::Minute,
            "H" | "h" => TimeFrameUnit::Hour,
            "D" | "d" => TimeFrameUnit::Day,
            "W" | "w" => TimeFrameUnit::Week,
            "M" => TimeFrameUnit::Month,
            long => match long.to_ascii_lowercase().as_str() {
                "min" | "minute" => TimeFrameUnit::Minute,
                "hour" => TimeFrameUnit::Hour,
                "day" => TimeFrameUnit::Day,
                "week" => TimeFrameUnit::Week,
                "mo" | "month" => TimeFrameUnit::Month,
                _ => {
                    return Err(CoreError::InvalidTimeframe(format!(
                        "unknown unit '{}' in '{}'",
                        long, s
                    )))
                }
            },
        };

        TimeFrame::new(amount, unit)
    }
}
