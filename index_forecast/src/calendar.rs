//! Trading-day calendar

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

/// Weekday calendar with an optional list of exchange holidays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    /// Monday to Friday, no holidays
    pub fn weekdays() -> Self {
        Self::default()
    }

    /// Weekdays minus the given holidays
    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(holidays: I) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !Self::is_weekend(date) && !self.is_holiday(date)
    }

    /// First trading day strictly after `date`
    pub fn next_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let mut current = date.succ_opt()?;
        while !self.is_trading_day(current) {
            current = current.succ_opt()?;
        }
        Some(current)
    }

    /// Trading days in the closed interval `[start, end]`
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekend_detection() {
        let calendar = TradingCalendar::weekdays();
        assert!(!calendar.is_trading_day(date(2024, 1, 6))); // Saturday
        assert!(!calendar.is_trading_day(date(2024, 1, 7))); // Sunday
        assert!(calendar.is_trading_day(date(2024, 1, 8)));
    }

    #[test]
    fn test_next_trading_day_skips_weekend_and_holiday() {
        let calendar = TradingCalendar::with_holidays([date(2024, 1, 8)]);
        assert_eq!(calendar.next_trading_day(date(2024, 1, 5)), Some(date(2024, 1, 9)));
    }

    #[test]
    fn test_trading_days_range() {
        let calendar = TradingCalendar::weekdays();
        let days = calendar.trading_days(date(2024, 1, 1), date(2024, 1, 14));
        assert_eq!(days.len(), 10);
        assert!(calendar.trading_days(date(2024, 1, 6), date(2024, 1, 7)).is_empty());
    }
}
