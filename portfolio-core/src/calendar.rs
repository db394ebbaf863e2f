//! Trading-day/holiday/timezone logic. All day-of-week comparisons
//! are performed in the configured trading timezone (US Eastern); UTC
//! conversion happens only when a timestamp is persisted.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

pub fn trading_timezone() -> Tz {
	New_York
}

/// Converts an Eastern wall-clock time on `date` to UTC, the form every
/// persisted timestamp takes.
pub fn eastern_time(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
	New_York
		.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
		.single()
		.expect("valid Eastern wall-clock time")
		.with_timezone(&Utc)
}

/// Gauss/Meeus algorithm for the date of Easter Sunday (Gregorian calendar).
fn easter_sunday(year: i32) -> NaiveDate {
	let a = year % 19;
	let b = year / 100;
	let c = year % 100;
	let d = b / 4;
	let e = b % 4;
	let f = (b + 8) / 25;
	let g = (b - f + 1) / 3;
	let h = (19 * a + b - d - g + 15) % 30;
	let i = c / 4;
	let k = c % 4;
	let l = (32 + 2 * e + 2 * i - h - k) % 7;
	let m = (a + 11 * h + 22 * l) / 451;
	let month = (h + l - 7 * m + 114) / 31;
	let day = (h + l - 7 * m + 114) % 31 + 1;
	NaiveDate::from_ymd_opt(year, month as u32, day as u32).expect("valid Easter date")
}

fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
	let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
	let offset = (7 + weekday.num_days_from_monday() as i64 - first.weekday().num_days_from_monday() as i64) % 7;
	first + Duration::days(offset + 7 * (n as i64 - 1))
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
	let next_month_first = if month == 12 {
		NaiveDate::from_ymd_opt(year + 1, 1, 1).expect("valid date")
	} else {
		NaiveDate::from_ymd_opt(year, month + 1, 1).expect("valid date")
	};
	let last_day = next_month_first - Duration::days(1);
	let back = (7 + last_day.weekday().num_days_from_monday() as i64 - weekday.num_days_from_monday() as i64) % 7;
	last_day - Duration::days(back)
}

/// Shifts a fixed-date holiday that falls on a weekend to the nearest
/// weekday, the convention both exchanges use for New Year's/Independence
/// Day/Christmas/etc.
fn observed(date: NaiveDate) -> NaiveDate {
	match date.weekday() {
		Weekday::Sat => date - Duration::days(1),
		Weekday::Sun => date + Duration::days(1),
		_ => date,
	}
}

/// Combined US + Canada market holiday list for one calendar year.
/// A day is a holiday if either exchange observes it; the calendar treats
/// the union as closed.
fn holidays_for_year(year: i32) -> HashSet<NaiveDate> {
	let mut days = HashSet::new();
	let easter = easter_sunday(year);
	let good_friday = easter - Duration::days(2);

	// Shared fixed-date holidays.
	days.insert(observed(NaiveDate::from_ymd_opt(year, 1, 1).unwrap())); // New Year's Day
	days.insert(good_friday);
	days.insert(observed(NaiveDate::from_ymd_opt(year, 12, 25).unwrap())); // Christmas

	// US (NYSE-style).
	days.insert(nth_weekday_of_month(year, 1, Weekday::Mon, 3)); // MLK Day
	days.insert(nth_weekday_of_month(year, 2, Weekday::Mon, 3)); // Presidents Day
	days.insert(last_weekday_of_month(year, 5, Weekday::Mon)); // Memorial Day
	if year >= 2021 {
		days.insert(observed(NaiveDate::from_ymd_opt(year, 6, 19).unwrap())); // Juneteenth
	}
	days.insert(observed(NaiveDate::from_ymd_opt(year, 7, 4).unwrap())); // Independence Day
	days.insert(nth_weekday_of_month(year, 9, Weekday::Mon, 1)); // Labor Day
	days.insert(nth_weekday_of_month(year, 11, Weekday::Thu, 4)); // Thanksgiving

	// Canada (TSX-style). Family Day coincides with the US Presidents Day date.
	days.insert(victoria_day(year));
	days.insert(observed(NaiveDate::from_ymd_opt(year, 7, 1).unwrap())); // Canada Day
	days.insert(nth_weekday_of_month(year, 8, Weekday::Mon, 1)); // Civic Holiday
	days.insert(nth_weekday_of_month(year, 10, Weekday::Mon, 2)); // Thanksgiving (Canada)
	days.insert(observed(NaiveDate::from_ymd_opt(year, 12, 26).unwrap())); // Boxing Day

	days
}

/// Monday on or before May 25 (Victoria Day).
fn victoria_day(year: i32) -> NaiveDate {
	let cutoff = NaiveDate::from_ymd_opt(year, 5, 25).unwrap();
	let back = (7 + cutoff.weekday().num_days_from_monday() as i64) % 7;
	cutoff - Duration::days(back)
}

pub struct MarketCalendar;

impl Default for MarketCalendar {
	fn default() -> Self {
		MarketCalendar
	}
}

impl MarketCalendar {
	pub fn new() -> MarketCalendar {
		MarketCalendar
	}

	pub fn is_trading_day(&self, date: NaiveDate) -> bool {
		if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
			return false;
		}
		!holidays_for_year(date.year()).contains(&date)
	}

	pub fn is_market_open(&self, at_time: DateTime<Utc>) -> bool {
		let eastern = at_time.with_timezone(&New_York);
		let date = eastern.date_naive();
		if !self.is_trading_day(date) {
			return false;
		}
		let open = self.market_open_time(date);
		let close = self.market_close_time(date);
		open <= at_time && at_time <= close
	}

	pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
		let mut candidate = date + Duration::days(1);
		while !self.is_trading_day(candidate) {
			candidate += Duration::days(1);
		}
		candidate
	}

	pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
		let mut candidate = date - Duration::days(1);
		while !self.is_trading_day(candidate) {
			candidate -= Duration::days(1);
		}
		candidate
	}

	pub fn trading_days_between(&self, a: NaiveDate, b: NaiveDate) -> i64 {
		let (start, end) = if a <= b { (a, b) } else { (b, a) };
		let mut count = 0i64;
		let mut current = start;
		while current <= end {
			if self.is_trading_day(current) {
				count += 1;
			}
			current += Duration::days(1);
		}
		count
	}

	/// Trading days strictly between `a` and `b`, exclusive on both ends,
	/// ascending order. Used by the historical rebuilder / backfill to
	/// enumerate days to fill.
	pub fn trading_days_strictly_between(&self, a: NaiveDate, b: NaiveDate) -> Vec<NaiveDate> {
		let mut days = Vec::new();
		let mut current = a + Duration::days(1);
		while current < b {
			if self.is_trading_day(current) {
				days.push(current);
			}
			current += Duration::days(1);
		}
		days
	}

	/// Last trading date at `at_time`. Monday before open returns the prior
	/// Friday.
	pub fn last_trading_date(&self, at_time: DateTime<Utc>) -> NaiveDate {
		let eastern = at_time.with_timezone(&New_York);
		let today = eastern.date_naive();
		if today.weekday() == Weekday::Mon && at_time < self.market_open_time(today) {
			return self.previous_trading_day(today);
		}
		if self.is_trading_day(today) {
			today
		} else {
			self.previous_trading_day(today)
		}
	}

	pub fn market_open_time(&self, date: NaiveDate) -> DateTime<Utc> {
		eastern_time(date, 9, 30)
	}

	pub fn market_close_time(&self, date: NaiveDate) -> DateTime<Utc> {
		eastern_time(date, 16, 0)
	}

	pub fn trading_timezone(&self) -> Tz {
		trading_timezone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn weekends_are_not_trading_days() {
		let calendar = MarketCalendar::new();
		assert!(!calendar.is_trading_day(NaiveDate::from_ymd_opt(2026, 7, 25).unwrap())); // Saturday
		assert!(!calendar.is_trading_day(NaiveDate::from_ymd_opt(2026, 7, 26).unwrap())); // Sunday
	}

	#[test]
	fn independence_day_is_a_holiday_and_nearby_weekday_is_not() {
		let calendar = MarketCalendar::new();
		assert!(!calendar.is_trading_day(NaiveDate::from_ymd_opt(2026, 7, 4).unwrap())); // Saturday, observed Friday
		assert!(!calendar.is_trading_day(NaiveDate::from_ymd_opt(2026, 7, 3).unwrap())); // observed holiday
		assert!(calendar.is_trading_day(NaiveDate::from_ymd_opt(2026, 7, 2).unwrap()));
	}

	#[test]
	fn christmas_day_is_a_holiday() {
		let calendar = MarketCalendar::new();
		assert!(!calendar.is_trading_day(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()));
	}

	#[test]
	fn next_and_previous_trading_day_skip_weekends() {
		let calendar = MarketCalendar::new();
		let friday = NaiveDate::from_ymd_opt(2026, 7, 24).unwrap();
		assert_eq!(calendar.next_trading_day(friday), NaiveDate::from_ymd_opt(2026, 7, 27).unwrap());
		let monday = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
		assert_eq!(calendar.previous_trading_day(monday), friday);
	}

	#[test]
	fn trading_days_between_counts_weekdays_only() {
		let calendar = MarketCalendar::new();
		let monday = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
		let friday = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
		assert_eq!(calendar.trading_days_between(monday, friday), 5);
	}

	#[test]
	fn market_open_close_times_are_eastern_0930_1600() {
		let calendar = MarketCalendar::new();
		let date = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
		let open = calendar.market_open_time(date).with_timezone(&New_York);
		let close = calendar.market_close_time(date).with_timezone(&New_York);
		assert_eq!((open.hour(), open.minute()), (9, 30));
		assert_eq!((close.hour(), close.minute()), (16, 0));
	}
}
