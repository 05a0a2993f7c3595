use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{
	Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
	format_description::well_known::Rfc3339,
};

/// Time-filter shapes a planner may emit. Everything normalizes to an
/// absolute UTC range or drops out entirely; a filter never fails a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeFilter {
	Named { preset: String },
	Relative { unit: TimeUnit, value: i64 },
	Absolute { from: String, to: String },
	Month { month: i64, year: Option<i32> },
	Year { year: i32 },
	Quarter { quarter: i64, year: Option<i32> },
	Label { label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
	Day,
	Week,
	Month,
	Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteRange {
	#[serde(with = "crate::time_serde")]
	pub from: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub to: OffsetDateTime,
}

static LAST_N_DAYS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^last_(\d{1,4})_days$").expect("static regex"));
static YEAR_TO_NOW: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(\d{4})(?:_|-|to)+now$").expect("static regex"));
static YEAR_RANGE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(\d{4})(?:\.|_|-|to){1,2}(\d{4})$").expect("static regex"));
static YEAR_QUARTER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(\d{4})[-_]q([1-4])$").expect("static regex"));
static QUARTER_YEAR: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^q([1-4])[-_]?(\d{4})$").expect("static regex"));
static YEAR_MONTH: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(\d{4})[-_]?(\d{1,2})$").expect("static regex"));
static YEAR_ONLY: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(\d{4})$").expect("static regex"));

/// Resolves a filter to an absolute UTC range. Calendar arithmetic happens in
/// the caller's offset so "yesterday" means the caller's yesterday. `None`
/// means the filter is dropped (explicitly for `all_time`, implicitly for
/// anything unrecognized).
pub fn to_absolute_range(
	filter: &TimeFilter,
	base: OffsetDateTime,
	offset: UtcOffset,
) -> Option<AbsoluteRange> {
	let local_today = base.to_offset(offset).date();

	match filter {
		TimeFilter::Named { preset } => named_range(preset, local_today, offset),
		TimeFilter::Relative { unit, value } => {
			let value = (*value).max(1);
			let from_date = match unit {
				TimeUnit::Day => local_today.checked_sub(Duration::days(value - 1))?,
				TimeUnit::Week => local_today.checked_sub(Duration::days(value * 7 - 1))?,
				TimeUnit::Month => months_back(local_today, value)?,
				TimeUnit::Year => months_back(local_today, value.checked_mul(12)?)?,
			};

			Some(AbsoluteRange {
				from: day_start(from_date, offset),
				to: day_end(local_today, offset),
			})
		},
		TimeFilter::Absolute { from, to } => {
			let from = OffsetDateTime::parse(from, &Rfc3339).ok()?;
			let to = OffsetDateTime::parse(to, &Rfc3339).ok()?;

			Some(AbsoluteRange { from: from.to_offset(UtcOffset::UTC), to: to.to_offset(UtcOffset::UTC) })
		},
		TimeFilter::Month { month, year } => {
			let month = (*month).clamp(1, 12) as u8;
			let year = year.unwrap_or(local_today.year());

			month_range(year, month, month, offset)
		},
		TimeFilter::Year { year } => month_range(*year, 1, 12, offset),
		TimeFilter::Quarter { quarter, year } => {
			let quarter = (*quarter).clamp(1, 4) as u8;
			let year = year.unwrap_or(local_today.year());

			quarter_range(year, quarter, offset)
		},
		TimeFilter::Label { label } => label_range(label, local_today, offset),
	}
}

fn named_range(preset: &str, local_today: Date, offset: UtcOffset) -> Option<AbsoluteRange> {
	let preset = preset.trim().to_lowercase();

	match preset.as_str() {
		"all" | "all_time" => None,
		"today" => Some(AbsoluteRange {
			from: day_start(local_today, offset),
			to: day_end(local_today, offset),
		}),
		"yesterday" => {
			let yesterday = local_today.checked_sub(Duration::days(1))?;

			Some(AbsoluteRange {
				from: day_start(yesterday, offset),
				to: day_end(yesterday, offset),
			})
		},
		"this_month" => month_range(
			local_today.year(),
			local_today.month() as u8,
			local_today.month() as u8,
			offset,
		),
		"last_month" => {
			let first = local_today.replace_day(1).ok()?;
			let prev = first.checked_sub(Duration::days(1))?;

			month_range(prev.year(), prev.month() as u8, prev.month() as u8, offset)
		},
		_ => {
			let captures = LAST_N_DAYS.captures(&preset)?;
			let n: i64 = captures.get(1)?.as_str().parse().ok()?;
			let from_date = local_today.checked_sub(Duration::days(n.max(1) - 1))?;

			Some(AbsoluteRange {
				from: day_start(from_date, offset),
				to: day_end(local_today, offset),
			})
		},
	}
}

fn label_range(label: &str, local_today: Date, offset: UtcOffset) -> Option<AbsoluteRange> {
	let compact: String =
		label.chars().filter(|ch| !ch.is_whitespace()).collect::<String>().to_lowercase();

	if compact.is_empty() {
		return None;
	}
	if matches!(compact.as_str(), "all" | "all_time")
		|| matches!(
			compact.as_str(),
			"today" | "yesterday" | "this_month" | "last_month"
		) || LAST_N_DAYS.is_match(&compact)
	{
		return named_range(&compact, local_today, offset);
	}
	if let Some(captures) = YEAR_TO_NOW.captures(&compact) {
		let year: i32 = captures.get(1)?.as_str().parse().ok()?;
		let from_date = Date::from_calendar_date(year, Month::January, 1).ok()?;

		return Some(AbsoluteRange {
			from: day_start(from_date, offset),
			to: day_end(local_today, offset),
		});
	}
	if let Some(captures) = YEAR_RANGE.captures(&compact) {
		let first: i32 = captures.get(1)?.as_str().parse().ok()?;
		let second: i32 = captures.get(2)?.as_str().parse().ok()?;
		let from_year = first.min(second);
		let to_year = first.max(second);
		let from = Date::from_calendar_date(from_year, Month::January, 1).ok()?;
		let to = Date::from_calendar_date(to_year, Month::December, 31).ok()?;

		return Some(AbsoluteRange { from: day_start(from, offset), to: day_end(to, offset) });
	}
	if let Some(captures) = YEAR_QUARTER.captures(&compact) {
		let year: i32 = captures.get(1)?.as_str().parse().ok()?;
		let quarter: u8 = captures.get(2)?.as_str().parse().ok()?;

		return quarter_range(year, quarter, offset);
	}
	if let Some(captures) = QUARTER_YEAR.captures(&compact) {
		let quarter: u8 = captures.get(1)?.as_str().parse().ok()?;
		let year: i32 = captures.get(2)?.as_str().parse().ok()?;

		return quarter_range(year, quarter, offset);
	}
	if let Some(captures) = YEAR_MONTH.captures(&compact) {
		let year: i32 = captures.get(1)?.as_str().parse().ok()?;
		let month: u8 = captures.get(2)?.as_str().parse::<u8>().ok()?.clamp(1, 12);

		return month_range(year, month, month, offset);
	}
	if let Some(captures) = YEAR_ONLY.captures(&compact) {
		let year: i32 = captures.get(1)?.as_str().parse().ok()?;

		return month_range(year, 1, 12, offset);
	}

	None
}

fn quarter_range(year: i32, quarter: u8, offset: UtcOffset) -> Option<AbsoluteRange> {
	let first_month = (quarter - 1) * 3 + 1;
	let last_month = quarter * 3;

	month_range(year, first_month, last_month, offset)
}

fn month_range(
	year: i32,
	first_month: u8,
	last_month: u8,
	offset: UtcOffset,
) -> Option<AbsoluteRange> {
	let first = Month::try_from(first_month).ok()?;
	let last = Month::try_from(last_month).ok()?;
	let from = Date::from_calendar_date(year, first, 1).ok()?;
	let to = Date::from_calendar_date(year, last, days_in_month(year, last)).ok()?;

	Some(AbsoluteRange { from: day_start(from, offset), to: day_end(to, offset) })
}

fn day_start(date: Date, offset: UtcOffset) -> OffsetDateTime {
	PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_offset(offset).to_offset(UtcOffset::UTC)
}

fn day_end(date: Date, offset: UtcOffset) -> OffsetDateTime {
	let end = Time::from_hms_milli(23, 59, 59, 999).unwrap_or(Time::MIDNIGHT);

	PrimitiveDateTime::new(date, end).assume_offset(offset).to_offset(UtcOffset::UTC)
}

fn months_back(date: Date, months: i64) -> Option<Date> {
	let total = i64::from(date.year()) * 12 + i64::from(date.month() as u8) - 1 - months;
	let year = i32::try_from(total.div_euclid(12)).ok()?;
	let month = Month::try_from((total.rem_euclid(12) + 1) as u8).ok()?;
	let day = date.day().min(days_in_month(year, month));

	Date::from_calendar_date(year, month, day).ok()
}

fn days_in_month(year: i32, month: Month) -> u8 {
	match month {
		Month::January
		| Month::March
		| Month::May
		| Month::July
		| Month::August
		| Month::October
		| Month::December => 31,
		Month::April | Month::June | Month::September | Month::November => 30,
		Month::February =>
			if time::util::is_leap_year(year) {
				29
			} else {
				28
			},
	}
}

#[cfg(test)]
mod tests {
	use time::macros::{datetime, offset};

	use super::*;

	const KST: UtcOffset = offset!(+9);

	#[test]
	fn relative_seven_days_is_inclusive() {
		let base = datetime!(2024-03-10 03:00 UTC);
		let range = to_absolute_range(
			&TimeFilter::Relative { unit: TimeUnit::Day, value: 7 },
			base,
			KST,
		)
		.expect("range");

		// 2024-03-10 03:00 UTC is 2024-03-10 12:00 KST.
		assert_eq!(range.from, datetime!(2024-03-04 00:00 +9).to_offset(UtcOffset::UTC));
		assert_eq!(range.to, datetime!(2024-03-10 23:59:59.999 +9).to_offset(UtcOffset::UTC));
	}

	#[test]
	fn relative_month_walks_calendar_months() {
		let base = datetime!(2024-03-31 12:00 UTC);
		let range = to_absolute_range(
			&TimeFilter::Relative { unit: TimeUnit::Month, value: 1 },
			base,
			KST,
		)
		.expect("range");

		// One month back from Mar 31 clamps to Feb 29 (leap year).
		assert_eq!(range.from, datetime!(2024-02-29 00:00 +9).to_offset(UtcOffset::UTC));
	}

	#[test]
	fn named_all_time_drops_the_filter() {
		let base = datetime!(2024-03-10 12:00 UTC);

		assert!(
			to_absolute_range(&TimeFilter::Named { preset: "all_time".to_string() }, base, KST)
				.is_none()
		);
	}

	#[test]
	fn named_last_n_days_parses_generic_n() {
		let base = datetime!(2024-03-10 12:00 UTC);
		let range =
			to_absolute_range(&TimeFilter::Named { preset: "last_14_days".to_string() }, base, KST)
				.expect("range");

		assert_eq!(range.from, datetime!(2024-02-26 00:00 +9).to_offset(UtcOffset::UTC));
	}

	#[test]
	fn label_year_quarter_resolves_to_quarter_bounds() {
		let base = datetime!(2024-03-10 12:00 UTC);
		let range =
			to_absolute_range(&TimeFilter::Label { label: "2023-Q2".to_string() }, base, KST)
				.expect("range");

		assert_eq!(range.from, datetime!(2023-04-01 00:00 +9).to_offset(UtcOffset::UTC));
		assert_eq!(range.to, datetime!(2023-06-30 23:59:59.999 +9).to_offset(UtcOffset::UTC));
	}

	#[test]
	fn label_year_range_orders_years() {
		let base = datetime!(2024-03-10 12:00 UTC);
		let range =
			to_absolute_range(&TimeFilter::Label { label: "2024-2022".to_string() }, base, KST)
				.expect("range");

		assert_eq!(range.from, datetime!(2022-01-01 00:00 +9).to_offset(UtcOffset::UTC));
		assert_eq!(range.to, datetime!(2024-12-31 23:59:59.999 +9).to_offset(UtcOffset::UTC));
	}

	#[test]
	fn label_year_month_resolves_single_month() {
		let base = datetime!(2024-03-10 12:00 UTC);
		let range =
			to_absolute_range(&TimeFilter::Label { label: "2024-02".to_string() }, base, KST)
				.expect("range");

		assert_eq!(range.from, datetime!(2024-02-01 00:00 +9).to_offset(UtcOffset::UTC));
		assert_eq!(range.to, datetime!(2024-02-29 23:59:59.999 +9).to_offset(UtcOffset::UTC));
	}

	#[test]
	fn unknown_label_is_dropped() {
		let base = datetime!(2024-03-10 12:00 UTC);

		assert!(
			to_absolute_range(&TimeFilter::Label { label: "around then".to_string() }, base, KST)
				.is_none()
		);
	}

	#[test]
	fn absolute_range_passes_through_in_utc() {
		let base = datetime!(2024-03-10 12:00 UTC);
		let range = to_absolute_range(
			&TimeFilter::Absolute {
				from: "2024-01-01T00:00:00+09:00".to_string(),
				to: "2024-01-31T23:59:59Z".to_string(),
			},
			base,
			KST,
		)
		.expect("range");

		assert_eq!(range.from, datetime!(2023-12-31 15:00 UTC));
		assert_eq!(range.to, datetime!(2024-01-31 23:59:59 UTC));
	}
}
