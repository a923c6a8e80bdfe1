use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};

use crate::models::{Service, ServiceCity};

/// A recurring-passage rule: which day(s) of a month a service visit runs.
///
/// `week` 0 means every occurrence of `weekday` in the month, 1..=4 the Nth
/// occurrence, 5 the last one. `weekday` is 0..=6 with 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassageRule {
    pub week: u8,
    pub weekday: u8,
}

impl PassageRule {
    /// Build a rule from the nullable DB column pair, rejecting out-of-range
    /// values rather than erroring.
    pub fn from_columns(week: Option<i64>, weekday: Option<i64>) -> Option<Self> {
        let week = week?;
        let weekday = weekday?;
        if !(0..=5).contains(&week) || !(0..=6).contains(&weekday) {
            return None;
        }
        Some(Self {
            week: week as u8,
            weekday: weekday as u8,
        })
    }
}

/// All dates in (year, month) matching the rule.
///
/// The Nth occurrence of a weekday may not exist in a short month; that
/// yields an empty result, meaning "no passage this month".
pub fn occurrences(year: i32, month: u32, rule: PassageRule) -> Vec<NaiveDate> {
    let matching: Vec<NaiveDate> = (1..=31)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .filter(|d| d.weekday().num_days_from_sunday() == rule.weekday as u32)
        .collect();

    match rule.week {
        0 => matching,
        5 => matching.last().copied().into_iter().collect(),
        n => matching.get(n as usize - 1).copied().into_iter().collect(),
    }
}

/// Passage precedence: the service's own configuration wins, the city's is
/// the fallback, and when neither defines one there is no date restriction.
pub fn resolve_passage(service: &Service, city: &ServiceCity) -> Option<Vec<PassageRule>> {
    let service_rules: Vec<PassageRule> = [
        PassageRule::from_columns(service.passage1_week, service.passage1_weekday),
        PassageRule::from_columns(service.passage2_week, service.passage2_weekday),
    ]
    .into_iter()
    .flatten()
    .collect();

    if !service_rules.is_empty() {
        return Some(service_rules);
    }

    let city_rules: Vec<PassageRule> = [
        PassageRule::from_columns(city.passage1_week, city.passage1_weekday),
        PassageRule::from_columns(city.passage2_week, city.passage2_weekday),
    ]
    .into_iter()
    .flatten()
    .collect();

    if !city_rules.is_empty() {
        return Some(city_rules);
    }

    None
}

/// Union of passage dates over every month touched by [start, end],
/// deduplicated and clipped to the range.
pub fn allowed_dates_in_range(
    start: NaiveDate,
    end: NaiveDate,
    rules: &[PassageRule],
) -> BTreeSet<NaiveDate> {
    let mut dates = BTreeSet::new();
    if start > end {
        return dates;
    }

    let (mut year, mut month) = (start.year(), start.month());
    loop {
        for rule in rules {
            for date in occurrences(year, month, *rule) {
                if date >= start && date <= end {
                    dates.insert(date);
                }
            }
        }

        if (year, month) >= (end.year(), end.month()) {
            break;
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    dates
}
