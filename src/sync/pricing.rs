//! Price computation and date-range coalescing
//!
//! Pure helpers for the push phase: compute the per-date (price, min-stay)
//! table from the base price and per-date overrides with markup applied,
//! coalesce adjacent identical dates into upload ranges, and merge booking
//! date ranges into the blocked-range set.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

use crate::marketplace::types::{BlockedRange, PriceRange};
use crate::models::{Booking, BookingStatus, Markup, PropertyRate};

/// Resolved price and minimum stay for one date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRate {
    pub date: NaiveDate,
    pub price: i64,
    pub min_stay: u32,
}

/// Compute the per-date rate table for `[from, to)`
///
/// Each date takes the override when present, otherwise the listing-level
/// defaults; the markup is applied to either.
pub fn daily_rates(
    from: NaiveDate,
    to: NaiveDate,
    base_price: i64,
    base_min_stay: u32,
    overrides: &[PropertyRate],
    markup: Markup,
) -> Vec<DayRate> {
    let by_date: HashMap<NaiveDate, &PropertyRate> =
        overrides.iter().map(|rate| (rate.date, rate)).collect();

    let mut rates = Vec::new();
    let mut date = from;
    while date < to {
        let (price, min_stay) = match by_date.get(&date) {
            Some(rate) => (rate.nightly_price, rate.min_stay),
            None => (base_price, base_min_stay),
        };
        rates.push(DayRate {
            date,
            price: markup.apply(price),
            min_stay,
        });
        date += Duration::days(1);
    }

    rates
}

/// Coalesce adjacent dates with identical (price, min-stay) into ranges
///
/// Minimizes the number of uploaded ranges: [(d1,100), (d2,100), (d3,150)]
/// becomes [d1..=d2]@100 and [d3..=d3]@150. `date_to` here is inclusive,
/// matching the price upload endpoint.
pub fn coalesce_rates(rates: &[DayRate]) -> Vec<PriceRange> {
    let mut ranges: Vec<PriceRange> = Vec::new();

    for rate in rates {
        match ranges.last_mut() {
            Some(last)
                if last.nightly_price == rate.price
                    && last.minimal_duration == rate.min_stay
                    && last.date_to + Duration::days(1) == rate.date =>
            {
                last.date_to = rate.date;
            }
            _ => ranges.push(PriceRange {
                date_from: rate.date,
                date_to: rate.date,
                nightly_price: rate.price,
                minimal_duration: rate.min_stay,
            }),
        }
    }

    ranges
}

/// Compute the blocked ranges to push for a property's calendar
///
/// One range per confirmed booking, clamped to start no earlier than
/// `today`, excluding `exclude_booking_id` (used to reopen dates after a
/// local deletion) and bookings entirely in the past. Overlapping or
/// touching ranges are merged. `date_to` is exclusive.
pub fn blocked_ranges(
    bookings: &[Booking],
    today: NaiveDate,
    exclude_booking_id: Option<i64>,
) -> Vec<BlockedRange> {
    let mut ranges: Vec<BlockedRange> = bookings
        .iter()
        .filter(|b| b.status == BookingStatus::Confirmed)
        .filter(|b| Some(b.id) != exclude_booking_id)
        .filter(|b| b.check_out > today)
        .map(|b| BlockedRange {
            date_from: b.check_in.max(today),
            date_to: b.check_out,
        })
        .collect();

    ranges.sort_by_key(|r| r.date_from);

    let mut merged: Vec<BlockedRange> = Vec::new();
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.date_from <= last.date_to => {
                last.date_to = last.date_to.max(range.date_to);
            }
            _ => merged.push(range),
        }
    }

    merged
}
