//! Calendar feed generation
//!
//! Emits an iCalendar document of busy blocks for one property, pulled by
//! the marketplace to avoid conflicting external bookings. One all-day
//! VEVENT per future, non-cancelled booking whose source is not the
//! marketplace itself - the marketplace must not re-import its own bookings
//! as blocks.
//!
//! Block boundaries are floating (timezone-naive) local midnights: DTSTART
//! is the check-in date, DTEND the check-out date, exclusive, so the
//! checkout day itself stays bookable by a following guest.

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{Booking, BookingStatus};

const PRODID: &str = "-//hostsync//calendar-feed//EN";

/// Generate the calendar feed for a property
///
/// `excluded_source` is the platform pulling the feed; `today` decides
/// which bookings are still future; `now` stamps the events.
pub fn generate_feed(
    bookings: &[Booking],
    excluded_source: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> String {
    let dtstamp = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut lines: Vec<String> = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "CALSCALE:GREGORIAN".to_string(),
    ];

    for booking in bookings {
        if booking.status == BookingStatus::Cancelled {
            continue;
        }
        if !booking.is_future(today) {
            continue;
        }
        if booking.source == excluded_source {
            continue;
        }

        lines.push("BEGIN:VEVENT".to_string());
        // The UID derives from the local id: deleting and recreating a
        // booking yields a genuinely new event, not a stale one
        lines.push(format!("UID:booking-{}@hostsync", booking.id));
        lines.push(format!("DTSTAMP:{}", dtstamp));
        lines.push(format!(
            "DTSTART;VALUE=DATE:{}",
            booking.check_in.format("%Y%m%d")
        ));
        lines.push(format!(
            "DTEND;VALUE=DATE:{}",
            booking.check_out.format("%Y%m%d")
        ));
        lines.push("SUMMARY:Busy".to_string());
        lines.push("TRANSP:OPAQUE".to_string());
        lines.push("END:VEVENT".to_string());
    }

    lines.push("END:VCALENDAR".to_string());

    // RFC 5545 requires CRLF line endings
    let mut feed = lines.join("\r\n");
    feed.push_str("\r\n");
    feed
}
