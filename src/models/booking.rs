//! Booking and pricing models
//!
//! `Booking` is the canonical reservation record shared with the rest of the
//! product. The sync engine only reads most of it; the pull step upserts
//! marketplace bookings by their remote id. `PropertyRate` is a read-only
//! per-date override of price and minimum stay.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
}

impl BookingStatus {
    /// Parse from the stored column value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(BookingStatus::Confirmed),
            "pending" => Some(BookingStatus::Pending),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Stored column value
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Pending => "pending",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Map the marketplace status enum onto the local one
    ///
    /// active -> confirmed, canceled -> cancelled, pending -> pending.
    /// Anything unrecognized is treated as pending.
    pub fn from_remote(s: &str) -> Self {
        match s {
            "active" | "confirmed" => BookingStatus::Confirmed,
            "canceled" | "cancelled" => BookingStatus::Cancelled,
            _ => BookingStatus::Pending,
        }
    }
}

/// Canonical reservation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Local booking id
    pub id: i64,

    /// Property the booking belongs to
    pub property_id: i64,

    /// Remote booking identifier; None for locally-created bookings.
    /// Unique when present - pulled bookings are upserted by this key.
    pub remote_id: Option<String>,

    /// Check-in date
    pub check_in: NaiveDate,

    /// Check-out date (exclusive - the checkout day is bookable)
    pub check_out: NaiveDate,

    /// Guest name
    pub guest_name: String,

    /// Guest phone, normalized to international form
    pub guest_phone: Option<String>,

    /// Guest email
    pub guest_email: Option<String>,

    /// Lifecycle status
    pub status: BookingStatus,

    /// Origin: a marketplace platform name, "manual" or "import"
    pub source: String,

    /// When the row was created
    pub created_at: DateTime<Utc>,

    /// When the row was last updated
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether this booking still blocks nights on or after `today`
    pub fn is_future(&self, today: NaiveDate) -> bool {
        self.check_out > today
    }
}

/// A marketplace booking ready to be upserted by remote id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemoteBooking {
    pub property_id: i64,
    pub remote_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_name: String,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
    pub status: BookingStatus,
    pub source: String,
}

/// Result of an upsert-by-remote-id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was inserted
    Created,
    /// An existing row was updated with changed fields
    Updated,
    /// An existing row already matched; nothing written
    Unchanged,
}

/// Per-date override of nightly price and minimum stay
///
/// Read-only input to the push step; never written by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRate {
    pub property_id: i64,
    pub date: NaiveDate,
    /// Nightly price in currency minor units
    pub nightly_price: i64,
    pub min_stay: u32,
}

/// Listing-level defaults used as fallback for dates without an override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefaults {
    pub property_id: i64,
    /// Owning user, checked during OAuth integration resolution
    pub owner_id: i64,
    pub base_price: i64,
    pub min_stay: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Test 1: Remote status mapping
    #[test]
    fn test_status_from_remote() {
        assert_eq!(BookingStatus::from_remote("active"), BookingStatus::Confirmed);
        assert_eq!(
            BookingStatus::from_remote("canceled"),
            BookingStatus::Cancelled
        );
        assert_eq!(
            BookingStatus::from_remote("cancelled"),
            BookingStatus::Cancelled
        );
        assert_eq!(BookingStatus::from_remote("pending"), BookingStatus::Pending);
        assert_eq!(BookingStatus::from_remote("unknown"), BookingStatus::Pending);
    }

    // Test 2: Status round-trips through its column value
    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            BookingStatus::Confirmed,
            BookingStatus::Pending,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("deleted"), None);
    }

    // Test 3: A booking checking out today is no longer future
    #[test]
    fn test_booking_is_future() {
        let booking = Booking {
            id: 1,
            property_id: 10,
            remote_id: None,
            check_in: date(2025, 11, 17),
            check_out: date(2025, 11, 20),
            guest_name: "Guest".to_string(),
            guest_phone: None,
            guest_email: None,
            status: BookingStatus::Confirmed,
            source: "manual".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(booking.is_future(date(2025, 11, 16)));
        // Still blocks nights while the stay is in progress
        assert!(booking.is_future(date(2025, 11, 19)));
        // Checkout day: nothing left to block
        assert!(!booking.is_future(date(2025, 11, 20)));
        assert!(!booking.is_future(date(2025, 12, 1)));
    }
}
