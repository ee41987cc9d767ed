//! Wire payload types for the marketplace API
//!
//! The bookings endpoint has varied its contact payload shape over time;
//! `RawBooking` tolerates the known variants via serde aliases and nested
//! optional contact objects. Extraction into local records happens in
//! `sync::guest`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Token grant returned by the marketplace token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// One contiguous range of dates sharing a nightly price and minimum stay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub nightly_price: i64,
    pub minimal_duration: u32,
}

/// One blocked date range on the marketplace calendar
///
/// `date_to` is exclusive: the checkout day stays bookable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// Contact object as it appears nested in booking payloads
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A booking as returned by the marketplace bookings endpoint
///
/// Field aliases cover the historical payload shapes; everything except the
/// id and dates is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBooking {
    #[serde(default, alias = "booking_id")]
    pub id: Option<i64>,

    #[serde(default, alias = "item_id")]
    pub listing_id: Option<i64>,

    #[serde(default, alias = "begin_date", alias = "checkin")]
    pub date_from: Option<NaiveDate>,

    #[serde(default, alias = "end_date", alias = "checkout")]
    pub date_to: Option<NaiveDate>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, alias = "client_name")]
    pub name: Option<String>,

    #[serde(default, alias = "client_phone")]
    pub phone: Option<String>,

    #[serde(default, alias = "client_email")]
    pub email: Option<String>,

    #[serde(default)]
    pub customer: Option<RawContact>,

    #[serde(default)]
    pub client: Option<RawContact>,
}

impl RawBooking {
    /// Remote booking identifier as stored locally
    pub fn remote_id(&self) -> Option<String> {
        self.id.map(|id| id.to_string())
    }

    /// Whether the booking carries the fields the pull step requires
    pub fn is_importable(&self) -> bool {
        self.id.is_some() && self.date_from.is_some() && self.date_to.is_some()
    }

    /// Whether the booking is still in the unpaid, pending state
    pub fn is_unpaid(&self) -> bool {
        matches!(self.status.as_deref(), Some("pending"))
    }
}
