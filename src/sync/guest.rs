//! Guest contact extraction from raw marketplace bookings
//!
//! The bookings endpoint has shipped several contact payload shapes over
//! time. Each field is extracted by an ordered list of extractor functions
//! applied until one succeeds; new shapes are added to the list, not to
//! control flow.

use crate::marketplace::types::RawBooking;

/// Name used when no contact field yields a guest name. Never empty.
pub const GUEST_NAME_PLACEHOLDER: &str = "Marketplace guest";

type Extractor = fn(&RawBooking) -> Option<String>;

/// Name extractors in priority order
const NAME_EXTRACTORS: &[Extractor] = &[
    |b| clean(b.name.as_deref()),
    |b| b.customer.as_ref().and_then(|c| clean(c.name.as_deref())),
    |b| b.customer.as_ref().and_then(join_first_last),
    |b| b.client.as_ref().and_then(|c| clean(c.name.as_deref())),
    |b| b.client.as_ref().and_then(join_first_last),
];

/// Phone extractors in priority order
const PHONE_EXTRACTORS: &[Extractor] = &[
    |b| clean(b.phone.as_deref()),
    |b| b.customer.as_ref().and_then(|c| clean(c.phone.as_deref())),
    |b| b.client.as_ref().and_then(|c| clean(c.phone.as_deref())),
];

/// Email extractors in priority order
const EMAIL_EXTRACTORS: &[Extractor] = &[
    |b| clean(b.email.as_deref()),
    |b| b.customer.as_ref().and_then(|c| clean(c.email.as_deref())),
    |b| b.client.as_ref().and_then(|c| clean(c.email.as_deref())),
];

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn join_first_last(contact: &crate::marketplace::types::RawContact) -> Option<String> {
    let first = contact.first_name.as_deref().unwrap_or("").trim();
    let last = contact.last_name.as_deref().unwrap_or("").trim();
    let joined = format!("{} {}", first, last);
    let joined = joined.trim();
    if joined.is_empty() {
        None
    } else {
        Some(joined.to_string())
    }
}

fn first_match(extractors: &[Extractor], booking: &RawBooking) -> Option<String> {
    extractors.iter().find_map(|extract| extract(booking))
}

/// Extract the guest name, falling back to the documented placeholder
pub fn extract_guest_name(booking: &RawBooking) -> String {
    first_match(NAME_EXTRACTORS, booking).unwrap_or_else(|| GUEST_NAME_PLACEHOLDER.to_string())
}

/// Extract and normalize the guest phone number
pub fn extract_guest_phone(booking: &RawBooking) -> Option<String> {
    first_match(PHONE_EXTRACTORS, booking).and_then(|raw| normalize_phone(&raw))
}

/// Extract the guest email
pub fn extract_guest_email(booking: &RawBooking) -> Option<String> {
    first_match(EMAIL_EXTRACTORS, booking)
}

/// Normalize a phone number to a single canonical international format
///
/// Keeps digits only, converts a leading `00` to `+`, and prefixes `+` when
/// absent. Returns None when no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let has_plus = raw.trim_start().starts_with('+');
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.is_empty() {
        return None;
    }

    let digits = if !has_plus && digits.starts_with("00") {
        digits[2..].to_string()
    } else {
        digits
    };

    if digits.is_empty() {
        return None;
    }

    Some(format!("+{}", digits))
}
