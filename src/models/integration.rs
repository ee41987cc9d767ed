//! Integration, queue and audit-log models
//!
//! An `Integration` is a configured link between one local property and one
//! marketplace listing, including its encrypted credentials. Each active
//! integration owns exactly one `SyncQueueItem` row that schedules its
//! periodic sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default sync interval for an integration, in seconds
pub const DEFAULT_SYNC_INTERVAL_SECS: u32 = 10;

/// Price adjustment applied before pushing nightly rates, compensating for
/// marketplace commission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Markup {
    /// Multiply by `1 + value/100`. A value of 20 turns 1000 into 1200.
    Percentage(f64),
    /// Add a fixed amount in currency minor units. A value of -200 turns
    /// 1000 into 800.
    Fixed(f64),
}

impl Markup {
    /// Build a markup from its stored (type, value) columns
    pub fn from_parts(kind: &str, value: f64) -> Self {
        match kind {
            "fixed" => Markup::Fixed(value),
            _ => Markup::Percentage(value),
        }
    }

    /// Stored type column for this markup
    pub fn kind(&self) -> &'static str {
        match self {
            Markup::Percentage(_) => "percentage",
            Markup::Fixed(_) => "fixed",
        }
    }

    /// Stored value column for this markup
    pub fn value(&self) -> f64 {
        match self {
            Markup::Percentage(v) | Markup::Fixed(v) => *v,
        }
    }

    /// Apply the markup to a base price, flooring at 1 currency unit.
    ///
    /// The marketplace rejects zero and negative prices.
    pub fn apply(&self, base: i64) -> i64 {
        let adjusted = match self {
            Markup::Percentage(pct) => (base as f64 * (1.0 + pct / 100.0)).round() as i64,
            Markup::Fixed(amount) => base + amount.round() as i64,
        };
        adjusted.max(1)
    }
}

impl Default for Markup {
    fn default() -> Self {
        Markup::Percentage(0.0)
    }
}

/// A configured link between a local property and a marketplace listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    /// Local integration id
    pub id: i64,

    /// Local property this integration belongs to
    pub property_id: i64,

    /// Marketplace platform identifier (e.g. "marketplace")
    pub platform: String,

    /// Remote account/user identifier on the marketplace
    pub remote_account_id: Option<String>,

    /// Remote listing (item) identifier on the marketplace
    pub remote_listing_id: Option<String>,

    /// Encrypted access token (AES-GCM envelope, base64)
    pub access_token_enc: Option<String>,

    /// Encrypted refresh token
    pub refresh_token_enc: Option<String>,

    /// Absolute access-token expiry
    pub token_expires_at: Option<DateTime<Utc>>,

    /// Granted OAuth scope string
    pub scope: Option<String>,

    /// Price markup applied on push
    pub markup: Markup,

    /// False once the marketplace revoked access; soft-disable, never delete
    pub is_active: bool,

    /// Host-controlled enable switch
    pub is_enabled: bool,

    /// Last completed sync, successful or not
    pub last_synced_at: Option<DateTime<Utc>>,

    /// Seconds between scheduled syncs
    pub sync_interval_secs: u32,

    /// When the integration was created
    pub created_at: DateTime<Utc>,
}

impl Integration {
    /// Create a new integration for a (property, platform) pair
    pub fn new(id: i64, property_id: i64, platform: impl Into<String>) -> Self {
        Self {
            id,
            property_id,
            platform: platform.into(),
            remote_account_id: None,
            remote_listing_id: None,
            access_token_enc: None,
            refresh_token_enc: None,
            token_expires_at: None,
            scope: None,
            markup: Markup::default(),
            is_active: true,
            is_enabled: true,
            last_synced_at: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            created_at: Utc::now(),
        }
    }

    /// Set remote identifiers
    pub fn with_remote_ids(
        mut self,
        account_id: impl Into<String>,
        listing_id: impl Into<String>,
    ) -> Self {
        self.remote_account_id = Some(account_id.into());
        self.remote_listing_id = Some(listing_id.into());
        self
    }

    /// Set the markup
    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = markup;
        self
    }

    /// Whether the granted scope contains a capability token
    pub fn has_scope(&self, capability: &str) -> bool {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().any(|part| part == capability))
            .unwrap_or(false)
    }

    /// Effective interval between syncs, never below one second
    pub fn sync_interval_secs(&self) -> u32 {
        self.sync_interval_secs.max(1)
    }
}

/// Queue row scheduling an integration's periodic sync
///
/// Perpetually rescheduled while the integration is active; `next_sync_at`
/// is always pushed into the future after each attempt, which is what rate
/// limits the sync frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Queue row id
    pub id: i64,

    /// Integration to sync
    pub integration_id: i64,

    /// 'pending' or 'processing'
    pub status: String,

    /// Earliest time this item may be claimed again
    pub next_sync_at: DateTime<Utc>,
}

/// Append-only audit record of a sync action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    /// Log row id (0 before insertion)
    pub id: i64,

    /// Integration the action belongs to
    pub integration_id: i64,

    /// Operation name (e.g. "push_prices", "token_refresh")
    pub action: String,

    /// 'success' or 'error'
    pub status: String,

    /// Structured detail: error message, status code, vendor body
    pub detail: Option<String>,

    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

impl SyncLog {
    /// Create a success entry
    pub fn success(integration_id: i64, action: impl Into<String>) -> Self {
        Self {
            id: 0,
            integration_id,
            action: action.into(),
            status: "success".to_string(),
            detail: None,
            created_at: Utc::now(),
        }
    }

    /// Create an error entry with detail
    pub fn error(
        integration_id: i64,
        action: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            integration_id,
            action: action.into(),
            status: "error".to_string(),
            detail: Some(detail.into()),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Percentage markup multiplies
    #[test]
    fn test_markup_percentage() {
        assert_eq!(Markup::Percentage(20.0).apply(1000), 1200);
        assert_eq!(Markup::Percentage(0.0).apply(1000), 1000);
        assert_eq!(Markup::Percentage(50.0).apply(100), 150);
    }

    // Test 2: Fixed markup adds (negative values reduce the price)
    #[test]
    fn test_markup_fixed() {
        assert_eq!(Markup::Fixed(-200.0).apply(1000), 800);
        assert_eq!(Markup::Fixed(300.0).apply(1000), 1300);
    }

    // Test 3: Computed price is floored at 1
    #[test]
    fn test_markup_floors_at_one() {
        assert_eq!(Markup::Fixed(-2000.0).apply(1000), 1);
        assert_eq!(Markup::Percentage(-100.0).apply(500), 1);
        assert_eq!(Markup::Fixed(-1000.0).apply(1000), 1);
    }

    // Test 4: Markup round-trips through its stored columns
    #[test]
    fn test_markup_from_parts() {
        let m = Markup::from_parts("fixed", -200.0);
        assert_eq!(m, Markup::Fixed(-200.0));
        assert_eq!(m.kind(), "fixed");
        assert_eq!(m.value(), -200.0);

        let m = Markup::from_parts("percentage", 20.0);
        assert_eq!(m, Markup::Percentage(20.0));
        assert_eq!(m.kind(), "percentage");

        // Unknown type falls back to percentage
        let m = Markup::from_parts("other", 5.0);
        assert_eq!(m, Markup::Percentage(5.0));
    }

    // Test 5: Scope check splits on whitespace
    #[test]
    fn test_integration_has_scope() {
        let mut integration = Integration::new(1, 10, "marketplace");
        assert!(!integration.has_scope("messages"));

        integration.scope = Some("bookings prices messages".to_string());
        assert!(integration.has_scope("messages"));
        assert!(integration.has_scope("bookings"));
        assert!(!integration.has_scope("mess"));
    }

    // Test 6: New integration defaults
    #[test]
    fn test_integration_new_defaults() {
        let integration = Integration::new(1, 10, "marketplace")
            .with_remote_ids("12345", "987654")
            .with_markup(Markup::Percentage(15.0));

        assert!(integration.is_active);
        assert!(integration.is_enabled);
        assert_eq!(integration.sync_interval_secs(), DEFAULT_SYNC_INTERVAL_SECS);
        assert_eq!(integration.remote_account_id.as_deref(), Some("12345"));
        assert_eq!(integration.remote_listing_id.as_deref(), Some("987654"));
        assert_eq!(integration.markup, Markup::Percentage(15.0));
    }

    // Test 7: Sync interval never returns zero
    #[test]
    fn test_sync_interval_floor() {
        let mut integration = Integration::new(1, 10, "marketplace");
        integration.sync_interval_secs = 0;
        assert_eq!(integration.sync_interval_secs(), 1);
    }

    // Test 8: SyncLog constructors
    #[test]
    fn test_sync_log_constructors() {
        let ok = SyncLog::success(7, "push_prices");
        assert_eq!(ok.status, "success");
        assert_eq!(ok.action, "push_prices");
        assert!(ok.detail.is_none());

        let err = SyncLog::error(7, "pull_bookings", "HTTP 500");
        assert_eq!(err.status, "error");
        assert_eq!(err.detail.as_deref(), Some("HTTP 500"));
    }
}
