//! Database layer for hostsync
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::DbError;
use crate::models::{
    Booking, Integration, NewRemoteBooking, PropertyDefaults, PropertyRate, SyncLog,
    SyncQueueItem, UpsertOutcome,
};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the sync engine.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Integration operations
    // =========================================================================

    /// Get an integration by id
    async fn get_integration(&self, id: i64) -> Result<Option<Integration>, DbError>;

    /// Find the active integration for a (property, platform) pair
    async fn find_active_integration(
        &self,
        property_id: i64,
        platform: &str,
    ) -> Result<Option<Integration>, DbError>;

    /// List active integrations owned by a user on a platform
    async fn list_active_integrations_for_owner(
        &self,
        owner_id: i64,
        platform: &str,
    ) -> Result<Vec<Integration>, DbError>;

    /// Find an integration by its remote listing identifier
    async fn find_integration_by_listing(
        &self,
        platform: &str,
        remote_listing_id: &str,
    ) -> Result<Option<Integration>, DbError>;

    /// Persist a new token set for an integration
    async fn update_integration_tokens(
        &self,
        id: i64,
        access_token_enc: &str,
        refresh_token_enc: Option<String>,
        expires_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Result<(), DbError>;

    /// Soft-enable or soft-disable an integration
    async fn set_integration_active(&self, id: i64, is_active: bool) -> Result<(), DbError>;

    /// Record the time of the last completed sync
    async fn touch_integration_synced(&self, id: i64, at: DateTime<Utc>) -> Result<(), DbError>;

    // =========================================================================
    // Sync queue operations
    // =========================================================================

    /// Create the queue row for an integration if it does not exist
    async fn ensure_queue_item(
        &self,
        integration_id: i64,
        next_sync_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Claim up to `limit` due queue items, earliest next-run first
    ///
    /// Claimed items are marked 'processing' so overlapping pollers skip them.
    async fn claim_due_queue_items(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SyncQueueItem>, DbError>;

    /// Return a queue item to 'pending' with a new next-run time
    async fn reschedule_queue_item(
        &self,
        id: i64,
        next_sync_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Make an integration's queue item due at `at`, creating it if absent
    ///
    /// This is the re-trigger hook used by the rest of the product.
    async fn mark_queue_due(&self, integration_id: i64, at: DateTime<Utc>) -> Result<(), DbError>;

    // =========================================================================
    // Booking operations
    // =========================================================================

    /// List all bookings for a property
    async fn list_bookings(&self, property_id: i64) -> Result<Vec<Booking>, DbError>;

    /// Upsert a marketplace booking by its remote id
    ///
    /// Idempotent: re-applying an identical booking reports `Unchanged` and
    /// writes nothing.
    async fn upsert_remote_booking(
        &self,
        booking: &NewRemoteBooking,
    ) -> Result<UpsertOutcome, DbError>;

    /// Soft-cancel a booking by its remote id; returns false if unknown
    async fn cancel_booking_by_remote_id(&self, remote_id: &str) -> Result<bool, DbError>;

    // =========================================================================
    // Property and rate operations (read-only for the sync engine)
    // =========================================================================

    /// Get listing-level defaults for a property
    async fn get_property_defaults(
        &self,
        property_id: i64,
    ) -> Result<Option<PropertyDefaults>, DbError>;

    /// List per-date rate overrides in `[from, to)`
    async fn list_property_rates(
        &self,
        property_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PropertyRate>, DbError>;

    // =========================================================================
    // Sync log operations
    // =========================================================================

    /// Append a sync log entry
    async fn insert_sync_log(&self, log: &SyncLog) -> Result<(), DbError>;

    /// List recent sync log entries for an integration, newest first
    async fn list_sync_logs(
        &self,
        integration_id: i64,
        limit: u32,
    ) -> Result<Vec<SyncLog>, DbError>;

    // =========================================================================
    // Chat operations (webhook ingestion)
    // =========================================================================

    /// Upsert a chat by its remote id
    async fn upsert_chat(
        &self,
        platform: &str,
        remote_chat_id: &str,
        detail: &str,
    ) -> Result<UpsertOutcome, DbError>;

    /// Insert a chat message unless its remote id was already seen
    async fn insert_message_if_new(
        &self,
        platform: &str,
        remote_message_id: &str,
        remote_chat_id: &str,
        body: &str,
    ) -> Result<bool, DbError>;
}
