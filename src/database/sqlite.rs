//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{
    Booking, BookingStatus, Integration, Markup, NewRemoteBooking, PropertyDefaults, PropertyRate,
    SyncLog, SyncQueueItem, UpsertOutcome,
};

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for an in-memory database or a file path for
    /// persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }

    /// Access the underlying connection (test seeding)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

const INTEGRATION_COLUMNS: &str = "id, property_id, platform, remote_account_id, \
     remote_listing_id, access_token_enc, refresh_token_enc, token_expires_at, scope, \
     markup_type, markup_value, is_active, is_enabled, last_synced_at, sync_interval_secs, \
     created_at";

fn integration_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Integration> {
    let markup_type: String = row.get(9)?;
    let markup_value: f64 = row.get(10)?;

    Ok(Integration {
        id: row.get(0)?,
        property_id: row.get(1)?,
        platform: row.get(2)?,
        remote_account_id: row.get(3)?,
        remote_listing_id: row.get(4)?,
        access_token_enc: row.get(5)?,
        refresh_token_enc: row.get(6)?,
        token_expires_at: parse_datetime(row.get::<_, Option<String>>(7)?),
        scope: row.get(8)?,
        markup: Markup::from_parts(&markup_type, markup_value),
        is_active: row.get::<_, i64>(11)? != 0,
        is_enabled: row.get::<_, i64>(12)? != 0,
        last_synced_at: parse_datetime(row.get::<_, Option<String>>(13)?),
        sync_interval_secs: row.get::<_, i64>(14)? as u32,
        created_at: parse_datetime(row.get::<_, Option<String>>(15)?).unwrap_or_else(Utc::now),
    })
}

fn booking_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Booking> {
    let check_in: String = row.get(3)?;
    let check_out: String = row.get(4)?;
    let status: String = row.get(8)?;

    Ok(Booking {
        id: row.get(0)?,
        property_id: row.get(1)?,
        remote_id: row.get(2)?,
        check_in: parse_date(&check_in, 3)?,
        check_out: parse_date(&check_out, 4)?,
        guest_name: row.get(5)?,
        guest_phone: row.get(6)?,
        guest_email: row.get(7)?,
        status: BookingStatus::parse(&status).unwrap_or(BookingStatus::Pending),
        source: row.get(9)?,
        created_at: parse_datetime(row.get::<_, Option<String>>(10)?).unwrap_or_else(Utc::now),
        updated_at: parse_datetime(row.get::<_, Option<String>>(11)?).unwrap_or_else(Utc::now),
    })
}

const BOOKING_COLUMNS: &str = "id, property_id, remote_id, check_in, check_out, guest_name, \
     guest_phone, guest_email, status, source, created_at, updated_at";

/// Parse a stored timestamp; tolerates RFC 3339 and SQLite CURRENT_TIMESTAMP
fn parse_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_date(value: &str, column: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Integration operations
    // =========================================================================

    async fn get_integration(&self, id: i64) -> Result<Option<Integration>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM integrations WHERE id = ?1",
                    INTEGRATION_COLUMNS
                );
                let result = conn
                    .query_row(&sql, [id], integration_from_row)
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_active_integration(
        &self,
        property_id: i64,
        platform: &str,
    ) -> Result<Option<Integration>, DbError> {
        let platform = platform.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM integrations
                     WHERE property_id = ?1 AND platform = ?2 AND is_active = 1",
                    INTEGRATION_COLUMNS
                );
                let result = conn
                    .query_row(&sql, rusqlite::params![property_id, platform], |row| {
                        integration_from_row(row)
                    })
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_active_integrations_for_owner(
        &self,
        owner_id: i64,
        platform: &str,
    ) -> Result<Vec<Integration>, DbError> {
        let platform = platform.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM integrations
                     WHERE platform = ?1 AND is_active = 1
                       AND property_id IN (SELECT id FROM properties WHERE owner_id = ?2)
                     ORDER BY id",
                    INTEGRATION_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let integrations = stmt
                    .query_map(rusqlite::params![platform, owner_id], |row| {
                        integration_from_row(row)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(integrations)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_integration_by_listing(
        &self,
        platform: &str,
        remote_listing_id: &str,
    ) -> Result<Option<Integration>, DbError> {
        let platform = platform.to_string();
        let remote_listing_id = remote_listing_id.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM integrations
                     WHERE platform = ?1 AND remote_listing_id = ?2 AND is_active = 1",
                    INTEGRATION_COLUMNS
                );
                let result = conn
                    .query_row(
                        &sql,
                        rusqlite::params![platform, remote_listing_id],
                        integration_from_row,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_integration_tokens(
        &self,
        id: i64,
        access_token_enc: &str,
        refresh_token_enc: Option<String>,
        expires_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Result<(), DbError> {
        let access = access_token_enc.to_string();
        let refresh = refresh_token_enc;
        let expires = expires_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                // A refresh that returns no new refresh token keeps the old one
                conn.execute(
                    "UPDATE integrations SET
                        access_token_enc = ?2,
                        refresh_token_enc = COALESCE(?3, refresh_token_enc),
                        token_expires_at = ?4,
                        scope = COALESCE(?5, scope),
                        is_active = 1
                     WHERE id = ?1",
                    rusqlite::params![id, access, refresh, expires, scope],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn set_integration_active(&self, id: i64, is_active: bool) -> Result<(), DbError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE integrations SET is_active = ?2 WHERE id = ?1",
                    rusqlite::params![id, is_active as i64],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn touch_integration_synced(&self, id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        let at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE integrations SET last_synced_at = ?2 WHERE id = ?1",
                    rusqlite::params![id, at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Sync queue operations
    // =========================================================================

    async fn ensure_queue_item(
        &self,
        integration_id: i64,
        next_sync_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let next = next_sync_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_queue (integration_id, status, next_sync_at)
                     VALUES (?1, 'pending', ?2)
                     ON CONFLICT(integration_id) DO NOTHING",
                    rusqlite::params![integration_id, next],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn claim_due_queue_items(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SyncQueueItem>, DbError> {
        let now_str = now.to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let items = {
                    let mut stmt = tx.prepare(
                        "SELECT id, integration_id, status, next_sync_at FROM sync_queue
                         WHERE status = 'pending' AND next_sync_at <= ?1
                         ORDER BY next_sync_at ASC
                         LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![now_str, limit], |row| {
                            let next: Option<String> = row.get(3)?;
                            Ok(SyncQueueItem {
                                id: row.get(0)?,
                                integration_id: row.get(1)?,
                                status: "processing".to_string(),
                                next_sync_at: parse_datetime(next).unwrap_or_else(Utc::now),
                            })
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };

                for item in &items {
                    tx.execute(
                        "UPDATE sync_queue SET status = 'processing' WHERE id = ?1",
                        [item.id],
                    )?;
                }

                tx.commit()?;
                Ok(items)
            })
            .await
            .map_err(Into::into)
    }

    async fn reschedule_queue_item(
        &self,
        id: i64,
        next_sync_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let next = next_sync_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sync_queue SET status = 'pending', next_sync_at = ?2 WHERE id = ?1",
                    rusqlite::params![id, next],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn mark_queue_due(&self, integration_id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        let at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_queue (integration_id, status, next_sync_at)
                     VALUES (?1, 'pending', ?2)
                     ON CONFLICT(integration_id)
                     DO UPDATE SET status = 'pending', next_sync_at = excluded.next_sync_at",
                    rusqlite::params![integration_id, at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Booking operations
    // =========================================================================

    async fn list_bookings(&self, property_id: i64) -> Result<Vec<Booking>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM bookings WHERE property_id = ?1 ORDER BY check_in",
                    BOOKING_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let bookings = stmt
                    .query_map([property_id], booking_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(bookings)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_remote_booking(
        &self,
        booking: &NewRemoteBooking,
    ) -> Result<UpsertOutcome, DbError> {
        let b = booking.clone();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM bookings WHERE remote_id = ?1",
                    BOOKING_COLUMNS
                );
                let existing = conn
                    .query_row(&sql, [&b.remote_id], booking_from_row)
                    .optional()?;

                let now = Utc::now().to_rfc3339();

                match existing {
                    None => {
                        conn.execute(
                            "INSERT INTO bookings
                                (property_id, remote_id, check_in, check_out, guest_name,
                                 guest_phone, guest_email, status, source, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                            rusqlite::params![
                                b.property_id,
                                b.remote_id,
                                b.check_in.to_string(),
                                b.check_out.to_string(),
                                b.guest_name,
                                b.guest_phone,
                                b.guest_email,
                                b.status.as_str(),
                                b.source,
                                now,
                            ],
                        )?;
                        Ok(UpsertOutcome::Created)
                    }
                    Some(row) => {
                        let unchanged = row.check_in == b.check_in
                            && row.check_out == b.check_out
                            && row.guest_name == b.guest_name
                            && row.guest_phone == b.guest_phone
                            && row.guest_email == b.guest_email
                            && row.status == b.status;

                        if unchanged {
                            return Ok(UpsertOutcome::Unchanged);
                        }

                        conn.execute(
                            "UPDATE bookings SET
                                check_in = ?2, check_out = ?3, guest_name = ?4,
                                guest_phone = ?5, guest_email = ?6, status = ?7,
                                updated_at = ?8
                             WHERE remote_id = ?1",
                            rusqlite::params![
                                b.remote_id,
                                b.check_in.to_string(),
                                b.check_out.to_string(),
                                b.guest_name,
                                b.guest_phone,
                                b.guest_email,
                                b.status.as_str(),
                                now,
                            ],
                        )?;
                        Ok(UpsertOutcome::Updated)
                    }
                }
            })
            .await
            .map_err(Into::into)
    }

    async fn cancel_booking_by_remote_id(&self, remote_id: &str) -> Result<bool, DbError> {
        let remote_id = remote_id.to_string();

        self.conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let changed = conn.execute(
                    "UPDATE bookings SET status = 'cancelled', updated_at = ?2
                     WHERE remote_id = ?1 AND status != 'cancelled'",
                    rusqlite::params![remote_id, now],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Property and rate operations
    // =========================================================================

    async fn get_property_defaults(
        &self,
        property_id: i64,
    ) -> Result<Option<PropertyDefaults>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        "SELECT id, owner_id, base_price, min_stay FROM properties WHERE id = ?1",
                        [property_id],
                        |row| {
                            Ok(PropertyDefaults {
                                property_id: row.get(0)?,
                                owner_id: row.get(1)?,
                                base_price: row.get(2)?,
                                min_stay: row.get::<_, i64>(3)? as u32,
                            })
                        },
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_property_rates(
        &self,
        property_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PropertyRate>, DbError> {
        let from = from.to_string();
        let to = to.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT property_id, date, nightly_price, min_stay FROM property_rates
                     WHERE property_id = ?1 AND date >= ?2 AND date < ?3
                     ORDER BY date",
                )?;
                let rates = stmt
                    .query_map(rusqlite::params![property_id, from, to], |row| {
                        let date: String = row.get(1)?;
                        Ok(PropertyRate {
                            property_id: row.get(0)?,
                            date: parse_date(&date, 1)?,
                            nightly_price: row.get(2)?,
                            min_stay: row.get::<_, i64>(3)? as u32,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rates)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Sync log operations
    // =========================================================================

    async fn insert_sync_log(&self, log: &SyncLog) -> Result<(), DbError> {
        let integration_id = log.integration_id;
        let action = log.action.clone();
        let status = log.status.clone();
        let detail = log.detail.clone();
        let created_at = log.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_logs (integration_id, action, status, detail, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![integration_id, action, status, detail, created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn list_sync_logs(
        &self,
        integration_id: i64,
        limit: u32,
    ) -> Result<Vec<SyncLog>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, integration_id, action, status, detail, created_at
                     FROM sync_logs
                     WHERE integration_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let logs = stmt
                    .query_map(rusqlite::params![integration_id, limit], |row| {
                        Ok(SyncLog {
                            id: row.get(0)?,
                            integration_id: row.get(1)?,
                            action: row.get(2)?,
                            status: row.get(3)?,
                            detail: row.get(4)?,
                            created_at: parse_datetime(row.get::<_, Option<String>>(5)?)
                                .unwrap_or_else(Utc::now),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(logs)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Chat operations
    // =========================================================================

    async fn upsert_chat(
        &self,
        platform: &str,
        remote_chat_id: &str,
        detail: &str,
    ) -> Result<UpsertOutcome, DbError> {
        let platform = platform.to_string();
        let remote_chat_id = remote_chat_id.to_string();
        let detail = detail.to_string();

        self.conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM chats WHERE remote_chat_id = ?1",
                        [&remote_chat_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match existing {
                    None => {
                        conn.execute(
                            "INSERT INTO chats (platform, remote_chat_id, detail, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?4)",
                            rusqlite::params![platform, remote_chat_id, detail, now],
                        )?;
                        Ok(UpsertOutcome::Created)
                    }
                    Some(id) => {
                        conn.execute(
                            "UPDATE chats SET detail = ?2, updated_at = ?3 WHERE id = ?1",
                            rusqlite::params![id, detail, now],
                        )?;
                        Ok(UpsertOutcome::Updated)
                    }
                }
            })
            .await
            .map_err(Into::into)
    }

    async fn insert_message_if_new(
        &self,
        platform: &str,
        remote_message_id: &str,
        remote_chat_id: &str,
        body: &str,
    ) -> Result<bool, DbError> {
        let platform = platform.to_string();
        let remote_message_id = remote_message_id.to_string();
        let remote_chat_id = remote_chat_id.to_string();
        let body = body.to_string();

        self.conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO chat_messages
                        (platform, remote_message_id, remote_chat_id, body)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![platform, remote_message_id, remote_chat_id, body],
                )?;
                Ok(inserted > 0)
            })
            .await
            .map_err(Into::into)
    }
}
