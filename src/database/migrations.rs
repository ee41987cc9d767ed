//! Database migrations for hostsync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Marketplace integrations, one per (property, platform) pair
CREATE TABLE IF NOT EXISTS integrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id INTEGER NOT NULL,
    platform TEXT NOT NULL,
    remote_account_id TEXT,
    remote_listing_id TEXT,
    access_token_enc TEXT,
    refresh_token_enc TEXT,
    token_expires_at TEXT,
    scope TEXT,
    markup_type TEXT NOT NULL DEFAULT 'percentage',
    markup_value REAL NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    last_synced_at TEXT,
    sync_interval_secs INTEGER NOT NULL DEFAULT 10,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Exactly one active integration per (property, platform)
CREATE UNIQUE INDEX IF NOT EXISTS idx_integrations_active
    ON integrations(property_id, platform) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS idx_integrations_listing
    ON integrations(platform, remote_listing_id);

-- Sync queue, one row per integration needing periodic sync
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    integration_id INTEGER NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'pending',
    next_sync_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_due ON sync_queue(status, next_sync_at);

-- Bookings, shared with the rest of the product
CREATE TABLE IF NOT EXISTS bookings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id INTEGER NOT NULL,
    remote_id TEXT UNIQUE,
    check_in TEXT NOT NULL,
    check_out TEXT NOT NULL,
    guest_name TEXT NOT NULL,
    guest_phone TEXT,
    guest_email TEXT,
    status TEXT NOT NULL DEFAULT 'confirmed',
    source TEXT NOT NULL DEFAULT 'manual',
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_bookings_property ON bookings(property_id, check_in);

-- Listing-level defaults, owned by the broader application
CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    base_price INTEGER NOT NULL DEFAULT 0,
    min_stay INTEGER NOT NULL DEFAULT 1
);

-- Per-date price/min-stay overrides, read-only for the sync engine
CREATE TABLE IF NOT EXISTS property_rates (
    property_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    nightly_price INTEGER NOT NULL,
    min_stay INTEGER NOT NULL DEFAULT 1,
    UNIQUE(property_id, date)
);

-- Append-only sync audit trail
CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    integration_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    detail TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_sync_logs_integration
    ON sync_logs(integration_id, created_at DESC);

-- Marketplace chats, written only by webhook ingestion
CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    remote_chat_id TEXT NOT NULL UNIQUE,
    detail TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Marketplace chat messages, deduplicated by remote message id
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    remote_message_id TEXT NOT NULL UNIQUE,
    remote_chat_id TEXT NOT NULL,
    body TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_create_schema_valid_sql() {
        let conn = Connection::open_in_memory().unwrap();

        conn.execute_batch(CREATE_SCHEMA).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert!(tables.contains(&"integrations".to_string()));
        assert!(tables.contains(&"sync_queue".to_string()));
        assert!(tables.contains(&"bookings".to_string()));
        assert!(tables.contains(&"properties".to_string()));
        assert!(tables.contains(&"property_rates".to_string()));
        assert!(tables.contains(&"sync_logs".to_string()));
        assert!(tables.contains(&"chats".to_string()));
        assert!(tables.contains(&"chat_messages".to_string()));
    }

    #[test]
    fn test_single_active_integration_per_property_platform() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO integrations (property_id, platform) VALUES (1, 'marketplace')",
            [],
        )
        .unwrap();

        // A second active integration for the same pair violates the index
        let result = conn.execute(
            "INSERT INTO integrations (property_id, platform) VALUES (1, 'marketplace')",
            [],
        );
        assert!(result.is_err());

        // An inactive duplicate is allowed (soft-disabled history)
        conn.execute(
            "INSERT INTO integrations (property_id, platform, is_active) VALUES (1, 'marketplace', 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_bookings_remote_id_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO bookings (property_id, remote_id, check_in, check_out, guest_name)
             VALUES (1, 'r-100', '2025-11-17', '2025-11-20', 'Guest')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO bookings (property_id, remote_id, check_in, check_out, guest_name)
             VALUES (1, 'r-100', '2025-12-01', '2025-12-05', 'Other')",
            [],
        );
        assert!(result.is_err());

        // NULL remote ids (local bookings) do not collide
        conn.execute(
            "INSERT INTO bookings (property_id, check_in, check_out, guest_name)
             VALUES (1, '2025-12-01', '2025-12-05', 'Local A')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bookings (property_id, check_in, check_out, guest_name)
             VALUES (1, '2025-12-06', '2025-12-08', 'Local B')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_queue_one_row_per_integration() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO sync_queue (integration_id, next_sync_at) VALUES (1, '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO sync_queue (integration_id, next_sync_at) VALUES (1, '2025-01-02T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_migration_version() {
        assert_eq!(migration_version(), 1);
    }
}
