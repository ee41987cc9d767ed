//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};

use hostsync::auth::{InMemoryTokenCache, TokenCipher, TokenManager};
use hostsync::database::SqliteDatabase;
use hostsync::marketplace::{client::ClientConfig, MarketplaceClient, RetryPolicy};
use hostsync::sync::SyncEngine;

/// Key every test cipher uses, so seeded envelopes decrypt
pub const TEST_KEY: [u8; 32] = [7u8; 32];

pub fn test_cipher() -> TokenCipher {
    TokenCipher::new(&TEST_KEY)
}

/// In-memory database seeded with property 10 (owner 100) and integration 7
/// holding valid encrypted tokens for listing 987654
pub async fn seeded_db() -> Arc<SqliteDatabase> {
    let db = SqliteDatabase::in_memory().await.unwrap();

    let cipher = test_cipher();
    let access = cipher.encrypt("at-1").unwrap();
    let refresh = cipher.encrypt("rt-1").unwrap();
    let expires = (Utc::now() + Duration::hours(1)).to_rfc3339();

    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO properties (id, owner_id, base_price, min_stay)
                 VALUES (10, 100, 1000, 2)",
                [],
            )?;
            conn.execute(
                "INSERT INTO integrations
                    (id, property_id, platform, remote_account_id, remote_listing_id,
                     access_token_enc, refresh_token_enc, token_expires_at,
                     markup_type, markup_value)
                 VALUES (7, 10, 'marketplace', '12345', '987654', ?1, ?2, ?3,
                     'percentage', 0)",
                rusqlite::params![access, refresh, expires],
            )?;
            Ok(())
        })
        .await
        .unwrap();

    Arc::new(db)
}

/// Marketplace client pointed at a mock server, with instant retries
pub fn test_client(base_url: &str) -> Arc<MarketplaceClient> {
    Arc::new(MarketplaceClient::with_retry(
        ClientConfig {
            base_url: base_url.to_string(),
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            request_timeout_secs: 5,
        },
        RetryPolicy {
            max_retries: 0,
            base_delay: std::time::Duration::from_millis(0),
            multiplier: 2.0,
            respect_retry_after: false,
        },
    ))
}

/// Full engine wired to the seeded database and a mock marketplace
pub fn engine_for(db: &Arc<SqliteDatabase>, base_url: &str) -> Arc<SyncEngine<SqliteDatabase>> {
    let client = test_client(base_url);
    let tokens = Arc::new(TokenManager::new(
        Arc::clone(db),
        Arc::clone(&client),
        Arc::new(test_cipher()),
        Arc::new(InMemoryTokenCache::new()),
    ));
    Arc::new(SyncEngine::new(Arc::clone(db), client, tokens))
}
