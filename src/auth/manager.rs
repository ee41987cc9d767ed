//! Token manager
//!
//! Keeps a valid access token available per integration: serves from the
//! in-process cache while the token is comfortably inside its lifetime,
//! refreshes proactively once expiry is near, and persists every new token
//! set so other instances and the next cold start see it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::cache::{CachedToken, TokenCache};
use super::crypto::TokenCipher;
use crate::database::Database;
use crate::error::AuthError;
use crate::marketplace::{MarketplaceClient, TokenGrant};
use crate::models::SyncLog;

/// A token this close to expiry is treated as expired, so a refresh happens
/// before a request can race expiry mid-flight
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// Token manager for marketplace integrations
pub struct TokenManager<D: Database> {
    db: Arc<D>,
    client: Arc<MarketplaceClient>,
    cipher: Arc<TokenCipher>,
    cache: Arc<dyn TokenCache>,
}

impl<D: Database> TokenManager<D> {
    /// Create a new token manager
    pub fn new(
        db: Arc<D>,
        client: Arc<MarketplaceClient>,
        cipher: Arc<TokenCipher>,
        cache: Arc<dyn TokenCache>,
    ) -> Self {
        Self {
            db,
            client,
            cipher,
            cache,
        }
    }

    /// Get a valid access token for an integration
    ///
    /// Returns `AuthError::ReauthRequired` when the stored credentials can
    /// no longer be refreshed. Callers must not retry that error within the
    /// sync cycle; it requires user action.
    pub async fn get_valid_token(&self, integration_id: i64) -> Result<String, AuthError> {
        if let Some(cached) = self.cache.get(integration_id) {
            if !is_near_expiry(cached.expires_at) {
                return Ok(cached.access_token);
            }
        }

        let integration = self
            .db
            .get_integration(integration_id)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?
            .ok_or_else(|| AuthError::Storage("Integration not found".to_string()))?;

        // A cold start may find a still-valid token in the store
        if let (Some(access_enc), Some(expires_at)) =
            (integration.access_token_enc.as_deref(), integration.token_expires_at)
        {
            if !is_near_expiry(expires_at) {
                let access_token = self.cipher.decrypt(access_enc)?;
                self.cache.set(
                    integration_id,
                    CachedToken {
                        access_token: access_token.clone(),
                        expires_at,
                    },
                );
                return Ok(access_token);
            }
        }

        let Some(refresh_enc) = integration.refresh_token_enc.as_deref() else {
            return self
                .fail(integration_id, "No refresh token stored".to_string())
                .await;
        };
        let refresh_token = self.cipher.decrypt(refresh_enc)?;

        let grant = match self.client.refresh_token(&refresh_token).await {
            Ok(grant) => grant,
            Err(refresh_err) => {
                // The vendor accepts one alternate grant; try it before
                // declaring the integration dead
                debug!(
                    integration_id,
                    error = %refresh_err,
                    "Refresh grant rejected, attempting alternate grant"
                );
                match self.client.client_credentials().await {
                    Ok(grant) => grant,
                    Err(alt_err) => {
                        return self
                            .fail(
                                integration_id,
                                format!("refresh: {}; alternate: {}", refresh_err, alt_err),
                            )
                            .await;
                    }
                }
            }
        };

        self.persist_grant(integration_id, &grant).await?;
        Ok(grant.access_token)
    }

    /// Drop the cached token for an integration, forcing the next
    /// `get_valid_token` to consult the store
    pub fn invalidate(&self, integration_id: i64) {
        self.cache.invalidate(integration_id);
    }

    /// Persist a token grant (store first, then cache) and return the expiry
    async fn persist_grant(
        &self,
        integration_id: i64,
        grant: &TokenGrant,
    ) -> Result<(), AuthError> {
        let access_enc = self.cipher.encrypt(&grant.access_token)?;
        let refresh_enc = match grant.refresh_token.as_deref() {
            Some(refresh) => Some(self.cipher.encrypt(refresh)?),
            None => None,
        };
        let expires_at = Utc::now() + Duration::seconds(grant.expires_in);

        self.db
            .update_integration_tokens(
                integration_id,
                &access_enc,
                refresh_enc,
                expires_at,
                grant.scope.clone(),
            )
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        self.cache.set(
            integration_id,
            CachedToken {
                access_token: grant.access_token.clone(),
                expires_at,
            },
        );

        Ok(())
    }

    async fn fail(&self, integration_id: i64, detail: String) -> Result<String, AuthError> {
        warn!(integration_id, "Token refresh failed, reauthorization required");
        let log = SyncLog::error(integration_id, "token_refresh", detail);
        let _ = self.db.insert_sync_log(&log).await;
        // Revoked integrations are soft-disabled, never deleted; a new OAuth
        // round reactivates the same row
        let _ = self.db.set_integration_active(integration_id, false).await;
        self.cache.invalidate(integration_id);
        Err(AuthError::ReauthRequired)
    }
}

fn is_near_expiry(expires_at: chrono::DateTime<Utc>) -> bool {
    expires_at - Utc::now() <= Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS)
}
