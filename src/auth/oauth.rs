//! OAuth callback handling
//!
//! Exchanges an authorization code for tokens and attaches them to the right
//! integration. The `state` parameter is an opaque app-encoded payload
//! carrying routing information: which integration or property started the
//! flow and whether it was a plain connect or a scope extension.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::crypto::TokenCipher;
use crate::database::Database;
use crate::error::{CallbackError, DbError, SyncError};
use crate::marketplace::MarketplaceClient;
use crate::models::Integration;

/// Capability a scope-extension flow must end up granting
pub const EXTEND_SCOPE_CAPABILITY: &str = "messages";

/// Decoded routing payload from the `state` parameter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackState {
    /// Integration that initiated the flow, if known
    #[serde(default)]
    pub integration_id: Option<i64>,

    /// Property the integration must belong to
    #[serde(default)]
    pub property_id: Option<i64>,

    /// User who initiated the flow
    #[serde(default)]
    pub user_id: Option<i64>,

    /// Target platform; falls back to the configured default
    #[serde(default)]
    pub platform: Option<String>,

    /// Flow purpose: "connect" (default) or "extend_scope"
    #[serde(default)]
    pub purpose: Option<String>,
}

impl CallbackState {
    /// Whether this flow was started to add a capability to the scope
    pub fn is_scope_extension(&self) -> bool {
        self.purpose.as_deref() == Some("extend_scope")
    }
}

/// Result of a successful callback
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    /// Integration the tokens were attached to
    pub integration_id: i64,
    /// Scope granted by the marketplace
    pub scope: Option<String>,
}

/// OAuth callback handler
pub struct OauthHandler<D: Database> {
    db: Arc<D>,
    client: Arc<MarketplaceClient>,
    cipher: Arc<TokenCipher>,
    default_platform: String,
}

impl<D: Database> OauthHandler<D> {
    /// Create a new callback handler
    pub fn new(
        db: Arc<D>,
        client: Arc<MarketplaceClient>,
        cipher: Arc<TokenCipher>,
        default_platform: impl Into<String>,
    ) -> Self {
        Self {
            db,
            client,
            cipher,
            default_platform: default_platform.into(),
        }
    }

    /// Handle an OAuth callback
    ///
    /// Decodes state, exchanges the code, verifies scope for extension
    /// flows, resolves the target integration, persists the tokens and
    /// (re)activates the integration together with its queue item.
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<CallbackOutcome, CallbackError> {
        let state = decode_state(state)?;

        let grant = self
            .client
            .exchange_code(code, redirect_uri)
            .await
            .map_err(map_exchange_error)?;

        if state.is_scope_extension() {
            let granted = grant.scope.as_deref().unwrap_or("");
            if !granted
                .split_whitespace()
                .any(|capability| capability == EXTEND_SCOPE_CAPABILITY)
            {
                warn!(scope = granted, "Scope extension flow came back without the capability");
                return Err(CallbackError::ScopeMissing(
                    EXTEND_SCOPE_CAPABILITY.to_string(),
                ));
            }
        }

        let integration = self.resolve_integration(&state).await?;

        let access_enc = self
            .cipher
            .encrypt(&grant.access_token)
            .map_err(|e| CallbackError::Storage(e.to_string()))?;
        let refresh_enc = match grant.refresh_token.as_deref() {
            Some(refresh) => Some(
                self.cipher
                    .encrypt(refresh)
                    .map_err(|e| CallbackError::Storage(e.to_string()))?,
            ),
            None => None,
        };
        let expires_at = Utc::now() + Duration::seconds(grant.expires_in);

        self.db
            .update_integration_tokens(
                integration.id,
                &access_enc,
                refresh_enc,
                expires_at,
                grant.scope.clone(),
            )
            .await
            .map_err(storage_err)?;

        // An activated integration always has a schedulable queue row
        self.db
            .ensure_queue_item(integration.id, Utc::now())
            .await
            .map_err(storage_err)?;

        info!(
            integration_id = integration.id,
            property_id = integration.property_id,
            "OAuth callback completed"
        );

        Ok(CallbackOutcome {
            integration_id: integration.id,
            scope: grant.scope,
        })
    }

    /// Resolve which integration the tokens belong to
    ///
    /// Directly from state when it names one (verifying the caller owns the
    /// property it points to), otherwise by falling back to the requester's
    /// single active integration for the platform.
    async fn resolve_integration(
        &self,
        state: &CallbackState,
    ) -> Result<Integration, CallbackError> {
        if let Some(integration_id) = state.integration_id {
            let integration = self
                .db
                .get_integration(integration_id)
                .await
                .map_err(storage_err)?
                .ok_or(CallbackError::NoIntegration)?;

            if let Some(property_id) = state.property_id {
                if property_id != integration.property_id {
                    return Err(CallbackError::NoIntegration);
                }
            }

            if let Some(user_id) = state.user_id {
                let owns = self
                    .db
                    .get_property_defaults(integration.property_id)
                    .await
                    .map_err(storage_err)?
                    .map(|defaults| defaults.owner_id == user_id)
                    .unwrap_or(false);
                if !owns {
                    return Err(CallbackError::NoIntegration);
                }
            }

            return Ok(integration);
        }

        let platform = state
            .platform
            .clone()
            .unwrap_or_else(|| self.default_platform.clone());
        let user_id = state.user_id.ok_or(CallbackError::NoIntegration)?;

        let mut integrations = self
            .db
            .list_active_integrations_for_owner(user_id, &platform)
            .await
            .map_err(storage_err)?;

        // Only an unambiguous single integration can be used as fallback
        if integrations.len() == 1 {
            Ok(integrations.remove(0))
        } else {
            Err(CallbackError::NoIntegration)
        }
    }
}

/// Decode the opaque state payload
///
/// Two decode attempts: base64-wrapped JSON first, then plain JSON, so
/// either encoding produced by the app is tolerated.
fn decode_state(raw: &str) -> Result<CallbackState, CallbackError> {
    if let Ok(bytes) = STANDARD.decode(raw) {
        if let Ok(state) = serde_json::from_slice::<CallbackState>(&bytes) {
            return Ok(state);
        }
    }

    serde_json::from_str(raw).map_err(|_| CallbackError::InvalidState)
}

fn map_exchange_error(err: SyncError) -> CallbackError {
    match err {
        SyncError::InvalidData(msg) if msg.contains("redirect") => CallbackError::RedirectMismatch,
        SyncError::InvalidData(msg) => CallbackError::InvalidCode(msg),
        other => CallbackError::InvalidCode(other.to_string()),
    }
}

fn storage_err(err: DbError) -> CallbackError {
    CallbackError::Storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use crate::marketplace::{client::ClientConfig, RetryPolicy};
    use crate::models::PropertyDefaults;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handler_with(db: MockDatabase, server_url: &str) -> OauthHandler<MockDatabase> {
        let client = Arc::new(MarketplaceClient::with_retry(
            ClientConfig {
                base_url: server_url.to_string(),
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
        ));
        OauthHandler::new(
            Arc::new(db),
            client,
            Arc::new(TokenCipher::new(&[7u8; 32])),
            "marketplace",
        )
    }

    async fn mount_token_endpoint(server: &MockServer, scope: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "scope": scope
            })))
            .mount(server)
            .await;
    }

    fn owned_property(owner_id: i64) -> PropertyDefaults {
        PropertyDefaults {
            property_id: 10,
            owner_id,
            base_price: 1000,
            min_stay: 2,
        }
    }

    // Test 1: State decodes from base64-wrapped JSON
    #[test]
    fn test_decode_state_base64() {
        let raw = STANDARD.encode(r#"{"integration_id": 7, "purpose": "connect"}"#);
        let state = decode_state(&raw).unwrap();
        assert_eq!(state.integration_id, Some(7));
        assert!(!state.is_scope_extension());
    }

    // Test 2: State decodes from plain JSON
    #[test]
    fn test_decode_state_plain_json() {
        let state = decode_state(r#"{"property_id": 10, "user_id": 100}"#).unwrap();
        assert_eq!(state.property_id, Some(10));
        assert_eq!(state.user_id, Some(100));
    }

    // Test 3: Garbage state is InvalidState
    #[test]
    fn test_decode_state_invalid() {
        assert_eq!(
            decode_state("not json at all").unwrap_err(),
            CallbackError::InvalidState
        );
        // Valid base64 of non-JSON bytes also fails
        let garbage = STANDARD.encode("still not json");
        assert_eq!(
            decode_state(&garbage).unwrap_err(),
            CallbackError::InvalidState
        );
    }

    // Test 4: Happy path resolves the integration from state and persists
    #[tokio::test]
    async fn test_callback_happy_path() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings prices").await;

        let mut db = MockDatabase::new();
        db.expect_get_integration()
            .returning(|_| Ok(Some(Integration::new(7, 10, "marketplace"))));
        db.expect_get_property_defaults()
            .returning(|_| Ok(Some(owned_property(100))));
        db.expect_update_integration_tokens()
            .withf(|id, _, refresh, _, scope| {
                *id == 7 && refresh.is_some() && scope.as_deref() == Some("bookings prices")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        db.expect_ensure_queue_item()
            .withf(|id, _| *id == 7)
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = handler_with(db, &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7, "property_id": 10, "user_id": 100}"#);

        let outcome = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await
            .unwrap();

        assert_eq!(outcome.integration_id, 7);
        assert_eq!(outcome.scope.as_deref(), Some("bookings prices"));
    }

    // Test 5: Scope extension without the capability is ScopeMissing
    #[tokio::test]
    async fn test_scope_extension_missing_capability() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings prices").await;

        let handler = handler_with(MockDatabase::new(), &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7, "purpose": "extend_scope"}"#);

        let result = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await;

        assert_eq!(
            result.unwrap_err(),
            CallbackError::ScopeMissing("messages".to_string())
        );
    }

    // Test 6: Scope extension succeeds when the capability is granted
    #[tokio::test]
    async fn test_scope_extension_with_capability() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings prices messages").await;

        let mut db = MockDatabase::new();
        db.expect_get_integration()
            .returning(|_| Ok(Some(Integration::new(7, 10, "marketplace"))));
        db.expect_update_integration_tokens()
            .returning(|_, _, _, _, _| Ok(()));
        db.expect_ensure_queue_item().returning(|_, _| Ok(()));

        let handler = handler_with(db, &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7, "purpose": "extend_scope"}"#);

        let outcome = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await
            .unwrap();
        assert_eq!(outcome.integration_id, 7);
    }

    // Test 7: Ownership mismatch refuses to attach tokens
    #[tokio::test]
    async fn test_ownership_mismatch() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings").await;

        let mut db = MockDatabase::new();
        db.expect_get_integration()
            .returning(|_| Ok(Some(Integration::new(7, 10, "marketplace"))));
        // Property 10 belongs to user 999, not the requester
        db.expect_get_property_defaults()
            .returning(|_| Ok(Some(owned_property(999))));

        let handler = handler_with(db, &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7, "user_id": 100}"#);

        let result = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await;
        assert_eq!(result.unwrap_err(), CallbackError::NoIntegration);
    }

    // Test 8: State pointing at the wrong property refuses to attach
    #[tokio::test]
    async fn test_property_mismatch() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings").await;

        let mut db = MockDatabase::new();
        db.expect_get_integration()
            .returning(|_| Ok(Some(Integration::new(7, 10, "marketplace"))));

        let handler = handler_with(db, &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7, "property_id": 11}"#);

        let result = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await;
        assert_eq!(result.unwrap_err(), CallbackError::NoIntegration);
    }

    // Test 9: Fallback uses the requester's single active integration
    #[tokio::test]
    async fn test_fallback_single_active_integration() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings").await;

        let mut db = MockDatabase::new();
        db.expect_list_active_integrations_for_owner()
            .withf(|owner, platform| *owner == 100 && platform == "marketplace")
            .returning(|_, _| Ok(vec![Integration::new(7, 10, "marketplace")]));
        db.expect_update_integration_tokens()
            .returning(|_, _, _, _, _| Ok(()));
        db.expect_ensure_queue_item().returning(|_, _| Ok(()));

        let handler = handler_with(db, &server.uri());
        let state = STANDARD.encode(r#"{"user_id": 100}"#);

        let outcome = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await
            .unwrap();
        assert_eq!(outcome.integration_id, 7);
    }

    // Test 10: Ambiguous fallback (two active integrations) is refused
    #[tokio::test]
    async fn test_fallback_ambiguous() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "bookings").await;

        let mut db = MockDatabase::new();
        db.expect_list_active_integrations_for_owner().returning(|_, _| {
            Ok(vec![
                Integration::new(7, 10, "marketplace"),
                Integration::new(8, 11, "marketplace"),
            ])
        });

        let handler = handler_with(db, &server.uri());
        let state = STANDARD.encode(r#"{"user_id": 100}"#);

        let result = handler
            .handle_callback("code-1", &state, "https://app.example/callback")
            .await;
        assert_eq!(result.unwrap_err(), CallbackError::NoIntegration);
    }

    // Test 11: Rejected code maps to InvalidCode with the vendor reason
    #[tokio::test]
    async fn test_invalid_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .mount(&server)
            .await;

        let handler = handler_with(MockDatabase::new(), &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7}"#);

        let result = handler
            .handle_callback("stale-code", &state, "https://app.example/callback")
            .await;

        match result.unwrap_err() {
            CallbackError::InvalidCode(msg) => assert!(msg.contains("code expired")),
            other => panic!("Expected InvalidCode, got {:?}", other),
        }
    }

    // Test 12: Redirect URI rejection maps to RedirectMismatch
    #[tokio::test]
    async fn test_redirect_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_request",
                "error_description": "redirect_uri does not match"
            })))
            .mount(&server)
            .await;

        let handler = handler_with(MockDatabase::new(), &server.uri());
        let state = STANDARD.encode(r#"{"integration_id": 7}"#);

        let result = handler
            .handle_callback("code-1", &state, "https://wrong.example/callback")
            .await;

        assert_eq!(result.unwrap_err(), CallbackError::RedirectMismatch);
    }
}
