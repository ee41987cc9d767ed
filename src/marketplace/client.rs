//! HTTP client for the marketplace API
//!
//! Thin wrapper around reqwest with per-status error mapping and the shared
//! retry policy (429 and 5xx are retried with exponential backoff, honoring
//! a Retry-After header). Every outbound call is logged with method and URL
//! at request time and status code at response time; tokens and bodies are
//! never logged.

use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use super::types::{BlockedRange, PriceRange, RawBooking, TokenGrant};
use crate::config::MarketplaceConfig;
use crate::error::SyncError;

/// Default wait when the marketplace rate limits without a Retry-After header
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Marketplace API client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base API URL
    pub base_url: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl From<&MarketplaceConfig> for ClientConfig {
    fn from(config: &MarketplaceConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            request_timeout_secs: config.request_timeout_secs,
        }
    }
}

/// Marketplace API client
pub struct MarketplaceClient {
    http: Client,
    config: ClientConfig,
    retry: RetryPolicy,
}

impl MarketplaceClient {
    /// Create a new client with the default retry policy
    pub fn new(config: ClientConfig) -> Self {
        Self::with_retry(config, RetryPolicy::default())
    }

    /// Create a new client with a custom retry policy
    pub fn with_retry(config: ClientConfig, retry: RetryPolicy) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            config,
            retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    // =========================================================================
    // Token endpoint (authorization_code, refresh_token, client_credentials)
    // =========================================================================

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, SyncError> {
        self.token_grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Refresh an access token via the refresh-token grant
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, SyncError> {
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Alternate grant used when the refresh-token grant is rejected
    pub async fn client_credentials(&self) -> Result<TokenGrant, SyncError> {
        self.token_grant(&[("grant_type", "client_credentials")]).await
    }

    async fn token_grant(&self, params: &[(&str, &str)]) -> Result<TokenGrant, SyncError> {
        let url = self.url("/oauth/token");

        self.retry
            .execute(|| async {
                let mut form: Vec<(&str, &str)> = vec![
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                ];
                form.extend_from_slice(params);

                debug!(method = "POST", url = %url, "Sending marketplace token request");

                let response = self
                    .http
                    .post(&url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(map_transport_error)?;

                let status = response.status();
                debug!(url = %url, status = status.as_u16(), "Marketplace token response");

                match status {
                    StatusCode::OK => response
                        .json::<TokenGrant>()
                        .await
                        .map_err(|e| SyncError::InvalidData(e.to_string())),
                    StatusCode::BAD_REQUEST => {
                        // The token endpoint reports rejection reasons in the body
                        let body: Value = response.json().await.unwrap_or(Value::Null);
                        let error = body
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("invalid_request");
                        let description = body
                            .get("error_description")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        warn!(url = %url, error = error, "Token grant rejected");
                        Err(SyncError::InvalidData(format!(
                            "{}: {}",
                            error, description
                        )))
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        let wait = retry_after_secs(&response);
                        warn!(url = %url, retry_after = wait, "Rate limited by marketplace");
                        Err(SyncError::RateLimited(wait))
                    }
                    other => Err(map_status(other, &url)),
                }
            })
            .await
    }

    // =========================================================================
    // Listing endpoints
    // =========================================================================

    /// Upload per-date price ranges for a listing
    pub async fn push_prices(
        &self,
        token: &str,
        listing_id: &str,
        ranges: &[PriceRange],
    ) -> Result<(), SyncError> {
        let path = format!("/listings/{}/prices", listing_id);
        let body = serde_json::json!({ "ranges": ranges });
        self.request(Method::POST, &path, token, Some(&body))
            .await
            .map(|_| ())
    }

    /// Push the listing-level default nightly price and minimum stay
    pub async fn push_base_params(
        &self,
        token: &str,
        listing_id: &str,
        nightly_price: i64,
        minimal_duration: u32,
    ) -> Result<(), SyncError> {
        let path = format!("/listings/{}/parameters", listing_id);
        let body = serde_json::json!({
            "nightly_price": nightly_price,
            "minimal_duration": minimal_duration,
        });
        self.request(Method::PUT, &path, token, Some(&body))
            .await
            .map(|_| ())
    }

    /// Replace the listing's blocked date ranges
    ///
    /// An empty list is a valid call: it clears all blocks. Skipping the
    /// call when nothing is blocked would leave stale blocks remote-side.
    pub async fn set_calendar_blocks(
        &self,
        token: &str,
        listing_id: &str,
        blocks: &[BlockedRange],
    ) -> Result<(), SyncError> {
        let path = format!("/listings/{}/calendar", listing_id);
        let body = serde_json::json!({ "blocked": blocks });
        self.request(Method::PUT, &path, token, Some(&body))
            .await
            .map(|_| ())
    }

    /// Fetch bookings for a listing within a date window, paginated
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_bookings(
        &self,
        token: &str,
        listing_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: u32,
        offset: u32,
        include_unpaid: bool,
    ) -> Result<Vec<RawBooking>, SyncError> {
        let path = format!(
            "/listings/{}/bookings?date_from={}&date_to={}&limit={}&offset={}&include_unpaid={}",
            listing_id, from, to, limit, offset, include_unpaid
        );
        let value = self.request(Method::GET, &path, token, None).await?;

        // The endpoint has returned both a bare array and {"bookings": [...]}
        let list = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("bookings") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        list.into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| SyncError::InvalidData(e.to_string()))
            })
            .collect()
    }

    /// Cancel a remote booking
    ///
    /// Returns `SyncError::Conflict` when the booking has since been paid.
    pub async fn cancel_booking(&self, token: &str, booking_id: &str) -> Result<(), SyncError> {
        let path = format!("/bookings/{}/cancel", booking_id);
        self.request(Method::POST, &path, token, None)
            .await
            .map(|_| ())
    }

    // =========================================================================
    // Core request plumbing
    // =========================================================================

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, SyncError> {
        let url = self.url(path);

        self.retry
            .execute(|| async {
                debug!(method = %method, url = %url, "Sending marketplace request");

                let mut builder = self
                    .http
                    .request(method.clone(), &url)
                    .bearer_auth(token);
                if let Some(body) = body {
                    builder = builder.json(body);
                }

                let response = builder.send().await.map_err(map_transport_error)?;
                let status = response.status();
                debug!(url = %url, status = status.as_u16(), "Marketplace response");

                match status {
                    StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| SyncError::Network(e.to_string()))?;
                        if text.is_empty() {
                            Ok(Value::Null)
                        } else {
                            serde_json::from_str(&text)
                                .map_err(|e| SyncError::InvalidData(e.to_string()))
                        }
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        let wait = retry_after_secs(&response);
                        warn!(url = %url, retry_after = wait, "Rate limited by marketplace");
                        Err(SyncError::RateLimited(wait))
                    }
                    other => Err(map_status(other, &url)),
                }
            })
            .await
    }
}

/// Seconds to wait from a 429 response's Retry-After header
fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS)
}

fn map_transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::NetworkTimeout
    } else if e.is_connect() {
        SyncError::ConnectionRefused
    } else {
        SyncError::Network(e.to_string())
    }
}

fn map_status(status: StatusCode, url: &str) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(url = %url, status = status.as_u16(), "Unauthorized");
            SyncError::Unauthorized
        }
        StatusCode::NOT_FOUND => SyncError::NotFound,
        StatusCode::CONFLICT => SyncError::Conflict,
        status if status.is_server_error() => {
            warn!(url = %url, status = status.as_u16(), "Marketplace server error");
            SyncError::ServerError(status.as_u16())
        }
        status => {
            warn!(url = %url, status = status.as_u16(), "Unexpected status");
            SyncError::InvalidData(format!("Unexpected status {}", status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> MarketplaceClient {
        MarketplaceClient::with_retry(
            ClientConfig {
                base_url: base_url.to_string(),
                client_id: "client-123".to_string(),
                client_secret: "secret-456".to_string(),
                request_timeout_secs: 5,
            },
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(0),
                multiplier: 2.0,
                respect_retry_after: false,
            },
        )
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Test 1: Code exchange posts credentials and parses the grant
    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code-1"))
            .and(body_string_contains("client_id=client-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "scope": "bookings prices"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let grant = client
            .exchange_code("auth-code-1", "https://app.example/callback")
            .await
            .unwrap();

        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(grant.expires_in, 3600);
        assert_eq!(grant.scope.as_deref(), Some("bookings prices"));
    }

    // Test 2: Token endpoint rejection surfaces the vendor reason
    #[tokio::test]
    async fn test_token_grant_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.refresh_token("stale").await;

        match result.unwrap_err() {
            SyncError::InvalidData(msg) => {
                assert!(msg.contains("invalid_grant"));
                assert!(msg.contains("code expired"));
            }
            other => panic!("Expected InvalidData, got {:?}", other),
        }
    }

    // Test 3: Price push sends the ranges payload with a bearer token
    #[tokio::test]
    async fn test_push_prices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/listings/987654/prices"))
            .and(header("authorization", "Bearer at-1"))
            .and(body_string_contains("\"nightly_price\":1200"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let ranges = vec![PriceRange {
            date_from: date(2025, 11, 17),
            date_to: date(2025, 11, 18),
            nightly_price: 1200,
            minimal_duration: 2,
        }];

        assert!(client.push_prices("at-1", "987654", &ranges).await.is_ok());
    }

    // Test 4: 5xx is retried until success
    #[tokio::test]
    async fn test_server_error_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/listings/987654/parameters"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/listings/987654/parameters"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.push_base_params("at-1", "987654", 1000, 2).await;

        assert!(result.is_ok());
    }

    // Test 5: 429 exhausting retries surfaces RateLimited
    #[tokio::test]
    async fn test_rate_limited_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/listings/987654/calendar"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.set_calendar_blocks("at-1", "987654", &[]).await;

        assert!(matches!(result.unwrap_err(), SyncError::RateLimited(_)));
    }

    // Test 5b: Retry-After header value is surfaced on exhaustion
    #[tokio::test]
    async fn test_rate_limited_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/listings/987654/calendar"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;

        let client = MarketplaceClient::with_retry(
            ClientConfig {
                base_url: server.uri(),
                client_id: "client-123".to_string(),
                client_secret: "secret-456".to_string(),
                request_timeout_secs: 5,
            },
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(0),
                multiplier: 2.0,
                respect_retry_after: false,
            },
        );

        let result = client.set_calendar_blocks("at-1", "987654", &[]).await;
        match result.unwrap_err() {
            SyncError::RateLimited(secs) => assert_eq!(secs, 120),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    // Test 6: 401 is not retried and surfaces Unauthorized
    #[tokio::test]
    async fn test_unauthorized_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/listings/987654/prices"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.push_prices("stale", "987654", &[]).await;

        assert!(matches!(result.unwrap_err(), SyncError::Unauthorized));
    }

    // Test 7: Bookings fetch builds the window query and parses both shapes
    #[tokio::test]
    async fn test_fetch_bookings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/listings/987654/bookings"))
            .and(query_param("date_from", "2025-11-17"))
            .and(query_param("limit", "50"))
            .and(query_param("include_unpaid", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bookings": [
                    {"id": 1, "date_from": "2025-11-18", "date_to": "2025-11-20", "status": "active"},
                    {"id": 2, "date_from": "2025-12-01", "date_to": "2025-12-03", "status": "pending"}
                ]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let bookings = client
            .fetch_bookings(
                "at-1",
                "987654",
                date(2025, 11, 17),
                date(2026, 11, 17),
                50,
                0,
                true,
            )
            .await
            .unwrap();

        assert_eq!(bookings.len(), 2);
        assert_eq!(bookings[0].id, Some(1));
        assert!(bookings[1].is_unpaid());
    }

    // Test 8: Booking cancel maps 409 to Conflict
    #[tokio::test]
    async fn test_cancel_booking_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bookings/555/cancel"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.cancel_booking("at-1", "555").await;

        assert!(matches!(result.unwrap_err(), SyncError::Conflict));
    }

    // Test 9: 404 maps to NotFound
    #[tokio::test]
    async fn test_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/listings/987654/bookings"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client
            .fetch_bookings(
                "at-1",
                "987654",
                date(2025, 11, 17),
                date(2026, 11, 17),
                50,
                0,
                true,
            )
            .await;

        assert!(matches!(result.unwrap_err(), SyncError::NotFound));
    }

    // Test 10: Empty calendar push is an explicit clear-all call
    #[tokio::test]
    async fn test_clear_calendar_sends_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/listings/987654/calendar"))
            .and(body_string_contains("\"blocked\":[]"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert!(client
            .set_calendar_blocks("at-1", "987654", &[])
            .await
            .is_ok());
    }
}
