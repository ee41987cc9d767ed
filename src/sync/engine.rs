//! The push/pull sync operation for one integration
//!
//! Push uploads prices, base parameters and availability; pull imports
//! marketplace bookings. Push sub-steps are best-effort: each failure is
//! recorded and later steps still run, so one bad range does not block the
//! whole calendar. Only configuration-level validation failures and an
//! unrecoverable 401 abort the run.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::guest::{extract_guest_email, extract_guest_name, extract_guest_phone};
use super::pricing::{blocked_ranges, coalesce_rates, daily_rates};
use crate::auth::TokenManager;
use crate::database::Database;
use crate::error::{DbError, SyncError};
use crate::marketplace::types::RawBooking;
use crate::marketplace::MarketplaceClient;
use crate::models::{BookingStatus, Integration, NewRemoteBooking, SyncLog, UpsertOutcome};

/// Accepted digit counts for the remote account identifier
const ACCOUNT_ID_DIGITS: std::ops::RangeInclusive<usize> = 4..=12;
/// Accepted digit counts for the remote listing identifier
const LISTING_ID_DIGITS: std::ops::RangeInclusive<usize> = 5..=12;

/// How far ahead prices and availability are pushed
const PUSH_WINDOW_DAYS: i64 = 365;
/// How far ahead bookings are pulled
const PULL_WINDOW_DAYS: i64 = 365;
/// Page size when the caller does not specify one
const DEFAULT_PULL_LIMIT: u32 = 50;

/// Failure classification carried on each recorded issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClass {
    /// Credentials are dead; the user must reconnect the integration
    ReauthRequired,
    /// Malformed integration configuration
    Validation,
    /// Marketplace rate limit exhausted the client's retries
    RateLimited,
    /// Remote side holds a committed booking
    Conflict,
    /// Endpoint or resource missing remote-side
    NotFound,
    /// Transport or server failure
    Network,
}

/// One recorded sub-step failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepIssue {
    /// Operation name (e.g. "push_prices")
    pub operation: String,
    pub class: IssueClass,
    /// HTTP status code, when the failure was an HTTP response
    pub status: Option<u16>,
    pub message: String,
}

impl StepIssue {
    fn from_sync_error(operation: &str, err: &SyncError) -> Self {
        Self {
            operation: operation.to_string(),
            class: classify(err),
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

fn classify(err: &SyncError) -> IssueClass {
    match err {
        SyncError::Unauthorized => IssueClass::ReauthRequired,
        SyncError::RateLimited(_) => IssueClass::RateLimited,
        SyncError::Conflict => IssueClass::Conflict,
        SyncError::NotFound => IssueClass::NotFound,
        _ => IssueClass::Network,
    }
}

/// Pull phase counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PullStats {
    /// Bookings returned by the marketplace
    pub fetched: usize,
    /// New local rows
    pub created: usize,
    /// Existing rows updated
    pub updated: usize,
    /// Rows already matching (idempotent re-pull)
    pub unchanged: usize,
    /// Records skipped for missing id or dates
    pub skipped: usize,
}

/// Structured result of one sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// True when no sub-step recorded an error (warnings allowed)
    pub success: bool,
    pub errors: Vec<StepIssue>,
    pub warnings: Vec<StepIssue>,
    pub pull: PullStats,
}

impl SyncReport {
    /// Whether the poller's own retry can plausibly help
    ///
    /// Fatal classes (reauth, validation) are never retried within a tick;
    /// conflicts and 404s will not change by retrying either.
    pub fn retryable(&self) -> bool {
        let fatal = self.errors.iter().any(|e| {
            matches!(
                e.class,
                IssueClass::ReauthRequired | IssueClass::Validation
            )
        });
        let transient = self.errors.iter().any(|e| {
            matches!(e.class, IssueClass::RateLimited | IssueClass::Network)
        });
        !fatal && transient
    }

    /// Human-readable one-line summary of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.operation, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Options for one sync run
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Booking to leave out of the availability push, reopening its dates
    /// after a local deletion
    pub exclude_booking_id: Option<i64>,
    /// Pull page size override
    pub pull_limit: Option<u32>,
    /// Pull page offset
    pub pull_offset: Option<u32>,
}

/// Failures that abort the run before it can produce a report
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Integration {0} not found")]
    IntegrationNotFound(i64),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// The sync engine
pub struct SyncEngine<D: Database> {
    db: Arc<D>,
    client: Arc<MarketplaceClient>,
    tokens: Arc<TokenManager<D>>,
}

impl<D: Database> SyncEngine<D> {
    /// Create a new sync engine
    pub fn new(db: Arc<D>, client: Arc<MarketplaceClient>, tokens: Arc<TokenManager<D>>) -> Self {
        Self { db, client, tokens }
    }

    /// Run one full push/pull sync for an integration
    ///
    /// Push order is fixed (prices, base parameters, availability) and pull
    /// always runs after push, so a just-deleted booking's reopen is not
    /// overwritten by a pull of stale remote state.
    pub async fn sync(
        &self,
        integration_id: i64,
        options: &SyncOptions,
    ) -> Result<SyncReport, EngineError> {
        let integration = self
            .db
            .get_integration(integration_id)
            .await?
            .ok_or(EngineError::IntegrationNotFound(integration_id))?;

        let mut report = SyncReport::default();
        let today = Utc::now().date_naive();

        // Precondition: identifiers must be well-formed before any network
        // call is attempted
        let listing_id = match validate_identifiers(&integration) {
            Ok(listing_id) => listing_id,
            Err(message) => {
                report.errors.push(StepIssue {
                    operation: "validate".to_string(),
                    class: IssueClass::Validation,
                    status: None,
                    message,
                });
                return self.finish(&integration, report).await;
            }
        };

        let mut token = match self.tokens.get_valid_token(integration_id).await {
            Ok(token) => token,
            Err(err) => {
                report.errors.push(StepIssue {
                    operation: "token".to_string(),
                    class: IssueClass::ReauthRequired,
                    status: None,
                    message: err.to_string(),
                });
                return self.finish(&integration, report).await;
            }
        };

        // ---- Push phase (best effort) ----

        let mut fatal = false;

        if let Err(err) = self
            .push_prices(&integration, &listing_id, &mut token, today)
            .await
        {
            fatal |= record_push_issue(&mut report, "push_prices", &err, false);
        }

        if !fatal {
            if let Err(err) = self
                .push_base_params(&integration, &listing_id, &mut token)
                .await
            {
                fatal |= record_push_issue(&mut report, "push_base_params", &err, false);
            }
        }

        if !fatal {
            if let Err(err) = self
                .push_availability(&integration, &listing_id, &mut token, today, options)
                .await
            {
                let reopening = options.exclude_booking_id.is_some();
                fatal |= record_push_issue(&mut report, "push_calendar", &err, reopening);
            }
        }

        // ---- Pull phase ----

        if !fatal {
            match self
                .pull_bookings(&integration, &listing_id, &mut token, today, options)
                .await
            {
                Ok(stats) => report.pull = stats,
                Err(PullFailure::Db(err)) => return Err(err.into()),
                Err(PullFailure::Remote(err)) => {
                    record_push_issue(&mut report, "pull_bookings", &err, false);
                }
            }
        }

        self.finish(&integration, report).await
    }

    /// Compute and upload the per-date price ranges
    async fn push_prices(
        &self,
        integration: &Integration,
        listing_id: &str,
        token: &mut String,
        today: NaiveDate,
    ) -> Result<(), SyncError> {
        let window_end = today + Duration::days(PUSH_WINDOW_DAYS);

        let defaults = self
            .db
            .get_property_defaults(integration.property_id)
            .await
            .map_err(|e| SyncError::InvalidData(e.to_string()))?
            .ok_or_else(|| SyncError::InvalidData("Property defaults missing".to_string()))?;

        let overrides = self
            .db
            .list_property_rates(integration.property_id, today, window_end)
            .await
            .map_err(|e| SyncError::InvalidData(e.to_string()))?;

        let rates = daily_rates(
            today,
            window_end,
            defaults.base_price,
            defaults.min_stay,
            &overrides,
            integration.markup,
        );
        let ranges = coalesce_rates(&rates);

        debug!(
            integration_id = integration.id,
            ranges = ranges.len(),
            "Pushing price ranges"
        );

        self.with_reauth(integration.id, token, |t| {
            let client = Arc::clone(&self.client);
            let listing = listing_id.to_string();
            let ranges = ranges.clone();
            async move { client.push_prices(&t, &listing, &ranges).await }
        })
        .await
    }

    /// Push the listing-level default price and minimum stay
    async fn push_base_params(
        &self,
        integration: &Integration,
        listing_id: &str,
        token: &mut String,
    ) -> Result<(), SyncError> {
        let defaults = self
            .db
            .get_property_defaults(integration.property_id)
            .await
            .map_err(|e| SyncError::InvalidData(e.to_string()))?
            .ok_or_else(|| SyncError::InvalidData("Property defaults missing".to_string()))?;

        let price = integration.markup.apply(defaults.base_price);

        self.with_reauth(integration.id, token, |t| {
            let client = Arc::clone(&self.client);
            let listing = listing_id.to_string();
            let min_stay = defaults.min_stay;
            async move {
                client
                    .push_base_params(&t, &listing, price, min_stay)
                    .await
            }
        })
        .await
    }

    /// Replace the remote blocked ranges with the current local state
    async fn push_availability(
        &self,
        integration: &Integration,
        listing_id: &str,
        token: &mut String,
        today: NaiveDate,
        options: &SyncOptions,
    ) -> Result<(), SyncError> {
        let bookings = self
            .db
            .list_bookings(integration.property_id)
            .await
            .map_err(|e| SyncError::InvalidData(e.to_string()))?;

        let blocks = blocked_ranges(&bookings, today, options.exclude_booking_id);

        // An empty set is still pushed: the explicit clear-all keeps the
        // remote calendar from holding stale blocks
        debug!(
            integration_id = integration.id,
            blocks = blocks.len(),
            "Replacing calendar blocks"
        );

        self.with_reauth(integration.id, token, |t| {
            let client = Arc::clone(&self.client);
            let listing = listing_id.to_string();
            let blocks = blocks.clone();
            async move { client.set_calendar_blocks(&t, &listing, &blocks).await }
        })
        .await
    }

    /// Import marketplace bookings for the forward-looking window
    async fn pull_bookings(
        &self,
        integration: &Integration,
        listing_id: &str,
        token: &mut String,
        today: NaiveDate,
        options: &SyncOptions,
    ) -> Result<PullStats, PullFailure> {
        let window_end = today + Duration::days(PULL_WINDOW_DAYS);
        let limit = options.pull_limit.unwrap_or(DEFAULT_PULL_LIMIT);
        let offset = options.pull_offset.unwrap_or(0);

        let fetched = self
            .with_reauth(integration.id, token, |t| {
                let client = Arc::clone(&self.client);
                let listing = listing_id.to_string();
                async move {
                    client
                        .fetch_bookings(&t, &listing, today, window_end, limit, offset, true)
                        .await
                }
            })
            .await;

        let raw_bookings = match fetched {
            Ok(bookings) => bookings,
            // 404 from the bookings endpoint means nothing to pull
            Err(SyncError::NotFound) => Vec::new(),
            Err(err) => return Err(PullFailure::Remote(err)),
        };

        let mut stats = PullStats {
            fetched: raw_bookings.len(),
            ..Default::default()
        };

        for raw in &raw_bookings {
            if !raw.is_importable() {
                debug!(integration_id = integration.id, "Skipping booking without id or dates");
                stats.skipped += 1;
                continue;
            }

            let record = map_remote_booking(raw, integration);
            match self
                .db
                .upsert_remote_booking(&record)
                .await
                .map_err(PullFailure::Db)?
            {
                UpsertOutcome::Created => stats.created += 1,
                UpsertOutcome::Updated => stats.updated += 1,
                UpsertOutcome::Unchanged => stats.unchanged += 1,
            }
        }

        self.cancel_unpaid(integration, &raw_bookings, token).await;

        Ok(stats)
    }

    /// Courtesy-cancel remote bookings still in the unpaid pending state
    ///
    /// Reduces overbooking risk. A 409 means the booking was paid in the
    /// meantime and must be left alone; that is expected, not an error.
    async fn cancel_unpaid(
        &self,
        integration: &Integration,
        raw_bookings: &[RawBooking],
        token: &str,
    ) {
        for raw in raw_bookings {
            if !raw.is_unpaid() {
                continue;
            }
            let Some(remote_id) = raw.remote_id() else {
                continue;
            };

            match self.client.cancel_booking(token, &remote_id).await {
                Ok(()) => {
                    info!(
                        integration_id = integration.id,
                        remote_id = %remote_id,
                        "Cancelled unpaid remote booking"
                    );
                }
                Err(SyncError::Conflict) => {
                    debug!(
                        integration_id = integration.id,
                        remote_id = %remote_id,
                        "Unpaid booking was paid in the meantime, left alone"
                    );
                }
                Err(err) => {
                    warn!(
                        integration_id = integration.id,
                        remote_id = %remote_id,
                        error = %err,
                        "Courtesy cancel failed"
                    );
                }
            }
        }
    }

    /// Run a call, refreshing the token and retrying exactly once on 401
    ///
    /// A second 401 after the refresh surfaces as `Unauthorized`, which the
    /// caller records as a fatal reauth failure.
    async fn with_reauth<T, F, Fut>(
        &self,
        integration_id: i64,
        token: &mut String,
        call: F,
    ) -> Result<T, SyncError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        match call(token.clone()).await {
            Err(SyncError::Unauthorized) => {
                debug!(integration_id, "Got 401, refreshing token and retrying once");
                self.tokens.invalidate(integration_id);
                *token = self
                    .tokens
                    .get_valid_token(integration_id)
                    .await
                    .map_err(|_| SyncError::Unauthorized)?;
                call(token.clone()).await
            }
            other => other,
        }
    }

    /// Persist the report to the audit log and stamp the integration
    async fn finish(
        &self,
        integration: &Integration,
        mut report: SyncReport,
    ) -> Result<SyncReport, EngineError> {
        report.success = report.errors.is_empty();

        for issue in &report.errors {
            let log = SyncLog::error(integration.id, issue.operation.clone(), issue_detail(issue));
            let _ = self.db.insert_sync_log(&log).await;
        }
        for issue in &report.warnings {
            let mut log =
                SyncLog::error(integration.id, issue.operation.clone(), issue_detail(issue));
            log.status = "warning".to_string();
            let _ = self.db.insert_sync_log(&log).await;
        }

        let mut summary = SyncLog::success(integration.id, "sync");
        if !report.success {
            summary.status = "error".to_string();
        }
        summary.detail = Some(
            serde_json::json!({
                "errors": report.errors.len(),
                "warnings": report.warnings.len(),
                "pull": report.pull,
            })
            .to_string(),
        );
        let _ = self.db.insert_sync_log(&summary).await;

        self.db
            .touch_integration_synced(integration.id, Utc::now())
            .await?;

        if report.success {
            info!(
                integration_id = integration.id,
                created = report.pull.created,
                updated = report.pull.updated,
                warnings = report.warnings.len(),
                "Sync completed"
            );
        } else {
            warn!(
                integration_id = integration.id,
                errors = report.errors.len(),
                summary = %report.error_summary(),
                "Sync completed with errors"
            );
        }

        Ok(report)
    }
}

enum PullFailure {
    Remote(SyncError),
    Db(DbError),
}

/// Record a push sub-step failure; returns true when the run must stop
fn record_push_issue(
    report: &mut SyncReport,
    operation: &str,
    err: &SyncError,
    reopening: bool,
) -> bool {
    let issue = StepIssue::from_sync_error(operation, err);

    match issue.class {
        IssueClass::ReauthRequired => {
            report.errors.push(issue);
            true
        }
        // A missing endpoint is cosmetic when the other steps succeed
        IssueClass::NotFound => {
            report.warnings.push(issue);
            false
        }
        IssueClass::Conflict => {
            // Expected in general; an error when the push was supposed to
            // reopen dates for a just-deleted booking, because the user must
            // reconcile manually
            if reopening && operation == "push_calendar" {
                report.errors.push(issue);
            } else {
                report.warnings.push(issue);
            }
            false
        }
        _ => {
            report.errors.push(issue);
            false
        }
    }
}

/// Validate the integration's remote identifiers before any network call
fn validate_identifiers(integration: &Integration) -> Result<String, String> {
    let account_id = integration
        .remote_account_id
        .as_deref()
        .ok_or_else(|| "Remote account id is missing".to_string())?;
    if !account_id.chars().all(|c| c.is_ascii_digit())
        || !ACCOUNT_ID_DIGITS.contains(&account_id.len())
    {
        return Err(format!("Malformed remote account id: {:?}", account_id));
    }

    let listing_id = integration
        .remote_listing_id
        .as_deref()
        .ok_or_else(|| "Remote listing id is missing".to_string())?;
    if !listing_id.chars().all(|c| c.is_ascii_digit())
        || !LISTING_ID_DIGITS.contains(&listing_id.len())
    {
        return Err(format!("Malformed remote listing id: {:?}", listing_id));
    }

    Ok(listing_id.to_string())
}

/// Map a raw marketplace booking onto the local upsert record
fn map_remote_booking(raw: &RawBooking, integration: &Integration) -> NewRemoteBooking {
    NewRemoteBooking {
        property_id: integration.property_id,
        remote_id: raw.remote_id().expect("checked by is_importable"),
        check_in: raw.date_from.expect("checked by is_importable"),
        check_out: raw.date_to.expect("checked by is_importable"),
        guest_name: extract_guest_name(raw),
        guest_phone: extract_guest_phone(raw),
        guest_email: extract_guest_email(raw),
        status: raw
            .status
            .as_deref()
            .map(BookingStatus::from_remote)
            .unwrap_or(BookingStatus::Pending),
        source: integration.platform.clone(),
    }
}

fn issue_detail(issue: &StepIssue) -> String {
    serde_json::json!({
        "operation": issue.operation,
        "class": issue.class,
        "status_code": issue.status,
        "message": issue.message,
    })
    .to_string()
}
