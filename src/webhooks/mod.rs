//! Webhook ingestion
//!
//! The marketplace pushes chat and booking events as JSON bodies keyed by an
//! `event` discriminator. Every event is applied idempotently: messages are
//! deduplicated by remote message id, chats by remote chat id, bookings by
//! remote booking id. Unknown event types are logged and ignored, never
//! fatal.
//!
//! Payload signature verification is pending the vendor publishing its
//! signing scheme; `ingest` is the single seam where the verifier will sit.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::WebhookError;
use crate::marketplace::types::RawBooking;
use crate::models::{BookingStatus, NewRemoteBooking, UpsertOutcome};
use crate::sync::guest::{extract_guest_email, extract_guest_name, extract_guest_phone};

/// Result of ingesting one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event changed local state
    Applied,
    /// The event was already applied earlier (idempotent replay)
    Duplicate,
    /// The event was not applicable; reason included
    Ignored(String),
}

/// Webhook event ingester
pub struct WebhookIngester<D: Database> {
    db: Arc<D>,
}

impl<D: Database> WebhookIngester<D> {
    /// Create a new ingester
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }

    /// Apply one webhook event
    pub async fn ingest(
        &self,
        platform: &str,
        payload: &Value,
    ) -> Result<IngestOutcome, WebhookError> {
        let event = payload
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::Malformed("Missing event discriminator".to_string()))?;

        debug!(platform, event, "Ingesting webhook event");

        match event {
            "message.new" => self.ingest_message(platform, payload).await,
            "chat.new" | "chat.updated" => self.ingest_chat(platform, payload).await,
            "booking.created" | "booking.updated" => {
                self.ingest_booking(platform, payload).await
            }
            "booking.cancelled" => self.ingest_cancellation(platform, payload).await,
            other => {
                info!(platform, event = other, "Ignoring unknown webhook event type");
                Ok(IngestOutcome::Ignored(format!(
                    "Unknown event type: {}",
                    other
                )))
            }
        }
    }

    async fn ingest_message(
        &self,
        platform: &str,
        payload: &Value,
    ) -> Result<IngestOutcome, WebhookError> {
        let message = payload
            .get("message")
            .ok_or_else(|| WebhookError::Malformed("Missing message object".to_string()))?;
        let message_id = require_id(message, "id")?;
        let chat_id = require_id(message, "chat_id")?;
        let body = message
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let inserted = self
            .db
            .insert_message_if_new(platform, &message_id, &chat_id, body)
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?;

        if inserted {
            Ok(IngestOutcome::Applied)
        } else {
            debug!(platform, message_id = %message_id, "Duplicate message event");
            Ok(IngestOutcome::Duplicate)
        }
    }

    async fn ingest_chat(
        &self,
        platform: &str,
        payload: &Value,
    ) -> Result<IngestOutcome, WebhookError> {
        let chat = payload
            .get("chat")
            .ok_or_else(|| WebhookError::Malformed("Missing chat object".to_string()))?;
        let chat_id = require_id(chat, "id")?;

        let outcome = self
            .db
            .upsert_chat(platform, &chat_id, &chat.to_string())
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?;

        Ok(match outcome {
            UpsertOutcome::Created | UpsertOutcome::Updated => IngestOutcome::Applied,
            UpsertOutcome::Unchanged => IngestOutcome::Duplicate,
        })
    }

    async fn ingest_booking(
        &self,
        platform: &str,
        payload: &Value,
    ) -> Result<IngestOutcome, WebhookError> {
        let raw: RawBooking = payload
            .get("booking")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| WebhookError::Malformed(e.to_string()))?
            .ok_or_else(|| WebhookError::Malformed("Missing booking object".to_string()))?;

        if !raw.is_importable() {
            return Err(WebhookError::Malformed(
                "Booking lacks id or dates".to_string(),
            ));
        }

        // The event carries the remote listing; resolve which property it is
        let Some(listing_id) = raw.listing_id else {
            return Ok(IngestOutcome::Ignored("No listing id on booking".to_string()));
        };
        let Some(integration) = self
            .db
            .find_integration_by_listing(platform, &listing_id.to_string())
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?
        else {
            warn!(platform, listing_id, "Booking event for unknown listing");
            return Ok(IngestOutcome::Ignored(format!(
                "No integration for listing {}",
                listing_id
            )));
        };

        let record = NewRemoteBooking {
            property_id: integration.property_id,
            remote_id: raw.remote_id().expect("checked by is_importable"),
            check_in: raw.date_from.expect("checked by is_importable"),
            check_out: raw.date_to.expect("checked by is_importable"),
            guest_name: extract_guest_name(&raw),
            guest_phone: extract_guest_phone(&raw),
            guest_email: extract_guest_email(&raw),
            status: raw
                .status
                .as_deref()
                .map(BookingStatus::from_remote)
                .unwrap_or(BookingStatus::Pending),
            source: integration.platform,
        };

        let outcome = self
            .db
            .upsert_remote_booking(&record)
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?;

        Ok(match outcome {
            UpsertOutcome::Created | UpsertOutcome::Updated => IngestOutcome::Applied,
            UpsertOutcome::Unchanged => IngestOutcome::Duplicate,
        })
    }

    /// Cancellation is a soft-cancel: the row is kept with a cancelled
    /// status so the next availability push reopens its dates
    async fn ingest_cancellation(
        &self,
        platform: &str,
        payload: &Value,
    ) -> Result<IngestOutcome, WebhookError> {
        let booking = payload
            .get("booking")
            .ok_or_else(|| WebhookError::Malformed("Missing booking object".to_string()))?;
        let remote_id = require_id(booking, "id")?;

        let cancelled = self
            .db
            .cancel_booking_by_remote_id(&remote_id)
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?;

        if cancelled {
            info!(platform, remote_id = %remote_id, "Booking cancelled via webhook");
            Ok(IngestOutcome::Applied)
        } else {
            // Unknown or already cancelled: replay-safe either way
            Ok(IngestOutcome::Duplicate)
        }
    }
}

/// Read an identifier field that may arrive as a number or a string
fn require_id(object: &Value, field: &str) -> Result<String, WebhookError> {
    match object.get(field) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(WebhookError::Malformed(format!("Missing {} field", field))),
    }
}
