//! Marketplace API integration
//!
//! This module wraps the marketplace HTTP API: a retrying client with
//! per-status error mapping, the wire payload types, and the shared retry
//! policy used by both the client and the queue poller.

pub mod client;
pub mod retry;
pub mod types;

pub use client::{ClientConfig, MarketplaceClient};
pub use retry::RetryPolicy;
pub use types::{BlockedRange, PriceRange, RawBooking, RawContact, TokenGrant};
