//! Domain models for hostsync

pub mod booking;
pub mod integration;

pub use booking::{
    Booking, BookingStatus, NewRemoteBooking, PropertyDefaults, PropertyRate, UpsertOutcome,
};
pub use integration::{Integration, Markup, SyncLog, SyncQueueItem, DEFAULT_SYNC_INTERVAL_SECS};
