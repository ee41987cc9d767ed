//! The bidirectional sync engine and its scheduler
//!
//! `engine` implements the push (prices, base parameters, availability) and
//! pull (bookings) operation for one integration. `poller` claims due queue
//! items and drives the engine under a wall-clock deadline. `pricing` and
//! `guest` are the pure helpers both lean on.

pub mod engine;
pub mod guest;
pub mod poller;
pub mod pricing;

pub use engine::{PullStats, StepIssue, SyncEngine, SyncOptions, SyncReport};
pub use poller::{PollStats, PollerSettings, QueuePoller};
