//! Concurrency-safe ticket inventory for events.
//!
//! The core guarantees that bookings never oversell an event, queues excess
//! demand on a priority-ordered waiting list, and reassigns capacity freed by
//! cancellations. All durable state lives in the [`core::BoxOffice`] engine:
//! row-locked in-memory tables backed by a crc-framed write-ahead journal.
//! HTTP routing, validation of wire payloads, and authentication are the
//! embedding service's problem — the API here is plain identifiers and counts.

pub mod cache;
pub mod config;
pub mod core;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod retry;
pub mod sweeper;
pub mod wal;

pub use cache::{MemoryCache, ReadCache};
pub use config::CoreConfig;
pub use crate::core::{BoxOffice, CoreError, EventPatch};
pub use lock::{LockCoordinator, MemoryLockCoordinator};
pub use model::{
    BookingRecord, BookingStatus, ChangeEvent, EventRecord, TicketAvailability, WaitlistEntry,
    WaitlistStatus,
};
