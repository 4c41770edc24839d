//! Booking lifecycle and calendar-consistency core of a villa rental
//! marketplace: holds, confirmation, expiry, cancellation and refunds, with
//! per-villa calendars that never double-book.

pub mod booking;
pub mod calendar;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod sweeper;
pub mod validate;
pub mod wal;
