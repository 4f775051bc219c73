//! Inventory reservation engine: holds stock, reserves it against bookings,
//! and sweeps reservations whose TTL has elapsed.

pub mod config;
pub mod domain;
pub mod handlers;
pub mod repository;
pub mod sweeper;
