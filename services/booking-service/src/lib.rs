//! Booking saga coordinator: owns the booking entity, its HTTP ingress, and
//! the queue handlers that react to inventory/payment events.

pub mod config;
pub mod domain;
pub mod handlers;
pub mod http;
pub mod repository;
