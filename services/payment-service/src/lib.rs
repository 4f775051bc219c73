//! Payment processor: attempts payment against an injectable gateway with
//! bounded retries, driven by its own `RetryPayment` self-consumption loop.

pub mod config;
pub mod domain;
pub mod gateway;
pub mod handlers;
pub mod repository;
