//! Axum web framework integration for the booking platform.
//!
//! This crate provides integration between the Axum web framework and the
//! booking platform's services, implementing the "Functional Core, Imperative Shell"
//! pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, cookies
//! │  - Request parsing                      │  ← Rate limiting, CORS
//! │  - Response serialization               │  ← Logging, metrics
//! ├─────────────────────────────────────────┤
//! │         Functional Core                 │
//! │  - Pure business logic (reducers)       │  ← Testable at memory speed
//! │  - State transformations                │  ← No I/O, no side effects
//! │  - Effect descriptions (values)         │  ← Composable, inspectable
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at Axum handler
//! 2. **Extract data** from request (JSON, headers, cookies)
//! 3. **Build Action** from extracted data
//! 4. **Dispatch** action through `Store`
//! 5. **Execute effects** (database, email, events)
//! 6. **Map result** to HTTP response
//! 7. **Return response** to client
//!
//! # Example
//!
//! ```ignore
//! use booking_web::{AppState, AppError};
//! use axum::{Router, routing::post, Json};
//!
//! async fn create_booking(
//!     State(state): State<AppState>,
//!     Json(request): Json<CreateBookingRequest>,
//! ) -> Result<Json<CreateBookingResponse>, AppError> {
//!     // 1. Build action from request
//!     let action = BookingAction::CreateBooking { ... };
//!
//!     // 2. Dispatch through store
//!     state.booking_store.dispatch(action).await?;
//!
//!     // 3. Return response
//!     Ok(Json(CreateBookingResponse { booking_id }))
//! }
//!
//! let app = Router::new()
//!     .route("/api/v1/bookings", post(create_booking))
//!     .with_state(app_state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{ClientIp, CorrelationId, UserAgent};
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
