//! HTTP ingress: `CreateBooking`, `GetBooking`, `RetryPayment`.
//!
//! Mirrors the teacher's "Functional Core, Imperative Shell" split: handlers
//! extract, call into [`BookingRepository`], and map the result to JSON.
//! `CreateBooking` always returns `202 Accepted` with `status=PENDING`; callers
//! poll `GetBooking` for the terminal state.

use crate::domain::{Booking, BookingId, BookingStatus};
use crate::repository::{BookingRepository, RepositoryError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use booking_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Shared state for the booking service's HTTP handlers.
#[derive(Clone)]
pub struct BookingAppState {
    /// Domain persistence.
    pub repository: Arc<BookingRepository>,
}

/// Build the booking service's router.
#[must_use]
pub fn router(state: BookingAppState) -> Router {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/retry-payment", post(retry_payment))
        .route("/health", get(booking_web::handlers::health_check))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    user_id: String,
    item_ref: String,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct CreateBookingResponse {
    booking_id: Uuid,
    status: &'static str,
}

async fn create_booking(
    State(state): State<BookingAppState>,
    correlation_id: CorrelationId,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), AppError> {
    if request.user_id.trim().is_empty() || request.item_ref.trim().is_empty() {
        return Err(AppError::validation("user_id and item_ref are required"));
    }
    if request.amount <= 0 {
        return Err(AppError::validation("amount must be positive"));
    }

    let booking = state
        .repository
        .create(
            request.user_id,
            request.item_ref,
            request.amount,
            &correlation_id.0.to_string(),
            chrono::Utc::now(),
        )
        .await
        .map_err(map_repository_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateBookingResponse {
            booking_id: booking.id.0,
            status: booking.status.as_str(),
        }),
    ))
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    booking_id: Uuid,
    user_id: String,
    item_ref: String,
    amount: i64,
    status: &'static str,
    cancellation_reason: Option<String>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            booking_id: booking.id.0,
            user_id: booking.user_id,
            item_ref: booking.item_ref,
            amount: booking.amount,
            status: booking.status.as_str(),
            cancellation_reason: booking.cancellation_reason,
        }
    }
}

async fn get_booking(
    State(state): State<BookingAppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .repository
        .get(BookingId(id))
        .await
        .map_err(map_repository_error)?;
    Ok(Json(booking.into()))
}

async fn retry_payment(
    State(state): State<BookingAppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let booking = state
        .repository
        .get(BookingId(id))
        .await
        .map_err(map_repository_error)?;

    if !matches!(booking.status, BookingStatus::Pending) {
        return Err(AppError::conflict(
            "retry-payment is only valid for a pending booking",
        ));
    }

    if !state
        .repository
        .payment_is_failed(booking.id)
        .await
        .map_err(map_repository_error)?
    {
        return Err(AppError::conflict(
            "retry-payment is only valid once the booking's payment has failed",
        ));
    }

    // The payment service owns retry scheduling via `RetryPayment`; this
    // affordance exists for an operator to nudge a stuck booking and is a
    // thin validation-only endpoint. No state is written here.
    Ok(StatusCode::ACCEPTED)
}

fn map_repository_error(error: RepositoryError) -> AppError {
    match error {
        RepositoryError::NotFound(id) => AppError::not_found("booking", id),
        RepositoryError::ConcurrencyExhausted(id) => {
            AppError::conflict(format!("booking {id} is under contention, retry later"))
        }
        RepositoryError::Database(reason) | RepositoryError::Encode(reason) => {
            AppError::internal(reason)
        }
    }
}
