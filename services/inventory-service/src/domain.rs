//! The inventory item and reservation entities, and their pure transition
//! logic.
//!
//! Unlike the booking entity (optimistic concurrency via a `version` column),
//! inventory rows are protected by an explicit row-exclusive lock
//! (`SELECT ... FOR UPDATE`) held for the duration of one reservation
//! mutation; see [`crate::repository`]. The functions here take the
//! already-locked row as a `&mut` reference and apply one transition to it.
//! They perform no I/O and never fail except on the one legitimate business
//! outcome (insufficient stock), so the imperative shell doesn't need a
//! retry loop the way the booking repository does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inventory item's current stock counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    /// External key (matches `DomainEvent`'s `item_ref`).
    pub item_id: String,
    /// Display name.
    pub name: String,
    /// Total stock.
    pub total: i64,
    /// Stock not currently reserved or consumed.
    pub available: i64,
    /// Stock reserved against non-terminal or confirmed reservations.
    pub reserved: i64,
}

impl InventoryItem {
    /// `available + reserved <= total`, both non-negative.
    #[must_use]
    pub const fn invariant_holds(&self) -> bool {
        self.available >= 0 && self.reserved >= 0 && self.available + self.reserved <= self.total
    }
}

/// Lifecycle status of a reservation. Never transitions back once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Stock is held against this reservation; not yet confirmed or released.
    Reserved,
    /// Payment succeeded; stock permanently consumed.
    Confirmed,
    /// Released back to `available`, either by a terminal payment failure or the sweeper.
    Released,
}

impl ReservationStatus {
    /// Parse from the `TEXT` database representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not one of the three recognized values.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "RESERVED" => Ok(Self::Reserved),
            "CONFIRMED" => Ok(Self::Confirmed),
            "RELEASED" => Ok(Self::Released),
            other => Err(format!("invalid reservation status: {other}")),
        }
    }

    /// Render as the `TEXT` database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "RESERVED",
            Self::Confirmed => "CONFIRMED",
            Self::Released => "RELEASED",
        }
    }
}

/// A reservation of stock against one booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservation {
    /// Stable identifier.
    pub id: Uuid,
    /// The item this reservation holds stock against.
    pub item_id: String,
    /// The booking this reservation is for.
    pub booking_id: Uuid,
    /// Quantity held.
    pub quantity: i64,
    /// Current lifecycle status.
    pub status: ReservationStatus,
    /// When this reservation's hold lapses if never confirmed.
    pub expires_at: DateTime<Utc>,
    /// When this reservation was released, if it was.
    pub released_at: Option<DateTime<Utc>>,
}

/// Why a reservation attempt did not hold stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsufficientStock {
    /// Human-readable reason, suitable for `InventoryReservationFailed.reason`.
    pub reason: String,
}

/// Attempt to reserve `quantity` units of `item` for `booking_id`, mutating
/// `item`'s counters in place on success.
///
/// # Errors
///
/// Returns [`InsufficientStock`] if `item.available < quantity`; `item` is
/// left unchanged in that case.
pub fn reserve(
    item: &mut InventoryItem,
    booking_id: Uuid,
    quantity: i64,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<InventoryReservation, InsufficientStock> {
    if item.available < quantity {
        return Err(InsufficientStock {
            reason: "insufficient".to_string(),
        });
    }

    item.available -= quantity;
    item.reserved += quantity;

    Ok(InventoryReservation {
        id: Uuid::new_v4(),
        item_id: item.item_id.clone(),
        booking_id,
        quantity,
        status: ReservationStatus::Reserved,
        expires_at: now + ttl,
        released_at: None,
    })
}

/// React to a payment success: confirm the reservation, permanently
/// consuming the held stock. A no-op (returns `false`) if the reservation is
/// not currently `Reserved` (already confirmed, or never existed in this
/// state — the caller acks either way).
#[must_use]
pub fn confirm(reservation: &mut InventoryReservation, item: &mut InventoryItem) -> bool {
    if reservation.status != ReservationStatus::Reserved {
        return false;
    }
    reservation.status = ReservationStatus::Confirmed;
    item.reserved -= reservation.quantity;
    true
}

/// React to a terminal payment failure or sweeper expiry: release the held
/// stock back to `available`. A no-op (returns `false`) if the reservation
/// is not currently `Reserved`.
#[must_use]
pub fn release(
    reservation: &mut InventoryReservation,
    item: &mut InventoryItem,
    now: DateTime<Utc>,
) -> bool {
    if reservation.status != ReservationStatus::Reserved {
        return false;
    }
    reservation.status = ReservationStatus::Released;
    reservation.released_at = Some(now);
    item.reserved -= reservation.quantity;
    item.available += reservation.quantity;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(available: i64, reserved: i64, total: i64) -> InventoryItem {
        InventoryItem { item_id: "ROOM-101".to_string(), name: "Room 101".to_string(), total, available, reserved }
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test verified reservation succeeds above
    fn reserve_succeeds_and_updates_counters() {
        let mut item = item(1, 0, 1);
        let reservation = reserve(&mut item, Uuid::new_v4(), 1, Utc::now(), chrono::Duration::minutes(15)).unwrap();
        assert_eq!(item.available, 0);
        assert_eq!(item.reserved, 1);
        assert_eq!(reservation.status, ReservationStatus::Reserved);
        assert!(item.invariant_holds());
    }

    #[test]
    fn reserve_fails_when_insufficient() {
        let mut item = item(0, 0, 1);
        let result = reserve(&mut item, Uuid::new_v4(), 1, Utc::now(), chrono::Duration::minutes(15));
        assert_eq!(result, Err(InsufficientStock { reason: "insufficient".to_string() }));
        assert_eq!(item.available, 0);
        assert_eq!(item.reserved, 0);
    }

    #[test]
    fn confirm_consumes_reserved_stock_permanently() {
        let mut item = item(0, 1, 1);
        let mut reservation = InventoryReservation {
            id: Uuid::new_v4(), item_id: item.item_id.clone(), booking_id: Uuid::new_v4(),
            quantity: 1, status: ReservationStatus::Reserved, expires_at: Utc::now(), released_at: None,
        };
        assert!(confirm(&mut reservation, &mut item));
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(item.reserved, 0);
        assert_eq!(item.available, 0);
    }

    #[test]
    fn confirm_on_already_confirmed_reservation_is_noop() {
        let mut item = item(0, 0, 1);
        let mut reservation = InventoryReservation {
            id: Uuid::new_v4(), item_id: item.item_id.clone(), booking_id: Uuid::new_v4(),
            quantity: 1, status: ReservationStatus::Confirmed, expires_at: Utc::now(), released_at: None,
        };
        assert!(!confirm(&mut reservation, &mut item));
        assert_eq!(item.reserved, 0);
    }

    #[test]
    fn release_restores_available_stock() {
        let mut item = item(0, 1, 1);
        let mut reservation = InventoryReservation {
            id: Uuid::new_v4(), item_id: item.item_id.clone(), booking_id: Uuid::new_v4(),
            quantity: 1, status: ReservationStatus::Reserved, expires_at: Utc::now(), released_at: None,
        };
        let now = Utc::now();
        assert!(release(&mut reservation, &mut item, now));
        assert_eq!(reservation.status, ReservationStatus::Released);
        assert_eq!(reservation.released_at, Some(now));
        assert_eq!(item.available, 1);
        assert_eq!(item.reserved, 0);
    }

    #[test]
    fn release_on_already_released_reservation_is_noop() {
        let mut item = item(1, 0, 1);
        let mut reservation = InventoryReservation {
            id: Uuid::new_v4(), item_id: item.item_id.clone(), booking_id: Uuid::new_v4(),
            quantity: 1, status: ReservationStatus::Released, expires_at: Utc::now(), released_at: Some(Utc::now()),
        };
        assert!(!release(&mut reservation, &mut item, Utc::now()));
        assert_eq!(item.available, 1);
    }
}
