use crate::domain::billing::BillingRecord;
use crate::domain::bookings::{Booking, BillingStatementLine, BookingView, RentalHistoryEntry};
use crate::domain::types::{BookingId, BookingStatus, UserId, VehicleId, VehicleStatus};
use crate::domain::vehicles::{Vehicle, VehicleCondition};
use crate::error::{BookingError, Result};
use crate::storage::{
    BillingLedger, BookingLedger, BookingStore, BookingTransaction, VehicleRegistry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Steps of a transaction that tests can force to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertBooking,
    UpdateBooking,
    OpenBilling,
    UpdateBilling,
    MarkAvailable,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    vehicles: HashMap<VehicleId, Vehicle>,
    bookings: HashMap<BookingId, Booking>,
    billings: HashMap<BookingId, BillingRecord>,
}

/// In-memory store for development/testing.
///
/// A transaction holds the store lock for its whole lifetime and works on a
/// staged copy, so transactions are fully serialized and a rollback simply
/// drops the copy.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<Mutex<MemoryState>>,
    fail_points: Arc<parking_lot::Mutex<HashSet<FailPoint>>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_vehicle(&self, vehicle: Vehicle) {
        self.state.lock().await.vehicles.insert(vehicle.id, vehicle);
    }

    pub async fn set_vehicle_status(&self, vehicle_id: &VehicleId, status: VehicleStatus) {
        if let Some(vehicle) = self.state.lock().await.vehicles.get_mut(vehicle_id) {
            vehicle.status = status;
        }
    }

    pub async fn vehicle(&self, vehicle_id: &VehicleId) -> Option<Vehicle> {
        self.state.lock().await.vehicles.get(vehicle_id).cloned()
    }

    pub async fn booking(&self, booking_id: &BookingId) -> Option<Booking> {
        self.state.lock().await.bookings.get(booking_id).cloned()
    }

    pub async fn billing(&self, booking_id: &BookingId) -> Option<BillingRecord> {
        self.state.lock().await.billings.get(booking_id).cloned()
    }

    pub async fn booking_count(&self) -> usize {
        self.state.lock().await.bookings.len()
    }

    pub fn fail_at(&self, point: FailPoint) {
        self.fail_points.lock().insert(point);
    }

    pub fn clear_fail_points(&self) {
        self.fail_points.lock().clear();
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn begin(&self) -> Result<Box<dyn BookingTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(InMemoryTransaction {
            guard: Some(guard),
            staged,
            fail_points: self.fail_points.clone(),
        }))
    }

    async fn active_booking_views(&self, user_id: &UserId) -> Result<Vec<BookingView>> {
        let state = self.state.lock().await;
        let mut views = state
            .bookings
            .values()
            .filter(|b| b.user_id == *user_id && b.is_active())
            .map(|booking| -> Result<BookingView> {
                let vehicle = state.vehicles.get(&booking.vehicle_id).ok_or_else(|| {
                    BookingError::InvariantViolation {
                        message: format!(
                            "booking {} references missing vehicle {}",
                            booking.id, booking.vehicle_id
                        ),
                    }
                })?;
                let total_amount = state
                    .billings
                    .get(&booking.id)
                    .map(|billing| billing.total_amount)
                    .or(booking.total_cost)
                    .unwrap_or_default();

                Ok(BookingView {
                    booking_id: booking.id,
                    vehicle_id: vehicle.id,
                    license_plate: vehicle.license_plate.clone(),
                    location: vehicle.location.clone(),
                    charge_level: vehicle.charge_level,
                    vehicle_status: vehicle.status,
                    start_time: booking.start_time,
                    end_time: booking.end_time,
                    total_amount,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        views.sort_by_key(|view| (view.start_time, view.booking_id.as_uuid()));
        Ok(views)
    }

    async fn rental_history(&self, user_id: &UserId) -> Result<Vec<RentalHistoryEntry>> {
        let state = self.state.lock().await;
        let mut completed: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == *user_id && b.status == BookingStatus::Completed)
            .collect();
        completed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(completed
            .into_iter()
            .map(|booking| RentalHistoryEntry {
                booking_id: booking.id,
                vehicle_id: booking.vehicle_id,
                license_plate: state
                    .vehicles
                    .get(&booking.vehicle_id)
                    .map(|v| v.license_plate.clone())
                    .unwrap_or_default(),
                start_time: booking.start_time,
                end_time: booking.end_time,
                total_cost: booking.total_cost.unwrap_or_default(),
                completed_at: booking.updated_at,
            })
            .collect())
    }

    async fn billing_statement(&self, user_id: &UserId) -> Result<Vec<BillingStatementLine>> {
        let state = self.state.lock().await;
        let mut lines: Vec<BillingStatementLine> = state
            .bookings
            .values()
            .filter(|b| b.user_id == *user_id)
            .filter_map(|booking| {
                state.billings.get(&booking.id).map(|billing| BillingStatementLine {
                    booking_id: booking.id,
                    booking_status: booking.status,
                    payment_status: billing.payment_status,
                    payment_method: billing.payment_method,
                    total_amount: billing.total_amount,
                    billed_at: billing.created_at,
                })
            })
            .collect();
        lines.sort_by_key(|line| (line.billed_at, line.booking_id.as_uuid()));
        Ok(lines)
    }

    async fn elapsed_active_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>> {
        let state = self.state.lock().await;
        let mut elapsed: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.is_active() && b.end_time <= now)
            .collect();
        elapsed.sort_by_key(|b| b.end_time);
        Ok(elapsed.into_iter().map(|b| b.id).collect())
    }

    async fn available_vehicles(&self, min_charge_level: u8) -> Result<Vec<Vehicle>> {
        let state = self.state.lock().await;
        let mut vehicles: Vec<Vehicle> = state
            .vehicles
            .values()
            .filter(|v| v.is_bookable(min_charge_level))
            .cloned()
            .collect();
        vehicles.sort_by_key(|v| v.id.value());
        Ok(vehicles)
    }

    async fn get_vehicle(&self, vehicle_id: &VehicleId) -> Result<Option<Vehicle>> {
        Ok(self.state.lock().await.vehicles.get(vehicle_id).cloned())
    }
}

pub struct InMemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: MemoryState,
    fail_points: Arc<parking_lot::Mutex<HashSet<FailPoint>>>,
}

impl InMemoryTransaction {
    fn check(&self, point: FailPoint) -> Result<()> {
        self.ensure_open()?;
        if self.fail_points.lock().contains(&point) {
            return Err(BookingError::DatabaseError {
                operation: format!("{:?}", point),
                source: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(BookingError::InvariantViolation {
                message: "transaction already finished".to_string(),
            });
        }
        Ok(())
    }

    fn vehicle_mut(&mut self, vehicle_id: &VehicleId) -> Result<&mut Vehicle> {
        self.staged
            .vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| BookingError::VehicleNotFound {
                id: vehicle_id.to_string(),
            })
    }
}

#[async_trait]
impl VehicleRegistry for InMemoryTransaction {
    async fn is_available(&mut self, vehicle_id: &VehicleId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.vehicle_mut(vehicle_id)?.is_available())
    }

    async fn mark_booked(&mut self, vehicle_id: &VehicleId, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        let vehicle = self.vehicle_mut(vehicle_id)?;
        if !vehicle.is_available() {
            return Err(BookingError::VehicleNotAvailable {
                id: vehicle_id.to_string(),
            });
        }
        vehicle.status = VehicleStatus::Booked;
        vehicle.updated_at = now;
        Ok(())
    }

    async fn mark_available(&mut self, vehicle_id: &VehicleId, now: DateTime<Utc>) -> Result<()> {
        self.check(FailPoint::MarkAvailable)?;
        let vehicle = self.vehicle_mut(vehicle_id)?;
        vehicle.status = VehicleStatus::Available;
        vehicle.updated_at = now;
        Ok(())
    }

    async fn update_condition(
        &mut self,
        vehicle_id: &VehicleId,
        condition: &VehicleCondition,
        now: DateTime<Utc>,
    ) -> Result<Vehicle> {
        self.ensure_open()?;
        let vehicle = self.vehicle_mut(vehicle_id)?;
        vehicle.apply_condition(condition, now);
        Ok(vehicle.clone())
    }
}

#[async_trait]
impl BookingLedger for InMemoryTransaction {
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        self.check(FailPoint::InsertBooking)?;
        let vehicle_taken = self
            .staged
            .bookings
            .values()
            .any(|b| b.vehicle_id == booking.vehicle_id && b.is_active());
        if booking.is_active() && vehicle_taken {
            return Err(BookingError::VehicleNotAvailable {
                id: booking.vehicle_id.to_string(),
            });
        }
        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: &BookingId) -> Result<Option<Booking>> {
        self.ensure_open()?;
        Ok(self.staged.bookings.get(booking_id).cloned())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        self.check(FailPoint::UpdateBooking)?;
        match self.staged.bookings.get_mut(&booking.id) {
            Some(existing) => {
                *existing = booking.clone();
                Ok(())
            }
            None => Err(BookingError::BookingNotFound {
                id: booking.id.to_string(),
            }),
        }
    }

    async fn count_active_bookings(&mut self, user_id: &UserId) -> Result<u64> {
        self.ensure_open()?;
        Ok(self
            .staged
            .bookings
            .values()
            .filter(|b| b.user_id == *user_id && b.is_active())
            .count() as u64)
    }
}

#[async_trait]
impl BillingLedger for InMemoryTransaction {
    async fn open_billing(&mut self, record: &BillingRecord) -> Result<()> {
        self.check(FailPoint::OpenBilling)?;
        if self.staged.billings.contains_key(&record.booking_id) {
            return Err(BookingError::InvariantViolation {
                message: format!("booking {} already has a billing record", record.booking_id),
            });
        }
        self.staged.billings.insert(record.booking_id, record.clone());
        Ok(())
    }

    async fn lock_billing(&mut self, booking_id: &BookingId) -> Result<Option<BillingRecord>> {
        self.ensure_open()?;
        Ok(self.staged.billings.get(booking_id).cloned())
    }

    async fn update_billing(&mut self, record: &BillingRecord) -> Result<()> {
        self.check(FailPoint::UpdateBilling)?;
        match self.staged.billings.get_mut(&record.booking_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(BookingError::BillingNotFound {
                booking_id: record.booking_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl BookingTransaction for InMemoryTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.check(FailPoint::Commit)?;
        if let Some(mut guard) = self.guard.take() {
            *guard = std::mem::take(&mut self.staged);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.guard = None;
        self.staged = MemoryState::default();
        Ok(())
    }
}
