use crate::domain::billing::BillingRecord;
use crate::domain::bookings::{Booking, BillingStatementLine, BookingView, RentalHistoryEntry};
use crate::domain::types::{
    BillingId, BookingId, BookingStatus, Cleanliness, Money, PaymentMethod, PaymentStatus,
    UserId, VehicleId, VehicleStatus,
};
use crate::domain::vehicles::{Vehicle, VehicleCondition};
use crate::error::{BookingError, Result};
use crate::storage::{
    BillingLedger, BookingLedger, BookingStore, BookingTransaction, DatabaseConnection,
    VehicleRegistry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Postgres, Row, Transaction};
use std::sync::Arc;

const UNIQUE_VIOLATION: &str = "23505";

const VEHICLE_COLUMNS: &str = "vehicle_id, license_plate, location, charge_level, status, \
                               cleanliness, created_at, updated_at";

const BOOKING_COLUMNS: &str = "booking_id, user_id, vehicle_id, start_time, end_time, status, \
                               total_cost, created_at, updated_at";

const BILLING_COLUMNS: &str = "billing_id, booking_id, payment_status, payment_method, \
                               total_amount, created_at, updated_at";

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| BookingError::database("decode_row", e))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

fn charge_level(row: &PgRow) -> Result<u8> {
    let raw: i16 = column(row, "charge_level")?;
    u8::try_from(raw).map_err(|_| BookingError::InvariantViolation {
        message: format!("stored charge level {} is out of range", raw),
    })
}

fn vehicle_from_row(row: &PgRow) -> Result<Vehicle> {
    Ok(Vehicle {
        id: VehicleId::new(column(row, "vehicle_id")?),
        license_plate: column(row, "license_plate")?,
        location: column(row, "location")?,
        charge_level: charge_level(row)?,
        status: column::<String>(row, "status")?.parse::<VehicleStatus>()?,
        cleanliness: column::<String>(row, "cleanliness")?.parse::<Cleanliness>()?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking> {
    Ok(Booking {
        id: BookingId::from_uuid(column(row, "booking_id")?),
        user_id: UserId::new(column(row, "user_id")?),
        vehicle_id: VehicleId::new(column(row, "vehicle_id")?),
        start_time: column(row, "start_time")?,
        end_time: column(row, "end_time")?,
        status: column::<String>(row, "status")?.parse::<BookingStatus>()?,
        total_cost: column::<Option<Decimal>>(row, "total_cost")?.map(Money::from_decimal),
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn billing_from_row(row: &PgRow) -> Result<BillingRecord> {
    Ok(BillingRecord {
        id: BillingId::from_uuid(column(row, "billing_id")?),
        booking_id: BookingId::from_uuid(column(row, "booking_id")?),
        payment_status: column::<String>(row, "payment_status")?.parse::<PaymentStatus>()?,
        payment_method: column::<String>(row, "payment_method")?.parse::<PaymentMethod>()?,
        total_amount: Money::from_decimal(column(row, "total_amount")?),
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

pub struct SqlBookingStore {
    connection: Arc<DatabaseConnection>,
}

impl SqlBookingStore {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl BookingStore for SqlBookingStore {
    async fn begin(&self) -> Result<Box<dyn BookingTransaction>> {
        let tx = self
            .connection
            .pool()
            .begin()
            .await
            .map_err(|e| BookingError::database("begin", e))?;
        Ok(Box::new(SqlBookingTransaction { tx: Some(tx) }))
    }

    async fn active_booking_views(&self, user_id: &UserId) -> Result<Vec<BookingView>> {
        let rows = sqlx::query(
            r#"
            SELECT b.booking_id, b.vehicle_id, v.license_plate, v.location, v.charge_level,
                   v.status AS vehicle_status, b.start_time, b.end_time,
                   COALESCE(bi.total_amount, b.total_cost, 0) AS total_amount
            FROM bookings b
            JOIN vehicles v ON v.vehicle_id = b.vehicle_id
            LEFT JOIN billings bi ON bi.booking_id = b.booking_id
            WHERE b.user_id = $1 AND b.status = 'Active'
            ORDER BY b.start_time ASC, b.booking_id ASC
            "#,
        )
        .bind(user_id.value())
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("active_booking_views", e))?;

        rows.iter()
            .map(|row| -> Result<BookingView> {
                Ok(BookingView {
                    booking_id: BookingId::from_uuid(column(row, "booking_id")?),
                    vehicle_id: VehicleId::new(column(row, "vehicle_id")?),
                    license_plate: column(row, "license_plate")?,
                    location: column(row, "location")?,
                    charge_level: charge_level(row)?,
                    vehicle_status: column::<String>(row, "vehicle_status")?
                        .parse::<VehicleStatus>()?,
                    start_time: column(row, "start_time")?,
                    end_time: column(row, "end_time")?,
                    total_amount: Money::from_decimal(column(row, "total_amount")?),
                })
            })
            .collect()
    }

    async fn rental_history(&self, user_id: &UserId) -> Result<Vec<RentalHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT b.booking_id, b.vehicle_id, v.license_plate, b.start_time, b.end_time,
                   COALESCE(b.total_cost, 0) AS total_cost, b.updated_at
            FROM bookings b
            JOIN vehicles v ON v.vehicle_id = b.vehicle_id
            WHERE b.user_id = $1 AND b.status = 'Completed'
            ORDER BY b.updated_at DESC
            "#,
        )
        .bind(user_id.value())
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("rental_history", e))?;

        rows.iter()
            .map(|row| -> Result<RentalHistoryEntry> {
                Ok(RentalHistoryEntry {
                    booking_id: BookingId::from_uuid(column(row, "booking_id")?),
                    vehicle_id: VehicleId::new(column(row, "vehicle_id")?),
                    license_plate: column(row, "license_plate")?,
                    start_time: column(row, "start_time")?,
                    end_time: column(row, "end_time")?,
                    total_cost: Money::from_decimal(column(row, "total_cost")?),
                    completed_at: column(row, "updated_at")?,
                })
            })
            .collect()
    }

    async fn billing_statement(&self, user_id: &UserId) -> Result<Vec<BillingStatementLine>> {
        let rows = sqlx::query(
            r#"
            SELECT bi.booking_id, b.status AS booking_status, bi.payment_status,
                   bi.payment_method, bi.total_amount, bi.created_at
            FROM billings bi
            JOIN bookings b ON b.booking_id = bi.booking_id
            WHERE b.user_id = $1
            ORDER BY bi.created_at ASC, bi.booking_id ASC
            "#,
        )
        .bind(user_id.value())
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("billing_statement", e))?;

        rows.iter()
            .map(|row| -> Result<BillingStatementLine> {
                Ok(BillingStatementLine {
                    booking_id: BookingId::from_uuid(column(row, "booking_id")?),
                    booking_status: column::<String>(row, "booking_status")?
                        .parse::<BookingStatus>()?,
                    payment_status: column::<String>(row, "payment_status")?
                        .parse::<PaymentStatus>()?,
                    payment_method: column::<String>(row, "payment_method")?
                        .parse::<PaymentMethod>()?,
                    total_amount: Money::from_decimal(column(row, "total_amount")?),
                    billed_at: column(row, "created_at")?,
                })
            })
            .collect()
    }

    async fn elapsed_active_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            r#"
            SELECT booking_id FROM bookings
            WHERE status = 'Active' AND end_time <= $1
            ORDER BY end_time ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("elapsed_active_bookings", e))?;

        Ok(ids.into_iter().map(BookingId::from_uuid).collect())
    }

    async fn available_vehicles(&self, min_charge_level: u8) -> Result<Vec<Vehicle>> {
        let rows = sqlx::query(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles \
             WHERE status = 'Available' AND charge_level >= $1 ORDER BY vehicle_id"
        ))
        .bind(i16::from(min_charge_level))
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("available_vehicles", e))?;

        rows.iter().map(vehicle_from_row).collect()
    }

    async fn get_vehicle(&self, vehicle_id: &VehicleId) -> Result<Option<Vehicle>> {
        let row = sqlx::query(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE vehicle_id = $1"
        ))
        .bind(vehicle_id.value())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("get_vehicle", e))?;

        row.as_ref().map(vehicle_from_row).transpose()
    }
}

/// Wraps one PostgreSQL transaction. Dropping it uncommitted rolls back.
pub struct SqlBookingTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl SqlBookingTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| BookingError::InvariantViolation {
                message: "transaction already finished".to_string(),
            })
    }

    async fn vehicle_exists(&mut self, vehicle_id: &VehicleId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT vehicle_id FROM vehicles WHERE vehicle_id = $1")
                .bind(vehicle_id.value())
                .fetch_optional(self.conn()?)
                .await
                .map_err(|e| BookingError::database("vehicle_exists", e))?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl VehicleRegistry for SqlBookingTransaction {
    async fn is_available(&mut self, vehicle_id: &VehicleId) -> Result<bool> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM vehicles WHERE vehicle_id = $1")
                .bind(vehicle_id.value())
                .fetch_optional(self.conn()?)
                .await
                .map_err(|e| BookingError::database("is_available", e))?;

        match status {
            Some(status) => Ok(status.parse::<VehicleStatus>()? == VehicleStatus::Available),
            None => Err(BookingError::VehicleNotFound {
                id: vehicle_id.to_string(),
            }),
        }
    }

    async fn mark_booked(&mut self, vehicle_id: &VehicleId, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE vehicles SET status = 'Booked', updated_at = $2
            WHERE vehicle_id = $1 AND status = 'Available'
            "#,
        )
        .bind(vehicle_id.value())
        .bind(now)
        .execute(self.conn()?)
        .await
        .map_err(|e| BookingError::database("mark_booked", e))?;

        if result.rows_affected() == 0 {
            if self.vehicle_exists(vehicle_id).await? {
                return Err(BookingError::VehicleNotAvailable {
                    id: vehicle_id.to_string(),
                });
            }
            return Err(BookingError::VehicleNotFound {
                id: vehicle_id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_available(&mut self, vehicle_id: &VehicleId, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE vehicles SET status = 'Available', updated_at = $2 WHERE vehicle_id = $1",
        )
        .bind(vehicle_id.value())
        .bind(now)
        .execute(self.conn()?)
        .await
        .map_err(|e| BookingError::database("mark_available", e))?;

        if result.rows_affected() == 0 {
            return Err(BookingError::VehicleNotFound {
                id: vehicle_id.to_string(),
            });
        }
        Ok(())
    }

    async fn update_condition(
        &mut self,
        vehicle_id: &VehicleId,
        condition: &VehicleCondition,
        now: DateTime<Utc>,
    ) -> Result<Vehicle> {
        let row = sqlx::query(&format!(
            "UPDATE vehicles SET location = $2, charge_level = $3, cleanliness = $4, \
             updated_at = $5 WHERE vehicle_id = $1 RETURNING {VEHICLE_COLUMNS}"
        ))
        .bind(vehicle_id.value())
        .bind(&condition.location)
        .bind(i16::from(condition.charge_level))
        .bind(condition.cleanliness.as_str())
        .bind(now)
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| BookingError::database("update_condition", e))?;

        match row {
            Some(row) => vehicle_from_row(&row),
            None => Err(BookingError::VehicleNotFound {
                id: vehicle_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl BookingLedger for SqlBookingTransaction {
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings
            (booking_id, user_id, vehicle_id, start_time, end_time, status, total_cost,
             created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(booking.user_id.value())
        .bind(booking.vehicle_id.value())
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.status.as_str())
        .bind(booking.total_cost.map(|cost| cost.as_decimal()))
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| {
            // one Active booking per vehicle is enforced by a partial unique index
            if is_unique_violation(&e) {
                BookingError::VehicleNotAvailable {
                    id: booking.vehicle_id.to_string(),
                }
            } else {
                BookingError::database("insert_booking", e)
            }
        })?;

        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: &BookingId) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = $1 FOR UPDATE"
        ))
        .bind(booking_id.as_uuid())
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| BookingError::database("lock_booking", e))?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET start_time = $2, end_time = $3, status = $4, total_cost = $5, updated_at = $6
            WHERE booking_id = $1
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.status.as_str())
        .bind(booking.total_cost.map(|cost| cost.as_decimal()))
        .bind(booking.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| BookingError::database("update_booking", e))?;

        if result.rows_affected() == 0 {
            return Err(BookingError::BookingNotFound {
                id: booking.id.to_string(),
            });
        }
        Ok(())
    }

    async fn count_active_bookings(&mut self, user_id: &UserId) -> Result<u64> {
        // Holding the user row serializes concurrent creates by the same user.
        sqlx::query("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.value())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| BookingError::database("lock_user", e))?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE user_id = $1 AND status = 'Active'",
        )
        .bind(user_id.value())
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| BookingError::database("count_active_bookings", e))?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl BillingLedger for SqlBookingTransaction {
    async fn open_billing(&mut self, record: &BillingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO billings
            (billing_id, booking_id, payment_status, payment_method, total_amount,
             created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.booking_id.as_uuid())
        .bind(record.payment_status.as_str())
        .bind(record.payment_method.as_str())
        .bind(record.total_amount.as_decimal())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| BookingError::database("open_billing", e))?;

        Ok(())
    }

    async fn lock_billing(&mut self, booking_id: &BookingId) -> Result<Option<BillingRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {BILLING_COLUMNS} FROM billings WHERE booking_id = $1 FOR UPDATE"
        ))
        .bind(booking_id.as_uuid())
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| BookingError::database("lock_billing", e))?;

        row.as_ref().map(billing_from_row).transpose()
    }

    async fn update_billing(&mut self, record: &BillingRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE billings
            SET payment_status = $2, payment_method = $3, total_amount = $4, updated_at = $5
            WHERE booking_id = $1
            "#,
        )
        .bind(record.booking_id.as_uuid())
        .bind(record.payment_status.as_str())
        .bind(record.payment_method.as_str())
        .bind(record.total_amount.as_decimal())
        .bind(record.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| BookingError::database("update_billing", e))?;

        if result.rows_affected() == 0 {
            return Err(BookingError::BillingNotFound {
                booking_id: record.booking_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BookingTransaction for SqlBookingTransaction {
    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|e| BookingError::database("commit", e)),
            None => Err(BookingError::InvariantViolation {
                message: "transaction already finished".to_string(),
            }),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| BookingError::database("rollback", e)),
            None => Ok(()),
        }
    }
}
