use crate::domain::bookings::BookingWindow;
use crate::domain::clock::Clock;
use crate::domain::types::{BookingId, BookingStatus};
use crate::error::{BookingError, Result};
use crate::storage::{BookingStore, BookingTransaction};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: Vec<BookingId>,
    pub failed: Vec<BookingId>,
}

/// Marks elapsed Active bookings as Completed and frees their vehicles.
/// Billing records are left as they are.
pub struct CompletionSweeper {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
}

impl CompletionSweeper {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.complete_elapsed(self.clock.now()).await
    }

    /// Each booking is completed in its own transaction, so one failure does
    /// not hold back the rest of the batch.
    pub async fn complete_elapsed(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = self.store.elapsed_active_bookings(now).await?;
        let mut report = SweepReport::default();

        if candidates.is_empty() {
            debug!("No elapsed bookings to complete");
            return Ok(report);
        }

        for booking_id in candidates {
            let mut tx = self.store.begin().await?;
            let outcome = Self::complete_one(tx.as_mut(), &booking_id, now).await;

            let result = match outcome {
                Ok(changed) => tx.commit().await.map(|_| changed),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(
                            "Invariant violation: rollback of completion for booking {} failed: {}",
                            booking_id, rollback_err
                        );
                    }
                    Err(e)
                }
            };

            match result {
                Ok(true) => report.completed.push(booking_id),
                Ok(false) => debug!("Booking {} changed before completion, skipped", booking_id),
                Err(e) => {
                    error!("Failed to complete booking {}: {}", booking_id, e);
                    report.failed.push(booking_id);
                }
            }
        }

        info!(
            "Completion sweep finished: {} completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Returns false when the booking no longer qualifies, e.g. it was
    /// cancelled or extended between listing and locking.
    async fn complete_one(
        tx: &mut dyn BookingTransaction,
        booking_id: &BookingId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut booking = tx.lock_booking(booking_id).await?.ok_or_else(|| {
            BookingError::BookingNotFound {
                id: booking_id.to_string(),
            }
        })?;

        if !booking.is_active() || booking.window(now) != BookingWindow::Elapsed {
            return Ok(false);
        }

        booking.transition_to(BookingStatus::Completed, now)?;
        tx.update_booking(&booking).await?;
        tx.mark_available(&booking.vehicle_id, now).await?;

        info!(
            "Completed booking {} for user {}, vehicle {} released",
            booking.id, booking.user_id, booking.vehicle_id
        );
        Ok(true)
    }
}
