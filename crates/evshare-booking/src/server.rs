use crate::api::BookingApi;
use crate::config::BookingConfig;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::completion::CompletionSweeper;
use crate::domain::engine::BookingEngine;
use crate::domain::pricing::PricingCalculator;
use crate::domain::types::Money;
use crate::error::BookingError;
use crate::storage::{
    BookingStore, DatabaseConnection, SqlBookingStore, SqlMembershipCatalog, SqlPromotionCatalog,
    SqlUserDirectory,
};
use evshare_common::distributed::{LeaderElection, LockKey};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Hosts the booking engine and its background completion sweeper
pub struct BookingServer {
    config: BookingConfig,
    connection: Arc<DatabaseConnection>,
}

impl BookingServer {
    pub fn new(config: BookingConfig, connection: Arc<DatabaseConnection>) -> Self {
        Self { config, connection }
    }

    pub async fn new_with_config(config: BookingConfig) -> anyhow::Result<Self> {
        let connection = Arc::new(
            DatabaseConnection::new(&config.database)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?,
        );

        Ok(Self { config, connection })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        match sqlx::migrate!("./migrations").run(self.connection.pool()).await {
            Ok(_) => {
                info!("Database migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to run database migrations: {}", e);
                Err(anyhow::anyhow!("Migration failed: {}", e))
            }
        }
    }

    fn store(&self) -> Arc<dyn BookingStore> {
        Arc::new(SqlBookingStore::new(self.connection.clone()))
    }

    /// Engine wired to the PostgreSQL store and catalogs.
    pub fn engine(&self) -> Result<BookingEngine, BookingError> {
        let pricing =
            PricingCalculator::new(Money::from_decimal(self.config.pricing.hourly_rate))?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Ok(BookingEngine::new(
            self.store(),
            Arc::new(SqlUserDirectory::new(self.connection.clone())),
            Arc::new(SqlMembershipCatalog::new(self.connection.clone())),
            Arc::new(SqlPromotionCatalog::new(self.connection.clone())),
            clock,
        )
        .with_pricing(pricing)
        .with_min_charge_level(self.config.fleet.min_charge_level))
    }

    pub fn api(&self) -> Result<BookingApi, BookingError> {
        Ok(BookingApi::new(Arc::new(self.engine()?)))
    }

    /// Runs the completion sweeper until `shutdown_signal` resolves. Only the
    /// instance holding the sweep advisory lock does any work.
    pub async fn serve(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let api = self.api()?;
        info!(
            "Booking engine ready (hourly rate {}, min charge {}%)",
            self.config.pricing.hourly_rate, self.config.fleet.min_charge_level
        );

        if !self.config.sweeper.enabled {
            info!("Completion sweeper disabled, waiting for shutdown");
            shutdown_signal.await;
            return self.shutdown().await;
        }

        let sweeper = Arc::new(CompletionSweeper::new(
            api.engine().store(),
            api.engine().clock(),
        ));
        let period = self.config.sweep_interval();
        let election = LeaderElection::new(
            self.connection.pool().clone(),
            LockKey::BOOKING_COMPLETION_SWEEP,
        )
        .with_retry_interval(self.config.lock_retry_interval());

        info!(
            "Starting completion sweeper (interval {:?}, lock {})",
            period,
            LockKey::BOOKING_COMPLETION_SWEEP
        );

        let leader_loop = async move {
            election
                .run_as_leader(move || {
                    let sweeper = sweeper.clone();
                    async move {
                        Self::sweep_loop(sweeper, period)
                            .await
                            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                    }
                })
                .await;
        };

        tokio::select! {
            _ = leader_loop => {}
            _ = shutdown_signal => {
                info!("Shutdown signal received");
            }
        }

        self.shutdown().await
    }

    /// Returns only when a sweep fails outright, which hands leadership back.
    async fn sweep_loop(
        sweeper: Arc<CompletionSweeper>,
        period: Duration,
    ) -> Result<(), BookingError> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = sweeper.sweep().await?;
            if !report.failed.is_empty() {
                warn!(
                    "{} bookings could not be completed and will be retried",
                    report.failed.len()
                );
            }
        }
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        info!("Closing database connections");
        self.connection.pool().close().await;
        info!("Booking server shutdown complete");
        Ok(())
    }
}
