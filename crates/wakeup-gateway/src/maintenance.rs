//! Periodic housekeeping: log retention, expired weather, optional prefetch.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use wakeup_core::config::MaintenanceConfig;
use wakeup_notify::{DeliveryReconciler, NotificationDispatcher};
use wakeup_scheduler::JobStore;
use wakeup_weather::WeatherCache;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub notification_logs: usize,
    pub webhook_audits: usize,
    pub weather_snapshots: usize,
    pub weather_api_logs: usize,
    pub prefetched: usize,
}

pub struct Maintenance {
    pub store: Arc<JobStore>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub reconciler: Arc<DeliveryReconciler>,
    pub weather: Arc<WeatherCache>,
    pub config: MaintenanceConfig,
    pub prefetch: bool,
}

impl Maintenance {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs.max(60)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_once(Utc::now()).await;
                    if report != MaintenanceReport::default() {
                        info!(?report, "maintenance pass complete");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One pass. Each step runs even if an earlier one failed.
    pub async fn run_once(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let cfg = &self.config;
        let mut report = MaintenanceReport {
            notification_logs: log_err(
                "notification log",
                self.dispatcher
                    .prune_log(now - Duration::days(cfg.notification_log_days)),
            ),
            webhook_audits: log_err(
                "webhook audit",
                self.reconciler
                    .prune_webhooks(now - Duration::days(cfg.webhook_log_days)),
            ),
            weather_snapshots: log_err("weather cache", self.weather.purge_expired(now)),
            weather_api_logs: log_err(
                "weather api log",
                self.weather
                    .prune_api_log(now - Duration::days(cfg.weather_log_days)),
            ),
            prefetched: 0,
        };

        if self.prefetch && self.weather.has_provider() {
            match self.store.active_weather_locations() {
                Ok(locations) => {
                    for location in locations {
                        if self.weather.get(&location, true).await.is_some() {
                            report.prefetched += 1;
                        }
                    }
                }
                Err(e) => error!(error = %e, "failed to list weather locations"),
            }
        }
        report
    }
}

fn log_err<E: std::fmt::Display>(what: &str, result: Result<usize, E>) -> usize {
    result.unwrap_or_else(|e| {
        error!(error = %e, "{what} cleanup failed");
        0
    })
}
