//! Admission loop.
//!
//! Drives the probe cadence: each tick resolves the active probe, calls
//! it, and resets the [`CapacityLedger`] that job starts draw from, so
//! the runner always consults a recent capacity figure without touching
//! the database itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time;

use crate::metrics::AppMetrics;
use crate::probe::ProbeInvoker;
use crate::repository::ProbeRepository;

/// Units of job capacity currently available to the runner.
///
/// `available == None` means no probe is active and admission is not
/// throttled.
#[derive(Debug, Clone)]
pub struct CapacityLedger {
    available: Option<f64>,
    probe: Option<String>,
    measured_at: Option<DateTime<Utc>>,
}

/// Serializable view of the ledger, served at `GET /capacity`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacitySnapshot {
    pub available: Option<f64>,
    pub probe: Option<String>,
    pub measured_at: Option<DateTime<Utc>>,
}

impl CapacityLedger {
    /// An unthrottled ledger that has not been measured yet.
    pub fn new() -> Self {
        Self {
            available: None,
            probe: None,
            measured_at: None,
        }
    }

    /// Replace the available capacity with a fresh measurement.
    pub fn reset(&mut self, available: f64, probe: Option<String>) {
        self.available = Some(available);
        self.probe = probe;
        self.measured_at = Some(Utc::now());
    }

    /// Mark admission as unthrottled (no active probe).
    pub fn clear(&mut self) {
        self.available = None;
        self.probe = None;
        self.measured_at = Some(Utc::now());
    }

    /// Take `load` units if that much is available.
    pub fn try_consume(&mut self, load: f64) -> bool {
        match self.available.as_mut() {
            None => true,
            Some(available) if load <= *available => {
                *available -= load;
                true
            }
            Some(_) => false,
        }
    }

    pub fn available(&self) -> Option<f64> {
        self.available
    }

    pub fn snapshot(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            available: self.available,
            probe: self.probe.clone(),
            measured_at: self.measured_at,
        }
    }
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Knobs for [`run_probe_loop`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Capacity assumed whenever a probe cannot be evaluated.
    pub default_capacity: f64,
    /// Pause between ticks when there is no usable active probe.
    pub idle_interval: Duration,
}

/// Run the admission loop until `shutdown` resolves.
///
/// After each evaluation the loop waits the probe's post-delay, or
/// `settings.idle_interval` when no probe could be evaluated. Errors are
/// logged and the loop continues; a broken probe never stops admission.
/// Shutdown interrupts any phase of a tick, including the probe's
/// pre-delay and query.
pub async fn run_probe_loop(
    repository: Arc<ProbeRepository>,
    invoker: Arc<ProbeInvoker>,
    ledger: Arc<RwLock<CapacityLedger>>,
    metrics: Option<Arc<AppMetrics>>,
    settings: LoopSettings,
    shutdown: impl Future<Output = ()>,
) {
    tracing::info!(
        "Admission loop started (default capacity: {}, idle interval: {}s)",
        settings.default_capacity,
        settings.idle_interval.as_secs()
    );

    tokio::pin!(shutdown);

    loop {
        let tick = async {
            let pause = evaluate_once(
                &repository,
                &invoker,
                &ledger,
                metrics.as_deref(),
                settings.default_capacity,
            )
            .await
            .unwrap_or(settings.idle_interval);
            time::sleep(pause).await;
        };

        tokio::select! {
            _ = tick => {}

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested. Stopping admission loop.");
                break;
            }
        }
    }

    tracing::info!("Admission loop stopped cleanly");
}

/// Execute a single evaluation. Returns the active probe's post-delay, or
/// `None` when no probe was evaluated. Extracted for testability.
async fn evaluate_once(
    repository: &ProbeRepository,
    invoker: &ProbeInvoker,
    ledger: &RwLock<CapacityLedger>,
    metrics: Option<&AppMetrics>,
    default_capacity: f64,
) -> Option<Duration> {
    let probe = match repository.active_resolved().await {
        Ok(Some(probe)) => probe,
        Ok(None) => {
            tracing::debug!("No active load probe; admission is unthrottled");
            ledger.write().await.clear();
            return None;
        }
        Err(err) => {
            tracing::error!("Cannot resolve active load probe: {}", err);
            ledger.write().await.reset(default_capacity, None);
            return None;
        }
    };

    let capacity = invoker
        .call_pooled(repository.pool(), &probe, default_capacity)
        .await;

    if let Some(metrics) = metrics {
        metrics.probe_capacity.set(capacity);
    }
    ledger.write().await.reset(capacity, Some(probe.name.clone()));
    tracing::debug!(probe = %probe.name, capacity, "Capacity ledger reset");

    Some(probe.post_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::{create_pool, SqlDialect};
    use crate::probe::ProbeDraft;

    async fn make_repo() -> ProbeRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        ProbeRepository::new(pool)
    }

    fn make_draft(function: &str, call_arguments: &str) -> ProbeDraft {
        ProbeDraft {
            call_arguments: call_arguments.into(),
            scale_factor: 2.0,
            pre_delay_seconds: 0,
            post_delay_seconds: 4,
            ..ProbeDraft::new("Transaction load", function)
        }
    }

    fn make_ledger() -> RwLock<CapacityLedger> {
        RwLock::new(CapacityLedger::new())
    }

    // ---- ledger ----

    #[test]
    fn new_ledger_is_unthrottled() {
        let mut ledger = CapacityLedger::new();
        assert_eq!(ledger.available(), None);
        assert!(ledger.try_consume(1_000.0));
    }

    #[test]
    fn try_consume_draws_down_capacity() {
        let mut ledger = CapacityLedger::new();
        ledger.reset(3.0, Some("load".into()));

        assert!(ledger.try_consume(2.0));
        assert!(!ledger.try_consume(2.0));
        assert!(ledger.try_consume(1.0));
        assert_eq!(ledger.available(), Some(0.0));
    }

    #[test]
    fn snapshot_reflects_latest_measurement() {
        let mut ledger = CapacityLedger::new();
        ledger.reset(10.0, Some("load".into()));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.available, Some(10.0));
        assert_eq!(snapshot.probe.as_deref(), Some("load"));
        assert!(snapshot.measured_at.is_some());
    }

    // ---- evaluate_once ----

    #[tokio::test]
    async fn evaluate_once_without_probe_clears_ledger() {
        let repo = make_repo().await;
        let ledger = make_ledger();
        ledger.write().await.reset(5.0, None);

        let pause = evaluate_once(&repo, &ProbeInvoker::new(SqlDialect::Sqlite), &ledger, None, 0.0).await;

        assert!(pause.is_none());
        assert_eq!(ledger.read().await.available(), None);
    }

    #[tokio::test]
    async fn evaluate_once_resets_ledger_from_probe() {
        let repo = make_repo().await;
        repo.create(&make_draft("abs", "(5,)")).await.unwrap();
        let ledger = make_ledger();
        let metrics = AppMetrics::new().unwrap();

        let pause = evaluate_once(
            &repo,
            &ProbeInvoker::new(SqlDialect::Sqlite),
            &ledger,
            Some(&metrics),
            0.0,
        )
        .await;

        assert_eq!(pause, Some(Duration::from_secs(4)));
        let snapshot = ledger.read().await.snapshot();
        assert_eq!(snapshot.available, Some(10.0));
        assert_eq!(snapshot.probe.as_deref(), Some("Transaction load"));
        assert!((metrics.probe_capacity.get() - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn evaluate_once_uses_default_when_function_fails() {
        let repo = make_repo().await;
        repo.create(&make_draft("no_such_load_function", "()")).await.unwrap();
        let ledger = make_ledger();

        let pause = evaluate_once(&repo, &ProbeInvoker::new(SqlDialect::Sqlite), &ledger, None, 2.0).await;

        assert_eq!(pause, Some(Duration::from_secs(4)));
        assert_eq!(ledger.read().await.available(), Some(2.0));
    }

    #[tokio::test]
    async fn evaluate_once_releases_pool_during_pre_delay() {
        let repo = Arc::new(make_repo().await);
        repo.create(&ProbeDraft {
            pre_delay_seconds: 1,
            ..make_draft("abs", "(5,)")
        })
        .await
        .unwrap();
        let ledger = Arc::new(make_ledger());

        let pending = {
            let repo = repo.clone();
            let ledger = ledger.clone();
            tokio::spawn(async move {
                evaluate_once(&repo, &ProbeInvoker::new(SqlDialect::Sqlite), &ledger, None, 0.0).await
            })
        };

        time::sleep(Duration::from_millis(100)).await;
        // The in-memory pool has one connection; the API must still get it.
        let conn = time::timeout(Duration::from_millis(300), repo.pool().acquire())
            .await
            .expect("connection held while sleeping the pre-delay")
            .unwrap();
        drop(conn);

        assert_eq!(pending.await.unwrap(), Some(Duration::from_secs(4)));
        assert_eq!(ledger.read().await.available(), Some(10.0));
    }

    #[tokio::test]
    async fn loop_stops_while_probe_is_pacing() {
        let repo = Arc::new(make_repo().await);
        repo.create(&ProbeDraft {
            pre_delay_seconds: 60,
            ..make_draft("abs", "(5,)")
        })
        .await
        .unwrap();

        let stopped = time::timeout(
            Duration::from_secs(5),
            run_probe_loop(
                repo,
                Arc::new(ProbeInvoker::new(SqlDialect::Sqlite)),
                Arc::new(make_ledger()),
                None,
                LoopSettings {
                    default_capacity: 0.0,
                    idle_interval: Duration::from_secs(60),
                },
                time::sleep(Duration::from_millis(50)),
            ),
        )
        .await;

        assert!(stopped.is_ok(), "admission loop ignored shutdown during the pre-delay");
    }

    #[tokio::test]
    async fn evaluate_once_uses_default_on_configuration_error() {
        let repo = make_repo().await;
        repo.create(&make_draft("abs", "(5)")).await.unwrap();
        let ledger = make_ledger();

        let pause = evaluate_once(&repo, &ProbeInvoker::new(SqlDialect::Sqlite), &ledger, None, 1.0).await;

        assert!(pause.is_none());
        let snapshot = ledger.read().await.snapshot();
        assert_eq!(snapshot.available, Some(1.0));
        assert!(snapshot.probe.is_none());
    }
}
