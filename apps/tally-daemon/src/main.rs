//! # Tally Daemon
//!
//! Back-office process around the drawer ledger.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          tally-daemon                                   │
//! │                                                                         │
//! │   interval tick ──► ConsistencyValidator::validate_range(lookback)     │
//! │                          │                   │                          │
//! │                          ▼                   ▼                          │
//! │                    AlertSink ──► alert logger task                      │
//! │                                                                         │
//! │   each tick also logs the Ledger Store telemetry snapshot               │
//! │                                                                         │
//! │   SIGINT / SIGTERM ──► CancellationToken ──► tasks drain ──► pool close │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//! 1. Initialize tracing (`RUST_LOG`, default `info`)
//! 2. Load configuration (optional path as the first argument)
//! 3. Open the Ledger Store and run migrations
//! 4. Spawn the alert logger and the validation scheduler
//! 5. Wait for a shutdown signal

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::AlertSeverity;
use tally_engine::{AlertFilter, EngineError, Ledger, LedgerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Tally daemon...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = LedgerConfig::load(config_path)?;
    info!(
        db_path = ?config.database.path,
        auto_correct_limit = config.reconciliation.auto_correct_limit,
        tolerance_epsilon = config.reconciliation.tolerance_epsilon,
        interval_secs = config.validation.interval_secs,
        "Configuration loaded"
    );

    let (ledger, db) = Ledger::connect(&config).await?;
    let ledger = Arc::new(ledger);
    let cancel = CancellationToken::new();

    let alert_task = tokio::spawn(log_alerts(ledger.clone(), cancel.clone()));
    let scan_task = tokio::spawn(run_validation(ledger.clone(), config.clone(), cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();

    for (name, task) in [("alert logger", alert_task), ("validation", scan_task)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Background task panicked");
        }
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Logs every alert on the stream at a level matching its severity.
async fn log_alerts(ledger: Arc<Ledger>, cancel: CancellationToken) {
    let mut alerts = ledger.alerts.subscribe(AlertFilter::all());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = alerts.recv() => {
                let Some(alert) = next else { break };
                match alert.severity {
                    AlertSeverity::Critical | AlertSeverity::High => warn!(
                        alert_type = %alert.alert_type,
                        severity = %alert.severity,
                        business_date = %alert.business_date,
                        session_id = ?alert.session_id,
                        requires_action = alert.requires_action,
                        payload = %alert.payload,
                        "Financial alert"
                    ),
                    AlertSeverity::Medium | AlertSeverity::Low => info!(
                        alert_type = %alert.alert_type,
                        severity = %alert.severity,
                        business_date = %alert.business_date,
                        session_id = ?alert.session_id,
                        "Financial alert"
                    ),
                }
            }
        }
    }
}

/// Re-validates the lookback window on every tick.
async fn run_validation(ledger: Arc<Ledger>, config: LedgerConfig, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.validation.interval_secs));
    let lookback = u64::from(config.validation.lookback_days.max(1) - 1);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let today = Utc::now().date_naive();
        let from = today.checked_sub_days(Days::new(lookback)).unwrap_or(today);

        match ledger.validator.validate_range(from, today, &cancel).await {
            Ok(reports) => {
                let inconsistent = reports.iter().filter(|r| !r.consistent).count();
                info!(
                    from = %from,
                    to = %today,
                    days = reports.len(),
                    inconsistent,
                    "Consistency scan complete"
                );
            }
            Err(EngineError::Cancelled) => break,
            Err(e) => error!(error = %e, "Consistency scan failed"),
        }

        let telemetry = ledger.telemetry().await;
        if telemetry.needs_escalation() {
            warn!(
                calls = telemetry.calls,
                failures = telemetry.failures,
                p95_ms = telemetry.p95_latency_ms,
                sla_compliance_bps = telemetry.sla_compliance_bps,
                sla_target_bps = telemetry.sla_target_bps,
                "Ledger store below SLA target"
            );
        } else {
            info!(
                calls = telemetry.calls,
                failures = telemetry.failures,
                mean_ms = telemetry.mean_latency_ms,
                p95_ms = telemetry.p95_latency_ms,
                sla_compliance_bps = telemetry.sla_compliance_bps,
                "Ledger store telemetry"
            );
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
