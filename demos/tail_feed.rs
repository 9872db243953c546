//! Tail a telemetry feed and log every snapshot, alert and connection change.
//!
//! ```text
//! TELEMETRY_URL=ws://localhost:8765 RUST_LOG=info,telemetry_ws=debug cargo run --example tail_feed
//! ```

use std::collections::HashSet;

use telemetry_ws::{
    Channel, ClientConfig, DEFAULT_URL, EquipmentCategory, Severity, TelemetryClient,
    TelemetryEvent, TelemetryResult,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> TelemetryResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::var("TELEMETRY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let client = TelemetryClient::new(ClientConfig::new(url.clone()))?;

    let mut seen_alerts = HashSet::new();
    let _snapshots = client
        .subscribe(Channel::Snapshot, move |event: &TelemetryEvent| {
            let Some(snapshot) = event.snapshot() else {
                return Ok(());
            };
            let low_fuel = snapshot
                .equipment(EquipmentCategory::Trucks)
                .values()
                .filter(|truck| truck.number("fuel_level").is_some_and(|fuel| fuel < 20.0))
                .count();
            info!(
                mine = snapshot.mine_id.as_deref().unwrap_or("-"),
                trucks = snapshot.trucks.len(),
                crushers = snapshot.crushers.len(),
                stockpiles = snapshot.stockpiles.len(),
                throughput = snapshot.kpi("total_throughput").unwrap_or(0.0),
                low_fuel,
                "snapshot"
            );
            for alert in &snapshot.alerts {
                if !seen_alerts.insert(alert.id.clone()) {
                    continue;
                }
                match alert.severity {
                    Severity::Urgent => error!(equipment = %alert.equipment, "{}", alert.message),
                    Severity::Warning => warn!(equipment = %alert.equipment, "{}", alert.message),
                    Severity::Info => info!(equipment = %alert.equipment, "{}", alert.message),
                }
            }
            Ok(())
        })
        .await?;

    let _state = client
        .subscribe(Channel::State, |event: &TelemetryEvent| {
            if let TelemetryEvent::StateChanged { from, to } = event {
                info!(%from, %to, "connection state");
            }
            Ok(())
        })
        .await?;

    let _errors = client
        .subscribe(Channel::Error, |event: &TelemetryEvent| {
            if let Some(err) = event.error() {
                warn!(kind = ?err.kind(), error = %err, "feed error");
            }
            Ok(())
        })
        .await?;

    info!(url = %url, "tailing telemetry feed, ctrl-c to stop");
    client.connect().await?;

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed");
    }

    let stats = client.stats().await?;
    info!(
        frames = stats.frames,
        snapshots = stats.snapshots,
        decode_errors = stats.decode_errors,
        reconnects = stats.reconnects,
        "shutting down"
    );
    client.shutdown().await
}
