//! Sampling / detector worker.
//!
//! Wires the in-memory store, control bus, quota table, and registry
//! together and runs the periodic sampling scheduler until interrupted.
//! Detector packet consumers are spawned by the platform once it has real
//! detector configs to hand over; see [`consumer::PacketConsumer`].

mod consumer;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use sieve_detectors::DetectorRegistry;
use sieve_events::ControlBus;
use sieve_sampling::{RecalibrationController, StaticTierTable, VolumeTier};
use sieve_store::{MemoryStore, ProjectBoostStore, RecalibrationStore, SlidingWindowStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::scheduler::{NullVolumeFeed, SamplingScheduler};

/// How often the sampling tasks recompute.
const SCHEDULE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default tier table until the platform's quota service is wired in.
fn default_quotas() -> StaticTierTable {
    StaticTierTable::new(
        0.25,
        vec![
            VolumeTier { volume: 100_000.0, rate: 1.0 },
            VolumeTier { volume: 1_000_000.0, rate: 0.5 },
            VolumeTier { volume: 10_000_000.0, rate: 0.1 },
            VolumeTier { volume: 100_000_000.0, rate: 0.05 },
        ],
    )
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sieve_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(ControlBus::default());
    let quotas = Arc::new(default_quotas());
    let registry = DetectorRegistry::with_defaults();
    let cancel = CancellationToken::new();

    let scheduler = SamplingScheduler::new(
        Arc::new(NullVolumeFeed),
        quotas,
        ProjectBoostStore::new(store.clone()),
        Arc::new(SlidingWindowStore::new(store.clone(), bus.clone())),
        RecalibrationController::new(RecalibrationStore::new(store.clone())),
        SCHEDULE_INTERVAL,
        cancel.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    debug_assert!(registry.is_registered(sieve_detectors::DetectorKind::MetricThreshold));
    tracing::info!("sieve worker started");

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
    cancel.cancel();
    let _ = scheduler_task.await;
}
