//! Detector packet consumer.
//!
//! One consumer owns one handler and drains one channel, matching the
//! one-packet-at-a-time-per-partition delivery model. Trigger/resolve
//! results are published on the control bus for the occurrence pipeline.
//!
//! A store failure during evaluation is retried here with a short backoff;
//! if the store stays down the error propagates so the surrounding
//! delivery machinery can redeliver from its own offset — a lost
//! evaluation cycle must never be swallowed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sieve_detectors::{DataPacket, DetectorResult, StatefulDetectorHandler};
use sieve_events::{ControlBus, ControlEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Event type published when a detector triggers.
pub const DETECTOR_TRIGGERED: &str = "detector.triggered";

/// Event type published when a detector resolves.
pub const DETECTOR_RESOLVED: &str = "detector.resolved";

/// Attempts per packet before giving up on the backing store.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff between attempts; grows linearly.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Drains data packets into a detector handler.
pub struct PacketConsumer {
    handler: StatefulDetectorHandler,
    rx: mpsc::Receiver<DataPacket>,
    bus: Arc<ControlBus>,
    cancel: CancellationToken,
}

impl PacketConsumer {
    pub fn new(
        handler: StatefulDetectorHandler,
        rx: mpsc::Receiver<DataPacket>,
        bus: Arc<ControlBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            rx,
            bus,
            cancel,
        }
    }

    /// Consume until the channel closes or the token cancels.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("packet consumer shutting down");
                    return Ok(());
                }
                packet = self.rx.recv() => {
                    let Some(packet) = packet else {
                        tracing::info!("packet channel closed; consumer exiting");
                        return Ok(());
                    };
                    self.process(&packet).await?;
                }
            }
        }
    }

    async fn process(&mut self, packet: &DataPacket) -> anyhow::Result<()> {
        let mut attempt = 1;
        let results = loop {
            match self.handler.evaluate(packet).await {
                Ok(results) => break results,
                Err(err) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, %err, "detector evaluation failed; retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).context("detector evaluation exhausted retries");
                }
            }
        };

        for result in results {
            self.publish(result);
        }
        Ok(())
    }

    fn publish(&self, result: DetectorResult) {
        let event = match result {
            DetectorResult::Triggered(occurrence) => {
                tracing::info!(
                    detector_id = occurrence.detector_id,
                    priority = occurrence.priority.as_str(),
                    "detector triggered"
                );
                ControlEvent::new(DETECTOR_TRIGGERED)
                    .with_project(occurrence.project_id)
                    .with_payload(serde_json::json!(occurrence))
            }
            DetectorResult::Resolved(change) => {
                tracing::info!(detector_id = change.detector_id, "detector resolved");
                ControlEvent::new(DETECTOR_RESOLVED)
                    .with_project(change.project_id)
                    .with_payload(serde_json::json!(change))
            }
        };
        self.bus.publish(event);
    }
}
