//! Asynchronous pressure event delivery.
//!
//! Platform pressure signals typically arrive on another thread. The
//! [`PressureSender`] stamps each level with the controller's next sequence
//! and forwards it over an mpsc channel; the controller's listener task
//! applies events in arrival order and drops stale ones.

use super::{DegradationController, PressureEvent, PressureLevel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sending half of a pressure channel.
#[derive(Clone)]
pub struct PressureSender {
    tx: mpsc::Sender<PressureEvent>,
    sequence: Arc<AtomicU64>,
}

impl PressureSender {
    /// Stamps and sends a level. Returns false if the listener has stopped.
    pub async fn send(&self, level: PressureLevel) -> bool {
        let event = self.stamp(level);
        self.tx.send(event).await.is_ok()
    }

    /// Stamps and sends a level without waiting.
    ///
    /// Returns false if the channel is full or closed. Usable from
    /// non-async platform callbacks.
    pub fn try_send(&self, level: PressureLevel) -> bool {
        let event = self.stamp(level);
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(level = %level, error = %e, "Dropping pressure event");
                false
            }
        }
    }

    pub(super) fn stamp(&self, level: PressureLevel) -> PressureEvent {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        PressureEvent::new(level, sequence)
    }
}

impl DegradationController {
    /// Creates a pressure channel with the given buffer capacity.
    ///
    /// The sender stamps events from this controller's sequence counter.
    pub fn pressure_channel(
        &self,
        capacity: usize,
    ) -> (PressureSender, mpsc::Receiver<PressureEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = PressureSender {
            tx,
            sequence: Arc::clone(&self.sequence),
        };
        (sender, rx)
    }

    /// Spawns a task applying events from `rx` until shutdown or until every
    /// sender is dropped.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<PressureEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,

                    event = rx.recv() => match event {
                        Some(event) => {
                            controller.apply(event);
                        }
                        None => {
                            debug!("Pressure channel closed");
                            break;
                        }
                    },
                }
            }
        })
    }
}
