//! In-process viewer: one subscription, one reconciler, one debounced viewport.

use crate::bounds::GeographicBounds;
use crate::broadcast::BroadcastHandle;
use crate::reconcile::{BatchOutcome, ClientReconciler, ErrorState, ReconcilerConfig};
use crate::types::{FlightRecord, SubscriberId};
use crate::viewport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Coalesces bursts of viewport changes.
///
/// Only the most recent value is forwarded, once no new value has arrived
/// for the quiet period.
#[derive(Debug, Clone)]
pub struct BoundsDebouncer {
    tx: mpsc::UnboundedSender<GeographicBounds>,
}

impl BoundsDebouncer {
    pub fn spawn<F>(quiet: Duration, mut sink: F) -> Self
    where
        F: FnMut(GeographicBounds) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(bounds) => latest = bounds,
                            None => return,
                        },
                        _ = tokio::time::sleep(quiet) => {
                            sink(latest);
                            break;
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn push(&self, bounds: GeographicBounds) {
        let _ = self.tx.send(bounds);
    }
}

/// Configuration for a viewer.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub reconciler: ReconcilerConfig,
    /// Quiet period before a viewport change is sent upstream
    pub debounce: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            debounce: Duration::from_secs(1),
        }
    }
}

/// Reconciled state as of the last message the viewer processed.
#[derive(Debug, Clone, Default)]
pub struct ViewerSnapshot {
    pub flights: Arc<Vec<FlightRecord>>,
    pub total_flights: usize,
    pub last_update: Option<i64>,
    pub error: Option<ErrorState>,
    pub applied_batches: u64,
}

impl ViewerSnapshot {
    fn capture(reconciler: &ClientReconciler) -> Self {
        Self {
            flights: Arc::new(reconciler.flights().cloned().collect()),
            total_flights: reconciler.total_flights(),
            last_update: reconciler.last_update(),
            error: reconciler.error().cloned(),
            applied_batches: reconciler.applied_batches(),
        }
    }
}

pub struct Viewer;

impl Viewer {
    /// Subscribe to `broadcast` and start reconciling in a background task.
    pub fn spawn(broadcast: &BroadcastHandle, config: ViewerConfig) -> ViewerHandle {
        let mut subscription = broadcast.join();
        let id = subscription.id();
        let (snapshot_tx, snapshot_rx) = watch::channel(ViewerSnapshot::default());

        let upstream = broadcast.clone();
        let debouncer = BoundsDebouncer::spawn(config.debounce, move |bounds| {
            tracing::debug!("{} viewport settled on {:?}", id, bounds);
            upstream.set_bounds(id, bounds);
        });

        let mut reconciler = ClientReconciler::new(config.reconciler);
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let outcome = reconciler.on_message(&message, Instant::now().into_std());
                if outcome == Some(BatchOutcome::Throttled) {
                    continue;
                }
                snapshot_tx.send_replace(ViewerSnapshot::capture(&reconciler));
            }
            tracing::debug!("{} stream ended", id);
        });

        ViewerHandle {
            id,
            snapshot: snapshot_rx,
            viewport: None,
            debouncer,
            task,
        }
    }
}

/// Owner-side handle of a running viewer. Dropping it leaves the broadcast.
#[derive(Debug)]
pub struct ViewerHandle {
    id: SubscriberId,
    snapshot: watch::Receiver<ViewerSnapshot>,
    viewport: Option<GeographicBounds>,
    debouncer: BoundsDebouncer,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Record a new visible region; sent upstream once it settles.
    pub fn set_viewport(&mut self, bounds: GeographicBounds) {
        self.viewport = Some(bounds);
        self.debouncer.push(bounds);
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until the reconciled state changes. Returns false once the viewer has stopped.
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }

    /// Aircraft to render for the current viewport, highest priority first.
    pub fn visible(&self, cap: usize) -> Vec<FlightRecord> {
        let snapshot = self.snapshot.borrow();
        viewport::select(snapshot.flights.iter(), self.viewport.as_ref(), cap)
            .into_iter()
            .cloned()
            .collect()
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
