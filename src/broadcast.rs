//! Shared-poll broadcast service.
//!
//! One task owns the subscriber registry, the latest snapshot, and the poll
//! timer. Handles talk to it over a command channel, so joins, leaves,
//! interest changes and ticks are applied one at a time. Fetches run in a
//! separate task and report back to the service; at most one is in flight.
//!
//! ```text
//!   join ──┐                       ┌──▶ subscriber 1
//!   leave ─┼──▶ BroadcastService ──┼──▶ subscriber 2
//!   bounds ┘      │       ▲        └──▶ ...
//!                 ▼       │
//!             fetch task (token → feed → normalize)
//! ```

use crate::auth::{AuthError, TokenProvider};
use crate::bounds::{self, GeographicBounds};
use crate::client::{ClientError, FeedClient};
use crate::protocol::{self, ClientMessage, ErrorNotice, ServerMessage, UpdateBatch};
use crate::registry::{Outbox, SubscriberRegistry};
use crate::types::{FlightRecord, SubscriberId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),
    #[error("Fetch error: {0}")]
    Fetch(#[from] ClientError),
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl BroadcastError {
    /// Short failure kind sent to subscribers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Fetch(_) => "fetch",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Configuration for the broadcast service.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Interval between scheduled fetches while anyone is subscribed
    pub poll_interval: Duration,
    /// Upper bound on one credential + fetch cycle
    pub fetch_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl BroadcastConfig {
    /// Set the time between scheduled fetches.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the upper bound on one fetch cycle.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Most recent successful snapshot.
#[derive(Debug, Clone)]
pub struct BroadcastCache {
    pub flights: Arc<Vec<FlightRecord>>,
    pub timestamp: i64,
    pub bounds: Option<GeographicBounds>,
}

impl BroadcastCache {
    pub fn to_batch(&self) -> UpdateBatch {
        UpdateBatch::new(Arc::clone(&self.flights), self.timestamp, self.bounds)
    }
}

/// Live counters, written by the service task only.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    pub subscribers: AtomicUsize,
    pub polling: AtomicBool,
    pub cached_flights: AtomicUsize,
    pub has_data: AtomicBool,
    pub fetches: AtomicU64,
    pub errors: AtomicU64,
}

impl BroadcastStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            subscribers: self.subscribers.load(Ordering::Relaxed),
            polling: self.polling.load(Ordering::Relaxed),
            cached_flights: self.cached_flights.load(Ordering::Relaxed),
            has_data: self.has_data.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub subscribers: usize,
    pub polling: bool,
    pub cached_flights: usize,
    pub has_data: bool,
    /// Completed fetch cycles, successful or not
    pub fetches: u64,
    pub errors: u64,
}

#[derive(Debug)]
enum Command {
    Join { id: SubscriberId, outbox: Outbox },
    Leave(SubscriberId),
    SetBounds(SubscriberId, GeographicBounds),
    Shutdown,
}

struct FetchOutcome {
    bounds: Option<GeographicBounds>,
    result: Result<Vec<FlightRecord>, BroadcastError>,
}

/// The service task's state.
pub struct BroadcastService {
    config: BroadcastConfig,
    tokens: Arc<dyn TokenProvider>,
    feed: Arc<dyn FeedClient>,
    registry: SubscriberRegistry,
    cache: Arc<RwLock<Option<BroadcastCache>>>,
    stats: Arc<BroadcastStats>,
    timer: Option<Interval>,
    in_flight: bool,
    refetch_pending: bool,
    outcomes: mpsc::UnboundedSender<FetchOutcome>,
}

impl BroadcastService {
    /// Start the service task and return a handle to it.
    pub fn spawn(
        config: BroadcastConfig,
        tokens: Arc<dyn TokenProvider>,
        feed: Arc<dyn FeedClient>,
    ) -> BroadcastHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(RwLock::new(None));
        let stats = Arc::new(BroadcastStats::new());

        let service = Self {
            config,
            tokens,
            feed,
            registry: SubscriberRegistry::new(),
            cache: Arc::clone(&cache),
            stats: Arc::clone(&stats),
            timer: None,
            in_flight: false,
            refetch_pending: false,
            outcomes: outcome_tx,
        };

        tokio::spawn(service.run(command_rx, outcome_rx));

        BroadcastHandle {
            commands: command_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            cache,
            stats,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        tracing::info!(
            "Broadcast service started (poll every {:?})",
            self.config.poll_interval
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(outcome) = outcomes.recv() => self.complete(outcome),
                _ = next_tick(&mut self.timer) => self.on_tick(),
            }
        }

        tracing::info!("Broadcast service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Join { id, outbox } => self.on_join(id, outbox),
            Command::Leave(id) => self.on_leave(id),
            Command::SetBounds(id, bounds) => self.on_interest_change(id, bounds),
            Command::Shutdown => {}
        }
    }

    fn on_join(&mut self, id: SubscriberId, outbox: Outbox) {
        let was_idle = self.registry.is_empty();
        self.registry.add(id, outbox);
        self.update_subscriber_count();
        tracing::debug!("{} joined ({} subscribers)", id, self.registry.count());

        if was_idle {
            self.start_polling();
            return;
        }

        let cached = self.cache.read().as_ref().map(BroadcastCache::to_batch);
        if let Some(batch) = cached {
            self.registry.send_to(id, ServerMessage::Update(batch));
        }
    }

    fn on_leave(&mut self, id: SubscriberId) {
        if !self.registry.remove(id) {
            return;
        }
        self.update_subscriber_count();
        tracing::debug!("{} left ({} subscribers)", id, self.registry.count());

        if self.registry.is_empty() {
            self.stop_polling();
        }
    }

    fn on_interest_change(&mut self, id: SubscriberId, bounds: GeographicBounds) {
        if !self.registry.set_bounds(id, bounds) {
            return;
        }
        tracing::debug!("{} set bounds {:?}", id, bounds);

        if self.in_flight {
            self.refetch_pending = true;
        } else {
            self.start_cycle();
        }
    }

    fn on_tick(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        if self.in_flight {
            tracing::debug!("Previous fetch still running, skipping tick");
            return;
        }
        self.start_cycle();
    }

    fn start_polling(&mut self) {
        tracing::info!("First subscriber joined, polling started");

        if self.in_flight {
            self.refetch_pending = true;
        } else {
            self.start_cycle();
        }

        let period = self.config.poll_interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.stats.polling.store(true, Ordering::Relaxed);
    }

    fn stop_polling(&mut self) {
        tracing::info!("Last subscriber left, polling stopped");
        self.timer = None;
        self.refetch_pending = false;
        self.stats.polling.store(false, Ordering::Relaxed);
    }

    fn start_cycle(&mut self) {
        self.in_flight = true;

        let bounds = bounds::aggregate(&self.registry.all_bounds());
        let tokens = Arc::clone(&self.tokens);
        let feed = Arc::clone(&self.feed);
        let timeout = self.config.fetch_timeout;
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, fetch_cycle(tokens, feed, bounds)).await
            {
                Ok(result) => result,
                Err(_) => Err(BroadcastError::Timeout(timeout)),
            };
            // The service only goes away on shutdown, in which case nobody cares.
            let _ = outcomes.send(FetchOutcome { bounds, result });
        });
    }

    fn complete(&mut self, outcome: FetchOutcome) {
        self.in_flight = false;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let timestamp = protocol::unix_now();

        let message = match outcome.result {
            Ok(flights) => {
                tracing::debug!(
                    "Fetched {} aircraft for {} subscribers",
                    flights.len(),
                    self.registry.count()
                );
                let cache = BroadcastCache {
                    flights: Arc::new(flights),
                    timestamp,
                    bounds: outcome.bounds,
                };
                let batch = cache.to_batch();
                self.stats
                    .cached_flights
                    .store(cache.flights.len(), Ordering::Relaxed);
                self.stats.has_data.store(true, Ordering::Relaxed);
                *self.cache.write() = Some(cache);
                ServerMessage::Update(batch)
            }
            Err(e) => {
                tracing::warn!("Fetch error: {}", e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                ServerMessage::Error(ErrorNotice {
                    error: e.kind().to_string(),
                    message: e.to_string(),
                    timestamp,
                })
            }
        };

        for id in self.registry.publish(&message) {
            tracing::debug!("{} channel closed, dropping", id);
            self.on_leave(id);
        }

        if std::mem::take(&mut self.refetch_pending) && !self.registry.is_empty() {
            self.start_cycle();
        }
    }

    fn update_subscriber_count(&self) {
        self.stats
            .subscribers
            .store(self.registry.count(), Ordering::Relaxed);
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn fetch_cycle(
    tokens: Arc<dyn TokenProvider>,
    feed: Arc<dyn FeedClient>,
    bounds: Option<GeographicBounds>,
) -> Result<Vec<FlightRecord>, BroadcastError> {
    let token = tokens.token().await?;
    let raw = feed.fetch_snapshot(&token, bounds).await?;
    Ok(protocol::normalize(&raw))
}

/// Cloneable handle to a running [`BroadcastService`].
#[derive(Clone)]
pub struct BroadcastHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    cache: Arc<RwLock<Option<BroadcastCache>>>,
    stats: Arc<BroadcastStats>,
}

impl std::fmt::Debug for BroadcastHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHandle")
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl BroadcastHandle {
    /// Connect a new subscriber.
    pub fn join(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbox, messages) = mpsc::unbounded_channel();
        self.send(Command::Join { id, outbox });

        Subscription {
            id,
            messages,
            commands: self.commands.clone(),
        }
    }

    /// Disconnect a subscriber.
    pub fn leave(&self, id: SubscriberId) {
        self.send(Command::Leave(id));
    }

    /// Replace a subscriber's region of interest.
    pub fn set_bounds(&self, id: SubscriberId, bounds: GeographicBounds) {
        self.send(Command::SetBounds(id, bounds));
    }

    /// Apply an inbound message from a subscriber.
    pub fn dispatch(&self, id: SubscriberId, message: ClientMessage) {
        match message {
            ClientMessage::SetBounds(bounds) => self.set_bounds(id, bounds),
        }
    }

    /// Counters as of the last command the service processed.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The cached snapshot, if any fetch has succeeded yet.
    pub fn latest(&self) -> Option<UpdateBatch> {
        self.cache.read().as_ref().map(BroadcastCache::to_batch)
    }

    /// Stop the service task, closing every subscription.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Broadcast service is gone, command dropped");
        }
    }
}

/// One subscriber's end of the broadcast. Leaves the service when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    messages: mpsc::UnboundedReceiver<ServerMessage>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, or `None` once the service has shut down.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.messages.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.messages.try_recv().ok()
    }

    pub fn set_bounds(&self, bounds: GeographicBounds) {
        let _ = self.commands.send(Command::SetBounds(self.id, bounds));
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Leave(self.id));
    }
}
