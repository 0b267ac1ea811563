//! Per-viewer reconciliation of published batches into long-lived state.
//!
//! Batches are full snapshots, but the viewer keeps its own map so that
//! small jitter does not churn the display and aircraft that briefly drop
//! out of a snapshot do not flicker. Three rules apply:
//!
//! 1. **Throttle**: a batch arriving within `throttle` of the last applied
//!    batch is discarded whole.
//! 2. **Threshold**: an existing entry is only replaced when latitude,
//!    longitude or altitude moved by more than the configured epsilon.
//! 3. **Eviction**: every `eviction_every` applied batches, entries absent
//!    from the current batch and older than `max_age_secs` are removed.

use crate::protocol::{ErrorNotice, ServerMessage, UpdateBatch};
use crate::types::{FlightRecord, Position};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum spacing between applied batches
    pub throttle: Duration,
    /// Latitude/longitude change (degrees) that counts as movement
    pub position_epsilon: f64,
    /// Altitude change that counts as movement
    pub altitude_epsilon: f64,
    /// Run the eviction sweep on every n-th applied batch
    pub eviction_every: u64,
    /// Entries older than this (relative to the batch timestamp) may be evicted
    pub max_age_secs: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(500),
            position_epsilon: 1e-4,
            altitude_epsilon: 100.0,
            eviction_every: 10,
            max_age_secs: 300,
        }
    }
}

/// What happened to one incoming batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Throttled,
    Applied(MergeSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub evicted: usize,
}

/// Last error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub kind: String,
    pub message: String,
    pub timestamp: i64,
}

impl From<&ErrorNotice> for ErrorState {
    fn from(notice: &ErrorNotice) -> Self {
        Self {
            kind: notice.error.clone(),
            message: notice.message.clone(),
            timestamp: notice.timestamp,
        }
    }
}

/// Durable per-viewer aircraft map.
#[derive(Debug)]
pub struct ClientReconciler {
    config: ReconcilerConfig,
    flights: HashMap<String, FlightRecord>,
    applied_batches: u64,
    last_applied: Option<Instant>,
    total_flights: usize,
    last_update: Option<i64>,
    error: Option<ErrorState>,
}

impl Default for ClientReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

impl ClientReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            flights: HashMap::new(),
            applied_batches: 0,
            last_applied: None,
            total_flights: 0,
            last_update: None,
            error: None,
        }
    }

    /// Apply any server message. Returns `None` for error notices.
    pub fn on_message(&mut self, message: &ServerMessage, now: Instant) -> Option<BatchOutcome> {
        match message {
            ServerMessage::Update(batch) => Some(self.on_batch(batch, now)),
            ServerMessage::Error(notice) => {
                self.on_error(notice);
                None
            }
        }
    }

    /// Merge one batch received at `now`.
    pub fn on_batch(&mut self, batch: &UpdateBatch, now: Instant) -> BatchOutcome {
        if let Some(last) = self.last_applied {
            if now.saturating_duration_since(last) < self.config.throttle {
                tracing::trace!("Batch throttled ({} flights)", batch.flights.len());
                return BatchOutcome::Throttled;
            }
        }

        self.last_applied = Some(now);
        self.applied_batches += 1;

        let mut summary = MergeSummary::default();

        for record in batch.flights.iter() {
            let Some(position) = record.position else {
                continue;
            };

            match self.flights.entry(record.icao24.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                    summary.inserted += 1;
                }
                Entry::Occupied(mut slot) => {
                    if moved(&self.config, slot.get(), &position) {
                        slot.insert(record.clone());
                        summary.replaced += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
            }
        }

        if self.applied_batches % self.config.eviction_every.max(1) == 0 {
            summary.evicted = self.evict(batch);
        }

        self.total_flights = batch.total_flights;
        self.last_update = Some(batch.timestamp);
        self.error = None;

        tracing::trace!(
            "Batch {} applied: +{} ~{} -{} ({} tracked)",
            self.applied_batches,
            summary.inserted,
            summary.replaced,
            summary.evicted,
            self.flights.len()
        );

        BatchOutcome::Applied(summary)
    }

    /// Record a server-side failure. Tracked aircraft are kept.
    pub fn on_error(&mut self, notice: &ErrorNotice) {
        tracing::debug!("Server reported {}: {}", notice.error, notice.message);
        self.error = Some(ErrorState::from(notice));
    }

    fn evict(&mut self, batch: &UpdateBatch) -> usize {
        let present: HashSet<&str> = batch.flights.iter().map(|f| f.icao24.as_str()).collect();
        let cutoff = batch.timestamp - self.config.max_age_secs;
        let before = self.flights.len();

        self.flights
            .retain(|icao, record| present.contains(icao.as_str()) || record.last_update >= cutoff);

        let evicted = before - self.flights.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} stale aircraft", evicted);
        }
        evicted
    }

    pub fn flights(&self) -> impl Iterator<Item = &FlightRecord> {
        self.flights.values()
    }

    pub fn get(&self, icao24: &str) -> Option<&FlightRecord> {
        self.flights.get(icao24)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Flight count as declared by the last applied batch.
    pub fn total_flights(&self) -> usize {
        self.total_flights
    }

    /// Timestamp of the last applied batch.
    pub fn last_update(&self) -> Option<i64> {
        self.last_update
    }

    pub fn error(&self) -> Option<&ErrorState> {
        self.error.as_ref()
    }

    pub fn applied_batches(&self) -> u64 {
        self.applied_batches
    }
}

/// Whether `next` differs from the stored position by more than the epsilons.
fn moved(config: &ReconcilerConfig, current: &FlightRecord, next: &Position) -> bool {
    let Some(prev) = current.position else {
        return true;
    };

    (next.latitude - prev.latitude).abs() > config.position_epsilon
        || (next.longitude - prev.longitude).abs() > config.position_epsilon
        || (next.altitude - prev.altitude).abs() > config.altitude_epsilon
}
