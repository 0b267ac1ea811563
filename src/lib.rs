//! Shared-poll distribution of live aircraft states to many viewers.
//!
//! This library provides functionality to:
//! - Fetch state snapshots from an upstream feed (OpenSky) on a fixed cadence
//! - Normalize raw state vectors into canonical flight records
//! - Aggregate every subscriber's region of interest into one fetch
//! - Fan each snapshot out to all subscribers
//! - Reconcile batches into durable per-viewer state and pick what to render
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐
//! │ FeedClient  │───▶│  Normalize  │───▶│ BroadcastService │
//! │ (+ tokens)  │    │ (protocol)  │    │ (cache, fan-out) │
//! └─────────────┘    └─────────────┘    └────────┬─────────┘
//!                                                │ per-subscriber channel
//!                                                ▼
//!                     ┌─────────────┐    ┌──────────────────┐
//!                     │  Viewport   │◀───│ ClientReconciler │
//!                     │  (select)   │    │    (viewer)      │
//!                     └─────────────┘    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use flightcast::{
//!     auth::StaticToken,
//!     broadcast::{BroadcastConfig, BroadcastService},
//!     client::{ClientConfig, OpenSkyClient},
//!     viewer::{Viewer, ViewerConfig},
//!     viewport::MAX_VISIBLE,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let feed = OpenSkyClient::new(ClientConfig::default())?;
//!     let broadcast = BroadcastService::spawn(
//!         BroadcastConfig::default(),
//!         Arc::new(StaticToken::default()),
//!         Arc::new(feed),
//!     );
//!
//!     let mut viewer = Viewer::spawn(&broadcast, ViewerConfig::default());
//!     while viewer.changed().await {
//!         println!("{} aircraft visible", viewer.visible(MAX_VISIBLE).len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bounds;
pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod types;
pub mod viewer;
pub mod viewport;

pub use auth::{OAuthTokenProvider, StaticToken, TokenProvider};
pub use bounds::{aggregate, GeographicBounds};
pub use broadcast::{BroadcastConfig, BroadcastHandle, BroadcastService, Subscription};
pub use client::{ClientConfig, FeedClient, OpenSkyClient};
pub use protocol::{normalize, ClientMessage, ServerMessage, UpdateBatch};
pub use reconcile::{ClientReconciler, ReconcilerConfig};
pub use registry::SubscriberRegistry;
pub use types::{AircraftCategory, FlightRecord, SubscriberId};
pub use viewer::{Viewer, ViewerConfig, ViewerHandle};
