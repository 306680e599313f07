//! # Lightstreamer Session Engine
//!
//! This crate implements the client side of the Lightstreamer TLCP (Text-based Live
//! Connections Protocol) as one deterministic session state machine. It creates a
//! session, keeps it bound to the best transport the network allows, recovers it
//! after temporary failures and multiplexes subscriptions, client messages and
//! mobile push notification (MPN) requests over it.
//!
//! ## Features
//!
//! - **Transports**: WebSocket and HTTP, each in streaming and polling flavour.
//!   Stream-sense starts on WebSocket streaming and falls back to HTTP streaming,
//!   WebSocket polling and HTTP polling as each one proves unusable. A transport can
//!   also be forced through [`ConnectionOptions`].
//!
//! - **Connection management**:
//!   - Create, bind and rebind of sessions driven by the server's `LOOP` requests
//!   - Keepalive watching with a `STALLED` status before reconnecting
//!   - Session recovery from the last received progressive within a configurable window
//!   - Retry with a growing delay once a session is lost
//!   - Reverse heartbeats and slow-consumer detection
//!
//! - **Subscriptions**: MERGE, DISTINCT, COMMAND and RAW modes, snapshot handling,
//!   field decoding including JSON patches, frequency reconfiguration on the fly.
//!
//! - **Messages**: ordered sequences, unordered messages, outcome notifications.
//!
//! - **MPN**: device registration, MPN subscriptions, bulk unsubscription and
//!   badge reset.
//!
//! ## Threading
//!
//! Every call into a [`LightstreamerClient`] returns immediately. Network I/O and
//! timers run on the tokio runtime the client was created on; listener
//! notifications are delivered in order on a dedicated callback thread, so a
//! listener may call back into the client.
//!
//! ## Usage
//!
//! ```ignore
//! use lightstreamer_session::client::{ClientListener, ClientStatus, LightstreamerClient};
//! use lightstreamer_session::subscription::{Subscription, SubscriptionMode};
//! use lightstreamer_session::subscription::ChannelSubscriptionListener;
//!
//! struct StatusPrinter;
//!
//! impl ClientListener for StatusPrinter {
//!     fn on_status_change(&mut self, status: ClientStatus) {
//!         println!("status: {}", status);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let client = LightstreamerClient::new(
//!         Some("https://push.lightstreamer.com"),
//!         Some("DEMO"),
//!         None,
//!         None,
//!     )?;
//!     client.add_listener(Box::new(StatusPrinter));
//!
//!     let subscription = Subscription::new(
//!         SubscriptionMode::Merge,
//!         Some(vec!["item1".to_string(), "item2".to_string()]),
//!         Some(vec!["last_price".to_string(), "time".to_string()]),
//!     )?;
//!     subscription.set_data_adapter(Some("QUOTE_ADAPTER".to_string()))?;
//!     let (listener, mut updates) = ChannelSubscriptionListener::create_channel();
//!     subscription.add_listener(Box::new(listener));
//!     client.subscribe(&subscription)?;
//!
//!     client.connect()?;
//!     while let Some(update) = updates.recv().await {
//!         println!("{:?}", update.get_value("last_price"));
//!     }
//!     Ok(())
//! }
//! ```

/// Module containing client-related functionality.
///
/// This module provides the main `LightstreamerClient` type, the client and message
/// listeners, the status model and the `ClientConfig` builder.
pub mod client;

/// Module containing connection-related functionality.
///
/// This module provides types for managing connection details and options.
pub mod connection;

/// Mobile push notifications: devices, MPN subscriptions and their listeners.
pub mod mpn;

/// The session engine and the timer facade it runs on.
pub mod session;

/// Module containing subscription-related functionality.
///
/// This module provides the necessary types and functions to create and manage subscriptions
/// to Lightstreamer items. It includes the `Subscription` struct, subscription modes,
/// item updates, and subscription listeners.
pub mod subscription;

/// WebSocket and HTTP transports and the factory trait the engine opens them through.
pub mod transport;

/// Module containing utility functions and error types.
///
/// This module provides common utilities and error types used throughout the library,
/// including exception types for handling illegal arguments and states.
pub mod utils;

mod message;
mod protocol;

pub use client::{ClientConfig, ClientListener, ClientStatus, LightstreamerClient};
pub use connection::{ConnectionDetails, ConnectionOptions, MaxBandwidth};
pub use protocol::{RealBandwidth, UNORDERED_MESSAGES};
