/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::client::{CallbackQueue, ClientListener, ClientMessageListener, ClientStatus, Transport};
use crate::connection::{ConnectionDetails, ConnectionOptions, MaxBandwidth};
use crate::mpn::{MpnDevice, MpnSubscription, MpnSubscriptionFilter};
use crate::protocol::RealBandwidth;
use crate::session::{Engine, Scheduler, TokioScheduler};
use crate::subscription::Subscription;
use crate::transport::{NetworkTransportFactory, TransportFactory};
use crate::utils::{IllegalArgumentException, IllegalStateException, SessionError};
use std::error::Error;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Facade over one Lightstreamer session.
///
/// The client owns a session engine that creates the session, keeps it bound to
/// the best available transport, recovers it after network failures and
/// multiplexes subscriptions, messages and MPN requests over it. All methods
/// return immediately: network activity happens in the background and is
/// reported to the registered listeners on a dedicated callback thread.
///
/// # Examples
///
/// ```ignore
/// let client = LightstreamerClient::new(
///     Some("https://push.lightstreamer.com"),
///     Some("DEMO"),
///     None,
///     None,
/// )?;
/// client.add_listener(Box::new(MyListener));
/// client.connect()?;
/// ```
pub struct LightstreamerClient {
    engine: Arc<Engine>,
}

impl Debug for LightstreamerClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightstreamerClient")
            .field("status", &self.get_status())
            .finish()
    }
}

impl LightstreamerClient {
    /// Name of this client library.
    pub const LIB_NAME: &'static str = "rust_client";
    /// Version of this client library.
    pub const LIB_VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Creates a client running on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `server_address` is not a valid URL or when called
    /// outside a tokio runtime.
    pub fn new(
        server_address: Option<&str>,
        adapter_set: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<LightstreamerClient, Box<dyn Error + Send + Sync>> {
        let details = ConnectionDetails::new(server_address, adapter_set, username, password)?;
        Self::with_options(details, ConnectionOptions::default())
    }

    /// Creates a client with explicit details and options on the current tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoRuntime`] when called outside a tokio runtime.
    pub fn with_options(
        details: ConnectionDetails,
        options: ConnectionOptions,
    ) -> Result<LightstreamerClient, Box<dyn Error + Send + Sync>> {
        let runtime = Handle::try_current().map_err(|e| SessionError::NoRuntime(e.to_string()))?;
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(runtime.clone()));
        let factory: Arc<dyn TransportFactory> = Arc::new(NetworkTransportFactory::new(runtime));
        Ok(Self::with_environment(
            details,
            options,
            scheduler,
            factory,
            CallbackQueue::new(),
        ))
    }

    /// Creates a client on explicit collaborators: the clock and timers, the
    /// transports and the queue that delivers listener notifications.
    pub fn with_environment(
        details: ConnectionDetails,
        options: ConnectionOptions,
        scheduler: Arc<dyn Scheduler>,
        factory: Arc<dyn TransportFactory>,
        queue: CallbackQueue,
    ) -> LightstreamerClient {
        LightstreamerClient {
            engine: Engine::new(details, options, scheduler, factory, queue),
        }
    }

    /// Starts connecting. Does nothing if the client is already connected or
    /// connecting.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalStateException`] if no server address is configured.
    pub fn connect(&self) -> Result<(), IllegalStateException> {
        self.engine.with(|m| m.connect())
    }

    /// Closes the session, if any, and stops every reconnection attempt.
    /// Subscriptions stay registered and are resubscribed on the next `connect`.
    pub fn disconnect(&self) {
        self.engine.with(|m| m.disconnect());
    }

    pub fn get_status(&self) -> ClientStatus {
        self.engine.with(|m| m.status())
    }

    /// Adds a listener; it receives `on_listen_start` first.
    pub fn add_listener(&self, listener: Box<dyn ClientListener>) {
        self.engine.with(|m| m.add_listener(listener));
    }

    /// Removes every listener; each receives `on_listen_end`.
    pub fn remove_listeners(&self) {
        self.engine.with(|m| m.remove_listeners());
    }

    /// A snapshot of the connection details, including the values reported by
    /// the server for the current session.
    pub fn get_connection_details(&self) -> ConnectionDetails {
        self.engine.with(|m| m.details())
    }

    /// Replaces address, adapter set and credentials for the next session.
    pub fn set_connection_details(&self, details: ConnectionDetails) {
        self.engine.with(|m| m.set_details(details));
    }

    pub fn get_connection_options(&self) -> ConnectionOptions {
        self.engine.with(|m| m.options())
    }

    /// Replaces the options. A changed forced transport, requested bandwidth or
    /// reverse heartbeat interval also applies to the live session.
    pub fn set_connection_options(&self, options: ConnectionOptions) {
        self.engine.with(|m| m.set_options(options));
    }

    pub fn set_forced_transport(&self, transport: Option<Transport>) {
        self.engine.with(|m| {
            let mut options = m.options();
            options.set_forced_transport(transport);
            m.set_options(options);
        });
    }

    /// # Errors
    ///
    /// Returns [`IllegalArgumentException`] for a non-positive limit.
    pub fn set_requested_max_bandwidth(
        &self,
        bandwidth: MaxBandwidth,
    ) -> Result<(), IllegalArgumentException> {
        self.engine.with(|m| m.set_requested_max_bandwidth(bandwidth))
    }

    pub fn set_reverse_heartbeat_interval(&self, interval: u64) {
        self.engine.with(|m| {
            let mut options = m.options();
            options.set_reverse_heartbeat_interval(interval);
            m.set_options(options);
        });
    }

    /// Bandwidth the server applies to the current session, once reported.
    pub fn get_real_max_bandwidth(&self) -> Option<RealBandwidth> {
        self.engine.with(|m| m.real_max_bandwidth())
    }

    /// Activates `subscription`. It is sent now if a session exists, else as
    /// soon as one is created.
    ///
    /// # Errors
    ///
    /// Fails if the subscription is already active or lacks items or fields.
    pub fn subscribe(&self, subscription: &Subscription) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.engine.with(|m| m.subscribe(subscription))
    }

    /// # Errors
    ///
    /// Returns [`IllegalStateException`] if the subscription is not active on
    /// this client.
    pub fn unsubscribe(&self, subscription: &Subscription) -> Result<(), IllegalStateException> {
        self.engine.with(|m| m.unsubscribe(subscription))
    }

    /// Active subscriptions, in subscription order.
    pub fn get_subscriptions(&self) -> Vec<Subscription> {
        self.engine.with(|m| m.subscriptions())
    }

    /// Sends a message to the Metadata Adapter.
    ///
    /// Messages of the same `sequence` are processed in order; without a
    /// sequence the message is unordered. `delay_timeout` bounds how long the
    /// server waits for earlier messages of the sequence. Without a session the
    /// message is aborted unless `enqueue_while_disconnected` is set.
    pub fn send_message(
        &self,
        message: &str,
        sequence: Option<&str>,
        delay_timeout: Option<u64>,
        listener: Option<Box<dyn ClientMessageListener>>,
        enqueue_while_disconnected: bool,
    ) {
        self.engine.with(|m| {
            m.send_message(
                message,
                sequence,
                delay_timeout,
                listener,
                enqueue_while_disconnected,
            )
        });
    }

    /// Registers `device` for mobile push notifications. The registration is
    /// renewed on every new session.
    pub fn register_for_mpn(&self, device: MpnDevice) {
        self.engine.with(|m| m.register_for_mpn(device));
    }

    /// Forgets the registered device and its internal subscriptions.
    pub fn reset_mpn_device(&self) {
        self.engine.with(|m| m.reset_mpn_device());
    }

    /// # Errors
    ///
    /// Fails when no device is registered or the subscription is already active
    /// or incomplete.
    pub fn subscribe_mpn(
        &self,
        subscription: &MpnSubscription,
        coalescing: bool,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.engine.with(|m| m.subscribe_mpn(subscription, coalescing))
    }

    /// # Errors
    ///
    /// Returns [`IllegalStateException`] if the subscription is not active.
    pub fn unsubscribe_mpn(&self, subscription: &MpnSubscription) -> Result<(), IllegalStateException> {
        self.engine.with(|m| m.unsubscribe_mpn(subscription))
    }

    /// Deactivates, on the server, every MPN subscription of the device that
    /// matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalStateException`] when no device is registered.
    pub fn unsubscribe_mpn_subscriptions(
        &self,
        filter: MpnSubscriptionFilter,
    ) -> Result<(), IllegalStateException> {
        self.engine.with(|m| m.unsubscribe_mpn_subscriptions(filter))
    }

    /// # Errors
    ///
    /// Returns [`IllegalStateException`] when no device is registered.
    pub fn reset_mpn_badge(&self) -> Result<(), IllegalStateException> {
        self.engine.with(|m| m.reset_mpn_badge())
    }

    /// Ids of the MPN subscriptions the server reports for the device.
    pub fn get_mpn_subscription_ids(&self) -> Vec<String> {
        self.engine.with(|m| m.mpn_subscription_ids())
    }
}

impl Drop for LightstreamerClient {
    fn drop(&mut self) {
        debug!("Client dropped, closing the session");
        self.engine.with(|m| m.disconnect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_runtime() {
        let result = LightstreamerClient::new(Some("http://localhost:8080"), None, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_bad_address() {
        let result = LightstreamerClient::new(Some("ftp://localhost"), None, None, None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_new_on_runtime_starts_disconnected() {
        let client = LightstreamerClient::new(Some("http://localhost:8080"), Some("DEMO"), None, None)
            .expect("client");
        assert_eq!(
            client.get_status().to_string(),
            "DISCONNECTED"
        );
        assert_eq!(
            client.get_connection_details().get_adapter_set(),
            Some("DEMO")
        );
    }

    #[tokio::test]
    async fn test_connect_without_address_fails() {
        let client = LightstreamerClient::new(None, None, None, None).expect("client");
        assert!(client.connect().is_err());
    }
}
