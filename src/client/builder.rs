/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 25/10/25
******************************************************************************/

//! Declarative client configuration.
//!
//! A [`ClientConfig`] gathers the server coordinates and the most common tuning
//! knobs with sensible defaults, and can also be loaded from JSON.

use crate::client::{LightstreamerClient, Transport};
use crate::connection::{ConnectionDetails, ConnectionOptions};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Configuration for a Lightstreamer client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address (e.g., "<https://push.lightstreamer.com>")
    pub server_address: String,
    /// Adapter set name (e.g., "DEMO")
    #[serde(default)]
    pub adapter_set: Option<String>,
    /// Username for authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Password for authentication
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Transport to force; stream-sense picks one when absent
    #[serde(default)]
    pub transport: Option<Transport>,
    /// Keepalive interval in milliseconds
    #[serde(default)]
    pub keepalive_interval: Option<u64>,
    /// Idle timeout in milliseconds
    #[serde(default)]
    pub idle_timeout: Option<u64>,
    /// Reconnect timeout in milliseconds
    #[serde(default)]
    pub reconnect_timeout: Option<u64>,
    /// Session recovery window in milliseconds; zero disables recovery
    #[serde(default)]
    pub session_recovery_timeout: Option<u64>,
    /// Every remaining option, applied before the fields above
    #[serde(default)]
    pub options: Option<ConnectionOptions>,
}

impl ClientConfig {
    /// Creates a new configuration with the specified server address.
    ///
    /// # Arguments
    ///
    /// * `server_address` - The Lightstreamer server URL
    ///
    /// # Returns
    ///
    /// A new `ClientConfig` with default values
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            adapter_set: None,
            username: None,
            password: None,
            transport: None,
            keepalive_interval: None,
            idle_timeout: None,
            reconnect_timeout: None,
            session_recovery_timeout: None,
            options: None,
        }
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sets the adapter set name.
    #[must_use]
    pub fn adapter_set(mut self, adapter_set: impl Into<String>) -> Self {
        self.adapter_set = Some(adapter_set.into());
        self
    }

    /// Sets the username for authentication.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the transport type.
    #[must_use]
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the keepalive interval in milliseconds.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: u64) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Sets the idle timeout in milliseconds.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: u64) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the reconnect timeout in milliseconds.
    #[must_use]
    pub fn reconnect_timeout(mut self, timeout: u64) -> Self {
        self.reconnect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn session_recovery_timeout(mut self, timeout: u64) -> Self {
        self.session_recovery_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Validates the configuration into connection details and options.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid server address or out-of-range option.
    pub fn into_parts(
        self,
    ) -> Result<(ConnectionDetails, ConnectionOptions), Box<dyn Error + Send + Sync>> {
        let details = ConnectionDetails::new(
            Some(&self.server_address),
            self.adapter_set.as_deref(),
            self.username.as_deref(),
            self.password.as_deref(),
        )?;
        let mut options = self.options.unwrap_or_default();
        if let Some(transport) = self.transport {
            options.set_forced_transport(Some(transport));
        }
        if let Some(interval) = self.keepalive_interval {
            options.set_keepalive_interval(interval);
        }
        if let Some(timeout) = self.idle_timeout {
            options.set_idle_timeout(timeout);
        }
        if let Some(timeout) = self.reconnect_timeout {
            options
                .set_reconnect_timeout(timeout)
                .map_err(|e| format!("Failed to set reconnect timeout: {}", e))?;
        }
        if let Some(timeout) = self.session_recovery_timeout {
            options.set_session_recovery_timeout(timeout);
        }
        Ok((details, options))
    }

    /// Creates a client on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no runtime is running.
    pub fn build(self) -> Result<LightstreamerClient, Box<dyn Error + Send + Sync>> {
        let (details, options) = self.into_parts()?;
        LightstreamerClient::with_options(details, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_and_password_not_serialized() {
        let config = ClientConfig::new("wss://push.example.com")
            .adapter_set("WELCOME")
            .username("trader")
            .password("secret")
            .transport(Transport::Ws)
            .keepalive_interval(2500)
            .session_recovery_timeout(9000);
        assert_eq!(config.transport, Some(Transport::Ws));
        assert_eq!(config.session_recovery_timeout, Some(9000));

        let json = serde_json::to_string(&config).expect("serializable");
        assert!(!json.contains("secret"));
        let back = ClientConfig::from_json(&json).expect("round trip");
        assert_eq!(back.username.as_deref(), Some("trader"));
        assert_eq!(back.password, None);
        assert_eq!(back.keepalive_interval, Some(2500));
    }

    #[test]
    fn test_into_parts_applies_overrides() {
        let (details, options) = ClientConfig::new("https://push.example.com/")
            .adapter_set("DEMO")
            .transport(Transport::HttpPolling)
            .idle_timeout(5000)
            .session_recovery_timeout(0)
            .into_parts()
            .expect("valid config");
        assert_eq!(details.get_server_address(), Some("https://push.example.com"));
        assert_eq!(options.get_forced_transport(), Some(Transport::HttpPolling));
        assert_eq!(options.get_idle_timeout(), 5000);
        assert_eq!(options.get_session_recovery_timeout(), 0);
        assert_eq!(options.get_retry_delay(), 4000);
    }

    #[test]
    fn test_into_parts_rejects_bad_values() {
        assert!(ClientConfig::new("not a url").into_parts().is_err());
        assert!(
            ClientConfig::new("http://localhost")
                .reconnect_timeout(0)
                .into_parts()
                .is_err()
        );
    }

    #[test]
    fn test_from_json() {
        let config = ClientConfig::from_json(
            r#"{"server_address": "wss://push.example.com", "adapter_set": "DEMO",
                "options": {"retry_delay": 1000}}"#,
        )
        .expect("valid json");
        assert_eq!(config.adapter_set.as_deref(), Some("DEMO"));
        let (_, options) = config.into_parts().expect("valid config");
        assert_eq!(options.get_retry_delay(), 1000);
        assert_eq!(options.get_idle_timeout(), 19000);
    }

    #[test]
    fn test_build_without_runtime_fails() {
        assert!(ClientConfig::new("http://localhost:8080").build().is_err());
    }
}
