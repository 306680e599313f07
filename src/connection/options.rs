/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::client::Transport;
use crate::utils::IllegalArgumentException;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Bandwidth the client asks the server to stay within, in kilobits per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum MaxBandwidth {
    #[default]
    Unlimited,
    Limited(f64),
}

impl fmt::Display for MaxBandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxBandwidth::Unlimited => write!(f, "unlimited"),
            MaxBandwidth::Limited(kbps) => write!(f, "{}", kbps),
        }
    }
}

/// Tuning knobs of the session engine. All durations are in milliseconds.
///
/// Most values are read when the next create or bind request is issued. The
/// forced transport, the requested bandwidth and the reverse heartbeat interval
/// also apply to a live session when changed through the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    content_length: u64,
    first_retry_max_delay: u64,
    forced_transport: Option<Transport>,
    http_extra_headers: Option<HashMap<String, String>>,
    http_extra_headers_on_session_creation_only: bool,
    idle_timeout: u64,
    keepalive_interval: u64,
    polling_interval: u64,
    reconnect_timeout: u64,
    requested_max_bandwidth: MaxBandwidth,
    retry_delay: u64,
    reverse_heartbeat_interval: u64,
    server_instance_address_ignored: bool,
    session_recovery_timeout: u64,
    slowing_enabled: bool,
    stalled_timeout: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            content_length: 50_000_000,
            first_retry_max_delay: 100,
            forced_transport: None,
            http_extra_headers: None,
            http_extra_headers_on_session_creation_only: false,
            idle_timeout: 19_000,
            keepalive_interval: 0,
            polling_interval: 0,
            reconnect_timeout: 3_000,
            requested_max_bandwidth: MaxBandwidth::Unlimited,
            retry_delay: 4_000,
            reverse_heartbeat_interval: 0,
            server_instance_address_ignored: false,
            session_recovery_timeout: 15_000,
            slowing_enabled: false,
            stalled_timeout: 2_000,
        }
    }
}

fn positive(value: u64, what: &str) -> Result<u64, IllegalArgumentException> {
    if value == 0 {
        Err(IllegalArgumentException::new(&format!(
            "{} must be greater than zero",
            what
        )))
    } else {
        Ok(value)
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length in bytes after which the server closes an HTTP streaming response.
    pub fn set_content_length(&mut self, length: u64) -> Result<(), IllegalArgumentException> {
        self.content_length = positive(length, "content length")?;
        Ok(())
    }

    pub fn get_content_length(&self) -> u64 {
        self.content_length
    }

    /// Upper bound of the random delay before the first retry after a session loss.
    pub fn set_first_retry_max_delay(&mut self, delay: u64) -> Result<(), IllegalArgumentException> {
        self.first_retry_max_delay = positive(delay, "first retry max delay")?;
        Ok(())
    }

    pub fn get_first_retry_max_delay(&self) -> u64 {
        self.first_retry_max_delay
    }

    pub fn set_forced_transport(&mut self, transport: Option<Transport>) {
        self.forced_transport = transport;
    }

    pub fn get_forced_transport(&self) -> Option<Transport> {
        self.forced_transport
    }

    pub fn set_http_extra_headers(&mut self, headers: Option<HashMap<String, String>>) {
        self.http_extra_headers = headers;
    }

    pub fn get_http_extra_headers(&self) -> Option<&HashMap<String, String>> {
        self.http_extra_headers.as_ref()
    }

    /// When set, the extra headers are only sent with session creation requests.
    pub fn set_http_extra_headers_on_session_creation_only(&mut self, only: bool) {
        self.http_extra_headers_on_session_creation_only = only;
    }

    pub fn is_http_extra_headers_on_session_creation_only(&self) -> bool {
        self.http_extra_headers_on_session_creation_only
    }

    /// Longest time a polling request may wait on the server for data.
    pub fn set_idle_timeout(&mut self, timeout: u64) {
        self.idle_timeout = timeout;
    }

    pub fn get_idle_timeout(&self) -> u64 {
        self.idle_timeout
    }

    /// Requested server keepalive interval; zero leaves the choice to the server.
    pub fn set_keepalive_interval(&mut self, interval: u64) {
        self.keepalive_interval = interval;
    }

    pub fn get_keepalive_interval(&self) -> u64 {
        self.keepalive_interval
    }

    pub fn set_polling_interval(&mut self, interval: u64) {
        self.polling_interval = interval;
    }

    pub fn get_polling_interval(&self) -> u64 {
        self.polling_interval
    }

    /// Extra time granted to a stalled stream before the transport is given up.
    pub fn set_reconnect_timeout(&mut self, timeout: u64) -> Result<(), IllegalArgumentException> {
        self.reconnect_timeout = positive(timeout, "reconnect timeout")?;
        Ok(())
    }

    pub fn get_reconnect_timeout(&self) -> u64 {
        self.reconnect_timeout
    }

    pub fn set_requested_max_bandwidth(
        &mut self,
        bandwidth: MaxBandwidth,
    ) -> Result<(), IllegalArgumentException> {
        if let MaxBandwidth::Limited(kbps) = bandwidth {
            if !kbps.is_finite() || kbps <= 0.0 {
                return Err(IllegalArgumentException::new(
                    "requested max bandwidth must be a positive number",
                ));
            }
        }
        self.requested_max_bandwidth = bandwidth;
        Ok(())
    }

    pub fn get_requested_max_bandwidth(&self) -> MaxBandwidth {
        self.requested_max_bandwidth
    }

    /// Base retry delay; also the timeout of every connection attempt.
    pub fn set_retry_delay(&mut self, delay: u64) -> Result<(), IllegalArgumentException> {
        self.retry_delay = positive(delay, "retry delay")?;
        Ok(())
    }

    pub fn get_retry_delay(&self) -> u64 {
        self.retry_delay
    }

    /// Interval of client-to-server heartbeats; zero disables them unless the
    /// server grants one.
    pub fn set_reverse_heartbeat_interval(&mut self, interval: u64) {
        self.reverse_heartbeat_interval = interval;
    }

    pub fn get_reverse_heartbeat_interval(&self) -> u64 {
        self.reverse_heartbeat_interval
    }

    /// Ignore the control link sent by the server and keep using the configured address.
    pub fn set_server_instance_address_ignored(&mut self, ignored: bool) {
        self.server_instance_address_ignored = ignored;
    }

    pub fn is_server_instance_address_ignored(&self) -> bool {
        self.server_instance_address_ignored
    }

    /// Window in which a broken session is recovered instead of recreated; zero
    /// disables recovery.
    pub fn set_session_recovery_timeout(&mut self, timeout: u64) {
        self.session_recovery_timeout = timeout;
    }

    pub fn get_session_recovery_timeout(&self) -> u64 {
        self.session_recovery_timeout
    }

    pub fn set_slowing_enabled(&mut self, enabled: bool) {
        self.slowing_enabled = enabled;
    }

    pub fn is_slowing_enabled(&self) -> bool {
        self.slowing_enabled
    }

    pub fn set_stalled_timeout(&mut self, timeout: u64) -> Result<(), IllegalArgumentException> {
        self.stalled_timeout = positive(timeout, "stalled timeout")?;
        Ok(())
    }

    pub fn get_stalled_timeout(&self) -> u64 {
        self.stalled_timeout
    }
}
