/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of the `LightstreamerClient`.
///
/// The `Display` form is the protocol-level status string, e.g.
/// `CONNECTED:WS-STREAMING` or `DISCONNECTED:WILL-RETRY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connecting,
    Connected(ConnectionType),
    Stalled,
    Disconnected(DisconnectionType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    HttpPolling,
    HttpStreaming,
    StreamSensing,
    WsPolling,
    WsStreaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectionType {
    /// No further attempt will be made until `connect` is called again.
    Permanent,
    WillRetry,
    TryingRecovery,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ClientStatus::Connecting => "CONNECTING",
            ClientStatus::Connected(ConnectionType::StreamSensing) => "CONNECTED:STREAM-SENSING",
            ClientStatus::Connected(ConnectionType::WsStreaming) => "CONNECTED:WS-STREAMING",
            ClientStatus::Connected(ConnectionType::HttpStreaming) => "CONNECTED:HTTP-STREAMING",
            ClientStatus::Connected(ConnectionType::WsPolling) => "CONNECTED:WS-POLLING",
            ClientStatus::Connected(ConnectionType::HttpPolling) => "CONNECTED:HTTP-POLLING",
            ClientStatus::Stalled => "STALLED",
            ClientStatus::Disconnected(DisconnectionType::Permanent) => "DISCONNECTED",
            ClientStatus::Disconnected(DisconnectionType::WillRetry) => "DISCONNECTED:WILL-RETRY",
            ClientStatus::Disconnected(DisconnectionType::TryingRecovery) => {
                "DISCONNECTED:TRYING-RECOVERY"
            }
        };
        f.write_str(text)
    }
}

/// The transport type to be used by the client.
/// - WS: the Stream-Sense algorithm is enabled as in the `None` case but the client will
///   only use WebSocket based connections. If a connection over WebSocket is not possible
///   because of the environment the client will not connect at all.
/// - HTTP: the Stream-Sense algorithm is enabled as in the `None` case but the client
///   will only use HTTP based connections. If a connection over HTTP is not possible because
///   of the environment the client will not connect at all.
/// - WS-STREAMING: the Stream-Sense algorithm is disabled and the client will only connect
///   on Streaming over WebSocket. If Streaming over WebSocket is not possible because of
///   the environment the client will not connect at all.
/// - HTTP-STREAMING: the Stream-Sense algorithm is disabled and the client will only
///   connect on Streaming over HTTP. If Streaming over HTTP is not possible because of the
///   browser/environment the client will not connect at all.
/// - WS-POLLING: the Stream-Sense algorithm is disabled and the client will only connect
///   on Polling over WebSocket. If Polling over WebSocket is not possible because of the
///   environment the client will not connect at all.
/// - HTTP-POLLING: the Stream-Sense algorithm is disabled and the client will only connect
///   on Polling over HTTP. If Polling over HTTP is not possible because of the environment
///   the client will not connect at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// WebSocket transport with Stream-Sense algorithm enabled. The client will only use WebSocket-based connections.
    Ws,
    /// HTTP transport with Stream-Sense algorithm enabled. The client will only use HTTP-based connections.
    Http,
    /// WebSocket Streaming transport with Stream-Sense algorithm disabled. The client will only connect on Streaming over WebSocket.
    WsStreaming,
    /// HTTP Streaming transport with Stream-Sense algorithm disabled. The client will only connect on Streaming over HTTP.
    HttpStreaming,
    /// WebSocket Polling transport with Stream-Sense algorithm disabled. The client will only connect on Polling over WebSocket.
    WsPolling,
    /// HTTP Polling transport with Stream-Sense algorithm disabled. The client will only connect on Polling over HTTP.
    HttpPolling,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Transport::Ws => "WS",
            Transport::Http => "HTTP",
            Transport::WsStreaming => "WS-STREAMING",
            Transport::HttpStreaming => "HTTP-STREAMING",
            Transport::WsPolling => "WS-POLLING",
            Transport::HttpPolling => "HTTP-POLLING",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(ClientStatus::Connecting.to_string(), "CONNECTING");
        assert_eq!(
            ClientStatus::Connected(ConnectionType::WsStreaming).to_string(),
            "CONNECTED:WS-STREAMING"
        );
        assert_eq!(
            ClientStatus::Connected(ConnectionType::StreamSensing).to_string(),
            "CONNECTED:STREAM-SENSING"
        );
        assert_eq!(
            ClientStatus::Disconnected(DisconnectionType::Permanent).to_string(),
            "DISCONNECTED"
        );
        assert_eq!(
            ClientStatus::Disconnected(DisconnectionType::TryingRecovery).to_string(),
            "DISCONNECTED:TRYING-RECOVERY"
        );
    }

    #[test]
    fn test_transport_strings() {
        assert_eq!(Transport::HttpPolling.to_string(), "HTTP-POLLING");
        assert_eq!(Transport::Ws.to_string(), "WS");
    }
}
