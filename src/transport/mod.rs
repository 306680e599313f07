/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Physical transports used by the session engine.
//!
//! The engine never touches sockets directly. It asks a [`TransportFactory`] for a
//! WebSocket or an HTTP request and receives everything back through the
//! [`TransportCallbacks`] handed over at open time. Implementations must never invoke
//! a callback from inside `open_ws`/`send_http` themselves.

mod http;
mod ws;

pub use http::ReqwestTransport;
pub use ws::TungsteniteTransport;

use crate::utils::SessionError;
use std::collections::HashMap;
use std::sync::Weak;
use tokio::runtime::Handle;
use tracing::trace;

/// An open (or opening) WebSocket.
pub trait WsConnection: Send {
    /// Queues one text frame.
    fn send(&mut self, frame: String);
    /// Closes the socket; no callback fires afterwards.
    fn dispose(&mut self);
}

/// An HTTP request whose response body is streamed back line by line.
pub trait HttpConnection: Send {
    /// Aborts the request; no callback fires afterwards.
    fn dispose(&mut self);
}

/// Opens transports on behalf of the engine.
pub trait TransportFactory: Send + Sync {
    fn open_ws(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn WsConnection>, SessionError>;

    fn send_http(
        &self,
        url: &str,
        body: String,
        headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn HttpConnection>, SessionError>;
}

/// Receiver of transport events, implemented by the engine.
pub(crate) trait TransportSink: Send + Sync {
    fn transport_open(&self, token: u64);
    fn transport_lines(&self, token: u64, lines: &[&str]);
    fn transport_error(&self, token: u64, reason: &str);
    fn transport_done(&self, token: u64);
}

/// Route back into the engine for one transport handle.
///
/// Holds only a weak reference to the engine plus the token of the handle, so a
/// late callback after disposal or after the client is dropped is a no-op.
#[derive(Clone)]
pub struct TransportCallbacks {
    sink: Weak<dyn TransportSink>,
    token: u64,
}

impl TransportCallbacks {
    pub(crate) fn new(sink: Weak<dyn TransportSink>, token: u64) -> Self {
        Self { sink, token }
    }

    /// The WebSocket handshake completed.
    pub fn on_open(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.transport_open(self.token);
        }
    }

    /// One chunk of text holding one or more `\r\n`-terminated lines.
    pub fn on_message(&self, chunk: &str) {
        let lines: Vec<&str> = chunk
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return;
        }
        match self.sink.upgrade() {
            Some(sink) => sink.transport_lines(self.token, &lines),
            None => trace!("Dropping {} line(s) for a released client", lines.len()),
        }
    }

    pub fn on_error(&self, reason: &str) {
        if let Some(sink) = self.sink.upgrade() {
            sink.transport_error(self.token, reason);
        }
    }

    /// The peer closed the connection or the response body ended.
    pub fn on_done(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.transport_done(self.token);
        }
    }
}

/// Network transports running on a tokio runtime: tokio-tungstenite for WebSockets
/// and reqwest for HTTP.
pub struct NetworkTransportFactory {
    ws: TungsteniteTransport,
    http: ReqwestTransport,
}

impl NetworkTransportFactory {
    pub fn new(runtime: Handle) -> Self {
        Self {
            ws: TungsteniteTransport::new(runtime.clone()),
            http: ReqwestTransport::new(runtime),
        }
    }
}

impl TransportFactory for NetworkTransportFactory {
    fn open_ws(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn WsConnection>, SessionError> {
        self.ws.open(url, headers, callbacks)
    }

    fn send_http(
        &self,
        url: &str,
        body: String,
        headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn HttpConnection>, SessionError> {
        self.http.post(url, body, headers, callbacks)
    }
}
