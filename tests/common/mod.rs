/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Scripted environment for driving a client without a network or a clock.

#![allow(dead_code)]

use lightstreamer_session::client::{CallbackQueue, ClientListener, ClientStatus};
use lightstreamer_session::session::ManualScheduler;
use lightstreamer_session::transport::{
    HttpConnection, TransportCallbacks, TransportFactory, WsConnection,
};
use lightstreamer_session::utils::{SessionError, setup_logger};
use lightstreamer_session::{ConnectionDetails, ConnectionOptions, LightstreamerClient};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const SERVER: &str = "http://push.example.com";

/// A WebSocket opened by the client, as seen from the server side of the test.
#[derive(Clone)]
pub struct SocketRecord {
    pub url: String,
    pub callbacks: TransportCallbacks,
    sent: Arc<Mutex<Vec<String>>>,
    disposed: Arc<AtomicBool>,
}

impl SocketRecord {
    /// Frames written by the client so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn last_sent(&self) -> String {
        self.sent.lock().last().cloned().unwrap_or_default()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// An HTTP request sent by the client.
#[derive(Clone)]
pub struct RequestRecord {
    pub url: String,
    pub body: String,
    pub callbacks: TransportCallbacks,
    disposed: Arc<AtomicBool>,
}

impl RequestRecord {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct FakeSocket {
    sent: Arc<Mutex<Vec<String>>>,
    disposed: Arc<AtomicBool>,
}

impl WsConnection for FakeSocket {
    fn send(&mut self, frame: String) {
        self.sent.lock().push(frame);
    }

    fn dispose(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

struct FakeRequest {
    disposed: Arc<AtomicBool>,
}

impl HttpConnection for FakeRequest {
    fn dispose(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Records every transport the client opens; the test answers through the
/// recorded callbacks.
#[derive(Default)]
pub struct ScriptedTransport {
    sockets: Mutex<Vec<SocketRecord>>,
    requests: Mutex<Vec<RequestRecord>>,
}

impl TransportFactory for ScriptedTransport {
    fn open_ws(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn WsConnection>, SessionError> {
        let record = SocketRecord {
            url: url.to_string(),
            callbacks,
            sent: Arc::new(Mutex::new(Vec::new())),
            disposed: Arc::new(AtomicBool::new(false)),
        };
        let socket = FakeSocket {
            sent: Arc::clone(&record.sent),
            disposed: Arc::clone(&record.disposed),
        };
        self.sockets.lock().push(record);
        Ok(Box::new(socket))
    }

    fn send_http(
        &self,
        url: &str,
        body: String,
        _headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn HttpConnection>, SessionError> {
        let disposed = Arc::new(AtomicBool::new(false));
        self.requests.lock().push(RequestRecord {
            url: url.to_string(),
            body,
            callbacks,
            disposed: Arc::clone(&disposed),
        });
        Ok(Box::new(FakeRequest { disposed }))
    }
}

/// Turns client events into strings such as `status:CONNECTING`.
struct EventRecorder(Arc<Mutex<Vec<String>>>);

impl ClientListener for EventRecorder {
    fn on_property_change(&mut self, property: &str) {
        self.0.lock().push(format!("property:{}", property));
    }

    fn on_server_error(&mut self, code: i32, message: &str) {
        self.0.lock().push(format!("error:{}:{}", code, message));
    }

    fn on_status_change(&mut self, status: ClientStatus) {
        self.0.lock().push(format!("status:{}", status));
    }
}

pub struct Harness {
    pub client: LightstreamerClient,
    pub scheduler: ManualScheduler,
    pub transport: Arc<ScriptedTransport>,
    pub queue: CallbackQueue,
    events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new(options: ConnectionOptions) -> Self {
        setup_logger();
        let details = ConnectionDetails::new(Some(SERVER), Some("DEMO"), None, None)
            .expect("valid address");
        let scheduler = ManualScheduler::new();
        let transport = Arc::new(ScriptedTransport::default());
        let factory: Arc<dyn TransportFactory> = transport.clone();
        let queue = CallbackQueue::collecting();
        let client = LightstreamerClient::with_environment(
            details,
            options,
            Arc::new(scheduler.clone()),
            factory,
            queue.clone(),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        client.add_listener(Box::new(EventRecorder(Arc::clone(&events))));
        queue.drain();
        Self {
            client,
            scheduler,
            transport,
            queue,
            events,
        }
    }

    /// Delivers queued notifications and returns every event recorded since
    /// the last call.
    pub fn take_events(&self) -> Vec<String> {
        self.queue.drain();
        std::mem::take(&mut *self.events.lock())
    }

    /// Status changes since the last call, without their `status:` prefix.
    pub fn statuses(&self) -> Vec<String> {
        self.take_events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("status:").map(str::to_string))
            .collect()
    }

    pub fn socket_count(&self) -> usize {
        self.transport.sockets.lock().len()
    }

    pub fn socket(&self, index: usize) -> SocketRecord {
        self.transport.sockets.lock()[index].clone()
    }

    pub fn last_socket(&self) -> SocketRecord {
        let sockets = self.transport.sockets.lock();
        sockets[sockets.len() - 1].clone()
    }

    pub fn request_count(&self) -> usize {
        self.transport.requests.lock().len()
    }

    pub fn request(&self, index: usize) -> RequestRecord {
        self.transport.requests.lock()[index].clone()
    }

    /// Connects and completes a WebSocket session `S1` with no keepalive.
    pub fn open_ws_session(&self) -> SocketRecord {
        self.client.connect().expect("address configured");
        let socket = self.last_socket();
        socket.callbacks.on_open();
        socket.callbacks.on_message("CONOK,S1,50000,0,*\r\n");
        socket
    }
}
