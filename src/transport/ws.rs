/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use super::{TransportCallbacks, WsConnection};
use crate::protocol::WS_PROTOCOL;
use crate::utils::SessionError;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::{debug, trace, warn};

/// How long a disposed socket may take to flush its queued frames and close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// WebSocket transport over tokio-tungstenite.
#[derive(Clone)]
pub struct TungsteniteTransport {
    runtime: Handle,
}

struct TungsteniteConnection {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    disposed: Arc<AtomicBool>,
    task: AbortHandle,
    runtime: Handle,
}

impl WsConnection for TungsteniteConnection {
    fn send(&mut self, frame: String) {
        if let Some(tx) = &self.outgoing {
            if tx.send(frame).is_err() {
                debug!("WebSocket writer already gone, frame dropped");
            }
        }
    }

    /// Closing the channel lets the writer send what is queued, then close the
    /// socket. Callbacks are muted from here on.
    fn dispose(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        if self.outgoing.take().is_none() || self.task.is_finished() {
            return;
        }
        let task = self.task.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(CLOSE_GRACE).await;
            task.abort();
        });
    }
}

impl TungsteniteTransport {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    pub(crate) fn open(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn WsConnection>, SessionError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SessionError::Transport(format!("invalid WebSocket url {}: {}", url, e)))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(WS_PROTOCOL));
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    request.headers_mut().insert(name, value);
                }
                _ => warn!("Skipping invalid extra header {}", name),
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let disposed = Arc::new(AtomicBool::new(false));
        let muted = Arc::clone(&disposed);
        let target = url.to_string();
        let join = self.runtime.spawn(async move {
            let live = || !muted.load(Ordering::SeqCst);
            let stream = match connect_async(request).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    debug!("WebSocket connection to {} failed: {}", target, e);
                    if live() {
                        callbacks.on_error(&e.to_string());
                    }
                    return;
                }
            };
            if live() {
                callbacks.on_open();
            }
            let (mut write, mut read) = stream.split();
            loop {
                tokio::select! {
                    biased;
                    frame = rx.recv() => match frame {
                        Some(frame) => {
                            trace!("WS >> {}", frame);
                            if let Err(e) = write.send(Message::Text(frame.into())).await {
                                if live() {
                                    callbacks.on_error(&e.to_string());
                                }
                                break;
                            }
                        }
                        None => {
                            debug!("Closing WebSocket to {}", target);
                            let _ = write.close().await;
                            break;
                        }
                    },
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if live() {
                                callbacks.on_message(text.as_str());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if live() {
                                callbacks.on_done();
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            if live() {
                                callbacks.on_error(&e.to_string());
                            }
                            break;
                        }
                    },
                }
            }
        });

        Ok(Box::new(TungsteniteConnection {
            outgoing: Some(tx),
            disposed,
            task: join.abort_handle(),
            runtime: self.runtime.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportSink;
    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Events {
        fn snapshot(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl TransportSink for Events {
        fn transport_open(&self, token: u64) {
            self.0.lock().push(format!("open:{}", token));
        }
        fn transport_lines(&self, token: u64, _lines: &[&str]) {
            self.0.lock().push(format!("lines:{}", token));
        }
        fn transport_error(&self, token: u64, _reason: &str) {
            self.0.lock().push(format!("error:{}", token));
        }
        fn transport_done(&self, token: u64) {
            self.0.lock().push(format!("done:{}", token));
        }
    }

    async fn wait_for(events: &Events, expected: &str) {
        for _ in 0..100 {
            if events.snapshot().iter().any(|e| e == expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no {} in {:?}", expected, events.snapshot());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_synchronously() {
        let transport = TungsteniteTransport::new(Handle::current());
        let sink: Arc<dyn TransportSink> = Arc::new(Events::default());
        let result = transport.open(
            "not a url",
            &HashMap::new(),
            TransportCallbacks::new(Arc::downgrade(&sink), 1),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error() {
        let transport = TungsteniteTransport::new(Handle::current());
        let events = Arc::new(Events::default());
        let sink: Arc<dyn TransportSink> = events.clone();
        let _conn = transport
            .open(
                "ws://127.0.0.1:1/lightstreamer",
                &HashMap::new(),
                TransportCallbacks::new(Arc::downgrade(&sink), 3),
            )
            .unwrap();
        wait_for(&events, "error:3").await;
        assert_eq!(events.snapshot(), vec!["error:3"]);
    }

    /// Frames queued right before disposal still reach the server, followed by
    /// a close; no callback fires after disposal.
    #[tokio::test]
    async fn test_dispose_flushes_queued_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let answer_protocol =
                |_request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                    response
                        .headers_mut()
                        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(WS_PROTOCOL));
                    Ok(response)
                };
            let mut socket = tokio_tungstenite::accept_hdr_async(tcp, answer_protocol)
                .await
                .unwrap();
            let mut frames = Vec::new();
            while let Some(Ok(message)) = socket.next().await {
                match message {
                    Message::Text(text) => frames.push(text.as_str().to_string()),
                    Message::Close(_) => {
                        frames.push("<close>".to_string());
                        break;
                    }
                    _ => {}
                }
            }
            frames
        });

        let transport = TungsteniteTransport::new(Handle::current());
        let events = Arc::new(Events::default());
        let sink: Arc<dyn TransportSink> = events.clone();
        let mut conn = transport
            .open(
                &format!("ws://{}/lightstreamer", address),
                &HashMap::new(),
                TransportCallbacks::new(Arc::downgrade(&sink), 7),
            )
            .unwrap();
        wait_for(&events, "open:7").await;

        conn.send("control\r\nLS_reqId=1&LS_op=destroy&LS_close_socket=true&LS_cause=api".to_string());
        conn.dispose();

        let frames = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server finished")
            .unwrap();
        assert_eq!(
            frames,
            vec![
                "control\r\nLS_reqId=1&LS_op=destroy&LS_close_socket=true&LS_cause=api",
                "<close>",
            ]
        );
        assert_eq!(events.snapshot(), vec!["open:7"]);
    }
}
