/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use super::{HttpConnection, TransportCallbacks};
use crate::utils::SessionError;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// HTTP transport over reqwest. Each request is a `POST` whose response body is
/// consumed as a stream of lines.
#[derive(Clone)]
pub struct ReqwestTransport {
    runtime: Handle,
    client: reqwest::Client,
}

struct ReqwestConnection {
    task: AbortHandle,
}

impl HttpConnection for ReqwestConnection {
    fn dispose(&mut self) {
        self.task.abort();
    }
}

/// Reassembles lines from arbitrary chunks of a response body.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends a chunk and returns the lines it completes, without terminators.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }

    /// Whatever is left once the body ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

impl ReqwestTransport {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            client: reqwest::Client::new(),
        }
    }

    pub(crate) fn post(
        &self,
        url: &str,
        body: String,
        headers: &HashMap<String, String>,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn HttpConnection>, SessionError> {
        let target = reqwest::Url::parse(url)
            .map_err(|e| SessionError::Transport(format!("invalid url {}: {}", url, e)))?;
        let mut request = self
            .client
            .post(target)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let join = self.runtime.spawn(async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    debug!("HTTP request failed: {}", e);
                    callbacks.on_error(&e.to_string());
                    return;
                }
            };
            if !response.status().is_success() {
                callbacks.on_error(&format!("HTTP status {}", response.status()));
                return;
            }
            let mut body = response.bytes_stream();
            let mut buffer = LineBuffer::default();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for line in buffer.push(&bytes) {
                            trace!("HTTP << {}", line);
                            callbacks.on_message(&line);
                        }
                    }
                    Err(e) => {
                        callbacks.on_error(&e.to_string());
                        return;
                    }
                }
            }
            if let Some(line) = buffer.finish() {
                callbacks.on_message(&line);
            }
            callbacks.on_done();
        });

        Ok(Box::new(ReqwestConnection {
            task: join.abort_handle(),
        }))
    }
}
