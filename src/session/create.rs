/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Session creation over WebSocket, HTTP and HTTP with unlimited TTL.

use super::machine::ClientMachine;
use super::scheduler::TimerId;
use super::selection::{Family, TransportKind, is_ws_only};
use super::state::{Bind, CreatePhase, Mode, Rec, RetryKind, Tr};
use crate::client::ClientStatus;
use crate::connection::MaxBandwidth;
use crate::protocol::{CLIENT_CID, RequestBuilder, TLCP_VERSION};
use tracing::{debug, info, warn};

/// Rewrites the scheme of `address` for the given family, keeping TLS on or off.
pub(super) fn with_scheme(address: &str, family: Family) -> String {
    let (secure, rest) = if let Some(rest) = address.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = address.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = address.strip_prefix("http://") {
        (false, rest)
    } else if let Some(rest) = address.strip_prefix("ws://") {
        (false, rest)
    } else {
        (false, address)
    };
    let scheme = match (family, secure) {
        (Family::Ws, true) => "wss",
        (Family::Ws, false) => "ws",
        (Family::Http, true) => "https",
        (Family::Http, false) => "http",
    };
    format!("{}://{}", scheme, rest.trim_end_matches('/'))
}

pub(super) fn ws_url(address: &str) -> String {
    format!("{}/lightstreamer", with_scheme(address, Family::Ws))
}

pub(super) fn http_url(address: &str, verb: &str) -> String {
    format!(
        "{}/lightstreamer/{}.txt?LS_protocol={}",
        with_scheme(address, Family::Http),
        verb,
        TLCP_VERSION
    )
}

/// How the first bind of a session behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CreateStyle {
    Streaming,
    Polling,
    /// HTTP stream-sensing: a zero-wait poll answered by CONOK and LOOP.
    Sensing,
    /// Stream-sensing with an unlimited TTL.
    Ttl,
}

impl ClientMachine {
    /// Address used by binds and control requests: the server's control link
    /// when provided and not ignored, else the configured address.
    pub(super) fn control_address(&self) -> Option<String> {
        let configured = self.details.get_server_address()?.to_string();
        if self.options.is_server_instance_address_ignored() {
            return Some(configured);
        }
        match self.session.as_ref().and_then(|s| s.control_link.as_deref()) {
            Some(link) if link.contains("://") => Some(link.to_string()),
            Some(link) => {
                let secure = configured.starts_with("https://") || configured.starts_with("wss://");
                Some(format!("{}://{}", if secure { "https" } else { "http" }, link))
            }
            None => Some(configured),
        }
    }

    pub(super) fn create_params(&mut self, style: CreateStyle) -> String {
        let mut request = RequestBuilder::new()
            .param("LS_cid", CLIENT_CID)
            .param_opt("LS_adapter_set", self.details.get_adapter_set())
            .param_opt("LS_user", self.details.get_user())
            .param_opt("LS_password", self.details.get_password());
        if !self.options.is_slowing_enabled() {
            request = request.param("LS_send_sync", false);
        }
        request = self.connection_params(request, style);
        if let MaxBandwidth::Limited(kbps) = self.options.get_requested_max_bandwidth() {
            request = request.param("LS_requested_max_bandwidth", kbps);
        }
        if style == CreateStyle::Ttl {
            request = request.param("LS_ttl_millis", "unlimited");
        }
        request
            .param_opt("LS_old_session", self.old_session.clone())
            .param_opt("LS_cause", self.take_cause())
            .encode()
    }

    /// Parameters shared by create and bind requests.
    pub(super) fn connection_params(
        &self,
        mut request: RequestBuilder,
        style: CreateStyle,
    ) -> RequestBuilder {
        match style {
            CreateStyle::Streaming => {
                let keepalive = self.options.get_keepalive_interval();
                if keepalive > 0 {
                    request = request.param("LS_keepalive_millis", keepalive);
                }
            }
            CreateStyle::Polling => {
                request = request
                    .param("LS_polling", true)
                    .param("LS_polling_millis", self.options.get_polling_interval())
                    .param("LS_idle_millis", self.options.get_idle_timeout());
            }
            CreateStyle::Sensing | CreateStyle::Ttl => {
                request = request
                    .param("LS_polling", true)
                    .param("LS_polling_millis", 0)
                    .param("LS_idle_millis", 0);
            }
        }
        let inactivity = self.options.get_reverse_heartbeat_interval();
        if inactivity > 0 {
            request = request.param("LS_inactivity_millis", inactivity);
        }
        request
    }

    /// Starts a new session over the best family.
    pub(super) fn create_session(&mut self) {
        let forced = self.options.get_forced_transport();
        self.connect_ts = self.now();
        self.set_status(ClientStatus::Connecting);
        match self.selection.best_for_binding(forced) {
            None => self.terminate_unavailable(),
            Some(kind) if kind.family() == Family::Ws => self.create_ws(kind),
            Some(_) if self.next_create_ttl => {
                self.next_create_ttl = false;
                self.create_http(CreateStyle::Ttl);
            }
            Some(_) => self.create_http(CreateStyle::Sensing),
        }
    }

    fn create_ws(&mut self, kind: TransportKind) {
        let Some(address) = self.details.get_server_address().map(ws_url) else {
            self.terminate(None);
            return;
        };
        self.create_kind = kind;
        let style = if kind.is_streaming() {
            CreateStyle::Streaming
        } else {
            CreateStyle::Polling
        };
        let frame = format!("create_session\r\n{}", self.create_params(style));
        info!("Creating session over {}", kind);
        self.set_mode(Mode::CreatingWs(CreatePhase::Opening));
        self.schedule(TimerId::TransportTimeout, self.retry.current());
        if let Err(e) = self.open_ws(&address, frame, true) {
            warn!("Cannot open WebSocket: {}", e);
            self.transport_failed(false);
        }
    }

    fn create_http(&mut self, style: CreateStyle) {
        let Some(address) = self.details.get_server_address().map(|a| http_url(a, "create_session"))
        else {
            self.terminate(None);
            return;
        };
        let body = self.create_params(style);
        info!("Creating session over HTTP ({:?})", style);
        self.set_mode(if style == CreateStyle::Ttl {
            Mode::CreatingTtl
        } else {
            Mode::CreatingHttp
        });
        self.schedule(TimerId::TransportTimeout, self.retry.current());
        if let Err(e) = self.send_main_http(&address, body, true) {
            warn!("Cannot send create request: {}", e);
            self.transport_failed(false);
        }
    }

    /// The WebSocket being opened is ready: announce the protocol and send the
    /// request waiting for it.
    pub(super) fn ws_opened(&mut self) {
        debug!("WebSocket open");
        self.send_ws("wsok".to_string());
        if let Some(frame) = self.ws_pending.take() {
            self.send_ws(frame);
        }
        let next = match self.mode {
            Mode::CreatingWs(CreatePhase::Opening) => Mode::CreatingWs(CreatePhase::Sent),
            Mode::HasSession(Tr::WsStreaming(Bind::Opening)) => {
                Mode::HasSession(Tr::WsStreaming(Bind::Sent))
            }
            Mode::HasSession(Tr::WsPolling(Bind::Opening)) => {
                Mode::HasSession(Tr::WsPolling(Bind::Sent))
            }
            Mode::HasSession(Tr::Recovering(Rec::Start, family)) => {
                Mode::HasSession(Tr::Recovering(Rec::Sending, family))
            }
            other => other,
        };
        self.set_mode(next);
    }

    /// A create attempt failed; `timeout` when no answer came in time.
    pub(super) fn create_failed(&mut self, timeout: bool) {
        match self.mode {
            Mode::CreatingWs(_) => {
                if is_ws_only(self.options.get_forced_transport()) {
                    self.retry_wait(RetryKind::WsCreateFailed);
                } else {
                    debug!("WebSocket unavailable, creating over HTTP");
                    self.selection.suspend_ws();
                    self.retry_wait(RetryKind::WsUnavailable);
                }
            }
            Mode::CreatingHttp if timeout => {
                self.next_create_ttl = true;
                self.retry_wait(RetryKind::Immediate);
            }
            Mode::CreatingHttp => self.retry_wait(RetryKind::HttpCreateFailed),
            Mode::CreatingTtl => self.retry_wait(RetryKind::Ttl),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        assert_eq!(ws_url("https://push.example.com"), "wss://push.example.com/lightstreamer");
        assert_eq!(ws_url("http://localhost:8080/"), "ws://localhost:8080/lightstreamer");
        assert_eq!(
            http_url("wss://push.example.com", "bind_session"),
            "https://push.example.com/lightstreamer/bind_session.txt?LS_protocol=TLCP-2.5.0"
        );
        assert_eq!(with_scheme("ws://h:80", Family::Http), "http://h:80");
    }
}
