/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Binding transports to an existing session, keepalive watching and the
//! LOOP-driven rebind cycle.

use super::create::{CreateStyle, http_url, ws_url};
use super::machine::ClientMachine;
use super::scheduler::TimerId;
use super::selection::{Family, TransportKind};
use super::state::{Bind, CreatePhase, Mode, Poll, Rec, SessionInfo, Singleton, Stream, Tr};
use crate::client::{ClientStatus, ConnectionType};
use crate::protocol::RequestBuilder;
use tracing::{debug, info, trace, warn};

pub(super) fn polling_kind(family: Family) -> TransportKind {
    match family {
        Family::Ws => TransportKind::WsPolling,
        Family::Http => TransportKind::HttpPolling,
    }
}

fn connection_type(kind: TransportKind) -> ConnectionType {
    match kind {
        TransportKind::WsStreaming => ConnectionType::WsStreaming,
        TransportKind::HttpStreaming => ConnectionType::HttpStreaming,
        TransportKind::WsPolling => ConnectionType::WsPolling,
        TransportKind::HttpPolling => ConnectionType::HttpPolling,
    }
}

/// State entered when the CONOK of a bind arrives.
fn bound(kind: TransportKind) -> Tr {
    match kind {
        TransportKind::WsStreaming => Tr::WsStreaming(Bind::Bound(Stream::Watching)),
        TransportKind::HttpStreaming => Tr::HttpStreaming(Bind::Bound(Stream::Watching)),
        TransportKind::WsPolling => Tr::WsPolling(Bind::Bound(Poll::Waiting)),
        TransportKind::HttpPolling => Tr::HttpPolling(Bind::Bound(Poll::Waiting)),
    }
}

fn phase<T>(opening: bool) -> Bind<T> {
    if opening { Bind::Opening } else { Bind::Sent }
}

/// State of a bind request that is out (or waiting for its socket).
fn in_flight(kind: TransportKind, opening: bool) -> Tr {
    match kind {
        TransportKind::WsStreaming => Tr::WsStreaming(phase(opening)),
        TransportKind::HttpStreaming => Tr::HttpStreaming(phase(opening)),
        TransportKind::WsPolling => Tr::WsPolling(phase(opening)),
        TransportKind::HttpPolling => Tr::HttpPolling(phase(opening)),
    }
}

const PUSH_TIMERS: [TimerId; 6] = [
    TimerId::Keepalive,
    TimerId::Stalled,
    TimerId::Reconnect,
    TimerId::PollingIdle,
    TimerId::PollingPause,
    TimerId::RebindPause,
];

impl ClientMachine {
    pub(super) fn cancel_push_timers(&mut self) {
        for id in PUSH_TIMERS {
            self.cancel(id);
        }
    }

    pub(super) fn on_conok(&mut self, info: SessionInfo) {
        match self.mode {
            Mode::CreatingWs(CreatePhase::Sent) => {
                let tr = if self.create_kind.is_streaming() {
                    Tr::WsSession(Stream::Watching)
                } else {
                    bound(TransportKind::WsPolling)
                };
                self.session_created(info, tr);
            }
            Mode::CreatingHttp => self.session_created(info, Tr::HttpSession),
            Mode::CreatingTtl => self.session_created(info, Tr::TtlSession),
            Mode::HasSession(
                tr @ (Tr::WsStreaming(Bind::Sent)
                | Tr::HttpStreaming(Bind::Sent)
                | Tr::WsPolling(Bind::Sent)
                | Tr::HttpPolling(Bind::Sent)),
            ) => {
                if let Some(kind) = tr.kind() {
                    self.bind_confirmed(info, kind);
                }
            }
            Mode::HasSession(Tr::Recovering(Rec::Sending, family)) => {
                self.cancel(TimerId::TransportTimeout);
                info!("Session {} recovered over {:?}", info.id, family);
                self.update_session(info);
                self.enter(bound(polling_kind(family)));
            }
            other => warn!("Unexpected CONOK (m={})", other.code()),
        }
    }

    fn session_created(&mut self, info: SessionInfo, tr: Tr) {
        self.cancel(TimerId::TransportTimeout);
        self.cancel(TimerId::RetryWait);
        info!(
            "Session {} created (request limit {}, keepalive {} ms)",
            info.id, info.request_limit, info.keepalive_ms
        );
        self.retry.reset(self.options.get_retry_delay());
        self.first_retry = true;
        self.old_session = None;
        self.server_prog = 0;
        self.client_prog = 0;
        self.details.session_id = Some(info.id.clone());
        self.session = Some(info);
        self.details.server_instance_address = self.control_address();
        self.notify_property("sessionId");
        self.notify_property("serverInstanceAddress");
        self.notify_property("requestLimit");
        self.notify_keepalive(tr);
        self.enter(tr);
    }

    fn notify_keepalive(&self, tr: Tr) {
        match tr.kind() {
            Some(kind) if !kind.is_streaming() => self.notify_property("idleTimeout"),
            _ => self.notify_property("keepaliveInterval"),
        }
    }

    /// Takes the negotiated values of a bind or recovery CONOK.
    fn update_session(&mut self, info: SessionInfo) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.id != info.id {
            warn!("Bind answered for session {} instead of {}", info.id, session.id);
        }
        let limit_changed = session.request_limit != info.request_limit;
        let keepalive_changed = session.keepalive_ms != info.keepalive_ms;
        session.request_limit = info.request_limit;
        session.keepalive_ms = info.keepalive_ms;
        if limit_changed {
            self.notify_property("requestLimit");
        }
        if keepalive_changed {
            if let Some(tr) = self.mode.tr() {
                self.notify_keepalive(tr);
            }
        }
    }

    fn bind_confirmed(&mut self, info: SessionInfo, kind: TransportKind) {
        self.cancel(TimerId::TransportTimeout);
        debug!("Bound over {}", kind);
        self.update_session(info);
        self.enter(bound(kind));
    }

    /// Enters a pushing state and starts its watch timers.
    fn enter(&mut self, tr: Tr) {
        self.set_tr(tr);
        let status = match (tr, tr.kind()) {
            (Tr::HttpSession | Tr::TtlSession, _) => {
                ClientStatus::Connected(ConnectionType::StreamSensing)
            }
            (_, Some(kind)) => ClientStatus::Connected(connection_type(kind)),
            (_, None) => self.status,
        };
        self.set_status(status);
        if tr.stream().is_some() {
            self.watch_stream();
        } else if matches!(tr, Tr::HttpSession | Tr::TtlSession) {
            // the LOOP ending stream-sensing follows the CONOK at once
            self.schedule(TimerId::PollingIdle, self.retry.current());
        } else {
            let idle = self.options.get_idle_timeout() + self.options.get_reconnect_timeout();
            self.schedule(TimerId::PollingIdle, idle);
        }
        self.evaluate_heartbeat();
        self.check_transport("api");
    }

    /// (Re)starts the keepalive watch of a streaming transport.
    pub(super) fn watch_stream(&mut self) {
        self.cancel(TimerId::Stalled);
        self.cancel(TimerId::Reconnect);
        let keepalive = self.session.as_ref().map_or(0, |s| s.keepalive_ms);
        if keepalive > 0 {
            self.schedule(TimerId::Keepalive, keepalive);
        } else {
            self.cancel(TimerId::Keepalive);
        }
    }

    /// Any line on a streaming transport proves it alive.
    pub(super) fn stream_activity(&mut self) {
        let Some(tr) = self.mode.tr() else {
            return;
        };
        let Some(stream) = tr.stream() else {
            return;
        };
        if stream != Stream::Watching {
            self.set_tr(tr.with_stream(Stream::Watching));
            if let Some(kind) = tr.kind() {
                self.set_status(ClientStatus::Connected(connection_type(kind)));
            }
        }
        self.watch_stream();
    }

    pub(super) fn keepalive_missed(&mut self) {
        let Some(tr) = self.mode.tr() else {
            return;
        };
        if tr.stream() == Some(Stream::Watching) {
            debug!("Keepalive missed");
            self.set_tr(tr.with_stream(Stream::Stalling));
            self.schedule(TimerId::Stalled, self.options.get_stalled_timeout());
        }
    }

    pub(super) fn stream_stalled(&mut self) {
        let Some(tr) = self.mode.tr() else {
            return;
        };
        if tr.stream() == Some(Stream::Stalling) {
            warn!("Stream stalled");
            self.set_tr(tr.with_stream(Stream::Stalled));
            self.set_status(ClientStatus::Stalled);
            self.schedule(TimerId::Reconnect, self.options.get_reconnect_timeout());
        }
    }

    pub(super) fn bind_best(&mut self) {
        match self
            .selection
            .best_for_binding(self.options.get_forced_transport())
        {
            Some(kind) => self.bind(kind),
            None => self.terminate_unavailable(),
        }
    }

    fn bind(&mut self, kind: TransportKind) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        let style = if kind.is_streaming() {
            CreateStyle::Streaming
        } else {
            CreateStyle::Polling
        };
        let mut request = RequestBuilder::new().param("LS_session", session_id);
        request = self.connection_params(request, style);
        if kind == TransportKind::HttpStreaming {
            request = request.param("LS_content_length", self.options.get_content_length());
        }
        if !self.options.is_slowing_enabled() {
            request = request.param("LS_send_sync", false);
        }
        let params = request.param_opt("LS_cause", self.take_cause()).encode();
        debug!("Binding over {}", kind);
        self.send_bind(kind, params, None);
    }

    /// Sends a bind request; with `recovery` the request is a recovery over that
    /// family instead of a plain rebind.
    pub(super) fn send_bind(&mut self, kind: TransportKind, params: String, recovery: Option<Family>) {
        let Some(address) = self.control_address() else {
            self.terminate(None);
            return;
        };
        self.cancel_push_timers();
        self.connect_ts = self.now();
        let reuse_ws = kind.family() == Family::Ws && self.ws.is_some() && self.ws_pending.is_none();
        let opening = kind.family() == Family::Ws && !reuse_ws;
        let tr = match recovery {
            Some(family) if opening => Tr::Recovering(Rec::Start, family),
            Some(family) => Tr::Recovering(Rec::Sending, family),
            None => in_flight(kind, opening),
        };
        self.set_tr(tr);
        self.schedule(TimerId::TransportTimeout, self.retry.current());
        let sent = match kind.family() {
            Family::Ws => {
                self.dispose_http();
                let frame = format!("bind_session\r\n{}", params);
                if reuse_ws {
                    self.send_ws(frame);
                    Ok(())
                } else {
                    self.open_ws(&ws_url(&address), frame, false)
                }
            }
            Family::Http => {
                self.dispose_ws();
                self.send_main_http(&http_url(&address, "bind_session"), params, false)
            }
        };
        if let Err(e) = sent {
            warn!("Cannot send bind request: {}", e);
            self.transport_failed(false);
        }
    }

    pub(super) fn on_loop(&mut self, delay_ms: u64) {
        let Some(tr) = self.mode.tr() else {
            return;
        };
        match tr {
            Tr::WsPolling(Bind::Bound(Poll::Waiting)) | Tr::HttpPolling(Bind::Bound(Poll::Waiting)) => {
                self.cancel(TimerId::PollingIdle);
                let pausing = match tr {
                    Tr::WsPolling(_) => Tr::WsPolling(Bind::Bound(Poll::Pausing)),
                    _ => {
                        self.dispose_http();
                        Tr::HttpPolling(Bind::Bound(Poll::Pausing))
                    }
                };
                self.set_tr(pausing);
                if delay_ms == 0 {
                    self.bind_best();
                } else {
                    self.schedule(TimerId::PollingPause, delay_ms);
                }
            }
            Tr::WsSession(_)
            | Tr::HttpSession
            | Tr::TtlSession
            | Tr::WsStreaming(Bind::Bound(_))
            | Tr::HttpStreaming(Bind::Bound(_)) => {
                self.cancel_push_timers();
                self.dispose_http();
                if delay_ms == 0 {
                    self.bind_best();
                } else {
                    debug!("Rebinding in {} ms", delay_ms);
                    self.dispose_ws();
                    self.set_tr(Tr::Paused);
                    self.schedule(TimerId::RebindPause, delay_ms);
                }
            }
            other => trace!("LOOP ignored (tr={})", other.code()),
        }
    }

    /// The main transport failed or timed out.
    pub(super) fn transport_failed(&mut self, timeout: bool) {
        match self.mode {
            mode if mode.is_creating() => {
                self.dispose_ws();
                self.dispose_http();
                self.create_failed(timeout);
            }
            Mode::HasSession(tr) => match tr {
                Tr::WsStreaming(Bind::Opening | Bind::Sent)
                | Tr::WsPolling(Bind::Opening | Bind::Sent) => {
                    warn!("WebSocket bind failed, disabling WebSocket transports");
                    self.selection.disable_ws();
                    self.dispose_ws();
                    self.bind_best();
                }
                Tr::HttpStreaming(Bind::Sent) if timeout => {
                    warn!("HTTP streaming bind unanswered, disabling HTTP streaming");
                    self.selection.disable(&[TransportKind::HttpStreaming]);
                    self.dispose_http();
                    self.bind_best();
                }
                Tr::Recovering(..) => self.recovery_failed(),
                Tr::Paused => {}
                _ => self.session_broken(),
            },
            _ => {}
        }
    }

    /// Asks the server to move the session to the best transport when the
    /// current one is no longer it.
    pub(super) fn check_transport(&mut self, cause: &'static str) {
        let Some(tr) = self.mode.tr() else {
            return;
        };
        let best = self
            .selection
            .best_for_binding(self.options.get_forced_transport());
        match (best, tr.kind()) {
            (None, _) => self.terminate_unavailable(),
            (Some(best), Some(current)) if best == current => {
                trace!("No transport switch needed ({})", current);
            }
            (Some(best), Some(current)) => {
                if self.swt == Singleton::Idle {
                    info!("Switching transport from {} to {}", current, best);
                    self.swt = Singleton::Pending;
                    self.swt_cause = cause;
                }
            }
            // sensing and paused states rebind at their next LOOP or timer
            (Some(_), None) => {}
        }
    }
}
