/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use super::retry::RetryDelayCounter;
use super::scheduler::{Scheduler, TimerId, Timers};
use super::selection::{TransportKind, TransportSelection};
use super::slowing::SlowingDetector;
use super::state::{Bind, Ctrl, Mode, Poll, Rec, RetryKind, Rhb, SessionInfo, Singleton, Tr};
use super::{Engine, RequestOwner};
use crate::client::{
    CallbackQueue, ClientListener, ClientMessageListener, ClientStatus, DisconnectionType,
    SharedClientListener,
};
use crate::connection::{ConnectionDetails, ConnectionOptions, MaxBandwidth};
use crate::message::MessageTier;
use crate::protocol::RealBandwidth;
use crate::mpn::{MpnDevice, MpnSubscription, MpnSubscriptionFilter, MpnTier};
use crate::subscription::manager::{SubscriptionOwner, SubscriptionTier};
use crate::subscription::Subscription;
use crate::transport::{
    HttpConnection, TransportCallbacks, TransportFactory, TransportSink, WsConnection,
};
use crate::utils::{IllegalArgumentException, IllegalStateException, SessionError};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Delay of the retry that follows a TTL create failure.
const TTL_RETRY_MS: u64 = 60_000;

pub(super) struct WsHandle {
    pub token: u64,
    pub conn: Box<dyn WsConnection>,
}

pub(super) struct HttpHandle {
    pub token: u64,
    pub conn: Box<dyn HttpConnection>,
}

/// All mutable state of one client.
pub(crate) struct ClientMachine {
    pub(super) me: Weak<Engine>,
    pub(super) scheduler: Arc<dyn Scheduler>,
    pub(super) factory: Arc<dyn TransportFactory>,
    pub(super) queue: CallbackQueue,
    pub(super) details: ConnectionDetails,
    pub(super) options: ConnectionOptions,
    pub(super) listeners: Vec<SharedClientListener>,
    pub(super) status: ClientStatus,
    pub(super) mode: Mode,
    pub(super) selection: TransportSelection,
    pub(super) retry: RetryDelayCounter,
    pub(super) timers: Timers,
    pub(super) ws: Option<WsHandle>,
    /// Frame to send as soon as the socket being opened is ready.
    pub(super) ws_pending: Option<String>,
    pub(super) http: Option<HttpHandle>,
    pub(super) ctrl_http: Option<HttpHandle>,
    pub(super) ctrl: Ctrl,
    pub(super) next_token: u64,
    pub(super) session: Option<SessionInfo>,
    /// Kind requested by the last WebSocket create.
    pub(super) create_kind: TransportKind,
    pub(super) connect_ts: u64,
    pub(super) recover_ts: u64,
    pub(super) server_prog: u64,
    pub(super) client_prog: u64,
    /// Annotation for the next create or bind request, read once.
    pub(super) cause: Option<&'static str>,
    pub(super) old_session: Option<String>,
    pub(super) first_retry: bool,
    pub(super) next_create_ttl: bool,
    pub(super) next_req_id: u64,
    pub(super) next_sub_id: u32,
    pub(super) requests: HashMap<u64, RequestOwner>,
    pub(super) subscriptions: SubscriptionTier,
    pub(super) messages: MessageTier,
    pub(super) mpn: MpnTier,
    pub(super) swt: Singleton,
    pub(super) swt_cause: &'static str,
    pub(super) bw: Singleton,
    pub(super) real_bandwidth: Option<RealBandwidth>,
    pub(super) rhb: Rhb,
    pub(super) heartbeat_due: bool,
    pub(super) slowing: SlowingDetector,
}

impl ClientMachine {
    pub(super) fn new(
        me: Weak<Engine>,
        details: ConnectionDetails,
        options: ConnectionOptions,
        scheduler: Arc<dyn Scheduler>,
        factory: Arc<dyn TransportFactory>,
        queue: CallbackQueue,
    ) -> Self {
        let retry = RetryDelayCounter::new(options.get_retry_delay());
        Self {
            me,
            scheduler,
            factory,
            queue,
            details,
            options,
            listeners: Vec::new(),
            status: ClientStatus::Disconnected(DisconnectionType::Permanent),
            mode: Mode::Disconnected,
            selection: TransportSelection::default(),
            retry,
            timers: Timers::default(),
            ws: None,
            ws_pending: None,
            http: None,
            ctrl_http: None,
            ctrl: Ctrl::Idle,
            next_token: 0,
            session: None,
            create_kind: TransportKind::WsStreaming,
            connect_ts: 0,
            recover_ts: 0,
            server_prog: 0,
            client_prog: 0,
            cause: None,
            old_session: None,
            first_retry: true,
            next_create_ttl: false,
            next_req_id: 0,
            next_sub_id: 0,
            requests: HashMap::new(),
            subscriptions: SubscriptionTier::default(),
            messages: MessageTier::default(),
            mpn: MpnTier::default(),
            swt: Singleton::Idle,
            swt_cause: "api",
            bw: Singleton::Idle,
            real_bandwidth: None,
            rhb: Rhb::Disabled,
            heartbeat_due: false,
            slowing: SlowingDetector::default(),
        }
    }

    pub(super) fn now(&self) -> u64 {
        self.scheduler.now()
    }

    pub(super) fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        match mode.tr() {
            Some(tr) => trace!(
                "m={} tr={} h/rec={:?} (was m={})",
                mode.code(),
                tr.code(),
                tr.sub_code(),
                self.mode.code()
            ),
            None => trace!("m={} (was m={})", mode.code(), self.mode.code()),
        }
        self.mode = mode;
    }

    pub(super) fn set_tr(&mut self, tr: Tr) {
        self.set_mode(Mode::HasSession(tr));
    }

    /// Fires `on_status_change` when the status really changes.
    pub(super) fn set_status(&mut self, status: ClientStatus) {
        if status == self.status {
            return;
        }
        info!("Client status: {}", status);
        self.status = status;
        self.queue
            .post_each(self.listeners.clone(), move |l| l.on_status_change(status));
    }

    pub(super) fn notify_property(&self, property: &'static str) {
        trace!("Property changed: {}", property);
        self.queue
            .post_each(self.listeners.clone(), move |l| l.on_property_change(property));
    }

    pub(super) fn take_cause(&mut self) -> Option<&'static str> {
        self.cause.take()
    }

    // ---- timers

    pub(super) fn schedule(&mut self, id: TimerId, delay_ms: u64) {
        let generation = self.timers.next_generation();
        let engine = self.me.clone();
        let handle = self.scheduler.schedule(
            delay_ms,
            Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.on_timer(id, generation);
                }
            }),
        );
        if let Some(previous) = self.timers.insert(id, generation, handle) {
            self.scheduler.cancel(previous);
        }
    }

    pub(super) fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(id) {
            self.scheduler.cancel(handle);
        }
    }

    fn cancel_all_timers(&mut self) {
        for handle in self.timers.drain() {
            self.scheduler.cancel(handle);
        }
    }

    pub(crate) fn on_timer(&mut self, id: TimerId, generation: u64) {
        if !self.timers.fire(id, generation) {
            trace!("Stale timer {:?} ignored", id);
            return;
        }
        trace!("Timer {:?} fired (m={})", id, self.mode.code());
        match id {
            TimerId::TransportTimeout => self.transport_failed(true),
            TimerId::RetryWait => {
                if matches!(self.mode, Mode::RetryWait(_)) {
                    self.create_session();
                }
            }
            TimerId::Keepalive => self.keepalive_missed(),
            TimerId::Stalled => self.stream_stalled(),
            TimerId::Reconnect | TimerId::PollingIdle => self.transport_failed(false),
            TimerId::PollingPause => {
                if matches!(
                    self.mode.tr(),
                    Some(Tr::WsPolling(Bind::Bound(Poll::Pausing)))
                        | Some(Tr::HttpPolling(Bind::Bound(Poll::Pausing)))
                ) {
                    self.bind_best();
                }
            }
            TimerId::RebindPause => {
                if self.mode.tr() == Some(Tr::Paused) {
                    self.bind_best();
                }
            }
            TimerId::RecoveryWait => {
                if matches!(self.mode.tr(), Some(Tr::Recovering(Rec::Waiting, _))) {
                    self.recovery_attempt();
                }
            }
            TimerId::ReverseHeartbeat => {
                if self.session.is_some() {
                    self.heartbeat_due = true;
                }
            }
            TimerId::ControlTimeout => self.control_failed("timeout"),
            TimerId::ControlBackoff => {
                if self.ctrl == Ctrl::Backoff {
                    self.ctrl = Ctrl::Idle;
                    trace!("ctrl={}", self.ctrl.code());
                }
            }
        }
    }

    // ---- transport handles

    fn fresh_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn callbacks(&self, token: u64) -> TransportCallbacks {
        let sink: Weak<dyn TransportSink> = self.me.clone();
        TransportCallbacks::new(sink, token)
    }

    pub(super) fn headers(&self, creation: bool) -> HashMap<String, String> {
        match self.options.get_http_extra_headers() {
            Some(headers)
                if creation || !self.options.is_http_extra_headers_on_session_creation_only() =>
            {
                headers.clone()
            }
            _ => HashMap::new(),
        }
    }

    /// Opens the main WebSocket; `frame` goes out once it is open.
    pub(super) fn open_ws(
        &mut self,
        url: &str,
        frame: String,
        creation: bool,
    ) -> Result<(), SessionError> {
        self.dispose_ws();
        let token = self.fresh_token();
        let headers = self.headers(creation);
        debug!("Opening WebSocket {}", url);
        let conn = self
            .factory
            .open_ws(url, &headers, self.callbacks(token))?;
        self.ws = Some(WsHandle { token, conn });
        self.ws_pending = Some(frame);
        Ok(())
    }

    pub(super) fn send_ws(&mut self, frame: String) -> bool {
        match self.ws.as_mut() {
            Some(ws) => {
                debug!("WS >> {}", frame.replace("\r\n", " | "));
                ws.conn.send(frame);
                true
            }
            None => false,
        }
    }

    /// Sends an HTTP request that becomes the main transport.
    pub(super) fn send_main_http(
        &mut self,
        url: &str,
        body: String,
        creation: bool,
    ) -> Result<(), SessionError> {
        self.dispose_http();
        let token = self.fresh_token();
        let conn = self.post_http(url, body, creation, token)?;
        self.http = Some(HttpHandle { token, conn });
        Ok(())
    }

    pub(super) fn post_http(
        &mut self,
        url: &str,
        body: String,
        creation: bool,
        token: u64,
    ) -> Result<Box<dyn HttpConnection>, SessionError> {
        let headers = self.headers(creation);
        debug!("HTTP >> {} {}", url, body.replace("\r\n", " | "));
        self.factory
            .send_http(url, body, &headers, self.callbacks(token))
    }

    pub(super) fn new_ctrl_token(&mut self) -> u64 {
        self.fresh_token()
    }

    pub(super) fn dispose_ws(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            trace!("Disposing WebSocket {}", ws.token);
            ws.conn.dispose();
        }
        self.ws_pending = None;
    }

    pub(super) fn dispose_http(&mut self) {
        if let Some(mut http) = self.http.take() {
            trace!("Disposing HTTP request {}", http.token);
            http.conn.dispose();
        }
    }

    pub(super) fn dispose_ctrl(&mut self) {
        if let Some(mut http) = self.ctrl_http.take() {
            http.conn.dispose();
        }
        self.cancel(TimerId::ControlTimeout);
        self.cancel(TimerId::ControlBackoff);
        self.ctrl = Ctrl::Idle;
    }

    fn is_main(&self, token: u64) -> bool {
        self.ws.as_ref().is_some_and(|w| w.token == token)
            || self.http.as_ref().is_some_and(|h| h.token == token)
    }

    fn is_ctrl(&self, token: u64) -> bool {
        self.ctrl_http.as_ref().is_some_and(|h| h.token == token)
    }

    pub(crate) fn on_transport_open(&mut self, token: u64) {
        if self.ws.as_ref().is_some_and(|w| w.token == token) {
            self.ws_opened();
        } else {
            trace!("Open event of stale transport {}", token);
        }
    }

    pub(crate) fn on_transport_lines(&mut self, token: u64, lines: &[&str]) {
        for line in lines {
            if self.is_main(token) {
                self.on_line(line);
            } else if self.is_ctrl(token) {
                self.on_control_line(line);
            } else {
                trace!("Line of stale transport {} dropped: {}", token, line);
                return;
            }
        }
    }

    pub(crate) fn on_transport_error(&mut self, token: u64, reason: &str) {
        if self.is_main(token) {
            warn!("Transport error: {}", reason);
            self.transport_failed(false);
        } else if self.is_ctrl(token) {
            self.control_failed(reason);
        }
    }

    pub(crate) fn on_transport_done(&mut self, token: u64) {
        if self.is_main(token) {
            debug!("Transport closed by the server");
            self.transport_failed(false);
        } else if self.is_ctrl(token) {
            self.control_done();
        }
    }

    // ---- ids

    pub(super) fn alloc_sub_id(&mut self) -> u32 {
        self.next_sub_id += 1;
        self.next_sub_id
    }

    pub(super) fn alloc_req_id(&mut self) -> u64 {
        self.next_req_id += 1;
        self.next_req_id
    }

    // ---- teardown

    /// Drops everything bound to the current session. Subscriptions and messages
    /// that survive go back to pending.
    fn dispose_session(&mut self) {
        self.cancel_all_timers();
        self.dispose_ws();
        self.dispose_http();
        self.dispose_ctrl();
        self.requests.clear();
        self.subscriptions.on_session_lost(&self.queue);
        self.messages.on_session_lost(&self.queue);
        self.mpn.on_session_lost();
        self.swt = Singleton::Idle;
        self.bw = Singleton::Idle;
        self.real_bandwidth = None;
        self.heartbeat_due = false;
        self.slowing.reset();
        self.server_prog = 0;
        self.client_prog = 0;
        if self.session.take().is_some() {
            self.details.clear_session_fields();
            self.notify_property("sessionId");
        }
        self.selection.enable_all();
    }

    /// Ends in `Disconnected`; server-attributable failures carry `error`.
    pub(super) fn terminate(&mut self, error: Option<(i32, String)>) {
        self.dispose_session();
        self.set_mode(Mode::Disconnected);
        self.retry.reset(self.options.get_retry_delay());
        self.cause = None;
        self.old_session = None;
        self.next_create_ttl = false;
        self.set_status(ClientStatus::Disconnected(DisconnectionType::Permanent));
        if let Some((code, message)) = error {
            error!("Session closed by server error {}: {}", code, message);
            self.queue.post_each(self.listeners.clone(), move |l| {
                l.on_server_error(code, &message)
            });
        }
    }

    /// No eligible transport is left.
    pub(super) fn terminate_unavailable(&mut self) {
        warn!(
            "No transport available (forced transport {:?})",
            self.options.get_forced_transport()
        );
        self.terminate(None);
    }

    /// The session cannot be continued; a new one is created after the wait.
    pub(super) fn session_lost(&mut self, kind: RetryKind) {
        if let Some(session) = &self.session {
            self.old_session = Some(session.id.clone());
        }
        self.dispose_session();
        self.retry_wait(kind);
    }

    pub(super) fn retry_wait(&mut self, kind: RetryKind) {
        self.cancel(TimerId::TransportTimeout);
        self.dispose_ws();
        self.dispose_http();
        let delay = match kind {
            RetryKind::SessionLost if self.first_retry => {
                self.first_retry = false;
                let max = self.options.get_first_retry_max_delay();
                rand::thread_rng().gen_range(0..max.max(1))
            }
            RetryKind::SessionLost => self.counted_delay(),
            RetryKind::Ttl => TTL_RETRY_MS,
            RetryKind::WsUnavailable | RetryKind::Immediate => 0,
            counted => {
                debug_assert!(counted.is_counted());
                self.counted_delay()
            }
        };
        self.set_mode(Mode::RetryWait(kind));
        info!("Retrying in {} ms (m={})", delay, kind.code());
        self.set_status(ClientStatus::Disconnected(DisconnectionType::WillRetry));
        self.schedule(TimerId::RetryWait, delay);
    }

    fn counted_delay(&mut self) -> u64 {
        let elapsed = self.now().saturating_sub(self.connect_ts);
        let delay = self.retry.current().saturating_sub(elapsed);
        self.retry.increase();
        self.selection.lift_suspension();
        delay
    }

    // ---- public operations

    pub(crate) fn connect(&mut self) -> Result<(), IllegalStateException> {
        if self.details.get_server_address().is_none() {
            return Err(IllegalStateException::new(
                "Configure the server address before connecting",
            ));
        }
        if self.mode != Mode::Disconnected {
            trace!("connect ignored (m={})", self.mode.code());
            return Ok(());
        }
        trace!("m=101");
        self.selection.enable_all();
        self.retry.reset(self.options.get_retry_delay());
        self.first_retry = true;
        self.next_create_ttl = false;
        self.old_session = None;
        self.cause = Some("api");
        self.create_session();
        Ok(())
    }

    pub(crate) fn disconnect(&mut self) {
        if self.mode == Mode::Disconnected {
            return;
        }
        info!("Disconnecting (m={})", self.mode.code());
        self.send_destroy();
        self.terminate(None);
    }

    pub(crate) fn status(&self) -> ClientStatus {
        self.status
    }

    pub(crate) fn details(&self) -> ConnectionDetails {
        self.details.clone()
    }

    pub(crate) fn set_details(&mut self, mut details: ConnectionDetails) {
        details.session_id = self.details.session_id.take();
        details.server_instance_address = self.details.server_instance_address.take();
        details.server_socket_name = self.details.server_socket_name.take();
        details.client_ip = self.details.client_ip.take();
        self.details = details;
    }

    /// Bandwidth granted by the server, once known for the current session.
    pub(crate) fn real_max_bandwidth(&self) -> Option<RealBandwidth> {
        self.real_bandwidth
    }

    pub(crate) fn options(&self) -> ConnectionOptions {
        self.options.clone()
    }

    /// Replaces the options, applying the changes that affect a live session.
    pub(crate) fn set_options(&mut self, options: ConnectionOptions) {
        let previous = std::mem::replace(&mut self.options, options);
        if previous.get_forced_transport() != self.options.get_forced_transport() {
            self.check_transport("api");
        }
        if previous.get_requested_max_bandwidth() != self.options.get_requested_max_bandwidth() {
            self.request_bandwidth();
        }
        if previous.get_reverse_heartbeat_interval()
            != self.options.get_reverse_heartbeat_interval()
        {
            self.evaluate_heartbeat();
        }
    }

    pub(crate) fn set_requested_max_bandwidth(
        &mut self,
        bandwidth: MaxBandwidth,
    ) -> Result<(), IllegalArgumentException> {
        let mut options = self.options.clone();
        options.set_requested_max_bandwidth(bandwidth)?;
        self.set_options(options);
        Ok(())
    }

    pub(crate) fn add_listener(&mut self, listener: Box<dyn ClientListener>) {
        let shared: SharedClientListener = Arc::new(Mutex::new(listener));
        self.queue
            .post_each(vec![Arc::clone(&shared)], |l| l.on_listen_start());
        self.listeners.push(shared);
    }

    pub(crate) fn remove_listeners(&mut self) {
        let removed = std::mem::take(&mut self.listeners);
        self.queue.post_each(removed, |l| l.on_listen_end());
    }

    pub(crate) fn subscribe(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let spec = subscription.spec()?;
        let sub_id = self.next_sub_id + 1;
        subscription.attach(self.me.clone(), sub_id)?;
        self.next_sub_id = sub_id;
        self.subscriptions
            .add(sub_id, SubscriptionOwner::User(subscription.clone()), spec);
        Ok(())
    }

    pub(crate) fn unsubscribe(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), IllegalStateException> {
        let sub_id = subscription
            .sub_id()
            .filter(|id| self.subscriptions.contains(*id))
            .ok_or_else(|| IllegalStateException::new("Subscription is not active"))?;
        self.subscriptions.unsubscribe(sub_id, &self.queue);
        Ok(())
    }

    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.user_subscriptions()
    }

    pub(crate) fn reconfigure_subscription(&mut self, sub_id: u32) {
        self.subscriptions.reconfigure(sub_id);
    }

    pub(crate) fn send_message(
        &mut self,
        message: &str,
        sequence: Option<&str>,
        delay_timeout: Option<u64>,
        listener: Option<Box<dyn ClientMessageListener>>,
        enqueue_while_disconnected: bool,
    ) {
        if self.session.is_none() && !enqueue_while_disconnected {
            debug!("Message refused: no session");
            MessageTier::reject(message, listener, &self.queue);
            return;
        }
        self.messages.enqueue(
            message,
            sequence,
            delay_timeout,
            listener,
            enqueue_while_disconnected,
        );
    }

    pub(crate) fn register_for_mpn(&mut self, device: MpnDevice) {
        self.mpn.register(device);
    }

    fn require_device(&self) -> Result<(), IllegalStateException> {
        if self.mpn.device().is_none() {
            return Err(IllegalStateException::new("No MPN device registered"));
        }
        Ok(())
    }

    pub(crate) fn subscribe_mpn(
        &mut self,
        subscription: &MpnSubscription,
        coalescing: bool,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.require_device()?;
        let spec = subscription.spec()?;
        let sub_id = self.next_sub_id + 1;
        subscription.attach(self.me.clone(), sub_id)?;
        self.next_sub_id = sub_id;
        self.mpn
            .subscribe(sub_id, subscription.clone(), spec, coalescing);
        Ok(())
    }

    pub(crate) fn unsubscribe_mpn(
        &mut self,
        subscription: &MpnSubscription,
    ) -> Result<(), IllegalStateException> {
        let sub_id = subscription
            .sub_id()
            .ok_or_else(|| IllegalStateException::new("MPN subscription is not active"))?;
        self.mpn.unsubscribe(sub_id);
        Ok(())
    }

    pub(crate) fn unsubscribe_mpn_subscriptions(
        &mut self,
        filter: MpnSubscriptionFilter,
    ) -> Result<(), IllegalStateException> {
        self.require_device()?;
        self.mpn.unsubscribe_filter(filter);
        Ok(())
    }

    pub(crate) fn reset_mpn_badge(&mut self) -> Result<(), IllegalStateException> {
        self.require_device()?;
        self.mpn.reset_badge();
        Ok(())
    }

    pub(crate) fn reset_mpn_device(&mut self) {
        if self.mpn.reset_device() {
            self.subscriptions.unsubscribe_internal(&self.queue);
        }
    }

    pub(crate) fn mpn_subscription_ids(&self) -> Vec<String> {
        self.mpn.subscription_ids()
    }

    pub(crate) fn reconfigure_mpn_subscription(&mut self, sub_id: u32) {
        self.mpn.reconfigure(sub_id);
    }
}
