/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Outbound control traffic: batching of pending requests, the HTTP control
//! channel, reverse heartbeats and session destruction.

use super::create::http_url;
use super::machine::{ClientMachine, HttpHandle};
use super::scheduler::TimerId;
use super::selection::Family;
use super::state::{Ctrl, Rhb, Singleton};
use super::{Outgoing, RequestOwner};
use crate::connection::MaxBandwidth;
use crate::protocol::{RequestBuilder, batch_requests};
use tracing::{debug, trace, warn};

impl ClientMachine {
    /// Sends whatever is pending, if the current transport can carry it.
    pub(crate) fn flush(&mut self) {
        let Some(tr) = self.mode.tr() else {
            return;
        };
        if !tr.can_send() {
            return;
        }
        let Some((session_id, limit)) = self
            .session
            .as_ref()
            .map(|s| (s.id.clone(), s.request_limit))
        else {
            return;
        };
        if tr.kind().is_some_and(|kind| kind.family() == Family::Ws) {
            if self.ws.is_some() && self.ws_pending.is_none() {
                self.flush_ws(limit);
            }
        } else if self.ctrl == Ctrl::Idle {
            self.flush_http(&session_id, limit);
        }
    }

    /// Controls first, in a fixed order: transport switch, bandwidth,
    /// subscriptions, then MPN.
    fn collect_controls(&mut self) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let mut next = self.next_req_id;
        {
            let mut alloc = || {
                next += 1;
                next
            };
            if self.swt == Singleton::Pending {
                let req_id = alloc();
                out.push(Outgoing {
                    owner: RequestOwner::Switch,
                    req_id,
                    body: RequestBuilder::new()
                        .param("LS_reqId", req_id)
                        .param("LS_op", "force_rebind")
                        .param("LS_cause", self.swt_cause)
                        .encode(),
                });
            }
            if self.bw == Singleton::Pending {
                let req_id = alloc();
                let bandwidth: MaxBandwidth = self.options.get_requested_max_bandwidth();
                out.push(Outgoing {
                    owner: RequestOwner::Constrain,
                    req_id,
                    body: RequestBuilder::new()
                        .param("LS_reqId", req_id)
                        .param("LS_op", "constrain")
                        .param("LS_requested_max_bandwidth", bandwidth)
                        .encode(),
                });
            }
            self.subscriptions.collect(&mut alloc, &mut out);
            self.mpn.collect(&mut alloc, &mut out);
        }
        self.next_req_id = next;
        out
    }

    fn collect_messages(&mut self) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let mut next = self.next_req_id;
        self.messages.collect(
            &mut || {
                next += 1;
                next
            },
            &mut out,
        );
        self.next_req_id = next;
        out
    }

    fn mark_sent(&mut self, outgoing: Outgoing) {
        let Outgoing { owner, req_id, .. } = outgoing;
        match &owner {
            RequestOwner::Switch => self.swt = Singleton::Sent(req_id),
            RequestOwner::Constrain => self.bw = Singleton::Sent(req_id),
            RequestOwner::SubscriptionAdd(_)
            | RequestOwner::SubscriptionDelete(_)
            | RequestOwner::SubscriptionReconf(_) => self.subscriptions.mark_sent(&owner, req_id),
            RequestOwner::Message(id) => self.messages.mark_sent(*id, req_id),
            RequestOwner::Destroy => {}
            mpn => self.mpn.mark_sent(mpn, req_id),
        }
        self.requests.insert(req_id, owner);
    }

    fn flush_ws(&mut self, limit: usize) {
        let controls = self.collect_controls();
        let messages = self.collect_messages();
        let mut sent = false;
        for (header, requests) in [("control\r\n", controls), ("msg\r\n", messages)] {
            if requests.is_empty() {
                continue;
            }
            let bodies: Vec<String> = requests.iter().map(|o| o.body.clone()).collect();
            let mut remaining = requests.into_iter();
            for batch in batch_requests(header, &bodies, limit) {
                self.send_ws(batch.body);
                for outgoing in remaining.by_ref().take(batch.count) {
                    self.mark_sent(outgoing);
                }
                sent = true;
            }
        }
        if !sent && self.heartbeat_due {
            sent = self.send_ws("heartbeat\r\n".to_string());
        }
        if sent {
            self.restart_heartbeat();
        }
    }

    /// One request at a time on the control channel; the rest waits for its
    /// response.
    fn flush_http(&mut self, session_id: &str, limit: usize) {
        let controls = self.collect_controls();
        let (verb, requests) = if !controls.is_empty() {
            ("control", controls)
        } else {
            let messages = self.collect_messages();
            if !messages.is_empty() {
                ("msg", messages)
            } else if self.heartbeat_due {
                ("heartbeat", Vec::new())
            } else {
                return;
            }
        };
        let (body, count) = if requests.is_empty() {
            (format!("LS_session={}", session_id), 0)
        } else {
            let bodies: Vec<String> = requests
                .iter()
                .map(|o| format!("LS_session={}&{}", session_id, o.body))
                .collect();
            match batch_requests("", &bodies, limit).into_iter().next() {
                Some(batch) => (batch.body, batch.count),
                None => return,
            }
        };
        let Some(address) = self.control_address() else {
            return;
        };
        let token = self.new_ctrl_token();
        match self.post_http(&http_url(&address, verb), body, false, token) {
            Ok(conn) => {
                self.ctrl_http = Some(HttpHandle { token, conn });
                self.ctrl = Ctrl::Sent;
                trace!("ctrl={}", self.ctrl.code());
                self.schedule(TimerId::ControlTimeout, self.retry.current());
                for outgoing in requests.into_iter().take(count) {
                    self.mark_sent(outgoing);
                }
                self.restart_heartbeat();
            }
            Err(e) => self.control_failed(&e.to_string()),
        }
    }

    /// The control request failed; requests already marked as sent are not
    /// resent.
    pub(super) fn control_failed(&mut self, reason: &str) {
        warn!("Control request failed: {}", reason);
        if let Some(mut http) = self.ctrl_http.take() {
            http.conn.dispose();
        }
        self.cancel(TimerId::ControlTimeout);
        self.ctrl = Ctrl::Backoff;
        trace!("ctrl={}", self.ctrl.code());
        self.schedule(TimerId::ControlBackoff, self.retry.current());
    }

    pub(super) fn control_done(&mut self) {
        self.ctrl_http = None;
        self.cancel(TimerId::ControlTimeout);
        self.ctrl = Ctrl::Idle;
        trace!("ctrl={}", self.ctrl.code());
    }

    /// Asks the server to close the session. Nothing waits for the answer.
    pub(super) fn send_destroy(&mut self) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        let req_id = self.alloc_req_id();
        if self.ws.is_some() && self.ws_pending.is_none() {
            let body = RequestBuilder::new()
                .param("LS_reqId", req_id)
                .param("LS_op", "destroy")
                .param("LS_close_socket", true)
                .param("LS_cause", "api")
                .encode();
            self.send_ws(format!("control\r\n{}", body));
            return;
        }
        let Some(address) = self.control_address() else {
            return;
        };
        let body = RequestBuilder::new()
            .param("LS_session", session_id)
            .param("LS_reqId", req_id)
            .param("LS_op", "destroy")
            .param("LS_cause", "api")
            .encode();
        let token = self.new_ctrl_token();
        match self.post_http(&http_url(&address, "control"), body, false, token) {
            // the request completes on its own; its token is never current
            Ok(_request) => debug!("Destroy request sent"),
            Err(e) => debug!("Destroy request not sent: {}", e),
        }
    }

    /// Queues a `constrain` request for the configured bandwidth.
    pub(super) fn request_bandwidth(&mut self) {
        if self.session.is_some() {
            self.bw = Singleton::Pending;
        }
    }

    /// Recomputes the reverse heartbeat interval for the current transport.
    pub(super) fn evaluate_heartbeat(&mut self) {
        let granted = match (self.mode.tr(), self.session.as_ref()) {
            (Some(tr), Some(session)) if tr.stream().is_some() => session.keepalive_ms,
            _ => 0,
        };
        let rhb = Rhb::evaluate(self.options.get_reverse_heartbeat_interval(), granted);
        if rhb != self.rhb {
            trace!("rhb={}", rhb.code());
            self.rhb = rhb;
        }
        self.restart_heartbeat();
    }

    fn restart_heartbeat(&mut self) {
        self.heartbeat_due = false;
        match self.rhb.interval() {
            Some(interval) if self.session.is_some() => {
                self.schedule(TimerId::ReverseHeartbeat, interval)
            }
            _ => self.cancel(TimerId::ReverseHeartbeat),
        }
    }
}
