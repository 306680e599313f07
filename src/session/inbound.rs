/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Dispatch of inbound protocol lines.

use super::machine::ClientMachine;
use super::slowing::SlowingVerdict;
use super::state::{RetryKind, SessionInfo, Singleton};
use super::RequestOwner;
use crate::protocol::ServerLine;
use crate::subscription::manager::SubscriptionOwner;
use crate::subscription::{SubscriptionMode, SubscriptionSpec};
use tracing::{debug, trace, warn};

/// Server errors after which a new session may be created.
const RETRYABLE_CONERR: [i32; 6] = [4, 6, 20, 40, 41, 48];

impl ClientMachine {
    /// One line of the main transport.
    pub(super) fn on_line(&mut self, raw: &str) {
        trace!("<< {}", raw);
        let line = match ServerLine::parse(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("{}", e);
                self.terminate(Some((e.code(), e.to_string())));
                return;
            }
        };
        self.stream_activity();
        if line.is_data() {
            self.on_data_line(line);
        } else {
            self.on_session_line(line);
        }
    }

    /// A line of the HTTP control channel: only request outcomes are expected.
    pub(super) fn on_control_line(&mut self, raw: &str) {
        trace!("ctrl << {}", raw);
        match ServerLine::parse(raw) {
            Ok(line @ (ServerLine::ReqOk { .. } | ServerLine::ReqErr { .. } | ServerLine::Error { .. })) => {
                self.on_session_line(line)
            }
            Ok(other) => trace!("Ignored on the control channel: {:?}", other),
            Err(e) => warn!("Bad control response: {}", e),
        }
    }

    /// Data lines are counted so that a recovered session can skip the ones
    /// already seen.
    fn on_data_line(&mut self, line: ServerLine) {
        let pushing = self.mode.tr().is_some_and(|tr| tr.is_pushing());
        if !pushing {
            debug!("Data line outside a push phase dropped: {:?}", line);
            return;
        }
        if self.server_prog < self.client_prog {
            self.server_prog += 1;
            trace!("Replayed line skipped (prog {})", self.server_prog);
            return;
        }
        self.server_prog += 1;
        self.client_prog += 1;
        self.apply_data(line);
    }

    fn apply_data(&mut self, line: ServerLine) {
        match line {
            ServerLine::Update { sub_id, item, values } => {
                match self.subscriptions.on_update(sub_id, item, &values, &self.queue) {
                    Ok(Some(event)) => self.mpn.on_internal(event, &self.queue),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("{}", e);
                        self.terminate(Some((e.code(), e.to_string())));
                    }
                }
            }
            ServerLine::SubOk { sub_id, items, fields } => {
                self.subscriptions
                    .on_subok(sub_id, items, fields, None, &self.queue);
            }
            ServerLine::SubCmd {
                sub_id,
                items,
                fields,
                key_idx,
                cmd_idx,
            } => {
                self.subscriptions
                    .on_subok(sub_id, items, fields, Some((key_idx, cmd_idx)), &self.queue);
            }
            ServerLine::Unsub { sub_id } => self.subscriptions.on_unsub(sub_id, &self.queue),
            ServerLine::Eos { sub_id, item } => {
                if let Some(event) = self.subscriptions.on_eos(sub_id, item, &self.queue) {
                    self.mpn.on_internal(event, &self.queue);
                }
            }
            ServerLine::Cs { sub_id, item } => self.subscriptions.on_cs(sub_id, item, &self.queue),
            ServerLine::Ov { sub_id, item, lost } => {
                self.subscriptions.on_ov(sub_id, item, lost, &self.queue)
            }
            ServerLine::Conf { sub_id, frequency } => {
                self.subscriptions.on_conf(sub_id, frequency, &self.queue)
            }
            ServerLine::MsgDone {
                sequence,
                prog,
                response,
            } => self
                .messages
                .on_msgdone(&sequence, prog, &response, &self.queue),
            ServerLine::MsgFail {
                sequence,
                prog,
                code,
                message,
            } => self
                .messages
                .on_msgfail(&sequence, prog, code, &message, &self.queue),
            ServerLine::MpnReg {
                device_id,
                adapter_name,
            } => {
                if let Some((device_id, adapter)) =
                    self.mpn.on_mpnreg(&device_id, &adapter_name, &self.queue)
                {
                    self.subscribe_device_items(&device_id, &adapter);
                }
            }
            ServerLine::MpnZero { device_id } => self.mpn.on_mpnzero(&device_id, &self.queue),
            ServerLine::MpnOk { sub_id, mpn_sub_id } => {
                self.mpn.on_mpnok(sub_id, &mpn_sub_id, &self.queue)
            }
            ServerLine::MpnDel { mpn_sub_id } => self.mpn.on_mpndel(&mpn_sub_id, &self.queue),
            ServerLine::MpnConf { mpn_sub_id } => self.mpn.on_mpnconf(&mpn_sub_id, &self.queue),
            other => trace!("Not a data line: {:?}", other),
        }
    }

    /// The device status item and the item listing the device's MPN subscriptions.
    fn subscribe_device_items(&mut self, device_id: &str, adapter: &str) {
        let status = SubscriptionSpec::internal(
            SubscriptionMode::Merge,
            &format!("DEV-{}", device_id),
            &["status", "status_timestamp"],
            Some(adapter),
        );
        let sub_id = self.alloc_sub_id();
        self.subscriptions
            .add(sub_id, SubscriptionOwner::MpnDevice, status);
        let listing = SubscriptionSpec::internal(
            SubscriptionMode::Command,
            &format!("SUBS-{}", device_id),
            &["key", "command"],
            Some(adapter),
        );
        let sub_id = self.alloc_sub_id();
        self.subscriptions
            .add(sub_id, SubscriptionOwner::MpnSubscriptions, listing);
    }

    fn on_session_line(&mut self, line: ServerLine) {
        match line {
            ServerLine::ReqOk { req_id: Some(req_id) } => self.on_reqok(req_id),
            ServerLine::ReqOk { req_id: None } => {}
            ServerLine::ReqErr {
                req_id,
                code,
                message,
            } => self.on_reqerr(req_id, code, message),
            ServerLine::Loop { delay_ms } => self.on_loop(delay_ms),
            ServerLine::ConOk {
                session_id,
                request_limit,
                keepalive_ms,
                control_link,
            } => self.on_conok(SessionInfo {
                id: session_id,
                request_limit,
                keepalive_ms,
                control_link,
            }),
            ServerLine::ServName(name) => {
                self.details.server_socket_name = Some(name);
                self.notify_property("serverSocketName");
            }
            ServerLine::ClientIp(ip) => {
                let previous = self.details.client_ip.replace(ip.clone());
                if previous.as_ref().is_some_and(|p| *p != ip) {
                    debug!("Client IP changed, all transports enabled again");
                    self.selection.enable_all();
                }
                if previous.as_deref() != Some(ip.as_str()) {
                    self.notify_property("clientIp");
                }
            }
            ServerLine::Cons(bandwidth) => {
                trace!("Real max bandwidth: {:?}", bandwidth);
                self.real_bandwidth = Some(bandwidth);
                self.notify_property("realMaxBandwidth");
            }
            ServerLine::Prog(prog) => {
                if prog > self.client_prog {
                    self.terminate(Some((
                        61,
                        format!("PROG {} beyond the {} lines received", prog, self.client_prog),
                    )));
                } else {
                    self.server_prog = prog;
                }
            }
            ServerLine::ConErr { code, message } => self.on_conerr(code, message),
            ServerLine::End { code, message } => self.on_end(code, message),
            ServerLine::Error { code, message } => {
                warn!("Server error {}: {}", code, message);
                self.terminate(Some((code, message)));
            }
            ServerLine::Sync { seconds } => {
                let verdict = self
                    .slowing
                    .on_sync(self.now(), seconds, self.options.is_slowing_enabled());
                if verdict == SlowingVerdict::Bad {
                    warn!("Client is slow, moving to polling");
                    self.selection.disable_streaming();
                    self.check_transport("slow");
                }
            }
            ServerLine::Probe | ServerLine::Noop | ServerLine::WsOk => {}
            data => self.on_data_line(data),
        }
    }

    fn on_reqok(&mut self, req_id: u64) {
        let Some(owner) = self.requests.remove(&req_id) else {
            trace!("REQOK for unknown request {}", req_id);
            return;
        };
        match owner {
            RequestOwner::Switch => self.swt = Singleton::Idle,
            RequestOwner::Constrain => {
                if self.bw == Singleton::Sent(req_id) {
                    self.bw = Singleton::Idle;
                }
            }
            RequestOwner::SubscriptionAdd(_)
            | RequestOwner::SubscriptionDelete(_)
            | RequestOwner::SubscriptionReconf(_) => self.subscriptions.on_reqok(&owner),
            RequestOwner::Message(id) => self.messages.on_reqok(id),
            RequestOwner::Destroy => {}
            mpn => self.mpn.on_reqok(&mpn),
        }
    }

    fn on_reqerr(&mut self, req_id: u64, code: i32, message: String) {
        match code {
            20 => {
                warn!("Session unknown to the server");
                self.session_lost(RetryKind::ServerRequested);
                return;
            }
            11 => {
                self.terminate(Some((21, message)));
                return;
            }
            65 | 67 => {
                self.terminate(Some((code, message)));
                return;
            }
            _ => {}
        }
        let Some(owner) = self.requests.remove(&req_id) else {
            trace!("REQERR for unknown request {}", req_id);
            return;
        };
        match owner {
            RequestOwner::Switch => self.swt = Singleton::Idle,
            RequestOwner::Constrain => {
                warn!("Bandwidth change refused: {} {}", code, message);
                if self.bw == Singleton::Sent(req_id) {
                    self.bw = Singleton::Idle;
                }
            }
            RequestOwner::SubscriptionAdd(_)
            | RequestOwner::SubscriptionDelete(_)
            | RequestOwner::SubscriptionReconf(_) => {
                if let Some(event) =
                    self.subscriptions
                        .on_reqerr(&owner, code, &message, &self.queue)
                {
                    self.mpn.on_internal(event, &self.queue);
                }
            }
            RequestOwner::Message(id) => self.messages.on_reqerr(id, code, &message, &self.queue),
            RequestOwner::Destroy => {}
            mpn => self.mpn.on_reqerr(&mpn, code, &message, &self.queue),
        }
    }

    fn on_conerr(&mut self, code: i32, message: String) {
        warn!("Connection refused: {} {}", code, message);
        let retry = if code == 5 {
            RetryKind::Immediate
        } else if RETRYABLE_CONERR.contains(&code) {
            RetryKind::ServerRequested
        } else {
            self.terminate(Some((code, message)));
            return;
        };
        if self.session.is_some() {
            self.session_lost(retry);
        } else {
            self.retry_wait(retry);
        }
    }

    fn on_end(&mut self, code: i32, message: String) {
        if code == 41 || code == 48 {
            debug!("Session ended by the server ({}), creating a new one", code);
            self.session_lost(RetryKind::ServerRequested);
            return;
        }
        let code = if (1..=30).contains(&code) || code > 39 {
            code
        } else {
            39
        };
        warn!("Session closed by the server: {} {}", code, message);
        self.terminate(Some((code, message)));
    }
}
