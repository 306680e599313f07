/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::client::{CallbackQueue, ClientMessageListener};
use crate::protocol::{RequestBuilder, UNORDERED_MESSAGES};
use crate::session::{Outgoing, RequestOwner};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MsgState {
    Pending,
    Sent { req_id: u64, prog: u64 },
}

struct MessageManager {
    text: String,
    sequence: String,
    delay_timeout: Option<u64>,
    listener: Option<Box<dyn ClientMessageListener>>,
    /// Survive a lost session when not yet sent.
    keep_unsent: bool,
    state: MsgState,
}

impl MessageManager {
    /// Unordered messages without a listener are fire-and-forget.
    fn wants_outcome(&self) -> bool {
        self.listener.is_some() || self.sequence != UNORDERED_MESSAGES
    }

    fn encode(&self, req_id: u64, prog: u64) -> String {
        let ordered = self.sequence != UNORDERED_MESSAGES;
        let builder = RequestBuilder::new()
            .param("LS_reqId", req_id)
            .param("LS_message", &self.text)
            .param_opt("LS_sequence", ordered.then_some(&self.sequence))
            .param("LS_msg_prog", prog)
            .param_opt("LS_max_wait", self.delay_timeout);
        if self.wants_outcome() {
            builder.encode()
        } else {
            builder.param("LS_outcome", false).encode()
        }
    }

    /// Hands the single outcome of this message to the callback queue.
    fn complete<F>(mut self, queue: &CallbackQueue, outcome: F)
    where
        F: FnOnce(&mut dyn ClientMessageListener, &str) + Send + 'static,
    {
        if let Some(mut listener) = self.listener.take() {
            let text = self.text;
            queue.post(move || outcome(listener.as_mut(), &text));
        }
    }
}

/// Messages not yet acknowledged, in submission order.
#[derive(Default)]
pub(crate) struct MessageTier {
    messages: BTreeMap<u64, MessageManager>,
    next_id: u64,
    /// Last progressive used on the current session, per sequence.
    progs: HashMap<String, u64>,
}

impl MessageTier {
    pub(crate) fn enqueue(
        &mut self,
        text: &str,
        sequence: Option<&str>,
        delay_timeout: Option<u64>,
        listener: Option<Box<dyn ClientMessageListener>>,
        keep_unsent: bool,
    ) -> u64 {
        self.next_id += 1;
        let sequence = sequence.unwrap_or(UNORDERED_MESSAGES).to_string();
        debug!("Message {} queued on sequence {}", self.next_id, sequence);
        self.messages.insert(
            self.next_id,
            MessageManager {
                text: text.to_string(),
                sequence,
                delay_timeout,
                listener,
                keep_unsent,
                state: MsgState::Pending,
            },
        );
        self.next_id
    }

    /// Aborts a message that cannot be queued because there is no session.
    pub(crate) fn reject(
        text: &str,
        listener: Option<Box<dyn ClientMessageListener>>,
        queue: &CallbackQueue,
    ) {
        if let Some(mut listener) = listener {
            let text = text.to_string();
            queue.post(move || listener.on_abort(&text, false));
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.messages.values().any(|m| m.state == MsgState::Pending)
    }

    /// Encodes pending messages. Progressives are only reserved by [`Self::mark_sent`],
    /// which must follow the same order.
    pub(crate) fn collect(&self, next_req_id: &mut dyn FnMut() -> u64, out: &mut Vec<Outgoing>) {
        let mut progs = self.progs.clone();
        for (id, message) in &self.messages {
            if message.state != MsgState::Pending {
                continue;
            }
            let prog = progs.entry(message.sequence.clone()).or_insert(0);
            *prog += 1;
            let req_id = next_req_id();
            out.push(Outgoing {
                owner: RequestOwner::Message(*id),
                req_id,
                body: message.encode(req_id, *prog),
            });
        }
    }

    pub(crate) fn mark_sent(&mut self, id: u64, req_id: u64) {
        let Some(message) = self.messages.get_mut(&id) else {
            return;
        };
        let prog = self.progs.entry(message.sequence.clone()).or_insert(0);
        *prog += 1;
        message.state = MsgState::Sent {
            req_id,
            prog: *prog,
        };
    }

    fn find(&self, sequence: &str, prog: u64) -> Option<u64> {
        self.messages.iter().find_map(|(id, m)| match m.state {
            MsgState::Sent { prog: p, .. } if p == prog && m.sequence == sequence => Some(*id),
            _ => None,
        })
    }

    pub(crate) fn on_reqok(&mut self, id: u64) {
        let done = self
            .messages
            .get(&id)
            .is_some_and(|m| !m.wants_outcome());
        if done {
            self.messages.remove(&id);
        }
    }

    pub(crate) fn on_reqerr(&mut self, id: u64, code: i32, message: &str, queue: &CallbackQueue) {
        if let Some(manager) = self.messages.remove(&id) {
            warn!("Message {} refused: {} {}", id, code, message);
            manager.complete(queue, |l, text| l.on_error(text));
        }
    }

    pub(crate) fn on_msgdone(&mut self, sequence: &str, prog: u64, response: &str, queue: &CallbackQueue) {
        let Some(id) = self.find(sequence, prog) else {
            debug!("MSGDONE for unknown message {}:{}", sequence, prog);
            return;
        };
        if let Some(manager) = self.messages.remove(&id) {
            let response = response.to_string();
            manager.complete(queue, move |l, text| l.on_processed(text, &response));
        }
    }

    pub(crate) fn on_msgfail(
        &mut self,
        sequence: &str,
        prog: u64,
        code: i32,
        message: &str,
        queue: &CallbackQueue,
    ) {
        if code == 39 {
            // `message` carries how many messages, ending at `prog`, were discarded
            let count = message.trim().parse::<u64>().unwrap_or(1).max(1);
            let first = prog.saturating_sub(count - 1).max(1);
            for p in first..=prog {
                self.discard(sequence, p, queue);
            }
            return;
        }
        if code == 38 {
            self.discard(sequence, prog, queue);
            return;
        }
        let Some(id) = self.find(sequence, prog) else {
            return;
        };
        if let Some(manager) = self.messages.remove(&id) {
            if code <= 0 {
                let error = message.to_string();
                manager.complete(queue, move |l, text| l.on_deny(text, code, &error));
            } else {
                warn!("Message {}:{} failed: {} {}", sequence, prog, code, message);
                manager.complete(queue, |l, text| l.on_error(text));
            }
        }
    }

    fn discard(&mut self, sequence: &str, prog: u64, queue: &CallbackQueue) {
        if let Some(manager) = self.find(sequence, prog).and_then(|id| self.messages.remove(&id)) {
            manager.complete(queue, |l, text| l.on_discarded(text));
        }
    }

    /// The session ended. Sent messages are aborted; unsent ones wait for the next
    /// session if they were queued with `enqueue_while_disconnected`.
    pub(crate) fn on_session_lost(&mut self, queue: &CallbackQueue) {
        self.progs.clear();
        let ids: Vec<u64> = self.messages.keys().copied().collect();
        for id in ids {
            let Some((state, keep)) = self.messages.get(&id).map(|m| (m.state, m.keep_unsent))
            else {
                continue;
            };
            match state {
                MsgState::Pending if keep => {}
                MsgState::Pending => {
                    if let Some(manager) = self.messages.remove(&id) {
                        manager.complete(queue, |l, text| l.on_abort(text, false));
                    }
                }
                MsgState::Sent { .. } => {
                    if let Some(manager) = self.messages.remove(&id) {
                        manager.complete(queue, |l, text| l.on_abort(text, true));
                    }
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ClientMessageListener for Recorder {
        fn on_abort(&mut self, msg: &str, sent: bool) {
            self.0.lock().push(format!("abort:{}:{}", msg, sent));
        }
        fn on_deny(&mut self, msg: &str, code: i32, error: &str) {
            self.0.lock().push(format!("deny:{}:{}:{}", msg, code, error));
        }
        fn on_discarded(&mut self, msg: &str) {
            self.0.lock().push(format!("discarded:{}", msg));
        }
        fn on_error(&mut self, msg: &str) {
            self.0.lock().push(format!("error:{}", msg));
        }
        fn on_processed(&mut self, msg: &str, response: &str) {
            self.0.lock().push(format!("processed:{}:{}", msg, response));
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>) -> Option<Box<dyn ClientMessageListener>> {
        Some(Box::new(Recorder(Arc::clone(log))))
    }

    fn send_all(tier: &mut MessageTier) -> Vec<Outgoing> {
        let mut next = 0u64;
        let mut alloc = || {
            next += 1;
            next
        };
        let mut out = Vec::new();
        tier.collect(&mut alloc, &mut out);
        for o in &out {
            if let RequestOwner::Message(id) = o.owner {
                tier.mark_sent(id, o.req_id);
            }
        }
        out
    }

    #[test]
    fn test_progressives_per_sequence() {
        let mut tier = MessageTier::default();
        tier.enqueue("a", Some("S1"), None, None, true);
        tier.enqueue("b", Some("S1"), Some(500), None, true);
        tier.enqueue("c", Some("S2"), None, None, true);
        let out = send_all(&mut tier);
        let bodies: Vec<&str> = out.iter().map(|o| o.body.as_str()).collect();
        assert_eq!(
            bodies,
            vec![
                "LS_reqId=1&LS_message=a&LS_sequence=S1&LS_msg_prog=1",
                "LS_reqId=2&LS_message=b&LS_sequence=S1&LS_msg_prog=2&LS_max_wait=500",
                "LS_reqId=3&LS_message=c&LS_sequence=S2&LS_msg_prog=1",
            ]
        );
        tier.enqueue("d", Some("S1"), None, None, true);
        let out = send_all(&mut tier);
        assert!(out[0].body.ends_with("LS_msg_prog=3"));
    }

    #[test]
    fn test_unordered_without_listener_completes_at_reqok() {
        let mut tier = MessageTier::default();
        let id = tier.enqueue("hello world", None, None, None, true);
        let out = send_all(&mut tier);
        assert_eq!(
            out[0].body,
            "LS_reqId=1&LS_message=hello%20world&LS_msg_prog=1&LS_outcome=false"
        );
        tier.on_reqok(id);
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_outcomes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = CallbackQueue::collecting();
        let mut tier = MessageTier::default();
        tier.enqueue("m1", Some("S"), None, recorder(&log), true);
        tier.enqueue("m2", Some("S"), None, recorder(&log), true);
        tier.enqueue("m3", Some("S"), None, recorder(&log), true);
        tier.enqueue("m4", None, None, recorder(&log), true);
        send_all(&mut tier);
        tier.on_msgdone("S", 1, "ok", &queue);
        tier.on_msgfail("S", 2, -5, "no way", &queue);
        tier.on_msgfail("S", 3, 38, "late", &queue);
        tier.on_msgfail(UNORDERED_MESSAGES, 1, 32, "boom", &queue);
        queue.drain();
        assert_eq!(
            *log.lock(),
            vec![
                "processed:m1:ok",
                "deny:m2:-5:no way",
                "discarded:m3",
                "error:m4",
            ]
        );
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_discarded_range_is_clamped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = CallbackQueue::collecting();
        let mut tier = MessageTier::default();
        tier.enqueue("m1", Some("S"), None, recorder(&log), true);
        tier.enqueue("m2", Some("S"), None, recorder(&log), true);
        tier.enqueue("m3", Some("S"), None, recorder(&log), true);
        send_all(&mut tier);
        tier.on_msgfail("S", 2, 39, "10", &queue);
        queue.drain();
        assert_eq!(*log.lock(), vec!["discarded:m1", "discarded:m2"]);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_session_lost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = CallbackQueue::collecting();
        let mut tier = MessageTier::default();
        tier.enqueue("sent", Some("S"), None, recorder(&log), true);
        send_all(&mut tier);
        tier.enqueue("unsent", Some("S"), None, recorder(&log), true);
        tier.on_session_lost(&queue);
        queue.drain();
        assert_eq!(*log.lock(), vec!["abort:sent:true"]);
        assert!(tier.has_pending());

        // progressives restart on the next session
        let out = send_all(&mut tier);
        assert!(out[0].body.ends_with("LS_msg_prog=1"));

        tier.enqueue("other", None, None, recorder(&log), false);
        tier.on_session_lost(&queue);
        queue.drain();
        assert_eq!(
            *log.lock(),
            vec!["abort:sent:true", "abort:unsent:true", "abort:other:false"]
        );
    }

    #[test]
    fn test_reject_without_session() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = CallbackQueue::collecting();
        MessageTier::reject("m", recorder(&log), &queue);
        queue.drain();
        assert_eq!(*log.lock(), vec!["abort:m:false"]);
    }
}
