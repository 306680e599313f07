/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Per-subscription state machines driven by the session engine.

use crate::client::CallbackQueue;
use crate::protocol::{MaxFrequency, RequestBuilder, apply_update};
use crate::session::{Outgoing, RequestOwner};
use crate::subscription::model::{SharedListener, SubscriptionSpec};
use crate::subscription::{ItemUpdate, Subscription, SubscriptionListener, SubscriptionMode};
use crate::utils::SessionError;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

/// Who receives the events of a subscription.
pub(crate) enum SubscriptionOwner {
    User(Subscription),
    /// `DEV-<deviceId>` item of a registered MPN device.
    MpnDevice,
    /// `SUBS-<deviceId>` item listing the MPN subscriptions of a device.
    MpnSubscriptions,
    /// A subscription the server knows and this client does not.
    Zombie,
}

/// Engine-owned subscriptions whose events go to the MPN tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalOwner {
    MpnDevice,
    MpnSubscriptions,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InternalEvent {
    Update {
        owner: InternalOwner,
        values: Vec<Option<String>>,
    },
    EndOfSnapshot {
        owner: InternalOwner,
    },
    Error {
        owner: InternalOwner,
        code: i32,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    Pending,
    AddSent(u64),
    Subscribed,
    DeletePending,
    DeleteSent(u64),
}

impl SubState {
    fn code(self) -> u8 {
        match self {
            SubState::Pending => 1,
            SubState::AddSent(_) => 2,
            SubState::Subscribed => 3,
            SubState::DeletePending => 4,
            SubState::DeleteSent(_) => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconf {
    Pending,
    Sent(u64),
}

#[derive(Debug, Clone)]
struct ItemState {
    values: Vec<Option<String>>,
    in_snapshot: bool,
    /// COMMAND mode rows by key.
    rows: HashMap<String, Vec<Option<String>>>,
}

impl ItemState {
    fn new(fields: usize, in_snapshot: bool) -> Self {
        Self {
            values: vec![None; fields],
            in_snapshot,
            rows: HashMap::new(),
        }
    }
}

struct SubscriptionManager {
    owner: SubscriptionOwner,
    spec: SubscriptionSpec,
    state: SubState,
    reconf: Option<Reconf>,
    subscribed: bool,
    items: Vec<ItemState>,
    /// 0-based positions of the COMMAND `key` and `command` fields.
    key_cmd: Option<(usize, usize)>,
}

impl SubscriptionManager {
    fn internal_owner(&self) -> Option<InternalOwner> {
        match self.owner {
            SubscriptionOwner::MpnDevice => Some(InternalOwner::MpnDevice),
            SubscriptionOwner::MpnSubscriptions => Some(InternalOwner::MpnSubscriptions),
            _ => None,
        }
    }

    fn listeners(&self) -> Vec<SharedListener> {
        match &self.owner {
            SubscriptionOwner::User(handle) => handle.listeners(),
            _ => Vec::new(),
        }
    }

    fn notify<F>(&self, queue: &CallbackQueue, event: F)
    where
        F: Fn(&mut (dyn SubscriptionListener + 'static)) + Send + 'static,
    {
        queue.post_each(self.listeners(), event);
    }

    fn item_name(&self, item: usize) -> Option<String> {
        self.spec
            .items
            .as_ref()
            .and_then(|items| items.get(item.wrapping_sub(1)).cloned())
    }

    fn field_name(&self, pos: usize) -> String {
        self.spec
            .fields
            .as_ref()
            .and_then(|fields| fields.get(pos).cloned())
            .unwrap_or_else(|| (pos + 1).to_string())
    }

    fn set_state(&mut self, sub_id: u32, state: SubState) {
        trace!(
            "sub {} state {} -> {}",
            sub_id,
            self.state.code(),
            state.code()
        );
        self.state = state;
    }

    fn encode_add(&self, sub_id: u32, req_id: u64) -> String {
        let spec = &self.spec;
        let snapshot = match spec.mode {
            SubscriptionMode::Raw => None,
            _ => spec.snapshot,
        };
        RequestBuilder::new()
            .param("LS_reqId", req_id)
            .param("LS_op", "add")
            .param("LS_subId", sub_id)
            .param("LS_mode", spec.mode)
            .param("LS_group", &spec.group)
            .param("LS_schema", &spec.schema)
            .param_opt("LS_data_adapter", spec.data_adapter.as_ref())
            .param_opt("LS_selector", spec.selector.as_ref())
            .param_opt("LS_snapshot", snapshot)
            .param_opt("LS_requested_max_frequency", spec.max_frequency)
            .param_opt("LS_requested_buffer_size", spec.buffer_size)
            .encode()
    }
}

/// Every subscription known to a client, keyed by subscription id.
#[derive(Default)]
pub(crate) struct SubscriptionTier {
    managers: BTreeMap<u32, SubscriptionManager>,
}

impl SubscriptionTier {
    pub(crate) fn add(&mut self, sub_id: u32, owner: SubscriptionOwner, spec: SubscriptionSpec) {
        debug!("Subscription {} added ({} {})", sub_id, spec.mode, spec.group);
        self.managers.insert(
            sub_id,
            SubscriptionManager {
                owner,
                spec,
                state: SubState::Pending,
                reconf: None,
                subscribed: false,
                items: Vec::new(),
                key_cmd: None,
            },
        );
    }

    pub(crate) fn contains(&self, sub_id: u32) -> bool {
        self.managers.contains_key(&sub_id)
    }

    /// Starts removing a subscription. A subscription never sent is dropped at once.
    pub(crate) fn unsubscribe(&mut self, sub_id: u32, queue: &CallbackQueue) {
        let Some(manager) = self.managers.get_mut(&sub_id) else {
            return;
        };
        if let SubscriptionOwner::User(handle) = &manager.owner {
            handle.detach();
        }
        match manager.state {
            SubState::Pending => {
                if manager.subscribed {
                    manager.notify(queue, |l| l.on_unsubscription());
                }
                self.managers.remove(&sub_id);
            }
            SubState::AddSent(_) | SubState::Subscribed => {
                manager.reconf = None;
                manager.set_state(sub_id, SubState::DeletePending);
            }
            SubState::DeletePending | SubState::DeleteSent(_) => {}
        }
    }

    /// Removes every subscription owned by the engine for MPN purposes.
    pub(crate) fn unsubscribe_internal(&mut self, queue: &CallbackQueue) {
        let ids: Vec<u32> = self
            .managers
            .iter()
            .filter(|(_, m)| m.internal_owner().is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.unsubscribe(id, queue);
        }
    }

    /// Picks up a new requested max frequency of an active subscription.
    pub(crate) fn reconfigure(&mut self, sub_id: u32) {
        let Some(manager) = self.managers.get_mut(&sub_id) else {
            return;
        };
        let SubscriptionOwner::User(handle) = &manager.owner else {
            return;
        };
        manager.spec.max_frequency = handle.get_requested_max_frequency();
        if matches!(manager.state, SubState::AddSent(_) | SubState::Subscribed) {
            manager.reconf = Some(Reconf::Pending);
        }
    }

    /// Encodes every pending request in subscription-id order.
    pub(crate) fn collect(&self, next_req_id: &mut dyn FnMut() -> u64, out: &mut Vec<Outgoing>) {
        for (sub_id, manager) in &self.managers {
            match manager.state {
                SubState::Pending => {
                    let req_id = next_req_id();
                    out.push(Outgoing {
                        owner: RequestOwner::SubscriptionAdd(*sub_id),
                        req_id,
                        body: manager.encode_add(*sub_id, req_id),
                    });
                }
                SubState::DeletePending => {
                    let req_id = next_req_id();
                    out.push(Outgoing {
                        owner: RequestOwner::SubscriptionDelete(*sub_id),
                        req_id,
                        body: RequestBuilder::new()
                            .param("LS_reqId", req_id)
                            .param("LS_op", "delete")
                            .param("LS_subId", sub_id)
                            .encode(),
                    });
                }
                _ => {}
            }
            if manager.reconf == Some(Reconf::Pending) && manager.state == SubState::Subscribed {
                let req_id = next_req_id();
                let frequency = manager
                    .spec
                    .max_frequency
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "unlimited".to_string());
                out.push(Outgoing {
                    owner: RequestOwner::SubscriptionReconf(*sub_id),
                    req_id,
                    body: RequestBuilder::new()
                        .param("LS_reqId", req_id)
                        .param("LS_op", "reconf")
                        .param("LS_subId", sub_id)
                        .param("LS_requested_max_frequency", frequency)
                        .encode(),
                });
            }
        }
    }

    pub(crate) fn mark_sent(&mut self, owner: &RequestOwner, req_id: u64) {
        match owner {
            RequestOwner::SubscriptionAdd(id) => {
                if let Some(m) = self.managers.get_mut(id) {
                    m.set_state(*id, SubState::AddSent(req_id));
                }
            }
            RequestOwner::SubscriptionDelete(id) => {
                if let Some(m) = self.managers.get_mut(id) {
                    m.set_state(*id, SubState::DeleteSent(req_id));
                }
            }
            RequestOwner::SubscriptionReconf(id) => {
                if let Some(m) = self.managers.get_mut(id) {
                    m.reconf = Some(Reconf::Sent(req_id));
                }
            }
            _ => {}
        }
    }

    pub(crate) fn on_reqok(&mut self, owner: &RequestOwner) {
        if let RequestOwner::SubscriptionReconf(id) = owner {
            if let Some(m) = self.managers.get_mut(id) {
                m.reconf = None;
            }
        }
    }

    pub(crate) fn on_reqerr(
        &mut self,
        owner: &RequestOwner,
        code: i32,
        message: &str,
        queue: &CallbackQueue,
    ) -> Option<InternalEvent> {
        match owner {
            RequestOwner::SubscriptionAdd(id) => {
                let manager = self.managers.remove(id)?;
                warn!("Subscription {} refused: {} {}", id, code, message);
                if let SubscriptionOwner::User(handle) = &manager.owner {
                    handle.detach();
                }
                let text = message.to_string();
                manager.notify(queue, move |l| l.on_subscription_error(code, Some(&text)));
                manager.internal_owner().map(|owner| InternalEvent::Error {
                    owner,
                    code,
                    message: message.to_string(),
                })
            }
            RequestOwner::SubscriptionDelete(id) => {
                debug!("Unsubscription {} refused: {} {}", id, code, message);
                self.finish_unsubscription(*id, queue);
                None
            }
            RequestOwner::SubscriptionReconf(id) => {
                warn!("Reconfiguration of {} refused: {} {}", id, code, message);
                if let Some(m) = self.managers.get_mut(id) {
                    m.reconf = None;
                }
                None
            }
            _ => None,
        }
    }

    pub(crate) fn on_subok(
        &mut self,
        sub_id: u32,
        items: usize,
        fields: usize,
        key_cmd: Option<(usize, usize)>,
        queue: &CallbackQueue,
    ) {
        let Some(manager) = self.managers.get_mut(&sub_id) else {
            debug!("SUBOK for unknown subscription {}, removing it", sub_id);
            self.managers.insert(
                sub_id,
                SubscriptionManager {
                    owner: SubscriptionOwner::Zombie,
                    spec: SubscriptionSpec::internal(SubscriptionMode::Raw, "", &[], None),
                    state: SubState::DeletePending,
                    reconf: None,
                    subscribed: false,
                    items: Vec::new(),
                    key_cmd: None,
                },
            );
            return;
        };
        let snapshot = manager.spec.wants_snapshot();
        manager.items = vec![ItemState::new(fields, snapshot); items];
        manager.key_cmd = key_cmd.map(|(k, c)| (k.saturating_sub(1), c.saturating_sub(1)));
        manager.subscribed = true;
        match manager.state {
            SubState::Pending | SubState::AddSent(_) => {
                manager.set_state(sub_id, SubState::Subscribed);
                if let SubscriptionOwner::User(handle) = &manager.owner {
                    handle.set_subscribed(true, key_cmd);
                }
                manager.notify(queue, |l| l.on_subscription());
            }
            // unsubscribed before the server confirmed: only the final UNSUB matters
            _ => {}
        }
    }

    pub(crate) fn on_unsub(&mut self, sub_id: u32, queue: &CallbackQueue) {
        self.finish_unsubscription(sub_id, queue);
    }

    fn finish_unsubscription(&mut self, sub_id: u32, queue: &CallbackQueue) {
        let Some(manager) = self.managers.remove(&sub_id) else {
            return;
        };
        if let SubscriptionOwner::User(handle) = &manager.owner {
            handle.detach();
        }
        if manager.subscribed {
            manager.notify(queue, |l| l.on_unsubscription());
        }
        debug!("Subscription {} removed", sub_id);
    }

    pub(crate) fn on_update(
        &mut self,
        sub_id: u32,
        item: usize,
        raw: &str,
        queue: &CallbackQueue,
    ) -> Result<Option<InternalEvent>, SessionError> {
        let Some(manager) = self.managers.get_mut(&sub_id) else {
            trace!("Update for unknown subscription {}", sub_id);
            return Ok(None);
        };
        if matches!(manager.owner, SubscriptionOwner::Zombie) || !manager.subscribed {
            return Ok(None);
        }
        let mode = manager.spec.mode;
        let key_cmd = manager.key_cmd;
        let state = manager.items.get_mut(item.wrapping_sub(1)).ok_or_else(|| {
            SessionError::ProtocolViolation(format!("item {} out of range for {}", item, sub_id))
        })?;
        let changed = apply_update(raw, &mut state.values)?;
        let values = state.values.clone();
        let is_snapshot = match mode {
            SubscriptionMode::Raw => false,
            SubscriptionMode::Merge => std::mem::replace(&mut state.in_snapshot, false),
            SubscriptionMode::Distinct | SubscriptionMode::Command => state.in_snapshot,
        };
        let changed: Vec<usize> = match (mode, key_cmd) {
            (SubscriptionMode::Command, Some((key_pos, cmd_pos))) => {
                let key = values.get(key_pos).cloned().flatten().unwrap_or_default();
                let command = values.get(cmd_pos).cloned().flatten().unwrap_or_default();
                let diff = match state.rows.get(&key) {
                    Some(previous) => (0..values.len())
                        .filter(|i| previous.get(*i) != values.get(*i))
                        .collect(),
                    None => (0..values.len()).collect(),
                };
                if command == "DELETE" {
                    state.rows.remove(&key);
                } else {
                    state.rows.insert(key, values.clone());
                }
                diff
            }
            _ => changed,
        };

        if let Some(owner) = manager.internal_owner() {
            return Ok(Some(InternalEvent::Update { owner, values }));
        }

        let mut fields = HashMap::new();
        for (pos, value) in values.iter().enumerate() {
            fields.insert(manager.field_name(pos), value.clone());
        }
        let mut changed_fields = HashMap::new();
        for pos in changed {
            changed_fields.insert(manager.field_name(pos), values.get(pos).cloned().flatten());
        }
        let update = ItemUpdate {
            item_name: manager.item_name(item),
            item_pos: item,
            fields,
            changed_fields,
            is_snapshot,
        };
        manager.notify(queue, move |l| l.on_item_update(&update));
        Ok(None)
    }

    pub(crate) fn on_eos(&mut self, sub_id: u32, item: usize, queue: &CallbackQueue) -> Option<InternalEvent> {
        let manager = self.managers.get_mut(&sub_id)?;
        if let Some(state) = manager.items.get_mut(item.wrapping_sub(1)) {
            state.in_snapshot = false;
        }
        if let Some(owner) = manager.internal_owner() {
            return Some(InternalEvent::EndOfSnapshot { owner });
        }
        let name = manager.item_name(item);
        manager.notify(queue, move |l| l.on_end_of_snapshot(name.as_deref(), item));
        None
    }

    pub(crate) fn on_cs(&mut self, sub_id: u32, item: usize, queue: &CallbackQueue) {
        let Some(manager) = self.managers.get_mut(&sub_id) else {
            return;
        };
        if let Some(state) = manager.items.get_mut(item.wrapping_sub(1)) {
            state.rows.clear();
        }
        let name = manager.item_name(item);
        manager.notify(queue, move |l| l.on_clear_snapshot(name.as_deref(), item));
    }

    pub(crate) fn on_ov(&mut self, sub_id: u32, item: usize, lost: u32, queue: &CallbackQueue) {
        let Some(manager) = self.managers.get(&sub_id) else {
            return;
        };
        warn!("Subscription {} item {} lost {} updates", sub_id, item, lost);
        let name = manager.item_name(item);
        manager.notify(queue, move |l| l.on_item_lost_updates(name.as_deref(), item, lost));
    }

    pub(crate) fn on_conf(&mut self, sub_id: u32, frequency: MaxFrequency, queue: &CallbackQueue) {
        let Some(manager) = self.managers.get(&sub_id) else {
            return;
        };
        let value = match frequency {
            MaxFrequency::Unlimited => None,
            MaxFrequency::Limited(f) => Some(f),
        };
        manager.notify(queue, move |l| l.on_real_max_frequency(value));
    }

    /// The session ended: user subscriptions go back to pending for the next session,
    /// everything else is dropped.
    pub(crate) fn on_session_lost(&mut self, queue: &CallbackQueue) {
        let ids: Vec<u32> = self.managers.keys().copied().collect();
        for sub_id in ids {
            let Some(manager) = self.managers.get_mut(&sub_id) else {
                continue;
            };
            let keep = matches!(manager.owner, SubscriptionOwner::User(_))
                && matches!(
                    manager.state,
                    SubState::Pending | SubState::AddSent(_) | SubState::Subscribed
                );
            if manager.subscribed {
                manager.notify(queue, |l| l.on_unsubscription());
            }
            if keep {
                manager.subscribed = false;
                manager.items.clear();
                manager.reconf = None;
                if let SubscriptionOwner::User(handle) = &manager.owner {
                    handle.set_subscribed(false, None);
                }
                manager.set_state(sub_id, SubState::Pending);
            } else {
                if let SubscriptionOwner::User(handle) = &manager.owner {
                    handle.detach();
                }
                self.managers.remove(&sub_id);
            }
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.managers.values().any(|m| {
            matches!(m.state, SubState::Pending | SubState::DeletePending)
                || (m.reconf == Some(Reconf::Pending) && m.state == SubState::Subscribed)
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.managers.len()
    }

    /// Handles of every user subscription still known.
    pub(crate) fn user_subscriptions(&self) -> Vec<Subscription> {
        self.managers
            .values()
            .filter_map(|m| match &m.owner {
                SubscriptionOwner::User(handle) if m.state != SubState::DeletePending => {
                    Some(handle.clone())
                }
                _ => None,
            })
            .filter(|h| h.is_active())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    struct Recorder(Arc<Log>);

    impl SubscriptionListener for Recorder {
        fn on_item_update(&self, update: &ItemUpdate) {
            let mut changed: Vec<_> = update.changed_fields.keys().cloned().collect();
            changed.sort();
            self.0.0.lock().push(format!(
                "update:{}:{}:{}",
                update.item_pos,
                changed.join(","),
                update.is_snapshot
            ));
        }
        fn on_subscription(&mut self) {
            self.0.0.lock().push("subscribed".to_string());
        }
        fn on_unsubscription(&mut self) {
            self.0.0.lock().push("unsubscribed".to_string());
        }
        fn on_subscription_error(&mut self, code: i32, message: Option<&str>) {
            self.0.0.lock().push(format!("error:{}:{:?}", code, message));
        }
        fn on_end_of_snapshot(&mut self, _item_name: Option<&str>, item_pos: usize) {
            self.0.0.lock().push(format!("eos:{}", item_pos));
        }
    }

    fn user_sub(mode: SubscriptionMode, fields: &[&str]) -> (Subscription, Arc<Log>) {
        let sub = Subscription::new(
            mode,
            Some(vec!["item1".to_string()]),
            Some(fields.iter().map(|f| f.to_string()).collect()),
        )
        .unwrap();
        let log = Arc::new(Log::default());
        sub.add_listener(Box::new(Recorder(Arc::clone(&log))));
        (sub, log)
    }

    fn tier_with(sub: &Subscription, sub_id: u32) -> SubscriptionTier {
        sub.attach(Weak::new(), sub_id).unwrap();
        let mut tier = SubscriptionTier::default();
        tier.add(sub_id, SubscriptionOwner::User(sub.clone()), sub.spec().unwrap());
        tier
    }

    fn collect(tier: &SubscriptionTier) -> Vec<Outgoing> {
        let mut next = 100u64;
        let mut alloc = || {
            next += 1;
            next
        };
        let mut out = Vec::new();
        tier.collect(&mut alloc, &mut out);
        out
    }

    #[test]
    fn test_add_request_encoding() {
        let (sub, _) = user_sub(SubscriptionMode::Merge, &["bid", "ask"]);
        sub.set_data_adapter(Some("QUOTES".to_string())).unwrap();
        let tier = tier_with(&sub, 1);
        let out = collect(&tier);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].owner, RequestOwner::SubscriptionAdd(1));
        assert_eq!(
            out[0].body,
            "LS_reqId=101&LS_op=add&LS_subId=1&LS_mode=MERGE&LS_group=item1&LS_schema=bid%20ask&LS_data_adapter=QUOTES"
        );
    }

    #[test]
    fn test_merge_lifecycle() {
        let (sub, log) = user_sub(SubscriptionMode::Merge, &["bid", "ask"]);
        let mut tier = tier_with(&sub, 1);
        let queue = CallbackQueue::collecting();
        tier.mark_sent(&RequestOwner::SubscriptionAdd(1), 101);
        assert!(!tier.has_pending());
        tier.on_subok(1, 1, 2, None, &queue);
        tier.on_update(1, 1, "10|11", &queue).unwrap();
        tier.on_update(1, 1, "|12", &queue).unwrap();
        queue.drain();
        assert!(sub.is_subscribed());
        assert_eq!(
            *log.0.lock(),
            vec!["subscribed", "update:1:ask,bid:true", "update:1:ask:false"]
        );
    }

    #[test]
    fn test_update_out_of_range_is_a_violation() {
        let (sub, _) = user_sub(SubscriptionMode::Merge, &["bid"]);
        let mut tier = tier_with(&sub, 1);
        let queue = CallbackQueue::collecting();
        tier.on_subok(1, 1, 1, None, &queue);
        assert!(tier.on_update(1, 2, "x", &queue).is_err());
        assert!(tier.on_update(1, 1, "x|y", &queue).is_err());
    }

    #[test]
    fn test_command_rows_and_snapshot() {
        let (sub, log) = user_sub(SubscriptionMode::Command, &["key", "command", "price"]);
        let mut tier = tier_with(&sub, 2);
        let queue = CallbackQueue::collecting();
        tier.on_subok(2, 1, 3, Some((1, 2)), &queue);
        tier.on_update(2, 1, "a|ADD|1", &queue).unwrap();
        tier.on_update(2, 1, "b||2", &queue).unwrap();
        tier.on_eos(2, 1, &queue);
        tier.on_update(2, 1, "a|UPDATE|3", &queue).unwrap();
        queue.drain();
        assert_eq!(sub.get_key_position(), Some(1));
        assert_eq!(
            *log.0.lock(),
            vec![
                "subscribed",
                "update:1:command,key,price:true",
                "update:1:command,key,price:true",
                "eos:1",
                "update:1:command,price:false",
            ]
        );
    }

    #[test]
    fn test_unsubscribe_flow() {
        let (sub, log) = user_sub(SubscriptionMode::Merge, &["bid"]);
        let mut tier = tier_with(&sub, 3);
        let queue = CallbackQueue::collecting();
        tier.mark_sent(&RequestOwner::SubscriptionAdd(3), 101);
        tier.on_subok(3, 1, 1, None, &queue);
        tier.unsubscribe(3, &queue);
        assert!(!sub.is_active());
        let out = collect(&tier);
        assert_eq!(out[0].owner, RequestOwner::SubscriptionDelete(3));
        assert_eq!(out[0].body, "LS_reqId=101&LS_op=delete&LS_subId=3");
        tier.mark_sent(&out[0].owner, out[0].req_id);
        tier.on_unsub(3, &queue);
        queue.drain();
        assert_eq!(tier.len(), 0);
        assert_eq!(*log.0.lock(), vec!["subscribed", "unsubscribed"]);
    }

    #[test]
    fn test_unsubscribe_before_sending_drops_silently() {
        let (sub, log) = user_sub(SubscriptionMode::Merge, &["bid"]);
        let mut tier = tier_with(&sub, 4);
        let queue = CallbackQueue::collecting();
        tier.unsubscribe(4, &queue);
        queue.drain();
        assert_eq!(tier.len(), 0);
        assert!(collect(&tier).is_empty());
        assert!(log.0.lock().is_empty());
    }

    #[test]
    fn test_refused_subscription() {
        let (sub, log) = user_sub(SubscriptionMode::Merge, &["bid"]);
        let mut tier = tier_with(&sub, 5);
        let queue = CallbackQueue::collecting();
        tier.mark_sent(&RequestOwner::SubscriptionAdd(5), 101);
        let internal = tier.on_reqerr(&RequestOwner::SubscriptionAdd(5), 17, "bad item", &queue);
        queue.drain();
        assert!(internal.is_none());
        assert!(!sub.is_active());
        assert_eq!(*log.0.lock(), vec!["error:17:Some(\"bad item\")"]);
    }

    #[test]
    fn test_session_lost_requeues_user_subscriptions() {
        let (sub, log) = user_sub(SubscriptionMode::Merge, &["bid"]);
        let mut tier = tier_with(&sub, 6);
        tier.add(
            7,
            SubscriptionOwner::MpnDevice,
            SubscriptionSpec::internal(SubscriptionMode::Merge, "DEV-1", &["status"], None),
        );
        let queue = CallbackQueue::collecting();
        tier.mark_sent(&RequestOwner::SubscriptionAdd(6), 101);
        tier.on_subok(6, 1, 1, None, &queue);
        tier.on_session_lost(&queue);
        queue.drain();
        assert_eq!(tier.len(), 1);
        assert!(sub.is_active());
        assert!(!sub.is_subscribed());
        assert!(tier.has_pending());
        assert_eq!(*log.0.lock(), vec!["subscribed", "unsubscribed"]);
    }

    #[test]
    fn test_unknown_subok_creates_zombie_delete() {
        let mut tier = SubscriptionTier::default();
        let queue = CallbackQueue::collecting();
        tier.on_subok(42, 1, 1, None, &queue);
        assert!(tier.on_update(42, 1, "x", &queue).unwrap().is_none());
        let out = collect(&tier);
        assert_eq!(out[0].owner, RequestOwner::SubscriptionDelete(42));
    }

    #[test]
    fn test_internal_events() {
        let mut tier = SubscriptionTier::default();
        let queue = CallbackQueue::collecting();
        tier.add(
            9,
            SubscriptionOwner::MpnDevice,
            SubscriptionSpec::internal(
                SubscriptionMode::Merge,
                "DEV-1",
                &["status", "status_timestamp"],
                Some("MPN"),
            ),
        );
        tier.on_subok(9, 1, 2, None, &queue);
        let event = tier.on_update(9, 1, "ACTIVE|1000", &queue).unwrap();
        assert_eq!(
            event,
            Some(InternalEvent::Update {
                owner: InternalOwner::MpnDevice,
                values: vec![Some("ACTIVE".to_string()), Some("1000".to_string())],
            })
        );
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_reconfiguration() {
        let (sub, _) = user_sub(SubscriptionMode::Merge, &["bid"]);
        let mut tier = tier_with(&sub, 8);
        let queue = CallbackQueue::collecting();
        tier.mark_sent(&RequestOwner::SubscriptionAdd(8), 101);
        tier.on_subok(8, 1, 1, None, &queue);
        sub.set_requested_max_frequency(Some(crate::subscription::RequestedMaxFrequency::Limited(2.0)))
            .unwrap();
        tier.reconfigure(8);
        let out = collect(&tier);
        assert_eq!(out[0].owner, RequestOwner::SubscriptionReconf(8));
        assert_eq!(
            out[0].body,
            "LS_reqId=101&LS_op=reconf&LS_subId=8&LS_requested_max_frequency=2"
        );
        tier.mark_sent(&out[0].owner, out[0].req_id);
        tier.on_reqok(&out[0].owner);
        assert!(!tier.has_pending());
    }
}
