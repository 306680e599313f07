/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Device registration and MPN subscription requests.

use crate::client::CallbackQueue;
use crate::mpn::device::SharedDeviceListener;
use crate::mpn::subscription::MpnSpec;
use crate::mpn::{
    MpnDevice, MpnDeviceListener, MpnDeviceStatus, MpnSubscription, MpnSubscriptionFilter,
    MpnSubscriptionListener,
};
use crate::protocol::RequestBuilder;
use crate::session::{Outgoing, RequestOwner};
use crate::subscription::manager::{InternalEvent, InternalOwner};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegisterKind {
    Register,
    /// Same token again on a new session.
    Restore,
    /// The token changed since the last registration.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Unregistered,
    Pending(RegisterKind),
    Sent { req_id: u64, kind: RegisterKind },
    Registered,
}

/// Reconciliation of the device's subscription list (`SUBS-<deviceId>` item).
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubsSync {
    Idle,
    Snapshot(BTreeSet<String>),
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MpnSubState {
    ActivatePending,
    ActivateSent(u64),
    Subscribed(String),
    DeactivatePending(String),
    DeactivateSent { req_id: u64, mpn_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconf {
    Pending,
    Sent(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Badge {
    Idle,
    Pending,
    Sent(u64),
}

struct MpnSubManager {
    handle: MpnSubscription,
    spec: MpnSpec,
    coalescing: bool,
    state: MpnSubState,
    reconf: Option<Reconf>,
    /// Deactivation asked while the activation was in flight.
    deactivate_on_ok: bool,
}

impl MpnSubManager {
    fn notify<F>(&self, queue: &CallbackQueue, event: F)
    where
        F: Fn(&mut (dyn MpnSubscriptionListener + 'static)) + Send + 'static,
    {
        queue.post_each(self.handle.listeners(), event);
    }

    fn mpn_id(&self) -> Option<&str> {
        match &self.state {
            MpnSubState::Subscribed(id)
            | MpnSubState::DeactivatePending(id)
            | MpnSubState::DeactivateSent { mpn_id: id, .. } => Some(id),
            _ => None,
        }
    }
}

/// MPN state of a client: the registered device and every MPN subscription.
pub(crate) struct MpnTier {
    device: Option<MpnDevice>,
    state: DeviceState,
    device_id: Option<String>,
    /// Whether the `DEV-`/`SUBS-` internal subscriptions exist on this session.
    internal_subscribed: bool,
    sync: SubsSync,
    server_subscriptions: BTreeSet<String>,
    subscriptions: BTreeMap<u32, MpnSubManager>,
    filters: VecDeque<MpnSubscriptionFilter>,
    filter_sent: Option<u64>,
    badge: Badge,
}

impl Default for MpnTier {
    fn default() -> Self {
        Self {
            device: None,
            state: DeviceState::Unregistered,
            device_id: None,
            internal_subscribed: false,
            sync: SubsSync::Idle,
            server_subscriptions: BTreeSet::new(),
            subscriptions: BTreeMap::new(),
            filters: VecDeque::new(),
            filter_sent: None,
            badge: Badge::Idle,
        }
    }
}

impl MpnTier {
    fn device_listeners(&self) -> Vec<SharedDeviceListener> {
        self.device.as_ref().map(|d| d.listeners()).unwrap_or_default()
    }

    fn notify_device<F>(&self, queue: &CallbackQueue, event: F)
    where
        F: Fn(&mut (dyn MpnDeviceListener + 'static)) + Send + 'static,
    {
        queue.post_each(self.device_listeners(), event);
    }

    fn set_state(&mut self, state: DeviceState) {
        debug!("mpn device {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub(crate) fn device(&self) -> Option<MpnDevice> {
        self.device.clone()
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.state == DeviceState::Registered
    }

    /// Registers `device`, or refreshes its token when it is the device already
    /// registered and its token changed.
    pub(crate) fn register(&mut self, device: MpnDevice) {
        let same = self.device.as_ref().is_some_and(|d| d.same_device(&device));
        if same {
            if device.get_previous_device_token().is_some()
                && matches!(self.state, DeviceState::Registered | DeviceState::Pending(_))
            {
                self.set_state(DeviceState::Pending(RegisterKind::Refresh));
            } else if self.state == DeviceState::Unregistered {
                self.set_state(DeviceState::Pending(RegisterKind::Register));
            }
            return;
        }
        info!("Registering MPN device for {}", device.get_application_id());
        self.device = Some(device);
        self.device_id = None;
        self.set_state(DeviceState::Pending(RegisterKind::Register));
    }

    /// Forgets the device. Returns whether internal subscriptions need removing.
    pub(crate) fn reset_device(&mut self) -> bool {
        if let Some(device) = self.device.take() {
            device.reset();
        }
        for manager in std::mem::take(&mut self.subscriptions).into_values() {
            manager.handle.detach();
        }
        self.device_id = None;
        self.filters.clear();
        self.filter_sent = None;
        self.badge = Badge::Idle;
        self.sync = SubsSync::Idle;
        self.server_subscriptions.clear();
        self.set_state(DeviceState::Unregistered);
        std::mem::replace(&mut self.internal_subscribed, false)
    }

    pub(crate) fn subscribe(
        &mut self,
        sub_id: u32,
        handle: MpnSubscription,
        spec: MpnSpec,
        coalescing: bool,
    ) {
        debug!("MPN subscription {} queued ({})", sub_id, spec.group);
        self.subscriptions.insert(
            sub_id,
            MpnSubManager {
                handle,
                spec,
                coalescing,
                state: MpnSubState::ActivatePending,
                reconf: None,
                deactivate_on_ok: false,
            },
        );
    }

    pub(crate) fn unsubscribe(&mut self, sub_id: u32) {
        let Some(manager) = self.subscriptions.get_mut(&sub_id) else {
            return;
        };
        match manager.state.clone() {
            MpnSubState::ActivatePending => {
                manager.handle.detach();
                self.subscriptions.remove(&sub_id);
            }
            MpnSubState::ActivateSent(_) => manager.deactivate_on_ok = true,
            MpnSubState::Subscribed(mpn_id) => {
                manager.reconf = None;
                manager.state = MpnSubState::DeactivatePending(mpn_id);
            }
            MpnSubState::DeactivatePending(_) | MpnSubState::DeactivateSent { .. } => {}
        }
    }

    pub(crate) fn reconfigure(&mut self, sub_id: u32) {
        let Some(manager) = self.subscriptions.get_mut(&sub_id) else {
            return;
        };
        match manager.handle.spec() {
            Ok(spec) => manager.spec = spec,
            Err(e) => {
                warn!("MPN subscription {} not reconfigured: {}", sub_id, e);
                return;
            }
        }
        if matches!(manager.state, MpnSubState::Subscribed(_)) {
            manager.reconf = Some(Reconf::Pending);
        }
    }

    pub(crate) fn unsubscribe_filter(&mut self, filter: MpnSubscriptionFilter) {
        self.filters.push_back(filter);
    }

    pub(crate) fn reset_badge(&mut self) {
        if self.badge == Badge::Idle {
            self.badge = Badge::Pending;
        }
    }

    /// Identifiers of the MPN subscriptions the server lists for the device.
    pub(crate) fn subscription_ids(&self) -> Vec<String> {
        self.server_subscriptions.iter().cloned().collect()
    }

    pub(crate) fn has_pending(&self) -> bool {
        if matches!(self.state, DeviceState::Pending(_)) {
            return true;
        }
        if self.state != DeviceState::Registered {
            return false;
        }
        self.subscriptions.values().any(|m| {
            matches!(
                m.state,
                MpnSubState::ActivatePending | MpnSubState::DeactivatePending(_)
            ) || (m.reconf == Some(Reconf::Pending) && matches!(m.state, MpnSubState::Subscribed(_)))
        }) || (self.filter_sent.is_none() && !self.filters.is_empty())
            || self.badge == Badge::Pending
    }

    /// Encodes pending requests: registration, subscriptions in id order, the next
    /// filter, the badge reset.
    pub(crate) fn collect(&self, next_req_id: &mut dyn FnMut() -> u64, out: &mut Vec<Outgoing>) {
        if let (DeviceState::Pending(kind), Some(device)) = (self.state, &self.device) {
            let req_id = next_req_id();
            let token = device.get_device_token();
            let (old, new) = match (kind, device.get_previous_device_token()) {
                (RegisterKind::Refresh, Some(previous)) => (previous, Some(token)),
                _ => (token, None),
            };
            out.push(Outgoing {
                owner: RequestOwner::MpnRegister,
                req_id,
                body: RequestBuilder::new()
                    .param("LS_reqId", req_id)
                    .param("LS_op", "register")
                    .param("PN_type", device.get_platform())
                    .param("PN_appId", device.get_application_id())
                    .param("PN_deviceToken", old)
                    .param_opt("PN_newDeviceToken", new)
                    .encode(),
            });
        }
        let (DeviceState::Registered, Some(device_id)) = (self.state, self.device_id.as_ref())
        else {
            return;
        };
        for (sub_id, manager) in &self.subscriptions {
            match &manager.state {
                MpnSubState::ActivatePending => {
                    let req_id = next_req_id();
                    let spec = &manager.spec;
                    out.push(Outgoing {
                        owner: RequestOwner::MpnActivate(*sub_id),
                        req_id,
                        body: RequestBuilder::new()
                            .param("LS_reqId", req_id)
                            .param("LS_op", "activate")
                            .param("LS_subId", sub_id)
                            .param("LS_mode", spec.mode)
                            .param("LS_group", &spec.group)
                            .param("LS_schema", &spec.schema)
                            .param_opt("LS_data_adapter", spec.data_adapter.as_ref())
                            .param("PN_deviceId", device_id)
                            .param("PN_notificationFormat", &spec.notification_format)
                            .param_opt("PN_trigger", spec.trigger.as_ref())
                            .param_opt("PN_coalescing", manager.coalescing.then_some(true))
                            .encode(),
                    });
                }
                MpnSubState::DeactivatePending(mpn_id) => {
                    let req_id = next_req_id();
                    out.push(Outgoing {
                        owner: RequestOwner::MpnDeactivate(*sub_id),
                        req_id,
                        body: RequestBuilder::new()
                            .param("LS_reqId", req_id)
                            .param("LS_op", "deactivate")
                            .param("PN_deviceId", device_id)
                            .param("PN_subscriptionId", mpn_id)
                            .encode(),
                    });
                }
                MpnSubState::Subscribed(mpn_id) if manager.reconf == Some(Reconf::Pending) => {
                    let req_id = next_req_id();
                    out.push(Outgoing {
                        owner: RequestOwner::MpnReconf(*sub_id),
                        req_id,
                        body: RequestBuilder::new()
                            .param("LS_reqId", req_id)
                            .param("LS_op", "pn_reconf")
                            .param("PN_deviceId", device_id)
                            .param("PN_subscriptionId", mpn_id)
                            .param("PN_notificationFormat", &manager.spec.notification_format)
                            .param_opt("PN_trigger", manager.spec.trigger.as_ref())
                            .encode(),
                    });
                }
                _ => {}
            }
        }
        if let (None, Some(filter)) = (self.filter_sent, self.filters.front()) {
            let req_id = next_req_id();
            out.push(Outgoing {
                owner: RequestOwner::MpnFilter,
                req_id,
                body: RequestBuilder::new()
                    .param("LS_reqId", req_id)
                    .param("LS_op", "deactivate")
                    .param("PN_deviceId", device_id)
                    .param_opt("PN_subscriptionStatus", filter.status_param())
                    .encode(),
            });
        }
        if self.badge == Badge::Pending {
            let req_id = next_req_id();
            out.push(Outgoing {
                owner: RequestOwner::MpnBadge,
                req_id,
                body: RequestBuilder::new()
                    .param("LS_reqId", req_id)
                    .param("LS_op", "reset_badge")
                    .param("PN_deviceId", device_id)
                    .encode(),
            });
        }
    }

    pub(crate) fn mark_sent(&mut self, owner: &RequestOwner, req_id: u64) {
        match owner {
            RequestOwner::MpnRegister => {
                if let DeviceState::Pending(kind) = self.state {
                    self.set_state(DeviceState::Sent { req_id, kind });
                }
            }
            RequestOwner::MpnActivate(id) => {
                if let Some(m) = self.subscriptions.get_mut(id) {
                    m.state = MpnSubState::ActivateSent(req_id);
                }
            }
            RequestOwner::MpnDeactivate(id) => {
                if let Some(m) = self.subscriptions.get_mut(id) {
                    if let MpnSubState::DeactivatePending(mpn_id) = &m.state {
                        let mpn_id = mpn_id.clone();
                        m.state = MpnSubState::DeactivateSent { req_id, mpn_id };
                    }
                }
            }
            RequestOwner::MpnReconf(id) => {
                if let Some(m) = self.subscriptions.get_mut(id) {
                    m.reconf = Some(Reconf::Sent(req_id));
                }
            }
            RequestOwner::MpnFilter => self.filter_sent = Some(req_id),
            RequestOwner::MpnBadge => self.badge = Badge::Sent(req_id),
            _ => {}
        }
    }

    pub(crate) fn on_reqok(&mut self, owner: &RequestOwner) {
        if *owner == RequestOwner::MpnFilter && self.filter_sent.take().is_some() {
            self.filters.pop_front();
        }
    }

    pub(crate) fn on_reqerr(
        &mut self,
        owner: &RequestOwner,
        code: i32,
        message: &str,
        queue: &CallbackQueue,
    ) {
        let text = message.to_string();
        match owner {
            RequestOwner::MpnRegister => {
                warn!("MPN device registration refused: {} {}", code, message);
                self.set_state(DeviceState::Unregistered);
                self.notify_device(queue, move |l| l.on_registration_failed(code, &text));
            }
            RequestOwner::MpnActivate(id) => {
                if let Some(manager) = self.subscriptions.remove(id) {
                    manager.handle.detach();
                    manager.notify(queue, move |l| l.on_subscription_error(code, &text));
                }
            }
            RequestOwner::MpnDeactivate(id) => {
                if let Some(manager) = self.subscriptions.get_mut(id) {
                    if let MpnSubState::DeactivateSent { mpn_id, .. } = &manager.state {
                        manager.state = MpnSubState::Subscribed(mpn_id.clone());
                    }
                    manager.notify(queue, move |l| l.on_unsubscription_error(code, &text));
                }
            }
            RequestOwner::MpnReconf(id) => {
                if let Some(manager) = self.subscriptions.get_mut(id) {
                    manager.reconf = None;
                    manager.notify(queue, move |l| {
                        l.on_modification_error(code, &text, "notification_format")
                    });
                }
            }
            RequestOwner::MpnFilter => {
                warn!("MPN bulk unsubscription refused: {} {}", code, message);
                self.filter_sent = None;
                self.filters.pop_front();
            }
            RequestOwner::MpnBadge => {
                self.badge = Badge::Idle;
                self.notify_device(queue, move |l| l.on_badge_reset_failed(code, &text));
            }
            _ => {}
        }
    }

    /// Returns the device id and adapter when the internal subscriptions of the
    /// device must be created.
    pub(crate) fn on_mpnreg(
        &mut self,
        device_id: &str,
        adapter_name: &str,
        queue: &CallbackQueue,
    ) -> Option<(String, String)> {
        let device = self.device.clone()?;
        device.set_registered(device_id, adapter_name);
        self.device_id = Some(device_id.to_string());
        self.set_state(DeviceState::Registered);
        info!("MPN device registered as {}", device_id);
        self.notify_device(queue, |l| l.on_registered());
        if self.internal_subscribed {
            return None;
        }
        self.internal_subscribed = true;
        self.sync = SubsSync::Snapshot(BTreeSet::new());
        Some((device_id.to_string(), adapter_name.to_string()))
    }

    pub(crate) fn on_mpnzero(&mut self, device_id: &str, queue: &CallbackQueue) {
        if self.device_id.as_deref() != Some(device_id) {
            return;
        }
        self.badge = Badge::Idle;
        self.notify_device(queue, |l| l.on_badge_reset());
    }

    pub(crate) fn on_mpnok(&mut self, sub_id: u32, mpn_id: &str, queue: &CallbackQueue) {
        let Some(manager) = self.subscriptions.get_mut(&sub_id) else {
            debug!("MPNOK for unknown subscription {}", sub_id);
            return;
        };
        manager.handle.set_subscribed(mpn_id);
        self.server_subscriptions.insert(mpn_id.to_string());
        if manager.deactivate_on_ok {
            manager.state = MpnSubState::DeactivatePending(mpn_id.to_string());
        } else {
            manager.state = MpnSubState::Subscribed(mpn_id.to_string());
        }
        manager.notify(queue, |l| l.on_subscription());
    }

    pub(crate) fn on_mpndel(&mut self, mpn_id: &str, queue: &CallbackQueue) {
        self.server_subscriptions.remove(mpn_id);
        self.remove_by_mpn_id(mpn_id, queue);
    }

    fn remove_by_mpn_id(&mut self, mpn_id: &str, queue: &CallbackQueue) {
        let found = self
            .subscriptions
            .iter()
            .find(|(_, m)| m.mpn_id() == Some(mpn_id))
            .map(|(id, _)| *id);
        if let Some(manager) = found.and_then(|id| self.subscriptions.remove(&id)) {
            manager.handle.detach();
            manager.notify(queue, |l| l.on_unsubscription());
        }
    }

    pub(crate) fn on_mpnconf(&mut self, mpn_id: &str, queue: &CallbackQueue) {
        if let Some(manager) = self
            .subscriptions
            .values_mut()
            .find(|m| m.mpn_id() == Some(mpn_id))
        {
            manager.reconf = None;
            manager.notify(queue, |l| l.on_property_changed("notification_format"));
        }
    }

    /// Events of the `DEV-` and `SUBS-` internal subscriptions.
    pub(crate) fn on_internal(&mut self, event: InternalEvent, queue: &CallbackQueue) {
        match event {
            InternalEvent::Update {
                owner: InternalOwner::MpnDevice,
                values,
            } => self.on_device_status(&values, queue),
            InternalEvent::Update {
                owner: InternalOwner::MpnSubscriptions,
                values,
            } => self.on_subscriptions_item(&values, queue),
            InternalEvent::EndOfSnapshot {
                owner: InternalOwner::MpnSubscriptions,
            } => {
                if let SubsSync::Snapshot(ids) = std::mem::replace(&mut self.sync, SubsSync::Live) {
                    self.server_subscriptions = ids;
                    self.notify_device(queue, |l| l.on_subscriptions_updated());
                }
            }
            InternalEvent::EndOfSnapshot { .. } => {}
            InternalEvent::Error { owner, code, message } => {
                warn!("MPN internal subscription {:?} failed: {} {}", owner, code, message);
            }
        }
    }

    fn on_device_status(&mut self, values: &[Option<String>], queue: &CallbackQueue) {
        let Some(device) = self.device.clone() else {
            return;
        };
        let status = match values.first().and_then(|v| v.as_deref()) {
            Some("ACTIVE") => MpnDeviceStatus::Registered,
            Some("SUSPENDED") => MpnDeviceStatus::Suspended,
            other => {
                debug!("Ignoring MPN device status {:?}", other);
                return;
            }
        };
        let timestamp = values
            .get(1)
            .and_then(|v| v.as_deref())
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(0);
        let previous = device.set_status(status, timestamp);
        if previous == status {
            return;
        }
        self.notify_device(queue, move |l| l.on_status_changed(status, timestamp));
        match (previous, status) {
            (_, MpnDeviceStatus::Suspended) => self.notify_device(queue, |l| l.on_suspended()),
            (MpnDeviceStatus::Suspended, MpnDeviceStatus::Registered) => {
                self.notify_device(queue, |l| l.on_resumed())
            }
            _ => {}
        }
    }

    fn on_subscriptions_item(&mut self, values: &[Option<String>], queue: &CallbackQueue) {
        let Some(key) = values.first().cloned().flatten() else {
            return;
        };
        let command = values.get(1).cloned().flatten().unwrap_or_default();
        if let SubsSync::Snapshot(ids) = &mut self.sync {
            if command == "DELETE" {
                ids.remove(&key);
            } else {
                ids.insert(key);
            }
            return;
        }
        if self.sync != SubsSync::Live {
            return;
        }
        if command == "DELETE" {
            self.server_subscriptions.remove(&key);
            self.remove_by_mpn_id(&key, queue);
        } else {
            self.server_subscriptions.insert(key);
        }
        self.notify_device(queue, |l| l.on_subscriptions_updated());
    }

    /// The session ended: filter and badge requests are dropped, the device is
    /// restored on the next session and MPN subscriptions are sent again.
    pub(crate) fn on_session_lost(&mut self) {
        self.internal_subscribed = false;
        self.sync = SubsSync::Idle;
        self.filters.clear();
        self.filter_sent = None;
        self.badge = Badge::Idle;
        let next = match self.state {
            DeviceState::Unregistered => DeviceState::Unregistered,
            DeviceState::Pending(kind) | DeviceState::Sent { kind, .. } => DeviceState::Pending(kind),
            DeviceState::Registered => {
                let rotated = self
                    .device
                    .as_ref()
                    .is_some_and(|d| d.get_previous_device_token().is_some());
                if rotated {
                    DeviceState::Pending(RegisterKind::Refresh)
                } else {
                    DeviceState::Pending(RegisterKind::Restore)
                }
            }
        };
        self.set_state(next);
        for manager in self.subscriptions.values_mut() {
            manager.state = match std::mem::replace(&mut manager.state, MpnSubState::ActivatePending) {
                MpnSubState::ActivateSent(_) => MpnSubState::ActivatePending,
                MpnSubState::DeactivateSent { mpn_id, .. } => MpnSubState::DeactivatePending(mpn_id),
                other => other,
            };
            if let Some(Reconf::Sent(_)) = manager.reconf {
                manager.reconf = Some(Reconf::Pending);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpn::MpnPlatform;
    use crate::subscription::SubscriptionMode;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    struct DeviceRecorder(Arc<Mutex<Vec<String>>>);

    impl MpnDeviceListener for DeviceRecorder {
        fn on_registered(&mut self) {
            self.0.lock().push("registered".into());
        }
        fn on_suspended(&mut self) {
            self.0.lock().push("suspended".into());
        }
        fn on_resumed(&mut self) {
            self.0.lock().push("resumed".into());
        }
        fn on_status_changed(&mut self, status: MpnDeviceStatus, timestamp: u64) {
            self.0.lock().push(format!("status:{}:{}", status, timestamp));
        }
        fn on_subscriptions_updated(&mut self) {
            self.0.lock().push("subscriptions".into());
        }
        fn on_badge_reset(&mut self) {
            self.0.lock().push("badge".into());
        }
    }

    struct SubRecorder(Arc<Mutex<Vec<String>>>);

    impl MpnSubscriptionListener for SubRecorder {
        fn on_subscription(&mut self) {
            self.0.lock().push("subscribed".into());
        }
        fn on_unsubscription(&mut self) {
            self.0.lock().push("unsubscribed".into());
        }
        fn on_subscription_error(&mut self, code: i32, message: &str) {
            self.0.lock().push(format!("error:{}:{}", code, message));
        }
    }

    fn collect(tier: &MpnTier) -> Vec<Outgoing> {
        let mut next = 0u64;
        let mut alloc = || {
            next += 1;
            next
        };
        let mut out = Vec::new();
        tier.collect(&mut alloc, &mut out);
        out
    }

    fn send_all(tier: &mut MpnTier) -> Vec<Outgoing> {
        let out = collect(tier);
        for o in &out {
            tier.mark_sent(&o.owner, o.req_id);
        }
        out
    }

    fn registered(log: &Arc<Mutex<Vec<String>>>) -> (MpnTier, MpnDevice, CallbackQueue) {
        let queue = CallbackQueue::collecting();
        let device = MpnDevice::new("tok", "com.example.app", MpnPlatform::Google).unwrap();
        device.add_listener(Box::new(DeviceRecorder(Arc::clone(log))));
        let mut tier = MpnTier::default();
        tier.register(device.clone());
        send_all(&mut tier);
        let internal = tier.on_mpnreg("dev-1", "MPN", &queue);
        assert_eq!(internal, Some(("dev-1".to_string(), "MPN".to_string())));
        (tier, device, queue)
    }

    fn mpn_sub(log: &Arc<Mutex<Vec<String>>>) -> MpnSubscription {
        let sub = MpnSubscription::new(
            SubscriptionMode::Merge,
            vec!["item".to_string()],
            vec!["bid".to_string()],
        )
        .unwrap();
        sub.set_notification_format("{}").unwrap();
        sub.add_listener(Box::new(SubRecorder(Arc::clone(log))));
        sub
    }

    #[test]
    fn test_register_request() {
        let device = MpnDevice::new("tok 1", "app", MpnPlatform::Apple).unwrap();
        let mut tier = MpnTier::default();
        tier.register(device.clone());
        assert!(tier.has_pending());
        let out = send_all(&mut tier);
        assert_eq!(out[0].owner, RequestOwner::MpnRegister);
        assert_eq!(
            out[0].body,
            "LS_reqId=1&LS_op=register&PN_type=Apple&PN_appId=app&PN_deviceToken=tok%201"
        );
        assert!(!tier.has_pending());
    }

    #[test]
    fn test_registration_and_subscription_sync() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, device, queue) = registered(&log);
        assert_eq!(device.get_device_id().as_deref(), Some("dev-1"));
        let subs = InternalOwner::MpnSubscriptions;
        for key in ["m1", "m2"] {
            tier.on_internal(
                InternalEvent::Update {
                    owner: subs,
                    values: vec![Some(key.to_string()), Some("ADD".to_string())],
                },
                &queue,
            );
        }
        tier.on_internal(InternalEvent::EndOfSnapshot { owner: subs }, &queue);
        tier.on_internal(
            InternalEvent::Update {
                owner: subs,
                values: vec![Some("m1".to_string()), Some("DELETE".to_string())],
            },
            &queue,
        );
        queue.drain();
        assert_eq!(tier.subscription_ids(), vec!["m2".to_string()]);
        assert_eq!(
            *log.lock(),
            vec!["registered", "subscriptions", "subscriptions"]
        );
    }

    #[test]
    fn test_device_status_events() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, _device, queue) = registered(&log);
        let status = |s: &str| InternalEvent::Update {
            owner: InternalOwner::MpnDevice,
            values: vec![Some(s.to_string()), Some("42".to_string())],
        };
        tier.on_internal(status("ACTIVE"), &queue);
        tier.on_internal(status("SUSPENDED"), &queue);
        tier.on_internal(status("ACTIVE"), &queue);
        queue.drain();
        assert_eq!(
            *log.lock(),
            vec![
                "registered",
                "status:SUSPENDED:42",
                "suspended",
                "status:REGISTERED:42",
                "resumed",
            ]
        );
    }

    #[test]
    fn test_activate_and_deactivate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, _device, queue) = registered(&log);
        let sub = mpn_sub(&log);
        sub.attach(Weak::new(), 5).unwrap();
        tier.subscribe(5, sub.clone(), sub.spec().unwrap(), true);
        let out = send_all(&mut tier);
        assert_eq!(out[0].owner, RequestOwner::MpnActivate(5));
        assert_eq!(
            out[0].body,
            "LS_reqId=1&LS_op=activate&LS_subId=5&LS_mode=MERGE&LS_group=item&LS_schema=bid&PN_deviceId=dev-1&PN_notificationFormat=%7B%7D&PN_coalescing=true"
        );
        tier.on_mpnok(5, "mpn-9", &queue);
        assert!(sub.is_subscribed());
        tier.unsubscribe(5);
        let out = send_all(&mut tier);
        assert_eq!(
            out[0].body,
            "LS_reqId=1&LS_op=deactivate&PN_deviceId=dev-1&PN_subscriptionId=mpn-9"
        );
        tier.on_mpndel("mpn-9", &queue);
        queue.drain();
        assert!(!sub.is_active());
        assert_eq!(*log.lock(), vec!["registered", "subscribed", "unsubscribed"]);
    }

    #[test]
    fn test_requests_wait_for_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let device = MpnDevice::new("tok", "app", MpnPlatform::Google).unwrap();
        let mut tier = MpnTier::default();
        tier.register(device);
        let sub = mpn_sub(&log);
        tier.subscribe(1, sub.clone(), sub.spec().unwrap(), false);
        tier.reset_badge();
        let out = collect(&tier);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].owner, RequestOwner::MpnRegister);
    }

    #[test]
    fn test_filter_and_badge_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, _device, queue) = registered(&log);
        tier.unsubscribe_filter(MpnSubscriptionFilter::Triggered);
        tier.unsubscribe_filter(MpnSubscriptionFilter::All);
        tier.reset_badge();
        let out = send_all(&mut tier);
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].body,
            "LS_reqId=1&LS_op=deactivate&PN_deviceId=dev-1&PN_subscriptionStatus=TRIGGERED"
        );
        assert_eq!(out[1].owner, RequestOwner::MpnBadge);
        tier.on_reqok(&RequestOwner::MpnFilter);
        tier.on_mpnzero("dev-1", &queue);
        let out = send_all(&mut tier);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body, "LS_reqId=1&LS_op=deactivate&PN_deviceId=dev-1");
        queue.drain();
        assert_eq!(*log.lock(), vec!["registered", "badge"]);
    }

    #[test]
    fn test_session_lost_restores_device() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, device, queue) = registered(&log);
        tier.on_session_lost();
        let out = send_all(&mut tier);
        assert!(out[0].body.contains("PN_deviceToken=tok"));
        assert!(!out[0].body.contains("PN_newDeviceToken"));
        assert!(tier.on_mpnreg("dev-1", "MPN", &queue).is_some());

        device.set_device_token("tok2").unwrap();
        tier.register(device.clone());
        let out = send_all(&mut tier);
        assert!(out[0].body.ends_with("PN_deviceToken=tok&PN_newDeviceToken=tok2"));
        assert!(tier.on_mpnreg("dev-1", "MPN", &queue).is_none());
    }

    #[test]
    fn test_session_lost_drops_filter_and_badge_requests() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, _device, queue) = registered(&log);
        tier.reset_badge();
        tier.unsubscribe_filter(MpnSubscriptionFilter::All);
        tier.unsubscribe_filter(MpnSubscriptionFilter::Triggered);
        assert_eq!(send_all(&mut tier).len(), 2);

        tier.on_session_lost();
        let out = send_all(&mut tier);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].owner, RequestOwner::MpnRegister);
        assert!(tier.on_mpnreg("dev-1", "MPN", &queue).is_some());
        assert!(collect(&tier).is_empty());
        assert!(!tier.has_pending());
    }

    #[test]
    fn test_refused_activation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut tier, _device, queue) = registered(&log);
        let sub = mpn_sub(&log);
        sub.attach(Weak::new(), 2).unwrap();
        tier.subscribe(2, sub.clone(), sub.spec().unwrap(), false);
        send_all(&mut tier);
        tier.on_reqerr(&RequestOwner::MpnActivate(2), 45, "bad format", &queue);
        queue.drain();
        assert!(!sub.is_active());
        assert_eq!(*log.lock(), vec!["registered", "error:45:bad format"]);
    }
}
