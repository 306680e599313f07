/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::mpn::MpnSubscriptionListener;
use crate::session::Engine;
use crate::subscription::SubscriptionMode;
use crate::utils::{IllegalArgumentException, IllegalStateException};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) type SharedMpnListener = Arc<Mutex<Box<dyn MpnSubscriptionListener>>>;

/// Server-side state of an MPN subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MpnSubscriptionStatus {
    /// Not handed to a client.
    Unknown,
    /// Handed to a client, activation not yet confirmed.
    Active,
    /// Active on the server.
    Subscribed,
}

impl fmt::Display for MpnSubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpnSubscriptionStatus::Unknown => write!(f, "UNKNOWN"),
            MpnSubscriptionStatus::Active => write!(f, "ACTIVE"),
            MpnSubscriptionStatus::Subscribed => write!(f, "SUBSCRIBED"),
        }
    }
}

/// Which MPN subscriptions a bulk unsubscription removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MpnSubscriptionFilter {
    All,
    Active,
    Triggered,
}

impl MpnSubscriptionFilter {
    /// Value of `PN_subscriptionStatus`; `All` sends no filter.
    pub(crate) fn status_param(self) -> Option<&'static str> {
        match self {
            MpnSubscriptionFilter::All => None,
            MpnSubscriptionFilter::Active => Some("ACTIVE"),
            MpnSubscriptionFilter::Triggered => Some("TRIGGERED"),
        }
    }
}

/// Parameters of an `activate` request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MpnSpec {
    pub mode: SubscriptionMode,
    pub group: String,
    pub schema: String,
    pub data_adapter: Option<String>,
    pub notification_format: String,
    pub trigger: Option<String>,
}

struct Attachment {
    engine: Weak<Engine>,
    sub_id: u32,
}

struct MpnData {
    mode: SubscriptionMode,
    items: Vec<String>,
    fields: Vec<String>,
    data_adapter: Option<String>,
    notification_format: Option<String>,
    trigger: Option<String>,
    mpn_subscription_id: Option<String>,
    status: MpnSubscriptionStatus,
    listeners: Vec<SharedMpnListener>,
    attachment: Option<Attachment>,
}

/// A subscription whose updates are delivered as push notifications to an
/// [`MpnDevice`](crate::mpn::MpnDevice), even while the application is not running.
#[derive(Clone)]
pub struct MpnSubscription {
    data: Arc<Mutex<MpnData>>,
}

impl MpnSubscription {
    /// Only MERGE and DISTINCT modes can feed notifications.
    pub fn new(
        mode: SubscriptionMode,
        items: Vec<String>,
        fields: Vec<String>,
    ) -> Result<Self, IllegalArgumentException> {
        if !matches!(mode, SubscriptionMode::Merge | SubscriptionMode::Distinct) {
            return Err(IllegalArgumentException::new(
                "MPN subscriptions support MERGE and DISTINCT modes only",
            ));
        }
        if items.is_empty() || items.iter().any(|i| i.is_empty() || i.contains(' ')) {
            return Err(IllegalArgumentException::new("Invalid item list"));
        }
        if fields.is_empty() || fields.iter().any(|f| f.is_empty() || f.contains(' ')) {
            return Err(IllegalArgumentException::new("Invalid field list"));
        }
        Ok(Self {
            data: Arc::new(Mutex::new(MpnData {
                mode,
                items,
                fields,
                data_adapter: None,
                notification_format: None,
                trigger: None,
                mpn_subscription_id: None,
                status: MpnSubscriptionStatus::Unknown,
                listeners: Vec::new(),
                attachment: None,
            })),
        })
    }

    pub fn add_listener(&self, mut listener: Box<dyn MpnSubscriptionListener>) {
        listener.on_listen_start();
        self.data.lock().listeners.push(Arc::new(Mutex::new(listener)));
    }

    pub fn remove_listeners(&self) {
        let removed = std::mem::take(&mut self.data.lock().listeners);
        for listener in removed {
            listener.lock().on_listen_end();
        }
    }

    pub fn get_mode(&self) -> SubscriptionMode {
        self.data.lock().mode
    }

    pub fn get_items(&self) -> Vec<String> {
        self.data.lock().items.clone()
    }

    pub fn get_fields(&self) -> Vec<String> {
        self.data.lock().fields.clone()
    }

    pub fn set_data_adapter(&self, adapter: Option<String>) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        if data.attachment.is_some() {
            return Err(IllegalStateException::new("MPN subscription is active"));
        }
        data.data_adapter = adapter;
        Ok(())
    }

    pub fn get_data_adapter(&self) -> Option<String> {
        self.data.lock().data_adapter.clone()
    }

    /// Sets the JSON notification format. On an active subscription the change is sent
    /// to the server.
    pub fn set_notification_format(&self, format: &str) -> Result<(), IllegalArgumentException> {
        if format.is_empty() {
            return Err(IllegalArgumentException::new("Notification format cannot be empty"));
        }
        self.change(|data| data.notification_format = Some(format.to_string()));
        Ok(())
    }

    pub fn get_notification_format(&self) -> Option<String> {
        self.data.lock().notification_format.clone()
    }

    /// Sets the boolean expression that triggers the notification, `None` to notify
    /// every update.
    pub fn set_trigger(&self, trigger: Option<String>) {
        self.change(|data| data.trigger = trigger);
    }

    pub fn get_trigger(&self) -> Option<String> {
        self.data.lock().trigger.clone()
    }

    /// Server identifier, known once the activation is confirmed.
    pub fn get_subscription_id(&self) -> Option<String> {
        self.data.lock().mpn_subscription_id.clone()
    }

    pub fn get_status(&self) -> MpnSubscriptionStatus {
        self.data.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.data.lock().attachment.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.data.lock().status == MpnSubscriptionStatus::Subscribed
    }

    fn change(&self, apply: impl FnOnce(&mut MpnData)) {
        let reconf = {
            let mut data = self.data.lock();
            apply(&mut *data);
            data.attachment
                .as_ref()
                .map(|a| (a.engine.clone(), a.sub_id))
        };
        if let Some((engine, sub_id)) = reconf {
            if let Some(engine) = engine.upgrade() {
                engine.reconfigure_mpn_subscription(sub_id);
            }
        }
    }

    pub(crate) fn spec(&self) -> Result<MpnSpec, IllegalArgumentException> {
        let data = self.data.lock();
        let notification_format = data.notification_format.clone().ok_or_else(|| {
            IllegalArgumentException::new("A notification format must be set before subscribing")
        })?;
        Ok(MpnSpec {
            mode: data.mode,
            group: data.items.join(" "),
            schema: data.fields.join(" "),
            data_adapter: data.data_adapter.clone(),
            notification_format,
            trigger: data.trigger.clone(),
        })
    }

    pub(crate) fn attach(&self, engine: Weak<Engine>, sub_id: u32) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        if data.attachment.is_some() {
            return Err(IllegalStateException::new("MPN subscription is already active"));
        }
        data.attachment = Some(Attachment { engine, sub_id });
        data.status = MpnSubscriptionStatus::Active;
        Ok(())
    }

    pub(crate) fn detach(&self) {
        let mut data = self.data.lock();
        data.attachment = None;
        data.mpn_subscription_id = None;
        data.status = MpnSubscriptionStatus::Unknown;
    }

    pub(crate) fn sub_id(&self) -> Option<u32> {
        self.data.lock().attachment.as_ref().map(|a| a.sub_id)
    }

    pub(crate) fn set_subscribed(&self, mpn_subscription_id: &str) {
        let mut data = self.data.lock();
        data.mpn_subscription_id = Some(mpn_subscription_id.to_string());
        data.status = MpnSubscriptionStatus::Subscribed;
    }

    pub(crate) fn listeners(&self) -> Vec<SharedMpnListener> {
        self.data.lock().listeners.clone()
    }
}

impl fmt::Debug for MpnSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("MpnSubscription")
            .field("mode", &data.mode)
            .field("items", &data.items)
            .field("fields", &data.fields)
            .field("mpn_subscription_id", &data.mpn_subscription_id)
            .field("status", &data.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_validates_mode_and_names() {
        assert!(MpnSubscription::new(SubscriptionMode::Raw, names(&["a"]), names(&["f"])).is_err());
        assert!(MpnSubscription::new(SubscriptionMode::Merge, vec![], names(&["f"])).is_err());
        assert!(MpnSubscription::new(SubscriptionMode::Merge, names(&["a b"]), names(&["f"])).is_err());
        assert!(MpnSubscription::new(SubscriptionMode::Distinct, names(&["a"]), names(&["f"])).is_ok());
    }

    #[test]
    fn test_spec_needs_a_format() {
        let sub =
            MpnSubscription::new(SubscriptionMode::Merge, names(&["i1", "i2"]), names(&["bid"]))
                .unwrap();
        assert!(sub.spec().is_err());
        assert!(sub.set_notification_format("").is_err());
        sub.set_notification_format("{\"title\":\"${bid}\"}").unwrap();
        sub.set_trigger(Some("Double.parseDouble(${bid}) > 10".to_string()));
        let spec = sub.spec().unwrap();
        assert_eq!(spec.group, "i1 i2");
        assert_eq!(spec.schema, "bid");
        assert!(spec.trigger.is_some());
    }

    #[test]
    fn test_status_follows_lifecycle() {
        let sub =
            MpnSubscription::new(SubscriptionMode::Merge, names(&["i"]), names(&["f"])).unwrap();
        assert_eq!(sub.get_status(), MpnSubscriptionStatus::Unknown);
        sub.attach(Weak::new(), 3).unwrap();
        assert!(sub.attach(Weak::new(), 4).is_err());
        assert_eq!(sub.get_status(), MpnSubscriptionStatus::Active);
        sub.set_subscribed("mpn-1");
        assert!(sub.is_subscribed());
        assert_eq!(sub.get_subscription_id().as_deref(), Some("mpn-1"));
        sub.detach();
        assert!(!sub.is_active());
        assert_eq!(sub.get_status(), MpnSubscriptionStatus::Unknown);
    }

    #[test]
    fn test_filter_params() {
        assert_eq!(MpnSubscriptionFilter::All.status_param(), None);
        assert_eq!(MpnSubscriptionFilter::Triggered.status_param(), Some("TRIGGERED"));
    }
}
