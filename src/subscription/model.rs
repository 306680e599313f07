/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

use crate::session::Engine;
use crate::subscription::SubscriptionListener;
use crate::utils::{IllegalArgumentException, IllegalStateException};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Weak};

/// Subscription mode, deciding how the server filters and delivers item updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionMode {
    Merge,
    Distinct,
    Raw,
    Command,
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SubscriptionMode::Merge => "MERGE",
            SubscriptionMode::Distinct => "DISTINCT",
            SubscriptionMode::Raw => "RAW",
            SubscriptionMode::Command => "COMMAND",
        };
        f.write_str(text)
    }
}

/// Snapshot requested with a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Snapshot {
    Yes,
    No,
    /// DISTINCT mode only: the length of the snapshot.
    Number(usize),
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Yes => write!(f, "true"),
            Snapshot::No => write!(f, "false"),
            Snapshot::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Update frequency asked of the server, in updates per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RequestedMaxFrequency {
    Unlimited,
    Unfiltered,
    Limited(f64),
}

impl fmt::Display for RequestedMaxFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedMaxFrequency::Unlimited => write!(f, "unlimited"),
            RequestedMaxFrequency::Unfiltered => write!(f, "unfiltered"),
            RequestedMaxFrequency::Limited(freq) => write!(f, "{}", freq),
        }
    }
}

/// Length of the server-side buffer of each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestedBufferSize {
    Unlimited,
    Limited(usize),
}

impl fmt::Display for RequestedBufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedBufferSize::Unlimited => write!(f, "unlimited"),
            RequestedBufferSize::Limited(n) => write!(f, "{}", n),
        }
    }
}

pub(crate) type SharedListener = Arc<Mutex<Box<dyn SubscriptionListener>>>;

/// Parameters of a subscription as sent in its `add` request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubscriptionSpec {
    pub mode: SubscriptionMode,
    pub group: String,
    pub schema: String,
    pub items: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
    pub data_adapter: Option<String>,
    pub selector: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub max_frequency: Option<RequestedMaxFrequency>,
    pub buffer_size: Option<RequestedBufferSize>,
}

impl SubscriptionSpec {
    /// Spec of an engine-owned subscription over a plain item and field list.
    pub(crate) fn internal(
        mode: SubscriptionMode,
        item: &str,
        fields: &[&str],
        data_adapter: Option<&str>,
    ) -> Self {
        Self {
            mode,
            group: item.to_string(),
            schema: fields.join(" "),
            items: Some(vec![item.to_string()]),
            fields: Some(fields.iter().map(|f| f.to_string()).collect()),
            data_adapter: data_adapter.map(str::to_string),
            selector: None,
            snapshot: Some(Snapshot::Yes),
            max_frequency: None,
            buffer_size: None,
        }
    }

    pub(crate) fn wants_snapshot(&self) -> bool {
        match (self.mode, self.snapshot) {
            (SubscriptionMode::Raw, _) => false,
            (_, Some(Snapshot::No)) => false,
            (_, Some(_)) => true,
            // the server default is a snapshot for MERGE and COMMAND only
            (SubscriptionMode::Merge | SubscriptionMode::Command, None) => true,
            (_, None) => false,
        }
    }
}

struct Attachment {
    engine: Weak<Engine>,
    sub_id: u32,
}

struct SubscriptionData {
    mode: SubscriptionMode,
    items: Option<Vec<String>>,
    item_group: Option<String>,
    fields: Option<Vec<String>>,
    field_schema: Option<String>,
    data_adapter: Option<String>,
    selector: Option<String>,
    snapshot: Option<Snapshot>,
    max_frequency: Option<RequestedMaxFrequency>,
    buffer_size: Option<RequestedBufferSize>,
    listeners: Vec<SharedListener>,
    attachment: Option<Attachment>,
    subscribed: bool,
    key_position: Option<usize>,
    command_position: Option<usize>,
}

/// A real-time subscription to a set of items and fields.
///
/// `Subscription` is a cheap handle: clones share the same state. Hand it to
/// `LightstreamerClient::subscribe` to activate it; until then every parameter can be
/// changed freely. While active, only the requested max frequency may change.
#[derive(Clone)]
pub struct Subscription {
    data: Arc<Mutex<SubscriptionData>>,
}

fn check_names(names: &[String], what: &str) -> Result<(), IllegalArgumentException> {
    if names.is_empty() {
        return Err(IllegalArgumentException::new(&format!("{} list is empty", what)));
    }
    for name in names {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(IllegalArgumentException::new(&format!(
                "{} name '{}' is not valid",
                what, name
            )));
        }
        if what == "Item" && name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(IllegalArgumentException::new(&format!(
                "Item name '{}' cannot start with a digit",
                name
            )));
        }
    }
    Ok(())
}

impl Subscription {
    /// Creates an inactive subscription. Items and fields may also be supplied later,
    /// either as lists or as a group/schema name.
    pub fn new(
        mode: SubscriptionMode,
        items: Option<Vec<String>>,
        fields: Option<Vec<String>>,
    ) -> Result<Subscription, IllegalArgumentException> {
        if let Some(items) = &items {
            check_names(items, "Item")?;
        }
        if let Some(fields) = &fields {
            check_names(fields, "Field")?;
        }
        Ok(Subscription {
            data: Arc::new(Mutex::new(SubscriptionData {
                mode,
                items,
                item_group: None,
                fields,
                field_schema: None,
                data_adapter: None,
                selector: None,
                snapshot: None,
                max_frequency: None,
                buffer_size: None,
                listeners: Vec::new(),
                attachment: None,
                subscribed: false,
                key_position: None,
                command_position: None,
            })),
        })
    }

    fn ensure_inactive(data: &SubscriptionData) -> Result<(), IllegalStateException> {
        if data.attachment.is_some() {
            Err(IllegalStateException::new(
                "Cannot change this parameter while the subscription is active",
            ))
        } else {
            Ok(())
        }
    }

    pub fn add_listener(&self, listener: Box<dyn SubscriptionListener>) {
        let shared: SharedListener = Arc::new(Mutex::new(listener));
        shared.lock().on_listen_start();
        self.data.lock().listeners.push(shared);
    }

    /// Detaches every listener, notifying `on_listen_end`.
    pub fn remove_listeners(&self) {
        let removed = std::mem::take(&mut self.data.lock().listeners);
        for listener in removed {
            listener.lock().on_listen_end();
        }
    }

    pub fn get_mode(&self) -> SubscriptionMode {
        self.data.lock().mode
    }

    pub fn set_items(&self, items: Option<Vec<String>>) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        if let Some(items) = &items {
            check_names(items, "Item")?;
        }
        data.items = items;
        data.item_group = None;
        Ok(())
    }

    pub fn get_items(&self) -> Option<Vec<String>> {
        self.data.lock().items.clone()
    }

    pub fn set_item_group(&self, group: Option<String>) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        data.item_group = group;
        data.items = None;
        Ok(())
    }

    pub fn get_item_group(&self) -> Option<String> {
        self.data.lock().item_group.clone()
    }

    pub fn set_fields(&self, fields: Option<Vec<String>>) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        if let Some(fields) = &fields {
            check_names(fields, "Field")?;
        }
        data.fields = fields;
        data.field_schema = None;
        Ok(())
    }

    pub fn get_fields(&self) -> Option<Vec<String>> {
        self.data.lock().fields.clone()
    }

    pub fn set_field_schema(&self, schema: Option<String>) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        data.field_schema = schema;
        data.fields = None;
        Ok(())
    }

    pub fn get_field_schema(&self) -> Option<String> {
        self.data.lock().field_schema.clone()
    }

    pub fn set_data_adapter(&self, adapter: Option<String>) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        data.data_adapter = adapter;
        Ok(())
    }

    pub fn get_data_adapter(&self) -> Option<String> {
        self.data.lock().data_adapter.clone()
    }

    pub fn set_selector(&self, selector: Option<String>) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        data.selector = selector;
        Ok(())
    }

    pub fn get_selector(&self) -> Option<String> {
        self.data.lock().selector.clone()
    }

    pub fn set_requested_snapshot(
        &self,
        snapshot: Option<Snapshot>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        match (data.mode, snapshot) {
            (SubscriptionMode::Raw, Some(Snapshot::Yes | Snapshot::Number(_))) => {
                return Err(Box::new(IllegalArgumentException::new(
                    "Snapshot is not permitted in RAW mode",
                )));
            }
            (SubscriptionMode::Merge | SubscriptionMode::Command, Some(Snapshot::Number(_))) => {
                return Err(Box::new(IllegalArgumentException::new(
                    "Snapshot length is permitted in DISTINCT mode only",
                )));
            }
            _ => {}
        }
        data.snapshot = snapshot;
        Ok(())
    }

    pub fn get_requested_snapshot(&self) -> Option<Snapshot> {
        self.data.lock().snapshot
    }

    pub fn set_requested_buffer_size(
        &self,
        size: Option<RequestedBufferSize>,
    ) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        Self::ensure_inactive(&data)?;
        data.buffer_size = size;
        Ok(())
    }

    pub fn get_requested_buffer_size(&self) -> Option<RequestedBufferSize> {
        self.data.lock().buffer_size
    }

    /// Changes the requested max frequency. On an active subscription the change is
    /// forwarded to the server, except for switching to or from `Unfiltered`.
    pub fn set_requested_max_frequency(
        &self,
        frequency: Option<RequestedMaxFrequency>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(RequestedMaxFrequency::Limited(f)) = frequency {
            if !f.is_finite() || f <= 0.0 {
                return Err(Box::new(IllegalArgumentException::new(
                    "Max frequency must be a positive number",
                )));
            }
        }
        let reconf = {
            let mut data = self.data.lock();
            if data.attachment.is_some() {
                let unfiltered = |f: Option<RequestedMaxFrequency>| {
                    matches!(f, Some(RequestedMaxFrequency::Unfiltered))
                };
                if unfiltered(frequency) || unfiltered(data.max_frequency) {
                    return Err(Box::new(IllegalStateException::new(
                        "Cannot switch to or from unfiltered dispatching while active",
                    )));
                }
            }
            data.max_frequency = frequency;
            data.attachment
                .as_ref()
                .map(|a| (a.engine.clone(), a.sub_id))
        };
        // the engine lock is never taken while holding the subscription lock
        if let Some((engine, sub_id)) = reconf {
            if let Some(engine) = engine.upgrade() {
                engine.reconfigure_subscription(sub_id);
            }
        }
        Ok(())
    }

    pub fn get_requested_max_frequency(&self) -> Option<RequestedMaxFrequency> {
        self.data.lock().max_frequency
    }

    /// Whether the subscription has been handed to a client and not removed since.
    pub fn is_active(&self) -> bool {
        self.data.lock().attachment.is_some()
    }

    /// Whether the server has confirmed the subscription on the current session.
    pub fn is_subscribed(&self) -> bool {
        self.data.lock().subscribed
    }

    /// 1-based position of the `key` field, known once subscribed in COMMAND mode.
    pub fn get_key_position(&self) -> Option<usize> {
        self.data.lock().key_position
    }

    /// 1-based position of the `command` field, known once subscribed in COMMAND mode.
    pub fn get_command_position(&self) -> Option<usize> {
        self.data.lock().command_position
    }

    pub(crate) fn spec(&self) -> Result<SubscriptionSpec, IllegalArgumentException> {
        let data = self.data.lock();
        let group = match (&data.items, &data.item_group) {
            (Some(items), _) => items.join(" "),
            (None, Some(group)) => group.clone(),
            (None, None) => {
                return Err(IllegalArgumentException::new(
                    "Items or an item group must be set before subscribing",
                ));
            }
        };
        let schema = match (&data.fields, &data.field_schema) {
            (Some(fields), _) => fields.join(" "),
            (None, Some(schema)) => schema.clone(),
            (None, None) => {
                return Err(IllegalArgumentException::new(
                    "Fields or a field schema must be set before subscribing",
                ));
            }
        };
        if data.mode == SubscriptionMode::Command {
            if let Some(fields) = &data.fields {
                if !fields.iter().any(|f| f == "key") || !fields.iter().any(|f| f == "command") {
                    return Err(IllegalArgumentException::new(
                        "COMMAND mode needs both the 'key' and 'command' fields",
                    ));
                }
            }
        }
        Ok(SubscriptionSpec {
            mode: data.mode,
            group,
            schema,
            items: data.items.clone(),
            fields: data.fields.clone(),
            data_adapter: data.data_adapter.clone(),
            selector: data.selector.clone(),
            snapshot: data.snapshot,
            max_frequency: data.max_frequency,
            buffer_size: data.buffer_size,
        })
    }

    pub(crate) fn attach(&self, engine: Weak<Engine>, sub_id: u32) -> Result<(), IllegalStateException> {
        let mut data = self.data.lock();
        if data.attachment.is_some() {
            return Err(IllegalStateException::new("Subscription is already active"));
        }
        data.attachment = Some(Attachment { engine, sub_id });
        Ok(())
    }

    pub(crate) fn detach(&self) {
        let mut data = self.data.lock();
        data.attachment = None;
        data.subscribed = false;
    }

    pub(crate) fn sub_id(&self) -> Option<u32> {
        self.data.lock().attachment.as_ref().map(|a| a.sub_id)
    }

    pub(crate) fn set_subscribed(&self, subscribed: bool, key_cmd: Option<(usize, usize)>) {
        let mut data = self.data.lock();
        data.subscribed = subscribed;
        if let Some((key, command)) = key_cmd {
            data.key_position = Some(key);
            data.command_position = Some(command);
        }
    }

    pub(crate) fn listeners(&self) -> Vec<SharedListener> {
        self.data.lock().listeners.clone()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Subscription")
            .field("mode", &data.mode)
            .field("items", &data.items)
            .field("item_group", &data.item_group)
            .field("fields", &data.fields)
            .field("field_schema", &data.field_schema)
            .field("active", &data.attachment.is_some())
            .field("subscribed", &data.subscribed)
            .finish()
    }
}
