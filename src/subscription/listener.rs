// Copyright (C) 2024 Joaquín Béjar García
// Portions of this file are derived from lightstreamer-client
// Copyright (C) 2024 Daniel López Azaña
// Original project: https://github.com/daniloaz/lightstreamer-client
//
// This file is part of lightstreamer-rs.
//
// lightstreamer-rs is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// lightstreamer-rs is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with lightstreamer-rs. If not, see <https://www.gnu.org/licenses/>.

use crate::subscription::ItemUpdate;
use tokio::sync::mpsc;

/// Receives the events of one `Subscription`.
///
/// Every method has an empty default, so implementors override only what they need.
/// Events are delivered on the client's callback thread, in the order the engine
/// produced them, never while the engine is locked: calling back into the client
/// from a handler is allowed. By the time an event arrives the client may already
/// have moved on.
pub trait SubscriptionListener: Send {
    /// The server asked to clear the snapshot of an item: in COMMAND mode every key is
    /// gone, in DISTINCT mode previous updates are obsolete.
    ///
    /// `item_name` is `None` for item-group subscriptions; `item_pos` is 1-based.
    fn on_clear_snapshot(&mut self, _item_name: Option<&str>, _item_pos: usize) {}

    /// Updates of a second-level item were lost (two-level COMMAND subscriptions).
    fn on_command_second_level_item_lost_updates(&mut self, _lost_updates: u32, _key: &str) {}

    /// A second-level subscription failed (two-level COMMAND subscriptions).
    fn on_command_second_level_subscription_error(
        &mut self,
        _code: i32,
        _message: Option<&str>,
        _key: &str,
    ) {
    }

    /// The snapshot of an item is complete; following updates are real time.
    fn on_end_of_snapshot(&mut self, _item_name: Option<&str>, _item_pos: usize) {}

    /// The server dropped `lost_updates` updates of an item because its buffer was full.
    fn on_item_lost_updates(
        &mut self,
        _item_name: Option<&str>,
        _item_pos: usize,
        _lost_updates: u32,
    ) {
    }

    /// A new update for an item.
    fn on_item_update(&self, _update: &ItemUpdate) {}

    /// Last event received after the listener is removed from its subscription.
    fn on_listen_end(&mut self) {}

    /// First event, received when the listener is added to a subscription.
    fn on_listen_start(&mut self) {}

    /// Maximum update frequency granted by the server, in updates per second;
    /// `None` stands for unlimited.
    fn on_real_max_frequency(&mut self, _frequency: Option<f64>) {}

    /// The server accepted the subscription. It is fired again after every new
    /// session, always preceded by `on_unsubscription`.
    fn on_subscription(&mut self) {}

    /// The server refused the subscription; it is no longer active. The code and
    /// message come from the server's `REQERR`.
    fn on_subscription_error(&mut self, _code: i32, _message: Option<&str>) {}

    /// The subscription ended on the server, because of an unsubscribe call or
    /// because the session closed.
    fn on_unsubscription(&mut self) {}
}

/// A [`SubscriptionListener`] that forwards every item update to a tokio channel.
///
/// # Examples
///
/// ```ignore
/// let (listener, mut rx) = ChannelSubscriptionListener::create_channel();
/// subscription.add_listener(Box::new(listener));
///
/// tokio::spawn(async move {
///     while let Some(update) = rx.recv().await {
///         println!("Received update: {:?}", update);
///     }
/// });
/// ```
pub struct ChannelSubscriptionListener {
    sender: mpsc::UnboundedSender<ItemUpdate>,
}

impl ChannelSubscriptionListener {
    pub fn new(sender: mpsc::UnboundedSender<ItemUpdate>) -> Self {
        Self { sender }
    }

    /// Creates the listener together with the receiving end of its channel.
    pub fn create_channel() -> (Self, mpsc::UnboundedReceiver<ItemUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl SubscriptionListener for ChannelSubscriptionListener {
    fn on_item_update(&self, update: &ItemUpdate) {
        // a dropped receiver only means nobody is listening any more
        let _ = self.sender.send(update.clone());
    }
}
