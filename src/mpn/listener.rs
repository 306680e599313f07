/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::mpn::{MpnDeviceStatus, MpnSubscriptionStatus};

/// Events of an [`MpnDevice`](crate::mpn::MpnDevice). Every method has an empty
/// default, implement only what you need.
pub trait MpnDeviceListener: Send {
    /// The listener was added to a device.
    fn on_listen_start(&mut self) {}

    /// The listener was removed from a device.
    fn on_listen_end(&mut self) {}

    /// The server registered (or restored, or refreshed) the device.
    fn on_registered(&mut self) {}

    /// The server suspended the device, usually after a rejected notification.
    fn on_suspended(&mut self) {}

    /// A suspended device became active again.
    fn on_resumed(&mut self) {}

    /// New device status, with its server timestamp in milliseconds.
    fn on_status_changed(&mut self, _status: MpnDeviceStatus, _timestamp: u64) {}

    /// The registration request was refused.
    fn on_registration_failed(&mut self, _code: i32, _message: &str) {}

    /// The list of MPN subscriptions of the device changed on the server.
    fn on_subscriptions_updated(&mut self) {}

    /// The application icon badge was reset.
    fn on_badge_reset(&mut self) {}

    /// The badge reset request was refused.
    fn on_badge_reset_failed(&mut self, _code: i32, _message: &str) {}
}

/// Events of an [`MpnSubscription`](crate::mpn::MpnSubscription).
pub trait MpnSubscriptionListener: Send {
    fn on_listen_start(&mut self) {}

    fn on_listen_end(&mut self) {}

    /// The server activated the subscription.
    fn on_subscription(&mut self) {}

    /// The subscription was deactivated, by this client or elsewhere.
    fn on_unsubscription(&mut self) {}

    fn on_subscription_error(&mut self, _code: i32, _message: &str) {}

    fn on_unsubscription_error(&mut self, _code: i32, _message: &str) {}

    /// A change of `property` while active was refused.
    fn on_modification_error(&mut self, _code: i32, _message: &str, _property: &str) {}

    /// A change of `property` while active was applied by the server.
    fn on_property_changed(&mut self, _property: &str) {}

    fn on_status_changed(&mut self, _status: MpnSubscriptionStatus) {}
}
