/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Mobile push notifications: devices, MPN subscriptions and their listeners.

mod device;
mod listener;
pub(crate) mod manager;
mod subscription;

pub use device::{MpnDevice, MpnDeviceStatus, MpnPlatform};
pub use listener::{MpnDeviceListener, MpnSubscriptionListener};
pub use subscription::{MpnSubscription, MpnSubscriptionFilter, MpnSubscriptionStatus};

pub(crate) use manager::MpnTier;
