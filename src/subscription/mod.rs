/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/
mod listener;
mod model;

mod item_update;
pub(crate) mod manager;

pub use item_update::ItemUpdate;
pub use listener::{ChannelSubscriptionListener, SubscriptionListener};
pub use model::{
    RequestedBufferSize, RequestedMaxFrequency, Snapshot, Subscription, SubscriptionMode,
};
pub(crate) use model::SubscriptionSpec;
