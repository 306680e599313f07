/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

mod builder;
mod dispatch;
mod implementation;
mod listener;
mod message_listener;
mod model;

pub use builder::ClientConfig;
pub use dispatch::CallbackQueue;
pub use implementation::LightstreamerClient;
pub use listener::ClientListener;
pub use message_listener::ClientMessageListener;
pub use model::{ClientStatus, ConnectionType, DisconnectionType, Transport};

pub(crate) type SharedClientListener = std::sync::Arc<parking_lot::Mutex<Box<dyn ClientListener>>>;
