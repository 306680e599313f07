/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::client::ClientStatus;

/// Receives connection-level events of a `LightstreamerClient`.
///
/// Events are delivered in order on the client's callback thread, outside any
/// internal lock, so handlers may call back into the client.
pub trait ClientListener: Send {
    /// First event, received when the listener is added to the client.
    fn on_listen_start(&mut self) {}

    /// Last event, received after the listener is removed.
    fn on_listen_end(&mut self) {}

    /// A read-only property of `ConnectionDetails` or `ConnectionOptions` changed:
    /// one of `sessionId`, `serverInstanceAddress`, `serverSocketName`, `clientIp`,
    /// `realMaxBandwidth`, `keepaliveInterval`, `idleTimeout`, `requestLimit`.
    fn on_property_change(&mut self, _property: &str) {}

    /// The server ended the session with an error. Always preceded by a
    /// `DISCONNECTED` status change.
    fn on_server_error(&mut self, _code: i32, _message: &str) {}

    /// The client status changed. Never fired twice in a row with the same value.
    fn on_status_change(&mut self, _status: ClientStatus) {}
}
