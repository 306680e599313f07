/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

/// Receives the outcome of a message sent with `LightstreamerClient::send_message`.
///
/// Exactly one of the methods is called for each message, on the callback thread.
pub trait ClientMessageListener: Send {
    /// The message was not processed because the session ended first.
    /// `sent_on_network` tells whether it had already been handed to the transport.
    fn on_abort(&mut self, _original_message: &str, _sent_on_network: bool) {}

    /// The Metadata Adapter refused the message with a non-positive `code`.
    fn on_deny(&mut self, _original_message: &str, _code: i32, _error: &str) {}

    /// The server gave up waiting for earlier messages of the same sequence.
    fn on_discarded(&mut self, _original_message: &str) {}

    /// The message could not be processed for any other reason.
    fn on_error(&mut self, _original_message: &str) {}

    /// The message was processed; `response` is the adapter's reply, possibly empty.
    fn on_processed(&mut self, _original_message: &str, _response: &str) {}
}
