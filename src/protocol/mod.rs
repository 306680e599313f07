/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! TLCP wire format: inbound line parsing, outbound request encoding and batching,
//! and decoding of the field values carried by `U` lines.

mod line;
mod request;
mod values;

pub use line::RealBandwidth;
pub(crate) use line::{MaxFrequency, ServerLine};
pub(crate) use request::{RequestBuilder, batch_requests};
pub(crate) use values::apply_update;

/// Protocol version spoken by this client.
pub(crate) const TLCP_VERSION: &str = "TLCP-2.5.0";
/// WebSocket sub-protocol announced when opening a socket.
pub(crate) const WS_PROTOCOL: &str = "TLCP-2.5.0.lightstreamer.com";
/// Client identifier sent as `LS_cid`.
pub(crate) const CLIENT_CID: &str = "mgQkwtwdysogQz2BJ4Ji kOj2Bg";
/// Sequence name used for messages sent without ordering constraints.
pub const UNORDERED_MESSAGES: &str = "UNORDERED_MESSAGES";
