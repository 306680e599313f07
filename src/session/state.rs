/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Region enums of the session engine. The numeric codes are diagnostic only.

use crate::session::selection::{Family, TransportKind};

/// Why the engine is waiting before the next create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryKind {
    WsCreateFailed,
    HttpCreateFailed,
    SessionLost,
    Ttl,
    ServerRequested,
    WsUnavailable,
    Immediate,
}

impl RetryKind {
    pub(crate) fn code(self) -> u16 {
        match self {
            RetryKind::WsCreateFailed => 110,
            RetryKind::HttpCreateFailed => 111,
            RetryKind::SessionLost => 112,
            RetryKind::Ttl => 113,
            RetryKind::ServerRequested => 114,
            RetryKind::WsUnavailable => 115,
            RetryKind::Immediate => 116,
        }
    }

    /// Kinds whose delay comes from the retry counter.
    pub(crate) fn is_counted(self) -> bool {
        matches!(
            self,
            RetryKind::WsCreateFailed | RetryKind::HttpCreateFailed | RetryKind::ServerRequested
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreatePhase {
    /// Socket handshake in progress.
    Opening,
    /// `create_session` sent, waiting for CONOK.
    Sent,
}

/// Binding handshake of a transport, then its push phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bind<T> {
    Opening,
    Sent,
    Bound(T),
}

/// Keepalive watch of a streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Watching,
    /// Keepalive missed, within the stalled grace period.
    Stalling,
    /// Reported as `STALLED`, waiting for the reconnect timeout.
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Poll {
    /// Poll request out, waiting for data or LOOP.
    Waiting,
    /// LOOP received, waiting for the polling interval.
    Pausing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rec {
    Start,
    Sending,
    Checking,
    Waiting,
}

impl Rec {
    fn code(self) -> u16 {
        match self {
            Rec::Start => 1000,
            Rec::Sending => 1001,
            Rec::Checking => 1002,
            Rec::Waiting => 1003,
        }
    }
}

/// Transport region, live while a session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tr {
    /// Between a LOOP with a delay and the next bind.
    Paused,
    /// Session created over WebSocket, streaming on the create socket.
    WsSession(Stream),
    /// Session created over HTTP, waiting for the LOOP that ends stream-sensing.
    HttpSession,
    /// Session created with an unlimited TTL.
    TtlSession,
    WsStreaming(Bind<Stream>),
    WsPolling(Bind<Poll>),
    /// Recovering over the given family.
    Recovering(Rec, Family),
    HttpStreaming(Bind<Stream>),
    HttpPolling(Bind<Poll>),
}

impl Tr {
    pub(crate) fn code(self) -> u16 {
        match self {
            Tr::Paused => 200,
            Tr::WsSession(_) => 210,
            Tr::HttpSession => 220,
            Tr::TtlSession => 230,
            Tr::WsStreaming(_) => 240,
            Tr::WsPolling(_) => 250,
            Tr::Recovering(..) => 260,
            Tr::HttpStreaming(_) | Tr::HttpPolling(_) => 270,
        }
    }

    /// Nested code: `h` for HTTP binds, `rec` while recovering.
    pub(crate) fn sub_code(self) -> Option<u16> {
        match self {
            Tr::HttpStreaming(_) => Some(710),
            Tr::HttpPolling(_) => Some(720),
            Tr::Recovering(rec, _) => Some(rec.code()),
            _ => None,
        }
    }

    /// The transport kind a bind state runs on.
    pub(crate) fn kind(self) -> Option<TransportKind> {
        match self {
            Tr::WsSession(_) | Tr::WsStreaming(_) => Some(TransportKind::WsStreaming),
            Tr::WsPolling(_) => Some(TransportKind::WsPolling),
            Tr::HttpStreaming(_) => Some(TransportKind::HttpStreaming),
            Tr::HttpPolling(_) => Some(TransportKind::HttpPolling),
            _ => None,
        }
    }

    /// Whether data lines received now belong to the live transport.
    pub(crate) fn is_pushing(self) -> bool {
        matches!(
            self,
            Tr::WsSession(_)
                | Tr::HttpSession
                | Tr::TtlSession
                | Tr::WsStreaming(Bind::Bound(_))
                | Tr::WsPolling(Bind::Bound(_))
                | Tr::HttpStreaming(Bind::Bound(_))
                | Tr::HttpPolling(Bind::Bound(_))
        )
    }

    pub(crate) fn stream(self) -> Option<Stream> {
        match self {
            Tr::WsSession(s)
            | Tr::WsStreaming(Bind::Bound(s))
            | Tr::HttpStreaming(Bind::Bound(s)) => Some(s),
            _ => None,
        }
    }

    /// Same streaming state with a new keepalive phase.
    pub(crate) fn with_stream(self, stream: Stream) -> Tr {
        match self {
            Tr::WsSession(_) => Tr::WsSession(stream),
            Tr::WsStreaming(Bind::Bound(_)) => Tr::WsStreaming(Bind::Bound(stream)),
            Tr::HttpStreaming(Bind::Bound(_)) => Tr::HttpStreaming(Bind::Bound(stream)),
            other => other,
        }
    }

    /// Control requests can go out (inline on WS, or on a separate HTTP request).
    pub(crate) fn can_send(self) -> bool {
        self.is_pushing() || matches!(self, Tr::WsPolling(Bind::Sent) | Tr::WsStreaming(Bind::Sent))
    }
}

/// Top-level connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Disconnected,
    RetryWait(RetryKind),
    CreatingWs(CreatePhase),
    CreatingHttp,
    CreatingTtl,
    HasSession(Tr),
}

impl Mode {
    pub(crate) fn code(self) -> u16 {
        match self {
            Mode::Disconnected => 100,
            Mode::RetryWait(kind) => kind.code(),
            Mode::CreatingWs(CreatePhase::Opening) => 121,
            Mode::CreatingWs(CreatePhase::Sent) => 122,
            Mode::CreatingHttp => 130,
            Mode::CreatingTtl => 140,
            Mode::HasSession(_) => 150,
        }
    }

    pub(crate) fn tr(self) -> Option<Tr> {
        match self {
            Mode::HasSession(tr) => Some(tr),
            _ => None,
        }
    }

    pub(crate) fn is_creating(self) -> bool {
        matches!(
            self,
            Mode::CreatingWs(_) | Mode::CreatingHttp | Mode::CreatingTtl
        )
    }
}

/// A request/acknowledge singleton region (`bw`, `swt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Singleton {
    Idle,
    Pending,
    Sent(u64),
}

/// HTTP control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ctrl {
    Idle,
    Sent,
    Backoff,
}

impl Ctrl {
    pub(crate) fn code(self) -> u16 {
        match self {
            Ctrl::Idle => 1100,
            Ctrl::Sent => 1102,
            Ctrl::Backoff => 1103,
        }
    }
}

/// Reverse heartbeat configuration in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rhb {
    Disabled,
    /// Interval requested by the client.
    Local(u64),
    /// Interval capped by the server keepalive.
    Granted(u64),
}

impl Rhb {
    /// Picks the shorter of the requested and granted intervals, or the one that
    /// is set. Zero for both disables reverse heartbeats.
    pub(crate) fn evaluate(requested: u64, granted: u64) -> Rhb {
        match (requested, granted) {
            (0, 0) => Rhb::Disabled,
            (0, g) => Rhb::Granted(g),
            (r, 0) => Rhb::Local(r),
            (r, g) if g < r => Rhb::Granted(g),
            (r, _) => Rhb::Local(r),
        }
    }

    pub(crate) fn interval(self) -> Option<u64> {
        match self {
            Rhb::Disabled => None,
            Rhb::Local(i) | Rhb::Granted(i) => Some(i),
        }
    }

    pub(crate) fn code(self) -> u16 {
        match self {
            Rhb::Disabled => 321,
            Rhb::Local(_) => 322,
            Rhb::Granted(_) => 323,
        }
    }
}

/// Fields negotiated by the CONOK that created the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionInfo {
    pub id: String,
    pub request_limit: usize,
    /// Keepalive interval on streaming binds, idle timeout on polling binds.
    pub keepalive_ms: u64,
    pub control_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Mode::Disconnected.code(), 100);
        assert_eq!(Mode::RetryWait(RetryKind::WsUnavailable).code(), 115);
        assert_eq!(Mode::CreatingWs(CreatePhase::Sent).code(), 122);
        let tr = Tr::HttpPolling(Bind::Bound(Poll::Waiting));
        assert_eq!(Mode::HasSession(tr).code(), 150);
        assert_eq!((tr.code(), tr.sub_code()), (270, Some(720)));
        assert_eq!(Tr::Recovering(Rec::Waiting, Family::Http).sub_code(), Some(1003));
    }

    #[test]
    fn test_pushing_states() {
        assert!(Tr::WsSession(Stream::Stalled).is_pushing());
        assert!(Tr::HttpSession.is_pushing());
        assert!(!Tr::Paused.is_pushing());
        assert!(!Tr::WsStreaming(Bind::Sent).is_pushing());
        assert!(Tr::WsStreaming(Bind::Sent).can_send());
        assert!(!Tr::HttpStreaming(Bind::Sent).can_send());
        assert!(!Tr::Recovering(Rec::Sending, Family::Ws).is_pushing());
    }

    #[test]
    fn test_stream_phase_update() {
        let tr = Tr::HttpStreaming(Bind::Bound(Stream::Watching));
        assert_eq!(
            tr.with_stream(Stream::Stalled),
            Tr::HttpStreaming(Bind::Bound(Stream::Stalled))
        );
        assert_eq!(Tr::Paused.with_stream(Stream::Stalled), Tr::Paused);
        assert_eq!(tr.kind(), Some(TransportKind::HttpStreaming));
    }

    #[test]
    fn test_reverse_heartbeat_interval() {
        assert_eq!(Rhb::evaluate(0, 0), Rhb::Disabled);
        assert_eq!(Rhb::evaluate(0, 5000), Rhb::Granted(5000));
        assert_eq!(Rhb::evaluate(0, 5000).interval(), Some(5000));
        assert_eq!(Rhb::evaluate(3000, 0), Rhb::Local(3000));
        assert_eq!(Rhb::evaluate(3000, 2000), Rhb::Granted(2000));
        assert_eq!(Rhb::evaluate(3000, 5000), Rhb::Local(3000));
        assert_eq!(Rhb::Granted(2000).interval(), Some(2000));
        assert_eq!(Rhb::Disabled.code(), 321);
    }
}
