/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::client::Transport;
use std::collections::HashSet;
use std::fmt;

/// Concrete way of carrying a bound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TransportKind {
    WsStreaming,
    HttpStreaming,
    WsPolling,
    HttpPolling,
}

/// Socket family used to create a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Ws,
    Http,
}

const PRIORITY: [TransportKind; 4] = [
    TransportKind::WsStreaming,
    TransportKind::HttpStreaming,
    TransportKind::WsPolling,
    TransportKind::HttpPolling,
];

impl TransportKind {
    pub(crate) fn family(self) -> Family {
        match self {
            TransportKind::WsStreaming | TransportKind::WsPolling => Family::Ws,
            TransportKind::HttpStreaming | TransportKind::HttpPolling => Family::Http,
        }
    }

    pub(crate) fn is_streaming(self) -> bool {
        matches!(self, TransportKind::WsStreaming | TransportKind::HttpStreaming)
    }

    fn admitted_by(self, forced: Option<Transport>) -> bool {
        match forced {
            None => true,
            Some(Transport::Ws) => self.family() == Family::Ws,
            Some(Transport::Http) => self.family() == Family::Http,
            Some(Transport::WsStreaming) => self == TransportKind::WsStreaming,
            Some(Transport::HttpStreaming) => self == TransportKind::HttpStreaming,
            Some(Transport::WsPolling) => self == TransportKind::WsPolling,
            Some(Transport::HttpPolling) => self == TransportKind::HttpPolling,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportKind::WsStreaming => "WS-STREAMING",
            TransportKind::HttpStreaming => "HTTP-STREAMING",
            TransportKind::WsPolling => "WS-POLLING",
            TransportKind::HttpPolling => "HTTP-POLLING",
        };
        f.write_str(text)
    }
}

/// Whether a forced transport leaves only WebSocket candidates.
pub(crate) fn is_ws_only(forced: Option<Transport>) -> bool {
    matches!(
        forced,
        Some(Transport::Ws) | Some(Transport::WsStreaming) | Some(Transport::WsPolling)
    )
}

/// Runtime exclusions accumulated from failures.
///
/// Disabled transports stay excluded until [`TransportSelection::enable_all`];
/// suspended ones until [`TransportSelection::lift_suspension`].
#[derive(Debug, Default, Clone)]
pub(crate) struct TransportSelection {
    disabled: HashSet<TransportKind>,
    suspended: HashSet<TransportKind>,
}

impl TransportSelection {
    pub(crate) fn best_for_binding(&self, forced: Option<Transport>) -> Option<TransportKind> {
        PRIORITY.into_iter().find(|kind| {
            kind.admitted_by(forced) && !self.disabled.contains(kind) && !self.suspended.contains(kind)
        })
    }

    pub(crate) fn best_for_creating(&self, forced: Option<Transport>) -> Option<Family> {
        self.best_for_binding(forced).map(TransportKind::family)
    }

    pub(crate) fn disable(&mut self, kinds: &[TransportKind]) {
        self.disabled.extend(kinds.iter().copied());
    }

    pub(crate) fn disable_ws(&mut self) {
        self.disable(&[TransportKind::WsStreaming, TransportKind::WsPolling]);
    }

    pub(crate) fn disable_streaming(&mut self) {
        self.disable(&[TransportKind::WsStreaming, TransportKind::HttpStreaming]);
    }

    pub(crate) fn suspend_ws(&mut self) {
        self.suspended
            .extend([TransportKind::WsStreaming, TransportKind::WsPolling]);
    }

    pub(crate) fn lift_suspension(&mut self) {
        self.suspended.clear();
    }

    pub(crate) fn enable_all(&mut self) {
        self.disabled.clear();
        self.suspended.clear();
    }

    #[cfg(test)]
    fn with(disabled: &[TransportKind], suspended: &[TransportKind]) -> Self {
        Self {
            disabled: disabled.iter().copied().collect(),
            suspended: suspended.iter().copied().collect(),
        }
    }
}
