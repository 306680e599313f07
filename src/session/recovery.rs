/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Session recovery: after a transport failure the client binds again with
//! `LS_recovery_from` and the server replays what the client missed.

use super::bind::polling_kind;
use super::create::CreateStyle;
use super::machine::ClientMachine;
use super::scheduler::TimerId;
use super::state::{Rec, RetryKind, Tr};
use crate::client::{ClientStatus, DisconnectionType};
use crate::protocol::RequestBuilder;
use tracing::{debug, info, warn};

/// Wait before the next recovery attempt, or `None` once the attempt would
/// start after the recovery window closes.
///
/// Attempts are spaced `retry_delay` apart from the start of the previous one.
pub(super) fn recovery_wait(
    connect_ts: u64,
    recover_ts: u64,
    retry_delay: u64,
    timeout: u64,
    now: u64,
) -> Option<u64> {
    let next = now.max(connect_ts + retry_delay);
    if next < recover_ts + timeout {
        Some(next - now)
    } else {
        None
    }
}

impl ClientMachine {
    /// The live transport broke: recover the session when possible, else
    /// create a new one.
    pub(super) fn session_broken(&mut self) {
        self.cancel_push_timers();
        self.cancel(TimerId::TransportTimeout);
        self.dispose_ws();
        self.dispose_http();
        let timeout = self.options.get_session_recovery_timeout();
        if timeout > 0 && self.session.is_some() {
            info!("Transport lost, recovering the session for up to {} ms", timeout);
            self.recover_ts = self.now();
            self.set_status(ClientStatus::Disconnected(DisconnectionType::TryingRecovery));
            self.recovery_attempt();
        } else {
            warn!("Transport lost, the session cannot be recovered");
            self.session_lost(RetryKind::SessionLost);
        }
    }

    pub(super) fn recovery_attempt(&mut self) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            self.session_lost(RetryKind::SessionLost);
            return;
        };
        let Some(family) = self
            .selection
            .best_for_creating(self.options.get_forced_transport())
        else {
            self.terminate_unavailable();
            return;
        };
        debug!("Recovery attempt from prog {}", self.client_prog);
        let request = RequestBuilder::new()
            .param("LS_session", session_id)
            .param("LS_recovery_from", self.client_prog);
        let params = self
            .connection_params(request, CreateStyle::Sensing)
            .param("LS_cause", "recovery")
            .encode();
        self.send_bind(polling_kind(family), params, Some(family));
    }

    pub(super) fn recovery_failed(&mut self) {
        let Some(Tr::Recovering(_, family)) = self.mode.tr() else {
            return;
        };
        self.dispose_ws();
        self.dispose_http();
        self.set_tr(Tr::Recovering(Rec::Checking, family));
        let wait = recovery_wait(
            self.connect_ts,
            self.recover_ts,
            self.retry.current(),
            self.options.get_session_recovery_timeout(),
            self.now(),
        );
        match wait {
            Some(delay) => {
                debug!("Recovery failed, next attempt in {} ms", delay);
                self.set_tr(Tr::Recovering(Rec::Waiting, family));
                self.schedule(TimerId::RecoveryWait, delay);
            }
            None => {
                warn!("Session recovery window expired");
                self.session_lost(RetryKind::SessionLost);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_wait_spacing() {
        // attempt started at 1000, failed at 1200: wait for the rest of the delay
        assert_eq!(recovery_wait(1000, 0, 1000, 5000, 1200), Some(800));
        // failed after the delay elapsed: retry at once
        assert_eq!(recovery_wait(1000, 0, 1000, 5000, 2500), Some(0));
    }

    #[test]
    fn test_recovery_window_closes() {
        let (recover_ts, delay, timeout) = (0, 1000, 5000);
        let mut connect_ts = 0;
        let mut now = 1000;
        let mut retries = 0;
        while let Some(wait) = recovery_wait(connect_ts, recover_ts, delay, timeout, now) {
            retries += 1;
            connect_ts = now + wait;
            now = connect_ts + delay;
        }
        assert_eq!(retries, 4);
        assert_eq!(now, 5000);
    }
}
