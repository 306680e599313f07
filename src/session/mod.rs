/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! The session engine: one state machine per client, split by region.
//!
//! Every entry point (public call, transport callback, timer) locks the machine,
//! runs one event to completion, flushes pending requests and unlocks. Listener
//! notifications are queued while locked and delivered afterwards.

mod bind;
mod control;
mod create;
mod inbound;
mod machine;
mod recovery;
mod retry;
mod scheduler;
mod selection;
mod slowing;
mod state;

pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TimerTask, TokioScheduler};

pub(crate) use machine::ClientMachine;
pub(crate) use scheduler::TimerId;

use crate::client::CallbackQueue;
use crate::connection::{ConnectionDetails, ConnectionOptions};
use crate::transport::{TransportFactory, TransportSink};
use parking_lot::Mutex;
use std::sync::Arc;

/// Who is waiting for the `REQOK`/`REQERR` of a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestOwner {
    Switch,
    Constrain,
    SubscriptionAdd(u32),
    SubscriptionDelete(u32),
    SubscriptionReconf(u32),
    Message(u64),
    MpnRegister,
    MpnActivate(u32),
    MpnDeactivate(u32),
    MpnReconf(u32),
    MpnFilter,
    MpnBadge,
    Destroy,
}

/// An encoded sub-request ready for batching.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outgoing {
    pub owner: RequestOwner,
    pub req_id: u64,
    pub body: String,
}

/// Lock around the [`ClientMachine`] of one client.
pub(crate) struct Engine {
    machine: Mutex<ClientMachine>,
}

impl Engine {
    pub(crate) fn new(
        details: ConnectionDetails,
        options: ConnectionOptions,
        scheduler: Arc<dyn Scheduler>,
        factory: Arc<dyn TransportFactory>,
        queue: CallbackQueue,
    ) -> Arc<Engine> {
        Arc::new_cyclic(|me| Engine {
            machine: Mutex::new(ClientMachine::new(
                me.clone(),
                details,
                options,
                scheduler,
                factory,
                queue,
            )),
        })
    }

    /// Runs `f` on the locked machine, then sends whatever became pending.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut ClientMachine) -> R) -> R {
        let mut machine = self.machine.lock();
        let result = f(&mut machine);
        machine.flush();
        result
    }

    pub(crate) fn on_timer(&self, id: TimerId, generation: u64) {
        self.with(|m| m.on_timer(id, generation));
    }

    pub(crate) fn reconfigure_subscription(&self, sub_id: u32) {
        self.with(|m| m.reconfigure_subscription(sub_id));
    }

    pub(crate) fn reconfigure_mpn_subscription(&self, sub_id: u32) {
        self.with(|m| m.reconfigure_mpn_subscription(sub_id));
    }
}

impl TransportSink for Engine {
    fn transport_open(&self, token: u64) {
        self.with(|m| m.on_transport_open(token));
    }

    fn transport_lines(&self, token: u64, lines: &[&str]) {
        self.with(|m| m.on_transport_lines(token, lines));
    }

    fn transport_error(&self, token: u64, reason: &str) {
        self.with(|m| m.on_transport_error(token, reason));
    }

    fn transport_done(&self, token: u64) {
        self.with(|m| m.on_transport_done(token));
    }
}
