/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Timer facade used by the session engine.
//!
//! The engine only needs three things from a timer primitive: a monotonic clock in
//! milliseconds, single-shot delayed tasks and best-effort cancellation. Tasks must
//! never run synchronously inside `schedule`.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// A delayed task.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled task for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

pub trait Scheduler: Send + Sync {
    /// Milliseconds elapsed on a monotonic clock.
    fn now(&self) -> u64;
    /// Runs `task` once after `delay_ms`.
    fn schedule(&self, delay_ms: u64, task: TimerTask) -> TimerHandle;
    /// Cancels a task if it has not run yet.
    fn cancel(&self, handle: TimerHandle);
}

/// Scheduler backed by a tokio runtime.
pub struct TokioScheduler {
    runtime: Handle,
    origin: Instant,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            origin: Instant::now(),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn schedule(&self, delay_ms: u64, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tasks = Arc::clone(&self.tasks);
        // Hold the table lock across spawn so the task cannot remove its entry first.
        let mut table = self.tasks.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            tasks.lock().remove(&handle);
            task();
        });
        table.insert(handle, join.abort_handle());
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = self.tasks.lock().remove(&handle) {
            abort.abort();
        }
    }
}

#[derive(Default)]
struct ManualState {
    now: u64,
    next_id: u64,
    queue: BTreeMap<(u64, u64), TimerTask>,
}

/// Deterministic scheduler driven by a virtual clock.
///
/// Nothing runs until [`ManualScheduler::advance`] moves the clock; due tasks then
/// run in due-time order on the calling thread.
#[derive(Default, Clone)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `ms`, running every task that falls due.
    pub fn advance(&self, ms: u64) {
        let target = self.state.lock().now + ms;
        loop {
            let task = {
                let mut state = self.state.lock();
                let due = state.queue.keys().next().copied().filter(|(at, _)| *at <= target);
                match due {
                    Some(key) => {
                        state.now = state.now.max(key.0);
                        state.queue.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Runs the tasks that are already due, without moving the clock.
    pub fn run_due(&self) {
        self.advance(0);
    }

    /// Number of tasks still waiting.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> u64 {
        self.state.lock().now
    }

    fn schedule(&self, delay_ms: u64, task: TimerTask) -> TimerHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let at = state.now + delay_ms;
        state.queue.insert((at, id), task);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.state.lock().queue.retain(|(_, id), _| *id != handle.0);
    }
}

/// Purpose of an engine timer. At most one timer per purpose is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerId {
    TransportTimeout,
    RetryWait,
    Keepalive,
    Stalled,
    Reconnect,
    PollingIdle,
    PollingPause,
    RebindPause,
    RecoveryWait,
    ReverseHeartbeat,
    ControlTimeout,
    ControlBackoff,
}

/// Table of the live named timers and their generations.
///
/// A fired timer is honoured only if its generation is still the current one for its
/// name, since a cancelled task may already be on its way.
#[derive(Default)]
pub(crate) struct Timers {
    live: HashMap<TimerId, (u64, TimerHandle)>,
    generation: u64,
}

impl Timers {
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Records the live timer for `id`, returning the one it replaces.
    pub(crate) fn insert(
        &mut self,
        id: TimerId,
        generation: u64,
        handle: TimerHandle,
    ) -> Option<TimerHandle> {
        self.live.insert(id, (generation, handle)).map(|(_, h)| h)
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> Option<TimerHandle> {
        self.live.remove(&id).map(|(_, h)| h)
    }

    /// Consumes the entry if `generation` is current.
    pub(crate) fn fire(&mut self, id: TimerId, generation: u64) -> bool {
        match self.live.get(&id) {
            Some((current, _)) if *current == generation => {
                self.live.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_live(&self, id: TimerId) -> bool {
        self.live.contains_key(&id)
    }

    pub(crate) fn drain(&mut self) -> Vec<TimerHandle> {
        self.live.drain().map(|(_, (_, h))| h).collect()
    }
}
