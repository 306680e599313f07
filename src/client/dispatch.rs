/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Ordered delivery of listener notifications outside the engine lock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Delivery {
    Worker(mpsc::UnboundedSender<Job>),
    Collecting(Mutex<VecDeque<Job>>),
}

/// FIFO of listener notifications.
///
/// The engine posts jobs while it holds its lock; they run later, one at a time and
/// in posting order, either on a dedicated worker thread or, for a collecting queue,
/// on whichever thread calls [`CallbackQueue::drain`].
#[derive(Clone)]
pub struct CallbackQueue {
    delivery: Arc<Delivery>,
}

impl CallbackQueue {
    /// Starts a worker thread that runs jobs as they arrive. The thread ends when
    /// the last clone of the queue is dropped.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let spawned = thread::Builder::new()
            .name("lightstreamer-callbacks".to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                trace!("Callback worker stopped");
            });
        if let Err(e) = spawned {
            error!("Cannot start the callback worker: {}", e);
        }
        Self {
            delivery: Arc::new(Delivery::Worker(tx)),
        }
    }

    /// A queue that only buffers jobs until [`CallbackQueue::drain`] is called.
    pub fn collecting() -> Self {
        Self {
            delivery: Arc::new(Delivery::Collecting(Mutex::new(VecDeque::new()))),
        }
    }

    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) {
        match self.delivery.as_ref() {
            Delivery::Worker(tx) => {
                if tx.send(Box::new(job)).is_err() {
                    error!("Callback worker is gone, notification dropped");
                }
            }
            Delivery::Collecting(jobs) => jobs.lock().push_back(Box::new(job)),
        }
    }

    /// Posts one job that runs `event` on each listener, in registration order.
    pub(crate) fn post_each<L>(
        &self,
        listeners: Vec<Arc<Mutex<Box<L>>>>,
        event: impl Fn(&mut L) + Send + 'static,
    ) where
        L: ?Sized + Send + 'static,
    {
        if listeners.is_empty() {
            return;
        }
        self.post(move || {
            for listener in &listeners {
                let mut guard = listener.lock();
                event(guard.as_mut());
            }
        });
    }

    /// Runs buffered jobs on the calling thread, including jobs they post in turn.
    /// Returns how many ran. Does nothing for a worker-backed queue.
    pub fn drain(&self) -> usize {
        let Delivery::Collecting(jobs) = self.delivery.as_ref() else {
            return 0;
        };
        let mut ran = 0;
        loop {
            let next = jobs.lock().pop_front();
            match next {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}
