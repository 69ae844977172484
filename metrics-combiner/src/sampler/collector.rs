use std::{
    io,
    process,
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use super::Sampler;
use crate::{
    combiner::{Element, MutexElement},
    data::Reducer,
    ops::Operator,
};

/// Samplers waiting to be picked up by the collector.
#[derive(Clone, Debug, Default)]
pub struct SamplerList(Vec<Weak<dyn Sampler>>);

impl SamplerList {
    /// Number of samplers in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Weak<dyn Sampler>> for SamplerList {
    fn from(sampler: Weak<dyn Sampler>) -> Self {
        Self(vec![sampler])
    }
}

impl Element for SamplerList {
    type Container = MutexElement<Self>;
}

/// Concatenates sampler lists.
///
/// Registering a sampler only touches the registering thread's agent, and the collector drains
/// every thread's registrations in one go.
#[derive(Clone, Copy, Debug, Default)]
pub struct CombineSampler;

impl Operator<SamplerList> for CombineSampler {
    fn identity(&self) -> SamplerList {
        SamplerList::default()
    }

    fn apply(&self, acc: &mut SamplerList, value: &SamplerList) {
        acc.0.extend(value.0.iter().cloned());
    }
}

struct Shared {
    pending: Reducer<SamplerList, CombineSampler>,
    live: Mutex<Vec<Weak<dyn Sampler>>>,
    stopped: Mutex<bool>,
    wake: Condvar,
    interval: Duration,
}

impl Shared {
    /// Runs one collection round, returning the number of live samplers.
    fn sweep(&self) -> usize {
        let scheduled = self.pending.reset();
        let added = scheduled.len();

        let mut live = self.live.lock();
        live.extend(scheduled.0);
        let before = live.len();

        live.retain(|sampler| match sampler.upgrade() {
            Some(sampler) => {
                sampler.take_sample();
                true
            }
            None => false,
        });

        let reclaimed = before - live.len();
        if added > 0 || reclaimed > 0 {
            debug!(added, reclaimed, live = live.len(), "updated sampler list");
        }
        live.len()
    }

    /// Sleeps until `deadline` or until stopped, returning whether the collector was stopped.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}

fn run(shared: Arc<Shared>) {
    debug!(interval = ?shared.interval, "sampler collector started");

    let mut next_round = Instant::now();
    let mut consecutive_busy = 0u32;
    loop {
        next_round += shared.interval;
        let now = Instant::now();
        if now < next_round {
            consecutive_busy = 0;
            if shared.wait_until(next_round) {
                break;
            }
        } else {
            consecutive_busy += 1;
            if consecutive_busy >= 2 {
                warn!(
                    rounds = consecutive_busy,
                    interval = ?shared.interval,
                    "sampler collector is too busy to sleep between rounds"
                );
                consecutive_busy = 0;
            }
            // Don't try to catch up on missed rounds.
            next_round = now;
            if shared.is_stopped() {
                break;
            }
        }

        let live = shared.sweep();
        trace!(live, "sampler collector round finished");
    }

    debug!("sampler collector stopped");
}

struct Worker {
    pid: u32,
    handle: JoinHandle<()>,
}

/// Drives every scheduled [`Sampler`] from a single background thread.
pub(crate) struct Collector {
    shared: Arc<Shared>,
    thread_name: String,
    worker: Mutex<Option<Worker>>,
}

impl Collector {
    pub fn new(interval: Duration, thread_name: String) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Reducer::new(),
                live: Mutex::new(Vec::new()),
                stopped: Mutex::new(false),
                wake: Condvar::new(),
                interval,
            }),
            thread_name,
            worker: Mutex::new(None),
        }
    }

    /// Spawns the collector thread unless it is already running in this process.
    ///
    /// Threads do not survive `fork`, so a collector inherited by a child process is respawned
    /// here.  Samplers scheduled before the fork keep being sampled.
    pub fn ensure_running(&self) -> io::Result<()> {
        self.ensure_running_in(process::id())
    }

    fn ensure_running_in(&self, pid: u32) -> io::Result<()> {
        let mut worker = self.worker.lock();
        match worker.as_ref() {
            Some(current) if current.pid == pid => return Ok(()),
            Some(current) => {
                debug!(parent_pid = current.pid, pid, "respawning sampler collector after fork");
            }
            None => {}
        }

        if let Some(stale) = worker.take() {
            // The thread behind this handle only exists in the parent process.
            std::mem::forget(stale.handle);
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run(shared))?;
        *worker = Some(Worker { pid, handle });
        Ok(())
    }

    /// Registers `sampler`.  It is picked up on the next collection round.
    pub fn schedule(&self, sampler: Weak<dyn Sampler>) {
        self.shared.pending.record(SamplerList::from(sampler));
        self.recover();
    }

    /// Respawns the collector thread if it is not running in this process, logging failures.
    ///
    /// Called from every read of sampled data, so a forked child resumes sampling on its own.
    pub fn recover(&self) {
        if let Err(e) = self.ensure_running() {
            error!(error = %e, "failed to spawn sampler collector; windowed metrics will not update");
        }
    }

    /// Runs a collection round on the calling thread.
    #[cfg(test)]
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    #[cfg(test)]
    fn worker_thread(&self) -> Option<(u32, thread::ThreadId)> {
        self.worker.lock().as_ref().map(|w| (w.pid, w.handle.thread().id()))
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();

        let Some(worker) = self.worker.get_mut().take() else {
            return;
        };
        if worker.pid != process::id() {
            std::mem::forget(worker.handle);
            return;
        }
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }
        if worker.handle.join().is_err() {
            error!("sampler collector thread panicked");
        }
    }
}
