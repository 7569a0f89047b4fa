//! In-memory registry of virtual services.
//!
//! Each entry owns the sending half of its service's work queue.  The
//! registry only ever touches the map under its lock and never awaits, so
//! it can be used from the converge driver and the workers alike.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::converge::Work;
use crate::types::TaskSet;
use crate::virtual_service::{vs_name, VirtualService};

pub type WorkQueue = mpsc::Sender<Work>;

/// Everything a new worker needs to start draining a queue.
pub struct WorkerSeed {
    pub vs: Arc<VirtualService>,
    pub rx: mpsc::Receiver<Work>,
    /// Completion of a deletion this worker must wait for first.
    pub after: Option<watch::Receiver<bool>>,
}

pub struct Registration {
    pub vs: Arc<VirtualService>,
    pub existed: bool,
    pub queue: WorkQueue,
    /// Present when the entry is new and needs a worker.
    pub worker: Option<WorkerSeed>,
}

pub struct Deletion {
    pub vs: Arc<VirtualService>,
    /// Last sender of the queue.  Dropping it closes the queue.
    pub queue: WorkQueue,
    pub done: watch::Sender<bool>,
    pub worker: Option<WorkerSeed>,
}

/// Work still owed by an entry, used to drain the registry.
pub enum Pending {
    Active(WorkQueue),
    Deleting(watch::Receiver<bool>),
}

enum EntryState {
    Active(WorkQueue),
    Deleting(watch::Receiver<bool>),
}

struct Entry {
    vs: Arc<VirtualService>,
    state: EntryState,
}

pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
    queue_depth: usize,
}

impl Registry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            queue_depth: queue_depth.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The active virtual service for `service`.
    pub fn lookup(&self, service: &str) -> Option<Arc<VirtualService>> {
        self.active(service).map(|(vs, _)| vs)
    }

    /// The active virtual service for `service` and its queue.
    pub fn active(&self, service: &str) -> Option<(Arc<VirtualService>, WorkQueue)> {
        let entries = self.entries();
        match entries.get(&vs_name(service)) {
            Some(Entry {
                vs,
                state: EntryState::Active(queue),
            }) => Some((vs.clone(), queue.clone())),
            _ => None,
        }
    }

    /// Registers a virtual service for `service` unless one is active.
    /// A service still being deleted gets a fresh entry whose worker waits
    /// for the deletion to finish.
    pub fn create_if_absent(&self, service: &str, tasks: &TaskSet) -> Registration {
        let name = vs_name(service);
        let mut entries = self.entries();

        let after = match entries.get(&name) {
            Some(Entry {
                vs,
                state: EntryState::Active(queue),
            }) => {
                return Registration {
                    vs: vs.clone(),
                    existed: true,
                    queue: queue.clone(),
                    worker: None,
                }
            }
            Some(Entry {
                state: EntryState::Deleting(done),
                ..
            }) => Some(done.clone()),
            None => None,
        };

        let vs = Arc::new(VirtualService::derive(service, tasks, self.next_generation()));
        let (tx, rx) = mpsc::channel(self.queue_depth);
        entries.insert(
            name,
            Entry {
                vs: vs.clone(),
                state: EntryState::Active(tx.clone()),
            },
        );
        Registration {
            vs: vs.clone(),
            existed: false,
            queue: tx,
            worker: Some(WorkerSeed { vs, rx, after }),
        }
    }

    /// Moves the entry for `service` to the deleting state and hands out
    /// its queue for one last unit of work.  Without an active entry one is
    /// derived from `tasks` so the remote objects can still be removed.
    pub fn begin_deletion(&self, service: &str, tasks: &TaskSet) -> Deletion {
        let name = vs_name(service);
        let (done_tx, done_rx) = watch::channel(false);
        let mut entries = self.entries();

        let previous = entries.remove(&name);
        let after = match previous {
            Some(Entry {
                vs,
                state: EntryState::Active(queue),
            }) => {
                entries.insert(
                    name,
                    Entry {
                        vs: vs.clone(),
                        state: EntryState::Deleting(done_rx),
                    },
                );
                return Deletion {
                    vs,
                    queue,
                    done: done_tx,
                    worker: None,
                };
            }
            Some(Entry {
                state: EntryState::Deleting(done),
                ..
            }) => Some(done),
            None => None,
        };

        let vs = Arc::new(VirtualService::derive(service, tasks, self.next_generation()));
        let (tx, rx) = mpsc::channel(self.queue_depth);
        entries.insert(
            name,
            Entry {
                vs: vs.clone(),
                state: EntryState::Deleting(done_rx),
            },
        );
        Deletion {
            vs: vs.clone(),
            queue: tx,
            done: done_tx,
            worker: Some(WorkerSeed { vs, rx, after }),
        }
    }

    /// Drops the entry for `service`, whatever its state.
    pub fn remove(&self, service: &str) -> Option<Arc<VirtualService>> {
        self.entries().remove(&vs_name(service)).map(|e| e.vs)
    }

    /// Drops the entry for `service` only if it is still `generation`.
    pub fn remove_generation(&self, service: &str, generation: u64) -> bool {
        let name = vs_name(service);
        let mut entries = self.entries();
        if entries.get(&name).map(|e| e.vs.generation) != Some(generation) {
            return false;
        }
        entries.remove(&name);
        true
    }

    /// Drops the entry for `service` only if it is still active with
    /// `generation`.  An entry already handed to a deletion stays until
    /// that deletion finishes.
    pub fn remove_active_generation(&self, service: &str, generation: u64) -> bool {
        let name = vs_name(service);
        let mut entries = self.entries();
        match entries.get(&name) {
            Some(Entry {
                vs,
                state: EntryState::Active(_),
            }) if vs.generation == generation => {
                entries.remove(&name);
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> Vec<Pending> {
        self.entries()
            .values()
            .map(|entry| match &entry.state {
                EntryState::Active(queue) => Pending::Active(queue.clone()),
                EntryState::Deleting(done) => Pending::Deleting(done.clone()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
