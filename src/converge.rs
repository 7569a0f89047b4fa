//! Turning a [`ReconciliationBatch`] into remote changes.
//!
//! Every virtual service has one worker draining one bounded queue, so
//! mutations of a service are applied in the order they were dispatched
//! and never overlap, while different services converge in parallel.
//! A failed unit of work is logged and dropped; its delta is handed back to
//! the diff engine so the next pass derives it again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::{oneshot, watch};

use crate::config::Config;
use crate::controller::{AviApi, ControllerClient};
use crate::diff::DiffEngine;
use crate::error::{LbError, Result};
use crate::pool;
use crate::registry::{Pending, Registry, WorkQueue, WorkerSeed};
use crate::types::{Container, ReconciliationBatch, ServiceChange, TaskSet};
use crate::virtual_service::{self, VirtualService};

/// A unit of work queued for one virtual service.
#[derive(Debug)]
pub enum Work {
    /// Create the pool and virtual service and populate the pool.
    Create { tasks: TaskSet },
    AddMembers { tasks: TaskSet },
    RemoveMembers {
        tasks: TaskSet,
        departed: Vec<Container>,
    },
    /// Delete the virtual service and its pool.  Always the last unit.
    Delete {
        tasks: TaskSet,
        departed: Vec<Container>,
        done: watch::Sender<bool>,
    },
    /// Answers once everything queued before it has run.
    Barrier(oneshot::Sender<()>),
}

/// Counts of what one pass dispatched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub created: usize,
    pub deleted: usize,
    pub additions: usize,
    pub removals: usize,
}

impl PassSummary {
    pub fn is_empty(&self) -> bool {
        *self == PassSummary::default()
    }
}

/// State shared by the converge driver and all workers.
pub struct Reconciler<C> {
    api: AviApi<C>,
    config: Config,
    registry: Registry,
    diff: Mutex<DiffEngine>,
}

impl<C: ControllerClient + 'static> Reconciler<C> {
    pub fn new(config: Config, client: C) -> Self {
        Self {
            api: AviApi::new(client),
            registry: Registry::new(config.queue_depth),
            config,
            diff: Mutex::new(DiffEngine::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn diff_engine(&self) -> MutexGuard<'_, DiffEngine> {
        self.diff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatches the work for every service touched by `batch`.
    pub async fn converge(self: &Arc<Self>, batch: ReconciliationBatch) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        let mut first_error = None;

        for service in batch.services() {
            if let Err(e) = self.dispatch(&service, &batch, &mut summary).await {
                error!("Failed to dispatch work for service {}: {}", service, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn dispatch(
        self: &Arc<Self>,
        service: &str,
        batch: &ReconciliationBatch,
        summary: &mut PassSummary,
    ) -> Result<()> {
        let change = batch.changes.get(service).copied();
        let removed = batch.removed.get(service).filter(|t| !t.is_empty());

        if change == Some(ServiceChange::Disappeared) {
            let tasks = removed.cloned().unwrap_or_default();
            let deletion = self.registry.begin_deletion(service, &tasks);
            if let Some(seed) = deletion.worker {
                self.spawn_worker(seed);
            }
            let departed = batch.departed_for(&tasks);
            send(
                service,
                &deletion.queue,
                Work::Delete {
                    tasks,
                    departed,
                    done: deletion.done,
                },
            )
            .await?;
            summary.deleted += 1;
            // Dropping the last sender closes the queue.
            return Ok(());
        }

        let queue = match self.registry.active(service) {
            Some((_, queue)) if change != Some(ServiceChange::Appeared) => {
                if let Some(added) = batch.added.get(service).filter(|t| !t.is_empty()) {
                    send(service, &queue, Work::AddMembers { tasks: added.clone() }).await?;
                    summary.additions += 1;
                }
                queue
            }
            _ => {
                let live = batch.live.get(service).cloned().unwrap_or_default();
                if live.is_empty() {
                    debug!("Service {} has no live tasks; nothing to create", service);
                    return Ok(());
                }
                let registration = self.registry.create_if_absent(service, &live);
                if registration.existed {
                    info!("VS {} already registered; re-checking it", registration.vs.name);
                }
                if let Some(seed) = registration.worker {
                    self.spawn_worker(seed);
                }
                send(service, &registration.queue, Work::Create { tasks: live }).await?;
                summary.created += 1;
                registration.queue
            }
        };

        if let Some(removed) = removed {
            let departed = batch.departed_for(removed);
            send(
                service,
                &queue,
                Work::RemoveMembers {
                    tasks: removed.clone(),
                    departed,
                },
            )
            .await?;
            summary.removals += 1;
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, seed: WorkerSeed) {
        debug!("Starting worker for VS {}", seed.vs.name);
        tokio::spawn(Arc::clone(self).run_worker(seed));
    }

    async fn run_worker(self: Arc<Self>, seed: WorkerSeed) {
        let WorkerSeed { vs, mut rx, after } = seed;
        if let Some(mut previous) = after {
            // An error only means the previous worker is gone.
            let _ = previous.wait_for(|done| *done).await;
        }
        while let Some(work) = rx.recv().await {
            self.handle(&vs, work).await;
        }
        debug!("Worker for VS {} (generation {}) exiting", vs.name, vs.generation);
    }

    async fn handle(&self, vs: &VirtualService, work: Work) {
        match work {
            Work::Create { tasks } => {
                match virtual_service::create(&self.api, &self.config, vs, &tasks).await {
                    Ok(()) => info!("VS {} converged with {} members", vs.name, tasks.len()),
                    Err(e) => {
                        match &e {
                            LbError::DuplicateVirtualService(name) => error!(
                                "Naming conflict: VS {} exists with another listener; \
                                 manual intervention required",
                                name
                            ),
                            _ => error!("Creating VS {} failed: {}", vs.name, e),
                        }
                        self.registry.remove_active_generation(&vs.service_name, vs.generation);
                        self.diff_engine().forget(&tasks);
                    }
                }
            }
            Work::AddMembers { tasks } => {
                if let Err(e) = pool::add_to(&self.api, &vs.pool_name, &tasks).await {
                    error!("Adding members to pool {} failed: {}", vs.pool_name, e);
                    self.diff_engine().forget(&tasks);
                }
            }
            Work::RemoveMembers { tasks, departed } => {
                if let Err(e) = pool::remove_from(&self.api, &vs.pool_name, &tasks).await {
                    error!("Removing members from pool {} failed: {}", vs.pool_name, e);
                    self.diff_engine().restore(&tasks, &departed);
                }
            }
            Work::Delete {
                tasks,
                departed,
                done,
            } => {
                match virtual_service::delete(&self.api, vs).await {
                    Ok(()) => info!("VS {} and pool {} deleted", vs.name, vs.pool_name),
                    Err(e @ LbError::OrphanedPool { .. }) => {
                        warn!("{}; remove it out of band", e);
                    }
                    Err(e) => {
                        error!("Deleting VS {} failed: {}", vs.name, e);
                        self.diff_engine().restore(&tasks, &departed);
                    }
                }
                self.registry.remove_generation(&vs.service_name, vs.generation);
                let _ = done.send(true);
            }
            Work::Barrier(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// Waits until all work queued so far has run.
    pub async fn drain(&self) {
        for pending in self.registry.pending() {
            match pending {
                Pending::Active(queue) => {
                    let (tx, rx) = oneshot::channel();
                    if queue.send(Work::Barrier(tx)).await.is_ok() {
                        let _ = rx.await;
                    }
                }
                Pending::Deleting(mut done) => {
                    let _ = done.wait_for(|done| *done).await;
                }
            }
        }
    }
}

async fn send(service: &str, queue: &WorkQueue, work: Work) -> Result<()> {
    queue
        .send(work)
        .await
        .map_err(|_| LbError::QueueClosed(service.to_string()))
}
