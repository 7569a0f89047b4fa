//! Container snapshot diffing.
//!
//! The engine remembers the containers seen in the previous pass and the
//! tasks each service currently has.  Each call to [`DiffEngine::diff`]
//! compares a fresh snapshot against that memory and reports which tasks
//! were added or removed and which services appeared or disappeared.

use std::collections::HashMap;

use log::debug;

use crate::types::{Container, ReconciliationBatch, ServiceChange, TaskSet};

#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Containers seen in the previous pass, by id.
    observed: HashMap<String, Container>,
    /// Live tasks per service.
    live: HashMap<String, TaskSet>,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diff(&mut self, containers: Vec<Container>) -> ReconciliationBatch {
        let mut previous = std::mem::take(&mut self.observed);
        let mut retained = HashMap::with_capacity(containers.len());
        let mut fresh = Vec::new();

        for container in containers {
            if previous.remove(&container.id).is_some() {
                retained.insert(container.id.clone(), container);
            } else if container.service_name().is_some() {
                fresh.push(container);
            }
        }

        let mut batch = ReconciliationBatch::default();
        let mut before: HashMap<String, usize> = HashMap::new();

        // Whatever is left over vanished since the last pass.
        for (id, container) in previous {
            for task in container.tasks() {
                let service = task.service_name.clone();
                self.note_count(&mut before, &service);
                let key = task.key();
                if let Some(live) = self.live.get_mut(&service) {
                    live.remove(&key);
                }
                batch.removed.entry(service).or_default().insert(key, task);
            }
            batch.departed.insert(id, container);
        }

        for container in fresh {
            for task in container.tasks() {
                let service = task.service_name.clone();
                self.note_count(&mut before, &service);
                let key = task.key();
                // Same endpoint went away and came back within the pass.
                let replaced = batch
                    .removed
                    .get_mut(&service)
                    .and_then(|removed| removed.remove(&key))
                    .is_some();
                if !replaced {
                    batch
                        .added
                        .entry(service.clone())
                        .or_default()
                        .insert(key.clone(), task.clone());
                }
                self.live.entry(service).or_default().insert(key, task);
            }
            retained.insert(container.id.clone(), container);
        }

        batch.removed.retain(|_, tasks| !tasks.is_empty());
        self.observed = retained;

        for (service, count) in before {
            let live = self.live.get(&service).cloned().unwrap_or_default();
            match (count, live.len()) {
                (0, n) if n > 0 => {
                    batch.changes.insert(service.clone(), ServiceChange::Appeared);
                }
                (n, 0) if n > 0 => {
                    batch.changes.insert(service.clone(), ServiceChange::Disappeared);
                }
                _ => {}
            }
            if live.is_empty() {
                self.live.remove(&service);
            }
            batch.live.insert(service, live);
        }

        debug!(
            "diff: {} containers observed, {} services changed, {} added, {} removed",
            self.observed.len(),
            batch.changes.len(),
            batch.added.len(),
            batch.removed.len()
        );
        batch
    }

    fn note_count(&self, before: &mut HashMap<String, usize>, service: &str) {
        if !before.contains_key(service) {
            let count = self.live.get(service).map_or(0, |t| t.len());
            before.insert(service.to_string(), count);
        }
    }

    /// Re-opens additions whose unit of work failed: the containers that
    /// published `tasks` are dropped from the cache so the next pass sees
    /// them as new again.
    pub fn forget(&mut self, tasks: &TaskSet) {
        for (key, task) in tasks {
            self.observed.remove(&task.container_id);
            if let Some(live) = self.live.get_mut(&task.service_name) {
                live.remove(key);
                if live.is_empty() {
                    self.live.remove(&task.service_name);
                }
            }
        }
    }

    /// Re-opens removals whose unit of work failed: the vanished
    /// containers are put back so the next pass sees them vanish again.
    pub fn restore(&mut self, tasks: &TaskSet, departed: &[Container]) {
        for container in departed {
            self.observed
                .entry(container.id.clone())
                .or_insert_with(|| container.clone());
        }
        for (key, task) in tasks {
            self.live
                .entry(task.service_name.clone())
                .or_default()
                .entry(key.clone())
                .or_insert_with(|| task.clone());
        }
    }

    #[cfg(test)]
    pub fn live_tasks(&self, service: &str) -> Option<&TaskSet> {
        self.live.get(service)
    }
}
