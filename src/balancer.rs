//! The load-balancer backend as seen by the host: it is handed container
//! snapshots and converges the controller toward them.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::controller::ControllerClient;
use crate::converge::{PassSummary, Reconciler};
use crate::error::Result;
use crate::types::Container;

const PLUGIN_NAME: &str = "avi";

pub struct AviLoadBalancer<C> {
    reconciler: Arc<Reconciler<C>>,
    /// Serializes passes so queues receive work in pass order.
    pass: Mutex<()>,
}

impl<C: ControllerClient + 'static> AviLoadBalancer<C> {
    pub fn new(config: Config, client: C) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(config, client)),
            pass: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn reconciler(&self) -> &Reconciler<C> {
        &self.reconciler
    }

    /// Runs one reconciliation pass over `containers`.  Returns once the
    /// resulting work is queued; the controller catches up asynchronously.
    pub async fn generate_config(&self, containers: Vec<Container>) -> Result<PassSummary> {
        let _pass = self.pass.lock().await;

        let batch = self.reconciler.diff_engine().diff(containers);
        if batch.is_empty() {
            debug!("No container changes");
            return Ok(PassSummary::default());
        }

        let summary = self.reconciler.converge(batch).await?;
        info!(
            "Dispatched {} creations, {} deletions, {} additions, {} removals",
            summary.created, summary.deleted, summary.additions, summary.removals
        );
        Ok(summary)
    }

    /// Waits for every queued unit of work to finish.
    pub async fn drain(&self) {
        let _pass = self.pass.lock().await;
        self.reconciler.drain().await;
    }
}
