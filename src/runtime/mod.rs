use crate::types::Container;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime {
    /// Watch the runtime and send a full snapshot of the running
    /// containers whenever they may have changed.
    async fn monitor(&self, snapshot_tx: mpsc::Sender<Vec<Container>>) -> Result<()>;
}
