use super::ContainerRuntime;
use crate::types::{Container, PortType, PublishedPort};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerSummary, Port, PortTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

pub struct DockerRuntime {
    poll_interval: Duration,
}

impl DockerRuntime {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    async fn connect() -> Result<Docker> {
        Docker::connect_with_local_defaults().map_err(Into::into)
    }

    async fn snapshot(docker: &Docker) -> Result<Vec<Container>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = docker.list_containers(Some(opts)).await?;
        Ok(containers.into_iter().filter_map(to_container).collect())
    }

    async fn send_snapshot(docker: &Docker, snapshot_tx: &mpsc::Sender<Vec<Container>>) -> Result<bool> {
        match Self::snapshot(docker).await {
            Ok(snapshot) => {
                debug!("Snapshot with {} containers", snapshot.len());
                snapshot_tx
                    .send(snapshot)
                    .await
                    .map_err(|_| anyhow!("Channel closed"))?;
                Ok(true)
            }
            Err(e) => {
                error!("Failed to list containers: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn monitor(&self, snapshot_tx: mpsc::Sender<Vec<Container>>) -> Result<()> {
        loop {
            let docker = match Self::connect().await {
                Ok(d) => d,
                Err(e) => {
                    error!("Failed to connect to Docker: {}. Retrying in 5s...", e);
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            // Initial scan
            if !Self::send_snapshot(&docker, &snapshot_tx).await? {
                sleep(Duration::from_secs(5)).await;
                continue;
            }

            let opts = EventsOptions::<String> {
                filters: [
                    ("type", ["container"].as_slice()),
                    ("event", ["start", "die", "kill", "stop"].as_slice()),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
                ..Default::default()
            };
            let mut stream = docker.events(Some(opts));

            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!("Listening for Docker events...");
            loop {
                tokio::select! {
                    msg = stream.next() => match msg {
                        Some(Ok(event)) => {
                            let action = event.action.unwrap_or_default();
                            debug!("Container event: {}", action);
                            Self::send_snapshot(&docker, &snapshot_tx).await?;
                        }
                        Some(Err(e)) => {
                            error!("Error in Docker event stream: {}", e);
                            break; // Reconnect
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        Self::send_snapshot(&docker, &snapshot_tx).await?;
                    }
                }
            }

            warn!("Docker event stream ended. Reconnecting in 2s...");
            sleep(Duration::from_secs(2)).await;
        }
    }
}

fn to_container(summary: ContainerSummary) -> Option<Container> {
    let id = summary.id?;
    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(to_published_port)
        .collect();
    Some(Container {
        id,
        labels: summary.labels.unwrap_or_default(),
        ports,
    })
}

fn to_published_port(port: Port) -> Option<PublishedPort> {
    let port_type = match port.typ {
        Some(PortTypeEnum::TCP) => PortType::Tcp,
        Some(PortTypeEnum::UDP) => PortType::Udp,
        _ => return None,
    };
    Some(PublishedPort {
        port_type,
        host_ip: port.ip.unwrap_or_default(),
        public_port: port.public_port.unwrap_or(0),
        private_port: port.private_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn summaries_convert_to_containers() {
        let mut labels = HashMap::new();
        labels.insert("com.docker.swarm.service.name".to_string(), "web".to_string());
        let summary = ContainerSummary {
            id: Some("abc".into()),
            labels: Some(labels),
            ports: Some(vec![
                Port {
                    ip: Some("10.0.0.5".into()),
                    private_port: 80,
                    public_port: Some(8080),
                    typ: Some(PortTypeEnum::TCP),
                },
                Port {
                    ip: None,
                    private_port: 9000,
                    public_port: None,
                    typ: Some(PortTypeEnum::TCP),
                },
                Port {
                    ip: Some("10.0.0.5".into()),
                    private_port: 9999,
                    public_port: Some(9999),
                    typ: Some(PortTypeEnum::SCTP),
                },
            ]),
            ..Default::default()
        };

        let container = to_container(summary).unwrap();
        assert_eq!(container.id, "abc");
        assert_eq!(container.service_name(), Some("web"));
        assert_eq!(container.ports.len(), 2);
        let tasks = container.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].public_port, 8080);
        assert_eq!(tasks[0].private_port, 80);
    }

    #[test]
    fn summary_without_id_is_dropped() {
        assert!(to_container(ContainerSummary::default()).is_none());
    }
}
