//! Data structures shared by the diff engine, the registry and the
//! converge driver.
//!
//! A [`Container`] is what the runtime reports; a [`Task`] is one
//! externally reachable port of such a container and is the unit of pool
//! membership on the controller.  A [`ReconciliationBatch`] is the delta
//! produced by one pass and consumed by the converge driver.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Primary label carrying the service name (swarm mode).
pub const SERVICE_NAME_LABEL: &str = "com.docker.swarm.service.name";

/// Legacy label consulted when the swarm label is missing.
pub const HOSTNAME_LABEL: &str = "interlock.hostname";

/// Transport of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Tcp,
    Udp,
}

impl PortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortType::Tcp => "tcp",
            PortType::Udp => "udp",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port mapping as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPort {
    pub port_type: PortType,
    /// Host address the port is bound to.  Empty when the runtime did not
    /// report one.
    pub host_ip: String,
    /// Port exposed on the host, `0` when the port is not published.
    pub public_port: u16,
    /// Port inside the container.
    pub private_port: u16,
}

impl PublishedPort {
    /// Ports bound to no address, or to the unspecified address, are not
    /// reachable from the load balancer.
    pub fn is_reachable(&self) -> bool {
        if self.public_port == 0 {
            return false;
        }
        match self.host_ip.parse::<IpAddr>() {
            Ok(ip) => !ip.is_unspecified(),
            Err(_) => false,
        }
    }
}

/// One running container in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PublishedPort>,
}

impl Container {
    /// Service the container belongs to, if it carries one of the
    /// recognised labels.
    pub fn service_name(&self) -> Option<&str> {
        self.labels
            .get(SERVICE_NAME_LABEL)
            .or_else(|| self.labels.get(HOSTNAME_LABEL))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Reachable tasks published by this container.  Empty for containers
    /// without a service label.
    pub fn tasks(&self) -> Vec<Task> {
        let Some(service) = self.service_name() else {
            return Vec::new();
        };
        self.ports
            .iter()
            .filter(|p| p.is_reachable())
            .map(|p| Task {
                service_name: service.to_string(),
                container_id: self.id.clone(),
                port_type: p.port_type,
                ip_addr: p.host_ip.clone(),
                public_port: p.public_port,
                private_port: p.private_port,
            })
            .collect()
    }
}

/// Identity of a task, and of a pool member: the publicly reachable
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub addr: String,
    pub port: u16,
}

impl TaskKey {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// One published container endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub service_name: String,
    pub container_id: String,
    pub port_type: PortType,
    pub ip_addr: String,
    pub public_port: u16,
    pub private_port: u16,
}

impl Task {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.ip_addr.clone(), self.public_port)
    }
}

/// Tasks of one service, keyed by their public address.
pub type TaskSet = HashMap<TaskKey, Task>;

/// Service level transition observed in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceChange {
    /// The first task of the service showed up.
    Appeared,
    /// The last task of the service went away.
    Disappeared,
}

/// Everything that changed in one pass.
#[derive(Debug, Default)]
pub struct ReconciliationBatch {
    pub changes: HashMap<String, ServiceChange>,
    pub added: HashMap<String, TaskSet>,
    pub removed: HashMap<String, TaskSet>,
    /// Tasks still live after the pass, for every service touched by it.
    pub live: HashMap<String, TaskSet>,
    /// Snapshots of the containers that vanished in this pass.
    pub departed: HashMap<String, Container>,
}

impl ReconciliationBatch {
    /// True when the pass observed no change at all.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Services touched by this pass, in a stable order.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .changes
            .keys()
            .chain(self.added.keys())
            .chain(self.removed.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Departed container snapshots that published one of `tasks`.
    pub fn departed_for(&self, tasks: &TaskSet) -> Vec<Container> {
        let mut ids: Vec<&str> = tasks.values().map(|t| t.container_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| self.departed.get(id).cloned())
            .collect()
    }
}
