//! Container-driven load-balancer backend.
//!
//! Snapshots of running containers go in; pools and virtual services on a
//! load-balancer controller come out.  [`AviLoadBalancer::generate_config`]
//! runs one pass: it diffs the snapshot against the previous one and
//! queues the resulting remote changes on one worker per virtual service.

pub mod balancer;
pub mod config;
pub mod controller;
pub mod converge;
pub mod diff;
pub mod error;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod virtual_service;

pub use balancer::AviLoadBalancer;
pub use config::Config;
pub use converge::PassSummary;
pub use error::{ControllerError, LbError};
pub use types::{Container, PortType, PublishedPort};
