//! Virtual service descriptors and their remote lifecycle.

use std::fmt;

use log::{debug, info};

use crate::config::Config;
use crate::controller::api::{APPLICATION_PROFILE, CERTIFICATE, NETWORK, VIRTUAL_SERVICE};
use crate::controller::models::VirtualServiceSpec;
use crate::controller::{AviApi, ControllerClient};
use crate::error::{LbError, Operation, Result};
use crate::pool;
use crate::types::{PortType, TaskSet};

pub const APP_PROFILE_HTTPS: &str = "System-Secure-HTTP";
pub const APP_PROFILE_HTTP: &str = "System-HTTP";
pub const APP_PROFILE_TCP: &str = "System-L4-Application";

/// Application profile a virtual service is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppProfile {
    Https,
    Http,
    Tcp,
}

impl AppProfile {
    /// HTTPS if any task listens on 443 inside its container, HTTP if any
    /// listens on 80, generic TCP otherwise.
    pub fn classify(tasks: &TaskSet) -> Self {
        let ports = || tasks.values().map(|t| t.private_port);
        if ports().any(|p| p == 443) {
            AppProfile::Https
        } else if ports().any(|p| p == 80) {
            AppProfile::Http
        } else {
            AppProfile::Tcp
        }
    }

    /// Name of the profile object on the controller.
    pub fn name(&self) -> &'static str {
        match self {
            AppProfile::Https => APP_PROFILE_HTTPS,
            AppProfile::Http => APP_PROFILE_HTTP,
            AppProfile::Tcp => APP_PROFILE_TCP,
        }
    }
}

impl fmt::Display for AppProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local view of the virtual service fronting one container service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualService {
    pub service_name: String,
    pub name: String,
    pub pool_name: String,
    pub profile: AppProfile,
    pub tls: bool,
    /// Distinguishes successive registry entries for the same service.
    pub generation: u64,
}

impl VirtualService {
    pub fn derive(service_name: &str, tasks: &TaskSet, generation: u64) -> Self {
        let profile = AppProfile::classify(tasks);
        Self {
            service_name: service_name.to_string(),
            name: vs_name(service_name),
            pool_name: pool_name(service_name, tasks),
            profile,
            tls: profile == AppProfile::Https,
            generation,
        }
    }

    /// Listener port the virtual service is expected to expose.
    pub fn expected_port(&self) -> u16 {
        if self.tls {
            443
        } else {
            80
        }
    }
}

pub fn vs_name(service_name: &str) -> String {
    format!("{}-docker-ucp", service_name)
}

/// `<service>-pool-<port>-<transport>`, keyed on the private port that
/// decides the profile.
pub fn pool_name(service_name: &str, tasks: &TaskSet) -> String {
    let representative = tasks
        .values()
        .map(|t| (t.private_port, t.port_type))
        .min_by_key(|(port, kind)| {
            let rank = match *port {
                443 => 0,
                80 => 1,
                _ => 2,
            };
            (rank, *port, *kind == PortType::Udp)
        });
    let (port, kind) = representative.unwrap_or((0, PortType::Tcp));
    format!("{}-pool-{}-{}", service_name, port, kind)
}

/// Creates the virtual service and its pool, populated with `tasks`.
///
/// An existing virtual service with the expected listener port counts as
/// already created.  One with another port is a naming conflict.
pub async fn create<C: ControllerClient>(
    api: &AviApi<C>,
    config: &Config,
    vs: &VirtualService,
    tasks: &TaskSet,
) -> Result<()> {
    debug!("Creating pool {} for VS {}", vs.pool_name, vs.name);
    let pool = pool::ensure_pool(api, config, &vs.pool_name).await?;
    let pool = pool::add_members(api, pool, tasks).await?;

    let existing = api
        .find_virtual_service(&vs.name)
        .await
        .map_err(LbError::controller(Operation::Lookup, VIRTUAL_SERVICE, &vs.name))?;
    if let Some(remote) = existing {
        if remote.service_port() == Some(vs.expected_port()) {
            info!("VS {} already exists", vs.name);
            return Ok(());
        }
        return Err(LbError::DuplicateVirtualService(vs.name.clone()));
    }

    let profile = api
        .resolve_ref(APPLICATION_PROFILE, vs.profile.name())
        .await
        .map_err(LbError::controller(Operation::Lookup, APPLICATION_PROFILE, vs.profile.name()))?;

    let network = match config.ipam_network.as_deref() {
        Some(name) => Some(
            api.resolve_ref(NETWORK, name)
                .await
                .map_err(LbError::controller(Operation::Lookup, NETWORK, name))?,
        ),
        None => None,
    };

    let certificate = match config.ssl_certificate.as_deref() {
        Some(name) if vs.tls => Some(
            api.resolve_ref(CERTIFICATE, name)
                .await
                .map_err(LbError::controller(Operation::Lookup, CERTIFICATE, name))?,
        ),
        _ => None,
    };

    let request = VirtualServiceSpec::builder(vs.name.as_str())
        .fqdn(config.fqdn(&vs.name))
        .cloud_name(config.cloud_name.as_str())
        .application_profile(&profile)
        .pool(&pool)
        .network(network.as_ref())
        .certificate(certificate.as_ref())
        .listener(vs.expected_port(), vs.tls)
        .build();

    debug!("Sending request to create VS {}", vs.name);
    api.create_virtual_service(&request)
        .await
        .map_err(LbError::controller(Operation::Create, VIRTUAL_SERVICE, &vs.name))?;
    info!("Created VS {} ({})", vs.name, vs.profile);
    Ok(())
}

/// Deletes the virtual service, then its pool.
///
/// Deleting something already gone succeeds.  When the pool cannot be
/// deleted after the virtual service was, the error is
/// [`LbError::OrphanedPool`].
pub async fn delete<C: ControllerClient>(api: &AviApi<C>, vs: &VirtualService) -> Result<()> {
    let remote = api
        .find_virtual_service(&vs.name)
        .await
        .map_err(LbError::controller(Operation::Lookup, VIRTUAL_SERVICE, &vs.name))?;

    let deleted = match remote {
        Some(remote) => {
            api.delete_virtual_service(&remote)
                .await
                .map_err(LbError::controller(Operation::Delete, VIRTUAL_SERVICE, &vs.name))?;
            info!("Deleted VS {}", vs.name);
            true
        }
        None => {
            debug!("VS {} does not exist; nothing to delete", vs.name);
            false
        }
    };

    match pool::delete_pool(api, &vs.pool_name).await {
        Err(source) if deleted => Err(LbError::OrphanedPool {
            vs: vs.name.clone(),
            pool: vs.pool_name.clone(),
            source: Box::new(source),
        }),
        other => other,
    }
}
