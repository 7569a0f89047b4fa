//! Pool membership reconciliation.
//!
//! Membership is compared by the public `(ip, port)` of each member, the
//! same key tasks are identified by, so adding a present member or
//! removing an absent one never issues a write.

use std::collections::HashSet;

use log::{debug, info};

use crate::config::Config;
use crate::controller::api::{CLOUD, POOL};
use crate::controller::models::{Pool, Server};
use crate::controller::{AviApi, ControllerClient};
use crate::error::{LbError, Operation, Result};
use crate::types::{Task, TaskKey, TaskSet};

/// Reference to the configured cloud, or `None` for the default cloud.
pub async fn cloud_ref<C: ControllerClient>(api: &AviApi<C>, config: &Config) -> Result<Option<String>> {
    if !config.needs_cloud_ref() {
        return Ok(None);
    }
    let cloud = api
        .resolve_ref(CLOUD, &config.cloud_name)
        .await
        .map_err(LbError::controller(Operation::Lookup, CLOUD, &config.cloud_name))?;
    Ok(Some(cloud.url))
}

/// Returns the named pool, creating it when missing.  An existing pool is
/// returned as is.
pub async fn ensure_pool<C: ControllerClient>(
    api: &AviApi<C>,
    config: &Config,
    name: &str,
) -> Result<Pool> {
    if let Some(pool) = find(api, name).await? {
        return Ok(pool);
    }

    let cloud = cloud_ref(api, config).await?;
    let pool = api
        .create_pool(name, cloud.as_deref())
        .await
        .map_err(LbError::controller(Operation::Create, POOL, name))?;
    info!("Created pool {}", name);
    Ok(pool)
}

async fn find<C: ControllerClient>(api: &AviApi<C>, name: &str) -> Result<Option<Pool>> {
    api.find_pool(name)
        .await
        .map_err(LbError::controller(Operation::Lookup, POOL, name))
}

/// Appends the tasks not yet in `pool` and writes it back once.  Returns
/// the pool as the controller now has it.
pub async fn add_members<C: ControllerClient>(
    api: &AviApi<C>,
    mut pool: Pool,
    tasks: &TaskSet,
) -> Result<Pool> {
    let present: HashSet<TaskKey> = pool.member_keys().collect();
    let mut missing: Vec<&Task> = tasks
        .iter()
        .filter(|(key, _)| !present.contains(*key))
        .map(|(_, task)| task)
        .collect();

    if missing.is_empty() {
        info!("Pool {} has all intended members, no new member to be added", pool.name);
        return Ok(pool);
    }

    missing.sort_by_key(|t| t.key());
    for task in missing {
        debug!("Adding member {} to pool {}", task.key(), pool.name);
        pool.servers.push(Server::from(task));
    }

    let name = pool.name.clone();
    api.update_pool(&pool)
        .await
        .map_err(LbError::pool(Operation::Update, &name))
}

/// Drops the members matching `tasks` and writes the pool back if that
/// changed anything.
pub async fn remove_members<C: ControllerClient>(
    api: &AviApi<C>,
    mut pool: Pool,
    tasks: &TaskSet,
) -> Result<Pool> {
    let before = pool.servers.len();
    let default_port = pool.default_port();
    pool.servers.retain(|server| {
        let key = server.key(default_port);
        let keep = !tasks.contains_key(&key);
        if !keep {
            debug!("Removing member {} from pool {}", key, pool.name);
        }
        keep
    });

    if pool.servers.len() == before {
        info!("Given members don't exist in pool {}; nothing to remove", pool.name);
        return Ok(pool);
    }

    let name = pool.name.clone();
    api.update_pool(&pool)
        .await
        .map_err(LbError::pool(Operation::Update, &name))
}

/// Adds `tasks` to an existing pool.
pub async fn add_to<C: ControllerClient>(api: &AviApi<C>, name: &str, tasks: &TaskSet) -> Result<()> {
    let pool = find(api, name)
        .await?
        .ok_or_else(|| LbError::MissingPool(name.to_string()))?;
    add_members(api, pool, tasks).await.map(|_| ())
}

/// Removes `tasks` from a pool.  A missing pool has nothing to remove.
pub async fn remove_from<C: ControllerClient>(
    api: &AviApi<C>,
    name: &str,
    tasks: &TaskSet,
) -> Result<()> {
    match find(api, name).await? {
        Some(pool) => remove_members(api, pool, tasks).await.map(|_| ()),
        None => {
            debug!("Pool {} does not exist; nothing to remove", name);
            Ok(())
        }
    }
}

/// Deletes the named pool if it exists.
pub async fn delete_pool<C: ControllerClient>(api: &AviApi<C>, name: &str) -> Result<()> {
    let Some(pool) = find(api, name).await? else {
        debug!("Pool {} does not exist; nothing to delete", name);
        return Ok(());
    };
    api.delete_pool(&pool)
        .await
        .map_err(LbError::controller(Operation::Delete, POOL, name))?;
    info!("Deleted pool {}", name);
    Ok(())
}
