//! Access to the load-balancer controller's REST API.
//!
//! [`ControllerClient`] is the raw transport seam: it moves untyped JSON
//! objects to and from resource paths.  [`AviApi`] sits on top of it and
//! turns those objects into the typed schemas in [`models`], so malformed
//! responses surface as [`ControllerError::Decode`](crate::error::ControllerError)
//! instead of failing deep inside the reconciler.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ControllerError;

pub mod api;
pub mod http;
pub mod models;

#[cfg(test)]
pub(crate) mod fake;

pub use api::AviApi;
pub use http::HttpController;

/// Result of a collection query such as `/api/pool?name=web-pool-80-tcp`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub results: Vec<Value>,
}

#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn get_collection(&self, path: &str) -> Result<Collection, ControllerError>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ControllerError>;

    async fn put(&self, path: &str, body: &Value) -> Result<Value, ControllerError>;

    async fn delete(&self, path: &str) -> Result<Value, ControllerError>;
}
