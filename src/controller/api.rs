use serde::de::DeserializeOwned;
use serde_json::Value;

use super::models::{MacroRequest, NewPool, ObjectRef, Pool, RemoteVirtualService};
use super::ControllerClient;
use crate::error::ControllerError;

pub const POOL: &str = "pool";
pub const VIRTUAL_SERVICE: &str = "virtualservice";
pub const APPLICATION_PROFILE: &str = "applicationprofile";
pub const CLOUD: &str = "cloud";
pub const NETWORK: &str = "network";
pub const CERTIFICATE: &str = "sslkeyandcertificate";

const MACRO_PATH: &str = "/api/macro";

/// Typed operations against the controller.
pub struct AviApi<C> {
    client: C,
}

impl<C: ControllerClient> AviApi<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// First object of `kind` named `name`, if any.
    pub async fn find<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        name: &str,
    ) -> Result<Option<T>, ControllerError> {
        let path = format!("/api/{}?name={}", kind, urlencoding::encode(name));
        let collection = self.client.get_collection(&path).await?;
        match collection.results.into_iter().next() {
            Some(raw) if collection.count > 0 => decode(kind, &path, raw).map(Some),
            _ => Ok(None),
        }
    }

    /// Like [`find`](Self::find) for reference-only lookups, but absence is
    /// an error.
    pub async fn resolve_ref(
        &self,
        kind: &'static str,
        name: &str,
    ) -> Result<ObjectRef, ControllerError> {
        self.find::<ObjectRef>(kind, name)
            .await?
            .ok_or_else(|| ControllerError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    pub async fn find_pool(&self, name: &str) -> Result<Option<Pool>, ControllerError> {
        self.find(POOL, name).await
    }

    pub async fn create_pool(
        &self,
        name: &str,
        cloud_ref: Option<&str>,
    ) -> Result<Pool, ControllerError> {
        let path = format!("/api/{}", POOL);
        let body = to_value(&path, &NewPool { name, cloud_ref })?;
        let raw = self.client.post(&path, &body).await?;
        decode(POOL, &path, raw)
    }

    pub async fn update_pool(&self, pool: &Pool) -> Result<Pool, ControllerError> {
        let path = format!("/api/{}/{}", POOL, pool.uuid);
        let body = to_value(&path, pool)?;
        let raw = self.client.put(&path, &body).await?;
        decode(POOL, &path, raw)
    }

    pub async fn delete_pool(&self, pool: &Pool) -> Result<(), ControllerError> {
        let path = format!("/api/{}/{}", POOL, pool.uuid);
        self.client.delete(&path).await.map(|_| ())
    }

    pub async fn find_virtual_service(
        &self,
        name: &str,
    ) -> Result<Option<RemoteVirtualService>, ControllerError> {
        self.find(VIRTUAL_SERVICE, name).await
    }

    pub async fn delete_virtual_service(
        &self,
        vs: &RemoteVirtualService,
    ) -> Result<(), ControllerError> {
        let path = format!("/api/{}/{}", VIRTUAL_SERVICE, vs.uuid);
        self.client.delete(&path).await.map(|_| ())
    }

    pub async fn create_virtual_service(&self, request: &MacroRequest) -> Result<Value, ControllerError> {
        let body = to_value(MACRO_PATH, request)?;
        self.client.post(MACRO_PATH, &body).await
    }
}

fn decode<T: DeserializeOwned>(
    kind: &'static str,
    path: &str,
    raw: Value,
) -> Result<T, ControllerError> {
    serde_json::from_value(raw).map_err(|source| ControllerError::Decode {
        kind,
        path: path.to_string(),
        source,
    })
}

fn to_value<T: serde::Serialize>(path: &str, body: &T) -> Result<Value, ControllerError> {
    serde_json::to_value(body).map_err(|source| ControllerError::Decode {
        kind: "request",
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::FakeController;
    use serde_json::json;

    #[tokio::test]
    async fn find_returns_none_for_empty_collection() {
        let api = AviApi::new(FakeController::new());
        assert!(api.find_pool("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_ref_reports_missing_objects() {
        let api = AviApi::new(FakeController::new());
        let err = api.resolve_ref(CLOUD, "vmware").await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound { kind: "cloud", .. }));
    }

    #[tokio::test]
    async fn malformed_pool_surfaces_a_decode_error() {
        let fake = FakeController::new();
        fake.insert(POOL, json!({"name": "broken", "servers": "nope"}));
        let api = AviApi::new(fake);
        let err = api.find_pool("broken").await.unwrap_err();
        assert!(matches!(err, ControllerError::Decode { kind: "pool", .. }));
    }

    #[tokio::test]
    async fn created_pool_is_found_by_name() {
        let api = AviApi::new(FakeController::new());
        let created = api.create_pool("web-pool-80-tcp", None).await.unwrap();
        let found = api.find_pool("web-pool-80-tcp").await.unwrap().unwrap();
        assert_eq!(created.uuid, found.uuid);
        assert!(found.servers.is_empty());
    }
}
