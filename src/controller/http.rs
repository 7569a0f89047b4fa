use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;

use super::{Collection, ControllerClient};
use crate::config::ControllerConfig;
use crate::error::ControllerError;

/// [`ControllerClient`] speaking HTTPS to a real controller.
pub struct HttpController {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    tenant: String,
    api_version: Option<String>,
}

impl HttpController {
    pub fn new(cfg: &ControllerConfig) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .danger_accept_invalid_certs(cfg.insecure)
            .build()
            .map_err(|source| ControllerError::Http {
                path: cfg.url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            tenant: cfg.tenant.clone(),
            api_version: cfg.api_version.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .header("X-Avi-Tenant", &self.tenant);
        if let Some(version) = &self.api_version {
            req = req.header("X-Avi-Version", version);
        }
        req
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ControllerError> {
        debug!("{} {}", method, path);
        let method_name = method.as_str().to_string();
        let mut req = self.request(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|source| ControllerError::Http {
            path: path.to_string(),
            source,
        })?;
        read_body(method_name, path, resp).await
    }
}

async fn read_body(
    method: String,
    path: &str,
    resp: Response,
) -> Result<Value, ControllerError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|source| ControllerError::Http {
        path: path.to_string(),
        source,
    })?;

    if !status.is_success() {
        return Err(ControllerError::Status {
            method,
            path: path.to_string(),
            status: status.as_u16(),
            body: text,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|source| ControllerError::Decode {
        kind: "response",
        path: path.to_string(),
        source,
    })
}

#[async_trait]
impl ControllerClient for HttpController {
    async fn get_collection(&self, path: &str) -> Result<Collection, ControllerError> {
        let raw = self.send(Method::GET, path, None).await?;
        if raw.is_null() {
            return Ok(Collection::default());
        }
        serde_json::from_value(raw).map_err(|source| ControllerError::Decode {
            kind: "collection",
            path: path.to_string(),
            source,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ControllerError> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, ControllerError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value, ControllerError> {
        self.send(Method::DELETE, path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_join_the_base_url_once() {
        let cfg = ControllerConfig {
            url: "https://avi.internal/".into(),
            ..ControllerConfig::default()
        };
        let http = HttpController::new(&cfg).unwrap();
        assert_eq!(http.url("/api/pool"), "https://avi.internal/api/pool");
        assert_eq!(http.url("api/macro"), "https://avi.internal/api/macro");
    }
}
