//! In-memory controller used by the unit tests.
//!
//! Objects live in per-kind vectors.  Every mutating call is recorded so
//! tests can assert which remote writes happened, and failures can be
//! injected per method and path prefix.  Calls can also be held at a gate
//! to pin down the interleaving of concurrent workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::{Collection, ControllerClient};
use crate::error::ControllerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub method: &'static str,
    pub path: String,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Vec<Value>>,
    calls: Vec<Call>,
    failures: Vec<(&'static str, String)>,
    gates: Vec<(&'static str, String, watch::Receiver<bool>)>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeController {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicUsize>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the stock application profiles.
    pub fn with_profiles() -> Self {
        let fake = Self::new();
        for name in ["System-HTTP", "System-Secure-HTTP", "System-L4-Application"] {
            fake.insert("applicationprofile", json!({ "name": name }));
        }
        fake
    }

    /// Stores an object, filling in `uuid` and `url` when missing.
    pub fn insert(&self, kind: &str, mut obj: Value) -> Value {
        let id = format!("{}-{}", kind, self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        if obj.get("uuid").is_none() {
            obj["uuid"] = json!(id);
        }
        if obj.get("url").is_none() {
            let uuid = obj["uuid"].as_str().unwrap_or_default().to_string();
            obj["url"] = json!(format!("https://avi/api/{}/{}", kind, uuid));
        }
        self.state
            .lock()
            .unwrap()
            .objects
            .entry(kind.to_string())
            .or_default()
            .push(obj.clone());
        obj
    }

    pub fn objects(&self, kind: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<Value> {
        self.objects(kind).into_iter().find(|o| o["name"] == name)
    }

    /// `(addr, port)` members of the named pool.
    pub fn members(&self, pool: &str) -> Vec<(String, u16)> {
        let Some(pool) = self.object("pool", pool) else {
            return Vec::new();
        };
        let mut members: Vec<(String, u16)> = pool["servers"]
            .as_array()
            .map(|servers| {
                servers
                    .iter()
                    .map(|s| {
                        (
                            s["ip"]["addr"].as_str().unwrap_or_default().to_string(),
                            s["port"].as_u64().unwrap_or_default() as u16,
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Mutating calls made so far.
    pub fn writes(&self) -> Vec<Call> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.method != "GET")
            .cloned()
            .collect()
    }

    pub fn writes_to(&self, method: &'static str, prefix: &str) -> usize {
        self.writes()
            .iter()
            .filter(|c| c.method == method && c.path.starts_with(prefix))
            .count()
    }

    /// Makes the next `method` call on a path starting with `prefix` fail.
    pub fn fail_next(&self, method: &'static str, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((method, prefix.to_string()));
    }

    /// Holds every `method` call on a path starting with `prefix` after it
    /// is recorded, until `true` is sent on the returned gate.
    pub fn hold(&self, method: &'static str, prefix: &str) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        self.state
            .lock()
            .unwrap()
            .gates
            .push((method, prefix.to_string(), rx));
        tx
    }

    async fn pass_gate(&self, method: &'static str, path: &str) {
        let gate = {
            let state = self.state.lock().unwrap();
            state
                .gates
                .iter()
                .find(|(m, p, _)| *m == method && path.starts_with(p.as_str()))
                .map(|(_, _, rx)| rx.clone())
        };
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
    }

    fn record(&self, method: &'static str, path: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            method,
            path: path.to_string(),
        });
        let hit = state
            .failures
            .iter()
            .position(|(m, p)| *m == method && path.starts_with(p.as_str()));
        if let Some(idx) = hit {
            state.failures.remove(idx);
            return Err(ControllerError::Status {
                method: method.to_string(),
                path: path.to_string(),
                status: 503,
                body: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn kind_and_rest(path: &str) -> (String, String) {
        let path = path.trim_start_matches('/').trim_start_matches("api/");
        let path = path.split('?').next().unwrap_or_default();
        match path.split_once('/') {
            Some((kind, rest)) => (kind.to_string(), rest.to_string()),
            None => (path.to_string(), String::new()),
        }
    }

    fn create_from_macro(&self, body: &Value) -> Value {
        let data = &body["data"];
        self.insert(
            "virtualservice",
            json!({
                "name": data["name"],
                "fqdn": data["fqdn"],
                "pool_ref": data["pool_ref"],
                "application_profile_ref": data["application_profile_ref"],
                "services": data["services"],
                "ssl_key_and_certificate_refs": data["ssl_key_and_certificate_refs"],
            }),
        )
    }
}

#[async_trait]
impl ControllerClient for FakeController {
    async fn get_collection(&self, path: &str) -> Result<Collection, ControllerError> {
        self.record("GET", path)?;
        self.pass_gate("GET", path).await;
        let (kind, _) = Self::kind_and_rest(path);
        let name = path
            .split_once("?name=")
            .map(|(_, n)| urlencoding::decode(n).map(|n| n.into_owned()).unwrap_or_default());
        let results: Vec<Value> = self
            .objects(&kind)
            .into_iter()
            .filter(|o| match &name {
                Some(n) => o["name"] == n.as_str(),
                None => true,
            })
            .collect();
        Ok(Collection {
            count: results.len(),
            results,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ControllerError> {
        self.record("POST", path)?;
        self.pass_gate("POST", path).await;
        let (kind, _) = Self::kind_and_rest(path);
        if kind == "macro" {
            return Ok(self.create_from_macro(body));
        }
        Ok(self.insert(&kind, body.clone()))
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, ControllerError> {
        self.record("PUT", path)?;
        self.pass_gate("PUT", path).await;
        let (kind, uuid) = Self::kind_and_rest(path);
        let mut state = self.state.lock().unwrap();
        let objects = state.objects.entry(kind.clone()).or_default();
        match objects.iter_mut().find(|o| o["uuid"] == uuid.as_str()) {
            Some(obj) => {
                *obj = body.clone();
                Ok(body.clone())
            }
            None => Err(ControllerError::Status {
                method: "PUT".to_string(),
                path: path.to_string(),
                status: 404,
                body: format!("{} {} not found", kind, uuid),
            }),
        }
    }

    async fn delete(&self, path: &str) -> Result<Value, ControllerError> {
        self.record("DELETE", path)?;
        self.pass_gate("DELETE", path).await;
        let (kind, uuid) = Self::kind_and_rest(path);
        let mut state = self.state.lock().unwrap();
        let objects = state.objects.entry(kind).or_default();
        objects.retain(|o| o["uuid"] != uuid.as_str());
        Ok(Value::Null)
    }
}
