//! Typed views of the controller objects this crate reads and writes.
//!
//! Only the fields the reconciler needs are named.  Pools round-trip
//! through a PUT, so every other field is kept in `extra` and sent back
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Task, TaskKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerIp {
    pub addr: String,
    #[serde(rename = "type", default = "ServerIp::default_type")]
    pub kind: String,
}

impl ServerIp {
    fn default_type() -> String {
        "V4".to_string()
    }
}

/// Port the controller assumes for a pool without `default_server_port`.
pub const DEFAULT_SERVER_PORT: u16 = 80;

/// A pool member.  Without a `port` it listens on the pool's default port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub ip: ServerIp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Server {
    pub fn key(&self, default_port: u16) -> TaskKey {
        TaskKey::new(self.ip.addr.clone(), self.port.unwrap_or(default_port))
    }
}

impl From<&Task> for Server {
    fn from(task: &Task) -> Self {
        let kind = if task.ip_addr.contains(':') { "V6" } else { "V4" };
        Server {
            ip: ServerIp {
                addr: task.ip_addr.clone(),
                kind: kind.to_string(),
            },
            port: Some(task.public_port),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub uuid: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server_port: Option<u16>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Pool {
    pub fn default_port(&self) -> u16 {
        self.default_server_port.unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Member keys, with portless members on the pool's default port.
    pub fn member_keys(&self) -> impl Iterator<Item = TaskKey> + '_ {
        let default_port = self.default_port();
        self.servers.iter().map(move |s| s.key(default_port))
    }
}

/// Body of a pool creation request.
#[derive(Debug, Clone, Serialize)]
pub struct NewPool<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_ref: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    #[serde(default)]
    pub enable_ssl: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteVirtualService {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub services: Vec<ServicePort>,
}

impl RemoteVirtualService {
    /// Port of the first service listener, the one this crate configures.
    pub fn service_port(&self) -> Option<u16> {
        self.services.first().map(|s| s.port)
    }
}

/// Any named object referenced by URL, e.g. a cloud or an application
/// profile.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectRef {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub url: String,
}

/// Virtual service definition carried by a composite creation request.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualServiceSpec {
    pub name: String,
    pub fqdn: String,
    pub cloud_name: String,
    pub cloud_type: &'static str,
    #[serde(rename = "type")]
    pub vs_type: &'static str,
    pub application_profile_ref: String,
    pub network_profile_name: &'static str,
    pub analytics_profile_name: &'static str,
    pub pool_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_ref: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssl_key_and_certificate_refs: Vec<String>,
    pub services: Vec<ServicePort>,
    pub flow_dist: &'static str,
    pub weight: u32,
    pub enabled: bool,
    pub auto_allocate_ip: bool,
    pub enable_autogw: bool,
    pub ign_pool_net_reach: bool,
}

impl VirtualServiceSpec {
    pub fn builder(name: impl Into<String>) -> VirtualServiceSpecBuilder {
        VirtualServiceSpecBuilder::new(name.into())
    }
}

/// Assembles a [`VirtualServiceSpec`] with the defaults every virtual
/// service created by this crate shares.
#[derive(Debug, Clone)]
pub struct VirtualServiceSpecBuilder {
    spec: VirtualServiceSpec,
}

impl VirtualServiceSpecBuilder {
    fn new(name: String) -> Self {
        Self {
            spec: VirtualServiceSpec {
                fqdn: name.clone(),
                name,
                cloud_name: crate::config::DEFAULT_CLOUD.to_string(),
                cloud_type: "CLOUD_NONE",
                vs_type: "VS_TYPE_NORMAL",
                application_profile_ref: String::new(),
                network_profile_name: "System-TCP-Proxy",
                analytics_profile_name: "System-Analytics-Profile",
                pool_ref: String::new(),
                network_ref: None,
                ssl_key_and_certificate_refs: Vec::new(),
                services: Vec::new(),
                flow_dist: "LOAD_AWARE",
                weight: 1,
                enabled: true,
                auto_allocate_ip: true,
                enable_autogw: true,
                ign_pool_net_reach: true,
            },
        }
    }

    pub fn fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.spec.fqdn = fqdn.into();
        self
    }

    pub fn cloud_name(mut self, cloud: impl Into<String>) -> Self {
        self.spec.cloud_name = cloud.into();
        self
    }

    pub fn application_profile(mut self, profile: &ObjectRef) -> Self {
        self.spec.application_profile_ref = profile.url.clone();
        self
    }

    pub fn pool(mut self, pool: &Pool) -> Self {
        self.spec.pool_ref = pool.url.clone();
        self
    }

    pub fn network(mut self, network: Option<&ObjectRef>) -> Self {
        self.spec.network_ref = network.map(|n| n.url.clone());
        self
    }

    pub fn certificate(mut self, cert: Option<&ObjectRef>) -> Self {
        self.spec.ssl_key_and_certificate_refs = cert.map(|c| c.url.clone()).into_iter().collect();
        self
    }

    pub fn listener(mut self, port: u16, enable_ssl: bool) -> Self {
        self.spec.services = vec![ServicePort { port, enable_ssl }];
        self
    }

    pub fn build(self) -> MacroRequest {
        MacroRequest {
            uri_path: "/api/virtualservice",
            model_name: "virtualservice",
            data: self.spec,
        }
    }
}

/// Composite creation request accepted by `/api/macro`.
#[derive(Debug, Clone, Serialize)]
pub struct MacroRequest {
    pub uri_path: &'static str,
    pub model_name: &'static str,
    pub data: VirtualServiceSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pool_keeps_unknown_fields() {
        let raw = json!({
            "uuid": "pool-1",
            "name": "web-pool-80-tcp",
            "url": "https://avi/api/pool/pool-1",
            "lb_algorithm": "LB_ALGORITHM_LEAST_CONNECTIONS",
            "servers": [{"ip": {"addr": "10.0.0.5", "type": "V4"}, "port": 8080, "ratio": 2}]
        });
        let pool: Pool = serde_json::from_value(raw).unwrap();
        assert_eq!(pool.servers[0].key(pool.default_port()), TaskKey::new("10.0.0.5", 8080));

        let back = serde_json::to_value(&pool).unwrap();
        assert_eq!(back["lb_algorithm"], "LB_ALGORITHM_LEAST_CONNECTIONS");
        assert_eq!(back["servers"][0]["ratio"], 2);
    }

    #[test]
    fn pool_without_servers_decodes() {
        let pool: Pool =
            serde_json::from_value(json!({"uuid": "p", "name": "n", "url": "u"})).unwrap();
        assert!(pool.servers.is_empty());
    }

    #[test]
    fn portless_member_uses_the_pool_default() {
        let raw = json!({"uuid": "p", "name": "n", "url": "u",
                         "default_server_port": 8080,
                         "servers": [{"ip": {"addr": "10.0.0.5", "type": "V4"}},
                                     {"ip": {"addr": "10.0.0.6", "type": "V4"}, "port": 9090}]});
        let pool: Pool = serde_json::from_value(raw).unwrap();
        let keys: Vec<TaskKey> = pool.member_keys().collect();
        assert_eq!(
            keys,
            vec![TaskKey::new("10.0.0.5", 8080), TaskKey::new("10.0.0.6", 9090)]
        );

        // Written back without inventing a port.
        let back = serde_json::to_value(&pool).unwrap();
        assert!(back["servers"][0].get("port").is_none());
        assert_eq!(back["default_server_port"], 8080);
    }

    #[test]
    fn pool_without_default_port_falls_back_to_80() {
        let raw = json!({"uuid": "p", "name": "n", "url": "u",
                         "servers": [{"ip": {"addr": "10.0.0.5"}}]});
        let pool: Pool = serde_json::from_value(raw).unwrap();
        assert_eq!(pool.member_keys().next(), Some(TaskKey::new("10.0.0.5", 80)));
    }

    #[test]
    fn malformed_server_port_is_a_decode_error() {
        let raw = json!({"uuid": "p", "name": "n", "url": "u",
                         "servers": [{"ip": {"addr": "10.0.0.5"}, "port": "http"}]});
        assert!(serde_json::from_value::<Pool>(raw).is_err());
    }

    #[test]
    fn macro_request_serializes_the_listener_and_refs() {
        let pool = Pool {
            uuid: "pool-1".into(),
            name: "web-pool-443-tcp".into(),
            url: "https://avi/api/pool/pool-1".into(),
            default_server_port: None,
            servers: vec![],
            extra: Map::new(),
        };
        let profile = ObjectRef {
            uuid: "ap-1".into(),
            name: "System-Secure-HTTP".into(),
            url: "https://avi/api/applicationprofile/ap-1".into(),
        };
        let body = VirtualServiceSpec::builder("web-docker-ucp")
            .fqdn("web-docker-ucp.example.com")
            .cloud_name("vmware")
            .application_profile(&profile)
            .pool(&pool)
            .network(None)
            .certificate(None)
            .listener(443, true)
            .build();
        let v = serde_json::to_value(&body).unwrap();

        assert_eq!(v["uri_path"], "/api/virtualservice");
        assert_eq!(v["data"]["pool_ref"], "https://avi/api/pool/pool-1");
        assert_eq!(v["data"]["fqdn"], "web-docker-ucp.example.com");
        assert_eq!(v["data"]["services"], json!([{"port": 443, "enable_ssl": true}]));
        assert_eq!(v["data"]["type"], "VS_TYPE_NORMAL");
        assert!(v["data"].get("network_ref").is_none());
        assert!(v["data"].get("ssl_key_and_certificate_refs").is_none());
    }
}
