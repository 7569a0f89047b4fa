use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Cloud name meaning "no explicit cloud reference needed".
pub const DEFAULT_CLOUD: &str = "Default-Cloud";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Base URL of the controller, e.g. `https://avi.example.com`.
    pub url: String,
    pub username: String,
    pub password: String,
    pub tenant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    pub timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost".into(),
            username: "admin".into(),
            password: String::new(),
            tenant: "admin".into(),
            api_version: None,
            insecure: false,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub controller: ControllerConfig,
    pub cloud_name: String,
    /// Appended to virtual service names to form their FQDN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_subdomain: Option<String>,
    /// IPAM network the VIP is allocated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipam_network: Option<String>,
    /// Certificate attached to TLS virtual services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<String>,
    /// Capacity of each per-service work queue.
    pub queue_depth: usize,
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            cloud_name: DEFAULT_CLOUD.into(),
            dns_subdomain: None,
            ipam_network: None,
            ssl_certificate: None,
            queue_depth: 32,
            poll_interval_secs: 10,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("AVILB_CONTROLLER_PASSWORD_FILE") {
            config.controller.password = std::fs::read_to_string(secret_file)?
                .trim()
                .to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("avilb.toml"))
            .merge(Json::file("avilb.json"))
            .merge(Env::prefixed("AVILB_").split("__"))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.queue_depth == 0 {
            anyhow::bail!("queue_depth must be at least 1");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.cloud_name.is_empty() {
            anyhow::bail!("cloud_name must not be empty");
        }
        Ok(())
    }

    /// Whether pools need an explicit cloud reference.
    pub fn needs_cloud_ref(&self) -> bool {
        self.cloud_name != DEFAULT_CLOUD
    }

    pub fn fqdn(&self, vs_name: &str) -> String {
        match self.dns_subdomain.as_deref() {
            Some(sub) if !sub.is_empty() => format!("{}.{}", vs_name, sub),
            _ => vs_name.to_string(),
        }
    }
}
