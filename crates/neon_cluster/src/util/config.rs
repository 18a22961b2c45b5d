use std::time::Duration;

use crate::util::errors::{Error, Result};

pub const DEFAULT_STORAGE_CONTROLLER_URL_TEMPLATE: &str = "http://{cluster}-storage-controller:8080";
pub const DEFAULT_OPERATOR_URL: &str = "http://neon-operator.neon.svc.cluster.local:8080";

/// Process settings, read once from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub http_host: String,
    pub http_port: u16,
    /// Base URL of a cluster's storage controller, `{cluster}` is replaced by the cluster name
    pub storage_controller_url_template: String,
    /// Control-plane URL handed to computes for fetching their spec
    pub operator_url: String,
    pub attach_tenant_timeout: Duration,
    pub create_timeline_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            storage_controller_url_template: DEFAULT_STORAGE_CONTROLLER_URL_TEMPLATE.to_string(),
            operator_url: DEFAULT_OPERATOR_URL.to_string(),
            attach_tenant_timeout: Duration::from_secs(30),
            create_timeline_timeout: Duration::from_secs(10),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            http_host: lookup("HTTP_HOST").unwrap_or(defaults.http_host),
            http_port: parse(&lookup, "HTTP_PORT")?.unwrap_or(defaults.http_port),
            storage_controller_url_template: lookup("STORAGE_CONTROLLER_URL_TEMPLATE")
                .unwrap_or(defaults.storage_controller_url_template),
            operator_url: lookup("OPERATOR_URL").unwrap_or(defaults.operator_url),
            attach_tenant_timeout: parse(&lookup, "ATTACH_TENANT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.attach_tenant_timeout),
            create_timeline_timeout: parse(&lookup, "CREATE_TIMELINE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.create_timeline_timeout),
        })
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("{key}={raw} is not a valid number")))
        })
        .transpose()
}
