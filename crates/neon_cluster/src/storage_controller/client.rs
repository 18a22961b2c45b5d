use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{error, info};

#[cfg(test)]
use mockall::automock;

use super::types::{LocationConfigRequest, TimelineCreateRequest};
use crate::api::v1::PGVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The request never got an HTTP answer (DNS, refused, timeout).
    #[error("storage controller request failed: {0}")]
    Connection(String),

    #[error("storage controller returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

impl ProvisionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionOutcome::Created => "created",
            ProvisionOutcome::AlreadyExists => "already_exists",
        }
    }
}

impl CoordinationError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            CoordinationError::Connection(_) => "connection_error",
            CoordinationError::UnexpectedStatus { .. } => "unexpected_status",
        }
    }
}

/// Tenant and timeline provisioning on a cluster's storage controller.
///
/// Both calls are idempotent on the storage side and are repeated on every pass, an existing
/// tenant or timeline is reported as [`ProvisionOutcome::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageCoordinator: Send + Sync {
    /// Attaches `tenant_id` as a single attached location.
    async fn attach_tenant(&self, cluster: &str, tenant_id: &str) -> Result<ProvisionOutcome, CoordinationError>;

    /// Creates `timeline_id` under `tenant_id`. A timeline that already exists is not an error.
    async fn create_timeline(
        &self,
        cluster: &str,
        tenant_id: &str,
        timeline_id: &str,
        pg_version: PGVersion,
    ) -> Result<ProvisionOutcome, CoordinationError>;
}

/// [`StorageCoordinator`] speaking HTTP to `{cluster}-storage-controller`.
#[derive(Clone)]
pub struct StorageControllerClient {
    url_template: String,
    attach_timeout: Duration,
    timeline_timeout: Duration,
    client: reqwest::Client,
}

impl StorageControllerClient {
    /// `url_template` may contain `{cluster}`, replaced by the cluster name on every call.
    pub fn new(url_template: impl Into<String>, attach_timeout: Duration, timeline_timeout: Duration) -> Self {
        Self {
            url_template: url_template.into(),
            attach_timeout,
            timeline_timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self, cluster: &str) -> String {
        self.url_template
            .replace("{cluster}", cluster)
            .trim_end_matches('/')
            .to_string()
    }
}

async fn unexpected(response: reqwest::Response) -> CoordinationError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CoordinationError::UnexpectedStatus { status, body }
}

#[async_trait]
impl StorageCoordinator for StorageControllerClient {
    async fn attach_tenant(&self, cluster: &str, tenant_id: &str) -> Result<ProvisionOutcome, CoordinationError> {
        let url = format!("{}/v1/tenant/{}/location_config", self.base_url(cluster), tenant_id);
        info!(%url, "attaching tenant");

        let response = self
            .client
            .put(&url)
            .timeout(self.attach_timeout)
            .json(&LocationConfigRequest::attach_single())
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "failed to reach storage controller");
                CoordinationError::Connection(e.to_string())
            })?;

        match response.status() {
            status if status.is_success() => Ok(ProvisionOutcome::Created),
            StatusCode::CONFLICT => {
                info!(%tenant_id, "tenant already attached");
                Ok(ProvisionOutcome::AlreadyExists)
            }
            _ => {
                let err = unexpected(response).await;
                error!(%url, error = %err, "tenant attach rejected");
                Err(err)
            }
        }
    }

    async fn create_timeline(
        &self,
        cluster: &str,
        tenant_id: &str,
        timeline_id: &str,
        pg_version: PGVersion,
    ) -> Result<ProvisionOutcome, CoordinationError> {
        let url = format!("{}/v1/tenant/{}/timeline", self.base_url(cluster), tenant_id);
        info!(%url, %timeline_id, "creating timeline");

        let body = TimelineCreateRequest {
            new_timeline_id: timeline_id.to_string(),
            pg_version: pg_version.major(),
        };
        let response = self
            .client
            .post(&url)
            .timeout(self.timeline_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "failed to reach storage controller");
                CoordinationError::Connection(e.to_string())
            })?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(ProvisionOutcome::Created),
            StatusCode::CONFLICT => {
                info!(%timeline_id, "timeline already exists");
                Ok(ProvisionOutcome::AlreadyExists)
            }
            _ => {
                let err = unexpected(response).await;
                error!(%url, error = %err, "timeline creation rejected");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TENANT: &str = "0123456789abcdef0123456789abcdef";
    const TIMELINE: &str = "fedcba9876543210fedcba9876543210";

    fn client_for(server: &MockServer) -> StorageControllerClient {
        StorageControllerClient::new(server.uri(), Duration::from_secs(5), Duration::from_secs(5))
    }

    #[test]
    fn template_is_expanded_per_cluster() {
        let client = StorageControllerClient::new(
            "http://{cluster}-storage-controller:8080/",
            Duration::from_secs(30),
            Duration::from_secs(10),
        );
        assert_eq!(client.base_url("c1"), "http://c1-storage-controller:8080");
    }

    #[tokio::test]
    async fn attach_sends_single_attached_location() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/v1/tenant/{TENANT}/location_config")))
            .and(body_json(json!({"mode": "AttachedSingle", "generation": 1, "tenant_conf": {}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"shards": []})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).attach_tenant("c1", TENANT).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::Created);
    }

    #[tokio::test]
    async fn attach_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("shutting down"))
            .mount(&server)
            .await;

        let err = client_for(&server).attach_tenant("c1", TENANT).await.unwrap_err();
        assert_eq!(
            err,
            CoordinationError::UnexpectedStatus {
                status: 503,
                body: "shutting down".to_string()
            }
        );
    }

    #[tokio::test]
    async fn existing_tenant_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/v1/tenant/{TENANT}/location_config")))
            .respond_with(ResponseTemplate::new(409).set_body_string("tenant already exists"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).attach_tenant("c1", TENANT).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_connection_error() {
        // Reserve a free port, then release it so nothing listens there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = StorageControllerClient::new(
            format!("http://127.0.0.1:{port}"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let err = client.attach_tenant("c1", TENANT).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Connection(_)));
    }

    #[tokio::test]
    async fn timeline_creation_posts_numeric_pg_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/tenant/{TENANT}/timeline")))
            .and(body_json(json!({"new_timeline_id": TIMELINE, "pg_version": 16})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .create_timeline("c1", TENANT, TIMELINE, PGVersion::PG16)
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::Created);
    }

    #[tokio::test]
    async fn existing_timeline_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("timeline already exists"))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .create_timeline("c1", TENANT, TIMELINE, PGVersion::PG15)
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn timeline_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_timeline("c1", TENANT, TIMELINE, PGVersion::PG16)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::UnexpectedStatus { status: 500, .. }));
        assert!(err.to_string().contains("boom"));
    }
}
