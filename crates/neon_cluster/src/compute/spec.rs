use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{compute_deployment_name, CLUSTER_NAME_ANNOTATION};
use crate::api::v1::{neonbranch::NeonBranch, neonproject::NeonProject};
use crate::api::v1alpha1::{neonpageserver::NeonPageserver, neonsafekeeper::NeonSafekeeper};
use crate::pageserver::pageserver_connstring;
use crate::safekeeper::{safekeeper_name, SAFEKEEPER_PG_PORT};
use crate::util::errors::{Error, Result};
use crate::util::secrets::load_key_pair;
use crate::util::store::ResourceStore;

/// Full spec served to compute_ctl for the compute of branch `compute_id`.
///
/// Returns `Ok(None)` when no compute with that id exists.
pub async fn generate_compute_spec<St: ResourceStore>(store: &St, compute_id: &str) -> Result<Option<Value>> {
    info!(%compute_id, "generating compute spec");

    let Some(deployment) = find_compute_deployment(store, compute_id).await? else {
        return Ok(None);
    };
    let namespace = deployment
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of deployment {}", deployment.name_any())))?;

    let Some(branch) = store.get::<NeonBranch>(&namespace, compute_id).await? else {
        warn!(%compute_id, %namespace, "compute deployment without branch");
        return Ok(None);
    };
    let project: NeonProject = store
        .get(&namespace, &branch.spec.project_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("NeonProject {namespace}/{}", branch.spec.project_id)))?;

    let cluster = project.spec.cluster_name.as_str();
    if let Some(annotated) = deployment.annotations().get(CLUSTER_NAME_ANNOTATION) {
        if annotated != cluster {
            warn!(%annotated, %cluster, "compute annotation disagrees with project");
        }
    }

    let tenant_id = project
        .tenant_id()
        .ok_or_else(|| Error::MetadataMissing(format!("tenant_id of NeonProject {}", project.name_any())))?;
    let timeline_id = branch
        .timeline_id()
        .ok_or_else(|| Error::MetadataMissing(format!("timeline_id of NeonBranch {}", branch.name_any())))?;

    let key_pair = load_key_pair(store, &namespace, cluster).await?;
    let safekeepers = safekeeper_connstrings(store, &namespace, cluster).await?;
    let pageserver = pageserver_for(store, &namespace, cluster).await?;

    Ok(Some(json!({
        "format_version": "1.0",
        "compute_ctl_config": {
            "jwks": key_pair.to_jwks(),
        },
        "spec": {
            "format_version": 1.0,
            "suspend_timeout_seconds": -1,
            "cluster": {
                "cluster_id": project.name_any(),
                "name": branch.spec.name,
                "roles": [],
                "databases": [],
                "settings": build_postgres_settings(tenant_id, timeline_id, &safekeepers),
            },
            "delta_operations": [],
            "tenant_id": tenant_id,
            "timeline_id": timeline_id,
            "pageserver_connstring": pageserver,
            "safekeeper_connstrings": safekeepers,
            "mode": "Primary",
        },
        "status": "attached",
    })))
}

async fn find_compute_deployment<St: ResourceStore>(store: &St, compute_id: &str) -> Result<Option<Deployment>> {
    let selector = format!("app={}", compute_deployment_name(compute_id));
    let deployments: Vec<Deployment> = store.list(None, Some(&selector)).await?;
    if deployments.len() > 1 {
        warn!(%compute_id, count = deployments.len(), "several compute deployments match, using the first");
    }
    Ok(deployments.into_iter().next())
}

/// `host:port` of every safekeeper of `cluster`, ordered by id.
async fn safekeeper_connstrings<St: ResourceStore>(store: &St, namespace: &str, cluster: &str) -> Result<Vec<String>> {
    let mut safekeepers: Vec<NeonSafekeeper> = store.list(Some(namespace), None).await?;
    safekeepers.retain(|sk| sk.spec.cluster == cluster);
    safekeepers.sort_by_key(|sk| sk.spec.id);

    Ok(safekeepers
        .iter()
        .map(|sk| {
            format!(
                "{}.{}:{}",
                safekeeper_name(cluster, sk.spec.id),
                namespace,
                SAFEKEEPER_PG_PORT
            )
        })
        .collect())
}

/// Connection string of the lowest-id pageserver of `cluster`.
async fn pageserver_for<St: ResourceStore>(store: &St, namespace: &str, cluster: &str) -> Result<String> {
    let pageservers: Vec<NeonPageserver> = store.list(Some(namespace), None).await?;
    pageservers
        .iter()
        .filter(|ps| ps.spec.cluster == cluster)
        .map(|ps| ps.spec.id)
        .min()
        .map(|id| pageserver_connstring(cluster, id, namespace))
        .ok_or_else(|| Error::NotFound(format!("NeonPageserver of cluster {namespace}/{cluster}")))
}

fn build_postgres_settings(tenant_id: &str, timeline_id: &str, safekeepers: &[String]) -> Vec<Value> {
    vec![
        json!({"name": "fsync", "value": "off", "vartype": "bool"}),
        json!({"name": "wal_level", "value": "logical", "vartype": "enum"}),
        json!({"name": "wal_log_hints", "value": "on", "vartype": "bool"}),
        json!({"name": "log_connections", "value": "on", "vartype": "bool"}),
        json!({"name": "port", "value": "55433", "vartype": "integer"}),
        json!({"name": "shared_buffers", "value": "1MB", "vartype": "string"}),
        json!({"name": "max_connections", "value": "100", "vartype": "integer"}),
        json!({"name": "listen_addresses", "value": "0.0.0.0", "vartype": "string"}),
        json!({"name": "max_wal_senders", "value": "10", "vartype": "integer"}),
        json!({"name": "max_replication_slots", "value": "10", "vartype": "integer"}),
        json!({"name": "wal_sender_timeout", "value": "5s", "vartype": "string"}),
        json!({"name": "wal_keep_size", "value": "0", "vartype": "integer"}),
        json!({"name": "password_encryption", "value": "md5", "vartype": "enum"}),
        json!({"name": "restart_after_crash", "value": "off", "vartype": "bool"}),
        json!({"name": "synchronous_standby_names", "value": "walproposer", "vartype": "string"}),
        json!({"name": "shared_preload_libraries", "value": "neon", "vartype": "string"}),
        json!({"name": "neon.safekeepers", "value": safekeepers.join(","), "vartype": "string"}),
        json!({"name": "neon.timeline_id", "value": timeline_id, "vartype": "string"}),
        json!({"name": "neon.tenant_id", "value": tenant_id, "vartype": "string"}),
        json!({"name": "max_replication_write_lag", "value": "500MB", "vartype": "string"}),
        json!({"name": "max_replication_flush_lag", "value": "10GB", "vartype": "string"}),
        json!({"name": "neon.max_file_cache_size", "value": "1GB", "vartype": "string"}),
    ]
}
