use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Secret, Service},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{Api, ListParams, ObjectMeta, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::{self, Config},
    },
};
use tracing::*;

use super::{Context, Flow, DEPENDENCY_RETRY};
use crate::api::v1::neoncluster::{NeonCluster, NeonClusterStatus};
use crate::storage_broker::{self, storage_broker_name};
use crate::storage_controller::{resources as storage_controller, storage_controller_name};
use crate::util::errors::{Error, Result};
use crate::util::jwt_keys::{jwt_secret_name, Ed25519KeyPair};
use crate::util::labels::component_labels;
use crate::util::secrets::{get_secret, secret_value};
use crate::util::status::{set_phases, HasStatus};
use crate::util::store::{KubeStore, ResourceStore};
use crate::util::subresource::{owner_reference, sync_owned, SyncPolicy};

pub const FIELD_MANAGER: &str = "neon-cluster-controller";
const CONTROLLER: &str = "cluster";

#[instrument(skip(ctx, cluster), fields(trace_id, name = %cluster.name_any(), namespace = %cluster.namespace().unwrap_or_default()))]
pub async fn reconcile<S: ResourceStore>(cluster: Arc<NeonCluster>, ctx: Arc<Context<S>>) -> Result<Action> {
    let _timer = ctx.observe(CONTROLLER).await;
    let outcome = reconcile_cluster(&ctx, cluster.as_ref().clone()).await;
    ctx.conclude(cluster.as_ref(), outcome).await
}

pub(crate) async fn reconcile_cluster<S: ResourceStore>(ctx: &Context<S>, mut cluster: NeonCluster) -> Result<Flow> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of NeonCluster {name}")))?;

    if cluster.phase().is_empty() {
        set_phases(&ctx.store, &mut cluster, FIELD_MANAGER, &[&|s: &mut NeonClusterStatus| {
            s.creating()
        }])
        .await?;
    }

    if let Err(err) = sync_children(ctx, &cluster, &name, &namespace).await {
        error!(%name, error = %err, "failed to create cluster resources");
        set_phases(&ctx.store, &mut cluster, FIELD_MANAGER, &[&|s: &mut NeonClusterStatus| {
            s.cannot_create_resources()
        }])
        .await?;
        return Err(err);
    }

    let controller_ready = ready_replicas(&ctx.store, &namespace, &storage_controller_name(&name)).await?;
    let broker_ready = ready_replicas(&ctx.store, &namespace, &storage_broker_name(&name)).await?;
    let record = move |s: &mut NeonClusterStatus| {
        s.storage_controller_status.ready_instances = controller_ready;
        s.storage_broker_status.ready_instances = broker_ready;
    };

    if controller_ready >= 1 && broker_ready >= 1 {
        set_phases(&ctx.store, &mut cluster, FIELD_MANAGER, &[&record, &|s: &mut NeonClusterStatus| {
            s.ready()
        }])
        .await?;
        info!(%name, "cluster is ready");
        Ok(Flow::Continue)
    } else {
        debug!(%name, controller_ready, broker_ready, "waiting for cluster components");
        set_phases(&ctx.store, &mut cluster, FIELD_MANAGER, &[&record, &|s: &mut NeonClusterStatus| {
            s.creating()
        }])
        .await?;
        Ok(Flow::RequeueAfter(DEPENDENCY_RETRY))
    }
}

/// Signing keys first, then the storage controller, then the storage broker.
async fn sync_children<S: ResourceStore>(
    ctx: &Context<S>,
    cluster: &NeonCluster,
    name: &str,
    namespace: &str,
) -> Result<()> {
    let owner = owner_reference(cluster)?;

    ensure_jwt_secret(&ctx.store, &owner, name, namespace).await?;

    let database = &cluster.spec.storage_controller_database_secret;
    let secret = get_secret(&ctx.store, namespace, &database.name).await?;
    secret_value(&secret, &database.key)?;

    sync_owned(
        &ctx.store,
        &owner,
        storage_controller::deployment(cluster, name, namespace),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        storage_controller::service(name, namespace),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;

    sync_owned(
        &ctx.store,
        &owner,
        storage_broker::deployment(cluster, name, namespace),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        storage_broker::service(name, namespace),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;

    Ok(())
}

/// Creates the cluster's signing keypair secret. An existing secret is never regenerated.
async fn ensure_jwt_secret<S: ResourceStore>(
    store: &S,
    owner: &OwnerReference,
    cluster: &str,
    namespace: &str,
) -> Result<()> {
    let secret_name = jwt_secret_name(cluster);
    if store.get::<Secret>(namespace, &secret_name).await?.is_some() {
        debug!(%secret_name, "JWT keys secret already exists");
        return Ok(());
    }

    info!(%cluster, "generating JWT keys");
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name),
            namespace: Some(namespace.to_string()),
            labels: Some(component_labels(cluster, "jwt-keys", ("neon.cluster.name", cluster))),
            ..Default::default()
        },
        data: Some(Ed25519KeyPair::generate().to_secret_data()?),
        ..Default::default()
    };
    sync_owned(store, owner, secret, SyncPolicy::CreateOnly, FIELD_MANAGER).await?;
    Ok(())
}

async fn ready_replicas<S: ResourceStore>(store: &S, namespace: &str, name: &str) -> Result<i32> {
    Ok(store
        .get::<Deployment>(namespace, name)
        .await?
        .and_then(|d| d.status)
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0))
}

fn error_policy<S: ResourceStore>(cluster: Arc<NeonCluster>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    ctx.on_error(CONTROLLER, cluster.as_ref(), error)
}

/// Initialize the controller (given the crd is installed)
pub async fn run(client: Client, ctx: Arc<Context<KubeStore>>) {
    let clusters = Api::<NeonCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    Controller::new(clusters, Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Secret>::all(client.clone()), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{context, unused_coordinator};
    use crate::fixtures::{self, MemoryStore, Verb, NAMESPACE};
    use crate::util::jwt_keys::PRIVATE_KEY_FIELD;
    use crate::util::status::{is_status_condition_true, READY_CONDITION};

    fn seeded() -> (MemoryStore, NeonCluster) {
        let store = MemoryStore::default();
        store.insert(fixtures::database_secret("c1-db"));
        let cluster = store.insert(fixtures::cluster("c1"));
        (store, cluster)
    }

    fn mark_ready(store: &MemoryStore, name: &str) {
        store.update::<Deployment>(NAMESPACE, name, |doc| {
            doc["status"] = serde_json::json!({"readyReplicas": 1, "replicas": 1});
        });
    }

    #[tokio::test]
    async fn first_pass_creates_components_and_waits() {
        let (store, cluster) = seeded();
        let ctx = context(&store, unused_coordinator());

        let flow = reconcile_cluster(&ctx, cluster).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(DEPENDENCY_RETRY));
        let stored: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        assert_eq!(stored.phase(), "Creating");

        let secret: Secret = store.fetch(NAMESPACE, "cluster-c1-jwt").unwrap();
        assert!(secret.data.unwrap().contains_key(PRIVATE_KEY_FIELD));
        assert!(store.fetch::<Deployment>(NAMESPACE, "c1-storage-controller").is_some());
        assert!(store.fetch::<Service>(NAMESPACE, "c1-storage-controller").is_some());
        assert!(store.fetch::<Deployment>(NAMESPACE, "c1-storage-broker").is_some());
        assert!(store.fetch::<Service>(NAMESPACE, "c1-storage-broker").is_some());
        assert_eq!(store.writes_of(Verb::Create), 5);
    }

    #[tokio::test]
    async fn becomes_ready_once_components_are_healthy() {
        let (store, cluster) = seeded();
        let ctx = context(&store, unused_coordinator());
        reconcile_cluster(&ctx, cluster).await.unwrap();

        mark_ready(&store, "c1-storage-controller");
        mark_ready(&store, "c1-storage-broker");
        let cluster: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        let flow = reconcile_cluster(&ctx, cluster).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let stored: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("Ready"));
        assert!(is_status_condition_true(&status.conditions, READY_CONDITION));
        assert_eq!(status.storage_controller_status.ready_instances, 1);
        assert_eq!(status.storage_broker_status.ready_instances, 1);
    }

    #[tokio::test]
    async fn steady_state_pass_writes_nothing() {
        let (store, cluster) = seeded();
        let ctx = context(&store, unused_coordinator());
        reconcile_cluster(&ctx, cluster).await.unwrap();
        mark_ready(&store, "c1-storage-controller");
        mark_ready(&store, "c1-storage-broker");
        let cluster: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        reconcile_cluster(&ctx, cluster).await.unwrap();

        let writes = store.write_count();
        let cluster: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        reconcile_cluster(&ctx, cluster).await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn existing_keys_are_kept() {
        let (store, cluster) = seeded();
        let pair = Ed25519KeyPair::generate();
        let original = store.insert(fixtures::jwt_secret("c1", &pair));
        let ctx = context(&store, unused_coordinator());

        reconcile_cluster(&ctx, cluster).await.unwrap();

        let secret: Secret = store.fetch(NAMESPACE, "cluster-c1-jwt").unwrap();
        assert_eq!(secret.data, original.data);
    }

    #[tokio::test]
    async fn missing_database_secret_fails_the_cluster() {
        let store = MemoryStore::default();
        let cluster = store.insert(fixtures::cluster("c1"));
        let ctx = context(&store, unused_coordinator());

        let err = reconcile_cluster(&ctx, cluster).await.unwrap_err();

        assert!(err.is_not_found());
        let stored: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        assert_eq!(stored.phase(), "CannotCreateClusterResources");
        assert!(store.fetch::<Deployment>(NAMESPACE, "c1-storage-controller").is_none());
    }

    #[tokio::test]
    async fn store_failure_marks_cluster_and_propagates() {
        let (store, cluster) = seeded();
        store.fail_next(Verb::Create, "Deployment");
        let ctx = context(&store, unused_coordinator());

        let err = reconcile_cluster(&ctx, cluster).await.unwrap_err();

        assert!(matches!(err, Error::KubeError(_)));
        let stored: NeonCluster = store.fetch(NAMESPACE, "c1").unwrap();
        assert_eq!(stored.phase(), "CannotCreateClusterResources");
    }

    #[tokio::test]
    async fn status_conflict_is_a_hard_error() {
        let (store, cluster) = seeded();
        store.touch_after_next_get::<NeonCluster>(NAMESPACE, "c1");
        let ctx = context(&store, unused_coordinator());

        let err = reconcile_cluster(&ctx, cluster).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
