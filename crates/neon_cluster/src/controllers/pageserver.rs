use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::{self, Config},
    },
};
use tracing::*;

use super::{pod_is_ready, Context, Flow, DEPENDENCY_RETRY, INVALID_SPEC_RETRY};
use crate::api::v1::neoncluster::NeonCluster;
use crate::api::v1alpha1::neonpageserver::{NeonPageserver, NeonPageserverStatus};
use crate::pageserver::{self, config::RemoteStorage, pageserver_name};
use crate::util::errors::{Error, Result};
use crate::util::labels::COMPONENT_LABEL;
use crate::util::secrets::get_secret;
use crate::util::status::{set_phases, HasStatus};
use crate::util::store::{KubeStore, ResourceStore};
use crate::util::subresource::{owner_reference, sync_owned, SyncPolicy};

pub const FIELD_MANAGER: &str = "neon-pageserver-controller";
const CONTROLLER: &str = "pageserver";

#[instrument(skip(ctx, pageserver), fields(trace_id, name = %pageserver.name_any(), namespace = %pageserver.namespace().unwrap_or_default()))]
pub async fn reconcile<S: ResourceStore>(pageserver: Arc<NeonPageserver>, ctx: Arc<Context<S>>) -> Result<Action> {
    let _timer = ctx.observe(CONTROLLER).await;
    let outcome = reconcile_pageserver(&ctx, pageserver.as_ref().clone()).await;
    ctx.conclude(pageserver.as_ref(), outcome).await
}

pub(crate) async fn reconcile_pageserver<S: ResourceStore>(
    ctx: &Context<S>,
    mut pageserver: NeonPageserver,
) -> Result<Flow> {
    let name = pageserver.name_any();
    let namespace = pageserver
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of NeonPageserver {name}")))?;

    if pageserver.phase().is_empty() {
        set_phases(&ctx.store, &mut pageserver, FIELD_MANAGER, &[&|s: &mut NeonPageserverStatus| {
            s.creating()
        }])
        .await?;
    }

    let cluster_name = pageserver.spec.cluster.clone();
    let Some(cluster) = ctx.store.get::<NeonCluster>(&namespace, &cluster_name).await? else {
        let message = format!("cluster {cluster_name} not found");
        warn!(%name, %cluster_name, "pageserver references a missing cluster");
        set_phases(&ctx.store, &mut pageserver, FIELD_MANAGER, &[&|s: &mut NeonPageserverStatus| {
            s.invalid_spec(&message)
        }])
        .await?;
        return Ok(Flow::RequeueAfter(INVALID_SPEC_RETRY));
    };

    if let Err(err) = sync_unit(ctx, &pageserver, &name, &namespace, &cluster).await {
        error!(%name, error = %err, "failed to create pageserver resources");
        set_phases(&ctx.store, &mut pageserver, FIELD_MANAGER, &[&|s: &mut NeonPageserverStatus| {
            s.cannot_create_resources()
        }])
        .await?;
        return Err(err);
    }

    let pod_name = pageserver_name(&cluster_name, pageserver.spec.id);
    if pod_is_ready(&ctx.store, &namespace, &pod_name).await? {
        set_phases(&ctx.store, &mut pageserver, FIELD_MANAGER, &[&|s: &mut NeonPageserverStatus| {
            s.ready()
        }])
        .await?;
        Ok(Flow::Continue)
    } else {
        debug!(%name, %pod_name, "waiting for pageserver pod");
        set_phases(&ctx.store, &mut pageserver, FIELD_MANAGER, &[&|s: &mut NeonPageserverStatus| {
            s.creating()
        }])
        .await?;
        Ok(Flow::RequeueAfter(DEPENDENCY_RETRY))
    }
}

/// Volume claim (create-only), config map, pod, service.
async fn sync_unit<S: ResourceStore>(
    ctx: &Context<S>,
    pageserver: &NeonPageserver,
    name: &str,
    namespace: &str,
    cluster: &NeonCluster,
) -> Result<()> {
    let owner = owner_reference(pageserver)?;

    sync_owned(
        &ctx.store,
        &owner,
        pageserver::persistent_volume_claim_for(pageserver, name, namespace),
        SyncPolicy::CreateOnly,
        FIELD_MANAGER,
    )
    .await?;

    let bucket = get_secret(&ctx.store, namespace, &pageserver.spec.bucket_credentials_secret).await?;
    let storage = RemoteStorage::from_secret(&bucket)?;
    sync_owned(
        &ctx.store,
        &owner,
        pageserver::config::config_map(pageserver, name, namespace, &storage),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;

    sync_owned(
        &ctx.store,
        &owner,
        pageserver::pod::pod(pageserver, name, namespace, cluster),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        pageserver::service::service(pageserver, name, namespace),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    Ok(())
}

fn error_policy<S: ResourceStore>(pageserver: Arc<NeonPageserver>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    ctx.on_error(CONTROLLER, pageserver.as_ref(), error)
}

/// Initialize the controller (given the crd is installed)
pub async fn run(client: Client, ctx: Arc<Context<KubeStore>>) {
    let pageservers = Api::<NeonPageserver>::all(client.clone());
    if let Err(e) = pageservers.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let owned = || watcher::Config::default().labels(&format!("{COMPONENT_LABEL}=pageserver"));
    Controller::new(pageservers, Config::default().any_semantic())
        .owns(Api::<Pod>::all(client.clone()), owned())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), owned())
        .owns(Api::<ConfigMap>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{context, mark_pod_ready, unused_coordinator};
    use crate::fixtures::{self, MemoryStore, Verb, NAMESPACE};
    use crate::pageserver::config::CONFIG_FILE;

    fn seeded(with_bucket: bool) -> (MemoryStore, NeonPageserver) {
        let store = MemoryStore::default();
        store.insert(fixtures::cluster("c1"));
        if with_bucket {
            store.insert(fixtures::bucket_secret("c1-bucket"));
        }
        let pageserver = store.insert(fixtures::pageserver("ps-1", "c1", 1));
        (store, pageserver)
    }

    #[tokio::test]
    async fn creates_unit_in_order_and_waits_for_the_pod() {
        let (store, pageserver) = seeded(true);
        let ctx = context(&store, unused_coordinator());

        let flow = reconcile_pageserver(&ctx, pageserver).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(DEPENDENCY_RETRY));
        let kinds: Vec<String> = store
            .writes()
            .into_iter()
            .filter(|w| w.verb == Verb::Create)
            .map(|w| w.kind)
            .collect();
        assert_eq!(kinds, vec!["PersistentVolumeClaim", "ConfigMap", "Pod", "Service"]);

        let config: ConfigMap = store.fetch(NAMESPACE, "c1-pageserver-1").unwrap();
        let toml = &config.data.unwrap()[CONFIG_FILE];
        assert!(toml.contains(r#"bucket_name = "neon-bucket""#));
        assert!(toml.contains(r#"bucket_region = "eu-north-1""#));
    }

    #[tokio::test]
    async fn ready_pod_makes_the_pageserver_ready() {
        let (store, pageserver) = seeded(true);
        let ctx = context(&store, unused_coordinator());
        reconcile_pageserver(&ctx, pageserver).await.unwrap();
        mark_pod_ready(&store, "c1-pageserver-1");

        let pageserver: NeonPageserver = store.fetch(NAMESPACE, "ps-1").unwrap();
        let flow = reconcile_pageserver(&ctx, pageserver).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let stored: NeonPageserver = store.fetch(NAMESPACE, "ps-1").unwrap();
        assert_eq!(stored.phase(), "Ready");

        let writes = store.write_count();
        reconcile_pageserver(&ctx, stored).await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn missing_cluster_is_an_invalid_spec() {
        let store = MemoryStore::default();
        let pageserver = store.insert(fixtures::pageserver("ps-1", "nope", 1));
        let ctx = context(&store, unused_coordinator());

        let flow = reconcile_pageserver(&ctx, pageserver).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(INVALID_SPEC_RETRY));
        let stored: NeonPageserver = store.fetch(NAMESPACE, "ps-1").unwrap();
        assert_eq!(stored.phase(), "InvalidSpec");
    }

    #[tokio::test]
    async fn missing_bucket_secret_fails_after_the_claim() {
        let (store, pageserver) = seeded(false);
        let ctx = context(&store, unused_coordinator());

        let err = reconcile_pageserver(&ctx, pageserver).await.unwrap_err();

        assert!(err.is_not_found());
        let stored: NeonPageserver = store.fetch(NAMESPACE, "ps-1").unwrap();
        assert_eq!(stored.phase(), "CannotCreateResources");
        assert!(store.fetch::<PersistentVolumeClaim>(NAMESPACE, "c1-pageserver-1").is_some());
        assert_eq!(store.count::<Pod>(), 0);
    }

    #[tokio::test]
    async fn second_pass_without_changes_is_write_free() {
        let (store, pageserver) = seeded(true);
        let ctx = context(&store, unused_coordinator());
        reconcile_pageserver(&ctx, pageserver).await.unwrap();

        let writes = store.write_count();
        let pageserver: NeonPageserver = store.fetch(NAMESPACE, "ps-1").unwrap();
        let flow = reconcile_pageserver(&ctx, pageserver).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(DEPENDENCY_RETRY));
        assert_eq!(store.write_count(), writes);
    }
}
