use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
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
use crate::api::v1alpha1::neonsafekeeper::{NeonSafekeeper, NeonSafekeeperStatus};
use crate::safekeeper::{self, safekeeper_name};
use crate::util::errors::{Error, Result};
use crate::util::labels::COMPONENT_LABEL;
use crate::util::status::{set_phases, HasStatus};
use crate::util::store::{KubeStore, ResourceStore};
use crate::util::subresource::{owner_reference, sync_owned, SyncPolicy};

pub const FIELD_MANAGER: &str = "neon-safekeeper-controller";
const CONTROLLER: &str = "safekeeper";

#[instrument(skip(ctx, safekeeper), fields(trace_id, name = %safekeeper.name_any(), namespace = %safekeeper.namespace().unwrap_or_default()))]
pub async fn reconcile<S: ResourceStore>(safekeeper: Arc<NeonSafekeeper>, ctx: Arc<Context<S>>) -> Result<Action> {
    let _timer = ctx.observe(CONTROLLER).await;
    let outcome = reconcile_safekeeper(&ctx, safekeeper.as_ref().clone()).await;
    ctx.conclude(safekeeper.as_ref(), outcome).await
}

pub(crate) async fn reconcile_safekeeper<S: ResourceStore>(
    ctx: &Context<S>,
    mut safekeeper: NeonSafekeeper,
) -> Result<Flow> {
    let name = safekeeper.name_any();
    let namespace = safekeeper
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of NeonSafekeeper {name}")))?;

    if safekeeper.phase().is_empty() {
        set_phases(&ctx.store, &mut safekeeper, FIELD_MANAGER, &[&|s: &mut NeonSafekeeperStatus| {
            s.creating()
        }])
        .await?;
    }

    let cluster_name = safekeeper.spec.cluster.clone();
    let Some(cluster) = ctx.store.get::<NeonCluster>(&namespace, &cluster_name).await? else {
        let message = format!("cluster {cluster_name} not found");
        warn!(%name, %cluster_name, "safekeeper references a missing cluster");
        set_phases(&ctx.store, &mut safekeeper, FIELD_MANAGER, &[&|s: &mut NeonSafekeeperStatus| {
            s.invalid_spec(&message)
        }])
        .await?;
        return Ok(Flow::RequeueAfter(INVALID_SPEC_RETRY));
    };

    if let Err(err) = sync_unit(ctx, &safekeeper, &name, &namespace, &cluster.spec.neon_image).await {
        error!(%name, error = %err, "failed to create safekeeper resources");
        set_phases(&ctx.store, &mut safekeeper, FIELD_MANAGER, &[&|s: &mut NeonSafekeeperStatus| {
            s.cannot_create_resources()
        }])
        .await?;
        return Err(err);
    }

    let pod_name = safekeeper_name(&cluster_name, safekeeper.spec.id);
    if pod_is_ready(&ctx.store, &namespace, &pod_name).await? {
        set_phases(&ctx.store, &mut safekeeper, FIELD_MANAGER, &[&|s: &mut NeonSafekeeperStatus| {
            s.ready()
        }])
        .await?;
        Ok(Flow::Continue)
    } else {
        debug!(%name, %pod_name, "waiting for safekeeper pod");
        set_phases(&ctx.store, &mut safekeeper, FIELD_MANAGER, &[&|s: &mut NeonSafekeeperStatus| {
            s.creating()
        }])
        .await?;
        Ok(Flow::RequeueAfter(DEPENDENCY_RETRY))
    }
}

/// Volume claim (create-only), pod, service.
async fn sync_unit<S: ResourceStore>(
    ctx: &Context<S>,
    safekeeper: &NeonSafekeeper,
    name: &str,
    namespace: &str,
    image: &str,
) -> Result<()> {
    let owner = owner_reference(safekeeper)?;

    sync_owned(
        &ctx.store,
        &owner,
        safekeeper::persistent_volume_claim_for(safekeeper, name, namespace),
        SyncPolicy::CreateOnly,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        safekeeper::pod(safekeeper, name, namespace, image),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        safekeeper::service(safekeeper, name, namespace),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    Ok(())
}

fn error_policy<S: ResourceStore>(safekeeper: Arc<NeonSafekeeper>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    ctx.on_error(CONTROLLER, safekeeper.as_ref(), error)
}

/// Initialize the controller (given the crd is installed)
pub async fn run(client: Client, ctx: Arc<Context<KubeStore>>) {
    let safekeepers = Api::<NeonSafekeeper>::all(client.clone());
    if let Err(e) = safekeepers.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let owned = || watcher::Config::default().labels(&format!("{COMPONENT_LABEL}=safekeeper"));
    Controller::new(safekeepers, Config::default().any_semantic())
        .owns(Api::<Pod>::all(client.clone()), owned())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
