use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Service},
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::{self, Config},
    },
};
use tracing::*;

use super::{persist_generated_id, Context, Flow, DEPENDENCY_RETRY, SOFT_CONTINUE};
use crate::api::v1::neonbranch::{NeonBranch, NeonBranchStatus};
use crate::api::v1::neonproject::NeonProject;
use crate::compute::{admin_service, compute_config_map, compute_deployment, postgres_service};
use crate::storage_controller::CoordinationError;
use crate::util::errors::{Error, Result};
use crate::util::ids::generate_neon_id;
use crate::util::secrets::load_key_pair;
use crate::util::status::{set_phases, HasStatus};
use crate::util::store::{KubeStore, ResourceStore};
use crate::util::subresource::{owner_reference, sync_owned, SyncPolicy};

pub const FIELD_MANAGER: &str = "neon-branch-controller";
const CONTROLLER: &str = "branch";
const CREATE_TIMELINE: &str = "create_timeline";

#[instrument(skip(ctx, branch), fields(trace_id, name = %branch.name_any(), namespace = %branch.namespace().unwrap_or_default()))]
pub async fn reconcile<S: ResourceStore>(branch: Arc<NeonBranch>, ctx: Arc<Context<S>>) -> Result<Action> {
    let _timer = ctx.observe(CONTROLLER).await;
    let outcome = reconcile_branch(&ctx, branch.as_ref().clone()).await;
    ctx.conclude(branch.as_ref(), outcome).await
}

pub(crate) async fn reconcile_branch<S: ResourceStore>(ctx: &Context<S>, mut branch: NeonBranch) -> Result<Flow> {
    let name = branch.name_any();
    let namespace = branch
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of NeonBranch {name}")))?;

    if branch.phase().is_empty() {
        set_phases(&ctx.store, &mut branch, FIELD_MANAGER, &[&|s: &mut NeonBranchStatus| {
            s.creating()
        }])
        .await?;
    }

    let Some(timeline_id) = branch.timeline_id().map(str::to_string) else {
        let timeline_id = generate_neon_id();
        if persist_generated_id::<_, NeonBranch>(&ctx.store, &namespace, &name, "timeline_id", &timeline_id, FIELD_MANAGER)
            .await?
        {
            info!(%name, %timeline_id, "generated timeline id");
        }
        return Ok(Flow::RequeueAfter(SOFT_CONTINUE));
    };

    let project_name = branch.spec.project_id.clone();
    let project = ctx.store.get::<NeonProject>(&namespace, &project_name).await?;
    let provisioned = project.and_then(|p| {
        let tenant_id = p.tenant_id()?.to_string();
        Some((p, tenant_id))
    });
    let Some((project, tenant_id)) = provisioned else {
        let message = format!("project {project_name} has no tenant yet or does not exist");
        info!(%name, %project_name, "waiting for project");
        set_phases(&ctx.store, &mut branch, FIELD_MANAGER, &[&|s: &mut NeonBranchStatus| {
            s.project_not_ready(&message)
        }])
        .await?;
        return Ok(Flow::RequeueAfter(DEPENDENCY_RETRY));
    };

    let cluster = project.spec.cluster_name.as_str();
    match ctx
        .coordinator
        .create_timeline(cluster, &tenant_id, &timeline_id, branch.spec.pg_version)
        .await
    {
        Ok(outcome) => ctx.metrics.coordination_call(CREATE_TIMELINE, outcome.as_str()),
        Err(err) => {
            ctx.metrics.coordination_call(CREATE_TIMELINE, err.metric_label());
            warn!(%name, %tenant_id, %timeline_id, error = %err, "timeline creation failed");
            let message = match &err {
                CoordinationError::Connection(reason) => reason.clone(),
                CoordinationError::UnexpectedStatus { status, .. } => {
                    format!("Storage controller returned status: {status}")
                }
            };
            set_phases(&ctx.store, &mut branch, FIELD_MANAGER, &[&|s: &mut NeonBranchStatus| {
                s.timeline_creation_failed(&message)
            }])
            .await?;
            return Ok(Flow::RequeueAfter(DEPENDENCY_RETRY));
        }
    }

    if let Err(err) = sync_compute(ctx, &branch, &name, &namespace, &project).await {
        error!(%name, error = %err, "failed to create compute resources");
        set_phases(&ctx.store, &mut branch, FIELD_MANAGER, &[&|s: &mut NeonBranchStatus| {
            s.cannot_create_resources()
        }])
        .await?;
        return Err(err);
    }

    set_phases(&ctx.store, &mut branch, FIELD_MANAGER, &[&|s: &mut NeonBranchStatus| {
        s.ready()
    }])
    .await?;
    Ok(Flow::Continue)
}

/// Spec config map, compute deployment, admin service and postgres service, in that order.
async fn sync_compute<S: ResourceStore>(
    ctx: &Context<S>,
    branch: &NeonBranch,
    name: &str,
    namespace: &str,
    project: &NeonProject,
) -> Result<()> {
    let owner = owner_reference(branch)?;
    let key_pair = load_key_pair(&ctx.store, namespace, &project.spec.cluster_name).await?;

    sync_owned(
        &ctx.store,
        &owner,
        compute_config_map(name, namespace, project, &key_pair)?,
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        compute_deployment(branch, name, namespace, project, &ctx.config.operator_url),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        admin_service(branch, name, namespace, project),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    sync_owned(
        &ctx.store,
        &owner,
        postgres_service(branch, name, namespace, project),
        SyncPolicy::Converge,
        FIELD_MANAGER,
    )
    .await?;
    Ok(())
}

fn error_policy<S: ResourceStore>(branch: Arc<NeonBranch>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    ctx.on_error(CONTROLLER, branch.as_ref(), error)
}

/// Initialize the controller (given the crd is installed)
pub async fn run(client: Client, ctx: Arc<Context<KubeStore>>) {
    let branches = Api::<NeonBranch>::all(client.clone());
    if let Err(e) = branches.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    Controller::new(branches, Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
