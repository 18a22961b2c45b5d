use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
};
use tracing::*;

use super::{persist_generated_id, Context, Flow, DEPENDENCY_RETRY, SOFT_CONTINUE};
use crate::api::v1::neonproject::{NeonProject, NeonProjectStatus};
use crate::storage_controller::CoordinationError;
use crate::util::errors::{Error, Result};
use crate::util::ids::generate_neon_id;
use crate::util::status::{set_phases, HasStatus};
use crate::util::store::{KubeStore, ResourceStore};

pub const FIELD_MANAGER: &str = "neon-project-controller";
const CONTROLLER: &str = "project";
const ATTACH_TENANT: &str = "attach_tenant";

#[instrument(skip(ctx, project), fields(trace_id, name = %project.name_any(), namespace = %project.namespace().unwrap_or_default()))]
pub async fn reconcile<S: ResourceStore>(project: Arc<NeonProject>, ctx: Arc<Context<S>>) -> Result<Action> {
    let _timer = ctx.observe(CONTROLLER).await;
    let outcome = reconcile_project(&ctx, project.as_ref().clone()).await;
    ctx.conclude(project.as_ref(), outcome).await
}

pub(crate) async fn reconcile_project<S: ResourceStore>(ctx: &Context<S>, mut project: NeonProject) -> Result<Flow> {
    let name = project.name_any();
    let namespace = project
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of NeonProject {name}")))?;

    if project.phase().is_empty() {
        set_phases(&ctx.store, &mut project, FIELD_MANAGER, &[&|s: &mut NeonProjectStatus| {
            s.pending()
        }])
        .await?;
    }

    let Some(tenant_id) = project.tenant_id().map(str::to_string) else {
        set_phases(&ctx.store, &mut project, FIELD_MANAGER, &[&|s: &mut NeonProjectStatus| {
            s.creating()
        }])
        .await?;

        let tenant_id = generate_neon_id();
        if persist_generated_id::<_, NeonProject>(&ctx.store, &namespace, &name, "tenant_id", &tenant_id, FIELD_MANAGER)
            .await?
        {
            info!(%name, %tenant_id, "generated tenant id");
        }
        return Ok(Flow::RequeueAfter(SOFT_CONTINUE));
    };

    let cluster = project.spec.cluster_name.clone();
    match ctx.coordinator.attach_tenant(&cluster, &tenant_id).await {
        Ok(outcome) => {
            ctx.metrics.coordination_call(ATTACH_TENANT, outcome.as_str());
            set_phases(&ctx.store, &mut project, FIELD_MANAGER, &[&|s: &mut NeonProjectStatus| {
                s.ready()
            }])
            .await?;
            info!(%name, %tenant_id, "tenant attached");
            Ok(Flow::Continue)
        }
        Err(err) => {
            ctx.metrics.coordination_call(ATTACH_TENANT, err.metric_label());
            warn!(%name, %tenant_id, error = %err, "tenant attach failed");
            let message = match &err {
                CoordinationError::Connection(reason) => reason.clone(),
                CoordinationError::UnexpectedStatus { status, .. } => {
                    format!("Pageserver returned status: {status}")
                }
            };
            let unreachable = matches!(err, CoordinationError::Connection(_));
            let mark = |s: &mut NeonProjectStatus| {
                if unreachable {
                    s.pageserver_connection_error(&message)
                } else {
                    s.tenant_creation_failed(&message)
                }
            };
            set_phases(&ctx.store, &mut project, FIELD_MANAGER, &[&mark]).await?;
            Ok(Flow::RequeueAfter(DEPENDENCY_RETRY))
        }
    }
}

fn error_policy<S: ResourceStore>(project: Arc<NeonProject>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    ctx.on_error(CONTROLLER, project.as_ref(), error)
}

/// Initialize the controller (given the crd is installed)
pub async fn run(client: Client, ctx: Arc<Context<KubeStore>>) {
    let projects = Api::<NeonProject>::all(client.clone());
    if let Err(e) = projects.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    Controller::new(projects, Config::default().any_semantic())
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
    use crate::fixtures::{self, MemoryStore, Verb, NAMESPACE, TENANT_ID};
    use crate::storage_controller::client::MockStorageCoordinator;
    use crate::storage_controller::ProvisionOutcome;
    use crate::util::ids::is_valid_neon_id;
    use crate::util::status::find_status_condition;
    use mockall::predicate::{always, eq};

    fn attaching(tenant_id: &'static str, result: Result<ProvisionOutcome, CoordinationError>) -> MockStorageCoordinator {
        let mut coordinator = MockStorageCoordinator::new();
        coordinator
            .expect_attach_tenant()
            .with(eq("c1"), eq(tenant_id))
            .times(1)
            .returning(move |_, _| result.clone());
        coordinator
    }

    #[tokio::test]
    async fn first_pass_generates_tenant_and_soft_continues() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::project("p1", "c1"));
        let ctx = context(&store, unused_coordinator());

        let flow = reconcile_project(&ctx, project).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(SOFT_CONTINUE));
        let stored: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        assert_eq!(stored.phase(), "Creating");
        assert!(is_valid_neon_id(stored.tenant_id().unwrap()));
        assert_eq!(store.last_field_manager().as_deref(), Some(FIELD_MANAGER));
    }

    #[tokio::test]
    async fn second_pass_attaches_and_becomes_ready() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::project("p1", "c1"));
        reconcile_project(&context(&store, unused_coordinator()), project)
            .await
            .unwrap();

        let project: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        let tenant_id = project.tenant_id().unwrap().to_string();
        let mut coordinator = MockStorageCoordinator::new();
        coordinator
            .expect_attach_tenant()
            .with(eq("c1"), always())
            .times(1)
            .returning(|_, _| Ok(ProvisionOutcome::Created));
        let ctx = context(&store, coordinator);
        let flow = reconcile_project(&ctx, project).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let stored: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        assert_eq!(stored.phase(), "Ready");
        assert_eq!(stored.tenant_id(), Some(tenant_id.as_str()));
        assert_eq!(
            ctx.metrics
                .coordination_calls
                .with_label_values(&["attach_tenant", "created"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn tenant_id_never_changes_once_set() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::ready_project("p1", "c1"));
        let mut coordinator = MockStorageCoordinator::new();
        coordinator
            .expect_attach_tenant()
            .with(eq("c1"), eq(TENANT_ID))
            .times(3)
            .returning(|_, _| Ok(ProvisionOutcome::AlreadyExists));
        let ctx = context(&store, coordinator);

        reconcile_project(&ctx, project).await.unwrap();
        for _ in 0..2 {
            let project: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
            reconcile_project(&ctx, project).await.unwrap();
        }

        let stored: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        assert_eq!(stored.tenant_id(), Some(TENANT_ID));
        assert_eq!(store.writes_of(Verb::MergePatch), 0);
    }

    #[tokio::test]
    async fn ready_project_pass_is_write_free() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::ready_project("p1", "c1"));
        let mut coordinator = MockStorageCoordinator::new();
        coordinator
            .expect_attach_tenant()
            .returning(|_, _| Ok(ProvisionOutcome::Created));
        let ctx = context(&store, coordinator);
        reconcile_project(&ctx, project).await.unwrap();

        let writes = store.write_count();
        let project: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        reconcile_project(&ctx, project).await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn unreachable_storage_controller_is_retried_without_error() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::ready_project("p1", "c1"));
        let ctx = context(
            &store,
            attaching(TENANT_ID, Err(CoordinationError::Connection("connection refused".to_string()))),
        );

        let flow = reconcile_project(&ctx, project).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(DEPENDENCY_RETRY));
        let stored: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("PageserverConnectionError"));
        let ready = find_status_condition(&status.conditions, "Ready").unwrap();
        assert_eq!(ready.reason, "PageserverConnectionError");
        assert_eq!(ready.message, "connection refused");
    }

    #[tokio::test]
    async fn rejected_attach_marks_tenant_creation_failed() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::ready_project("p1", "c1"));
        let ctx = context(
            &store,
            attaching(
                TENANT_ID,
                Err(CoordinationError::UnexpectedStatus {
                    status: 500,
                    body: "boom".to_string(),
                }),
            ),
        );

        let flow = reconcile_project(&ctx, project).await.unwrap();

        assert_eq!(flow, Flow::RequeueAfter(DEPENDENCY_RETRY));
        let stored: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("TenantCreationFailed"));
        let ready = find_status_condition(&status.conditions, "Ready").unwrap();
        assert_eq!(ready.message, "Pageserver returned status: 500");
        assert_eq!(
            ctx.metrics
                .coordination_calls
                .with_label_values(&["attach_tenant", "unexpected_status"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn stale_status_write_is_a_hard_error() {
        let store = MemoryStore::default();
        let project = store.insert(fixtures::project("p1", "c1"));
        store.touch_after_next_get::<NeonProject>(NAMESPACE, "p1");
        let ctx = context(&store, unused_coordinator());

        let err = reconcile_project(&ctx, project).await.unwrap_err();

        assert!(err.is_conflict(), "expected conflict, got {err}");
        let stored: NeonProject = store.fetch(NAMESPACE, "p1").unwrap();
        assert_eq!(stored.tenant_id(), None);
    }
}
