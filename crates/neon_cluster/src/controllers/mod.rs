use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use opentelemetry::trace::TraceId;
use serde::Serialize;
use serde_json::json;
use tokio::{sync::RwLock, time::Duration};
use tracing::{debug, field, warn, Span};

use crate::storage_controller::StorageCoordinator;
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result};
use crate::util::metrics::{Metrics, ReconcileMeasurer};
use crate::util::store::{Object, ResourceStore};
use crate::util::telemetry;

pub mod branch;
pub mod cluster;
pub mod pageserver;
pub mod project;
pub mod safekeeper;

/// Delay before re-running a pass that just changed its own spec.
pub const SOFT_CONTINUE: Duration = Duration::from_secs(1);
/// Delay before re-checking a dependency or retrying a storage controller call.
pub const DEPENDENCY_RETRY: Duration = Duration::from_secs(10);
/// Delay before re-checking a resource that points at a missing cluster.
pub const INVALID_SPEC_RETRY: Duration = Duration::from_secs(30);
/// Periodic resync after a successful pass.
pub const RESYNC: Duration = Duration::from_secs(5 * 60);

pub const BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// Outcome of a reconciliation pass that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Everything converged.
    Continue,
    /// Run again after the given delay, without counting as a failure.
    RequeueAfter(Duration),
}

impl Flow {
    pub fn into_action(self) -> Action {
        match self {
            Flow::Continue => Action::requeue(RESYNC),
            Flow::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Per-object exponential backoff for failed passes.
#[derive(Debug, Default)]
pub struct Backoff {
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    /// Delay before the next attempt for `key`: 5s, 10s, 20s, ... capped at 5 minutes.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let delay = BACKOFF_BASE
            .saturating_mul(2u32.saturating_pow(*attempt))
            .min(BACKOFF_MAX);
        *attempt = attempt.saturating_add(1);
        delay
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }
}

fn object_key<K: Resource<DynamicType = ()>>(object: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        object.namespace().unwrap_or_default(),
        object.name_any()
    )
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controllers and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Create the context shared by every controller. Registers the metrics, so call it once.
    pub fn to_context<S: ResourceStore>(
        &self,
        store: S,
        coordinator: Arc<dyn StorageCoordinator>,
        config: OperatorConfig,
    ) -> Result<Arc<Context<S>>, prometheus::Error> {
        let metrics = Metrics::new()?.register(&self.registry)?;
        Ok(Arc::new(Context::new(
            store,
            coordinator,
            metrics,
            config,
            self.diagnostics.clone(),
        )))
    }
}

/// Context for our reconcilers
pub struct Context<S: ResourceStore> {
    pub store: S,
    pub coordinator: Arc<dyn StorageCoordinator>,
    pub metrics: Metrics,
    pub config: OperatorConfig,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    backoff: Backoff,
}

impl<S: ResourceStore> Context<S> {
    pub fn new(
        store: S,
        coordinator: Arc<dyn StorageCoordinator>,
        metrics: Metrics,
        config: OperatorConfig,
        diagnostics: Arc<RwLock<Diagnostics>>,
    ) -> Self {
        Self {
            store,
            coordinator,
            metrics,
            config,
            diagnostics,
            backoff: Backoff::default(),
        }
    }

    /// Bookkeeping at the start of a pass. Keep the returned timer alive for the whole pass.
    async fn observe(&self, controller: &str) -> ReconcileMeasurer {
        let trace_id = telemetry::get_trace_id();
        if trace_id != TraceId::INVALID {
            Span::current().record("trace_id", field::display(&trace_id));
        }
        self.diagnostics.write().await.last_event = Utc::now();
        self.metrics.count_and_measure(controller)
    }

    /// Turns the result of a pass into the next scheduling decision.
    ///
    /// A not-found failure for an object that no longer exists ends the pass quietly.
    async fn conclude<K: Object>(&self, object: &K, outcome: Result<Flow>) -> Result<Action> {
        let key = object_key(object);
        let err = match outcome {
            Ok(flow) => {
                self.backoff.reset(&key);
                return Ok(flow.into_action());
            }
            Err(err) => err,
        };

        if err.is_not_found() {
            let namespace = object.namespace().unwrap_or_default();
            if self.store.get::<K>(&namespace, &object.name_any()).await?.is_none() {
                debug!(%key, "object is gone, nothing to do");
                self.backoff.reset(&key);
                return Ok(Action::await_change());
            }
        }
        Err(err)
    }

    /// Error policy shared by every controller.
    pub fn on_error<K: Resource<DynamicType = ()>>(&self, controller: &str, object: &K, error: &Error) -> Action {
        let key = object_key(object);
        let delay = self.backoff.next_delay(&key);
        warn!(%key, %error, retry_in = ?delay, "reconcile failed");
        self.metrics.reconcile_failure(controller, error);
        Action::requeue(delay)
    }
}

/// Stores a freshly generated identifier in `spec.{field}`.
///
/// The latest revision is read first: if another writer already set the field nothing is
/// written. The patch carries the resourceVersion of that read, so a concurrent edit makes it
/// fail with a conflict instead of being overwritten. Returns whether a patch was issued.
pub(crate) async fn persist_generated_id<S, K>(
    store: &S,
    namespace: &str,
    name: &str,
    field: &str,
    value: &str,
    field_manager: &str,
) -> Result<bool>
where
    S: ResourceStore,
    K: Object,
{
    let latest: K = store
        .get(namespace, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{} {namespace}/{name}", K::kind(&()))))?;

    let current = serde_json::to_value(&latest)?;
    if current["spec"][field].as_str().is_some_and(|id| !id.is_empty()) {
        debug!(%name, %field, "identifier already set by another writer");
        return Ok(false);
    }

    let resource_version = latest
        .resource_version()
        .ok_or_else(|| Error::MetadataMissing(format!("resourceVersion of {} {name}", K::kind(&()))))?;
    let patch = json!({
        "metadata": { "resourceVersion": resource_version },
        "spec": { field: value },
    });
    store
        .merge_patch::<K>(namespace, name, &patch, field_manager)
        .await?;
    Ok(true)
}

/// True when the pod exists and its `Ready` condition is `True`.
pub(crate) async fn pod_is_ready<S: ResourceStore>(store: &S, namespace: &str, name: &str) -> Result<bool> {
    let pod = store.get::<Pod>(namespace, name).await?;
    Ok(pod
        .and_then(|p| p.status)
        .and_then(|s| s.conditions)
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        }))
}
