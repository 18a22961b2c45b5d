use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::ResourceExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::debug;

use crate::util::errors::{Error, Result};
use crate::util::store::{Object, ResourceStore};

/// The only condition type the controllers maintain.
pub const READY_CONDITION: &str = "Ready";

/// Uniform view over the status section of every resource kind.
pub trait StatusAccessor {
    fn conditions(&self) -> &[Condition];
    fn set_conditions(&mut self, conditions: Vec<Condition>);
    fn phase(&self) -> &str;
    fn set_phase(&mut self, phase: &str);
}

/// A resource whose status the status synchronizer can manage.
pub trait HasStatus: Object {
    type Status: StatusAccessor + Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync;

    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Option<Self::Status>;

    /// Current phase, empty before the first status write.
    fn phase(&self) -> &str {
        self.status().map(|s| s.phase()).unwrap_or_default()
    }
}

/// A status mutation applied by [`set_phases`].
pub type StatusMutation<'a, S> = &'a (dyn Fn(&mut S) + Send + Sync);

/// Sets the corresponding condition in conditions to new_condition and returns
/// a tuple containing the new conditions vector and whether it was changed.
///
/// 1. If the condition of the specified type already exists, all fields of the existing condition
///    are updated to new_condition. LastTransitionTime is only moved when the status flips
/// 2. If a condition of the specified type does not exist, LastTransitionTime is set to now()
///    and new_condition is appended
pub fn set_status_condition(conditions: &[Condition], mut new_condition: Condition) -> (Vec<Condition>, bool) {
    let mut new_conditions = Vec::from(conditions);
    let mut changed = false;

    if let Some(existing) = new_conditions.iter_mut().find(|c| c.type_ == new_condition.type_) {
        if existing.status != new_condition.status {
            existing.status = new_condition.status;
            existing.last_transition_time = Time(Utc::now());
            changed = true;
        }

        if existing.reason != new_condition.reason {
            existing.reason = new_condition.reason;
            changed = true;
        }

        if existing.message != new_condition.message {
            existing.message = new_condition.message;
            changed = true;
        }

        if existing.observed_generation != new_condition.observed_generation {
            existing.observed_generation = new_condition.observed_generation;
            changed = true;
        }
    } else {
        new_condition.last_transition_time = Time(Utc::now());
        new_conditions.push(new_condition);
        changed = true;
    }

    (new_conditions, changed)
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.type_ == condition_type)
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|condition| condition.type_ == condition_type && condition.status == "True")
}

/// Sets phase and the `Ready` condition in one go.
pub fn set_phase_and_ready<S: StatusAccessor>(status: &mut S, phase: &str, ready: bool, reason: &str, message: &str) {
    status.set_phase(phase);
    let condition = Condition {
        type_: READY_CONDITION.to_string(),
        status: if ready { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Utc::now()),
        observed_generation: None,
    };
    let (conditions, changed) = set_status_condition(status.conditions(), condition);
    if changed {
        status.set_conditions(conditions);
    }
}

/// Applies `mutations` to the latest stored status of `object` and writes it back if it changed.
///
/// The object is re-read first so concurrent spec edits are never clobbered, and the patch
/// carries the resourceVersion of that read: if someone else wrote in between the API server
/// answers 409 and the error is returned. On return `object`'s status mirrors what is stored.
/// Returns whether a write was issued.
pub async fn set_phases<St, K>(
    store: &St,
    object: &mut K,
    field_manager: &str,
    mutations: &[StatusMutation<'_, K::Status>],
) -> Result<bool>
where
    St: ResourceStore,
    K: HasStatus,
{
    let name = object.name_any();
    let namespace = object
        .namespace()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of {} {name}", K::kind(&()))))?;

    let latest: K = store
        .get(&namespace, &name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{} {namespace}/{name}", K::kind(&()))))?;

    let current = latest.status().cloned().unwrap_or_default();
    let mut updated = current.clone();
    for mutate in mutations {
        mutate(&mut updated);
    }

    if updated == current {
        debug!(%name, %namespace, phase = current.phase(), "status unchanged, skipping write");
        *object.status_mut() = Some(current);
        return Ok(false);
    }

    let resource_version = latest
        .resource_version()
        .ok_or_else(|| Error::MetadataMissing(format!("resourceVersion of {} {name}", K::kind(&()))))?;

    let stored: K = store
        .patch_status(
            &namespace,
            &name,
            &resource_version,
            &serde_json::to_value(&updated)?,
            field_manager,
        )
        .await?;

    debug!(%name, %namespace, phase = updated.phase(), "status written");
    *object.status_mut() = Some(stored.status().cloned().unwrap_or(updated));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;
    use crate::api::v1::neoncluster::{NeonCluster, NeonClusterStatus};
    use crate::fixtures::{self, MemoryStore};

    fn creating(status: &mut NeonClusterStatus) {
        set_phase_and_ready(status, "Creating", false, "ClusterIsNotReady", "Cluster Is Not Ready");
    }

    fn ready(status: &mut NeonClusterStatus) {
        set_phase_and_ready(status, "Ready", true, "ClusterIsReady", "Cluster is ready");
    }

    #[test]
    fn test_set_status_condition() {
        let conditions = Vec::new();

        let condition = Condition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            reason: "Testing".to_string(),
            message: "Test message".to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: Some(1),
        };

        let (conditions, changed) = set_status_condition(&conditions, condition);
        assert!(changed);
        assert_eq!(conditions.len(), 1);

        let updated_condition = Condition {
            type_: "Ready".to_string(),
            status: "False".to_string(),
            reason: "UpdatedReason".to_string(),
            message: "Updated message".to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: Some(2),
        };

        let (conditions, changed) = set_status_condition(&conditions, updated_condition);
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason, "UpdatedReason");
    }

    #[test]
    fn test_same_condition_keeps_transition_time() {
        let mut status = NeonClusterStatus::default();
        creating(&mut status);
        let first = status.clone();

        creating(&mut status);
        assert_eq!(status, first);
    }

    #[test]
    fn test_other_conditions_are_preserved() {
        let available = Condition {
            type_: "Available".to_string(),
            status: "False".to_string(),
            reason: "NotAvailable".to_string(),
            message: String::new(),
            last_transition_time: Time(Utc::now()),
            observed_generation: None,
        };
        let mut status = NeonClusterStatus {
            conditions: vec![available.clone()],
            ..Default::default()
        };

        ready(&mut status);

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(find_status_condition(&status.conditions, "Available"), Some(&available));
        assert!(is_status_condition_true(&status.conditions, READY_CONDITION));
    }

    #[tokio::test]
    async fn writes_once_then_suppresses_identical_status() {
        let store = MemoryStore::default();
        let mut cluster = store.insert(fixtures::cluster("c1"));

        assert!(set_phases(&store, &mut cluster, "test", &[&creating]).await.unwrap());
        assert_eq!(store.status_writes(), 1);
        assert_eq!(cluster.phase(), "Creating");

        assert!(!set_phases(&store, &mut cluster, "test", &[&creating]).await.unwrap());
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn mutations_apply_in_order() {
        let store = MemoryStore::default();
        let mut cluster = store.insert(fixtures::cluster("c1"));

        set_phases(&store, &mut cluster, "test", &[&creating, &ready]).await.unwrap();

        let stored: NeonCluster = store.fetch("default", "c1").unwrap();
        assert_eq!(stored.phase(), "Ready");
        assert_eq!(cluster.status, stored.status);
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn rereads_before_writing_so_stale_handles_still_succeed() {
        let store = MemoryStore::default();
        let mut cluster = store.insert(fixtures::cluster("c1"));

        // Someone else edits the object after our handle was read.
        store.touch::<NeonCluster>("default", "c1");

        assert!(set_phases(&store, &mut cluster, "test", &[&creating]).await.unwrap());
        let stored: NeonCluster = store.fetch("default", "c1").unwrap();
        assert_eq!(stored.phase(), "Creating");
    }

    #[tokio::test]
    async fn conflicting_write_surfaces_as_conflict_error() {
        let store = MemoryStore::default();
        let mut cluster = store.insert(fixtures::cluster("c1"));
        store.touch_after_next_get::<NeonCluster>("default", "c1");

        let err = set_phases(&store, &mut cluster, "test", &[&creating]).await.unwrap_err();

        assert!(err.is_conflict(), "expected conflict, got {err}");
        assert_eq!(store.status_writes(), 0);
        let stored: NeonCluster = store.fetch("default", "c1").unwrap();
        assert_eq!(stored.phase(), "");
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let store = MemoryStore::default();
        let mut cluster = fixtures::cluster("gone");

        let err = set_phases(&store, &mut cluster, "test", &[&creating]).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
