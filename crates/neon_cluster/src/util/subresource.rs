use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::util::errors::{Error, Result};
use crate::util::store::{Object, ResourceStore};
use crate::util::subset::is_subset;

/// How an existing child is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Create when missing, leave alone afterwards (volume claims).
    CreateOnly,
    /// Create when missing, force-apply when the stored object drifted.
    Converge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Patched,
    Unchanged,
}

/// Owner link making `owner` the controller of a child object.
pub fn owner_reference<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::MetadataMissing(format!("name or uid of {} {}", K::kind(&()), owner.name_any()))
    })
}

/// Makes the stored child match `intended`.
///
/// Looks the child up by name and namespace. A missing child is created with `owner` as its
/// controller. An existing one is compared with [`is_subset`]: fields only the API server
/// fills in are ignored, and the intended document is force-applied under `field_manager`
/// only when one of its own fields differs. Never deletes, never retries.
pub async fn sync_owned<St, K>(
    store: &St,
    owner: &OwnerReference,
    mut intended: K,
    policy: SyncPolicy,
    field_manager: &str,
) -> Result<SyncOutcome>
where
    St: ResourceStore,
    K: Object,
{
    let kind = K::kind(&());
    let name = intended
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::MetadataMissing(format!("name of intended {kind}")))?;
    let namespace = intended
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::MetadataMissing(format!("namespace of intended {kind} {name}")))?;

    intended.meta_mut().owner_references = Some(vec![owner.clone()]);

    let Some(current) = store.get::<K>(&namespace, &name).await? else {
        store.create(&namespace, &intended, field_manager).await?;
        info!(%kind, %name, %namespace, "created");
        return Ok(SyncOutcome::Created);
    };

    if policy == SyncPolicy::CreateOnly {
        debug!(%kind, %name, "exists, create-only");
        return Ok(SyncOutcome::Unchanged);
    }

    if is_subset(&serde_json::to_value(&intended)?, &serde_json::to_value(&current)?) {
        debug!(%kind, %name, "up to date");
        return Ok(SyncOutcome::Unchanged);
    }

    store.apply(&namespace, &intended, field_manager).await?;
    info!(%kind, %name, %namespace, "updated");
    Ok(SyncOutcome::Patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, MemoryStore, Verb};
    use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
    use std::collections::BTreeMap;

    fn config_map(value: &str) -> ConfigMap {
        ConfigMap {
            metadata: kube::api::ObjectMeta {
                name: Some("c1-config".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_missing_child_with_owner_link() {
        let store = MemoryStore::default();
        let owner = owner_reference(&store.insert(fixtures::cluster("c1"))).unwrap();

        let outcome = sync_owned(&store, &owner, config_map("a"), SyncPolicy::Converge, "test")
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Created);
        let stored: ConfigMap = store.fetch("default", "c1-config").unwrap();
        let refs = stored.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "NeonCluster");
        assert_eq!(refs[0].name, "c1");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[tokio::test]
    async fn second_sync_is_a_no_op() {
        let store = MemoryStore::default();
        let owner = owner_reference(&store.insert(fixtures::cluster("c1"))).unwrap();

        sync_owned(&store, &owner, config_map("a"), SyncPolicy::Converge, "test").await.unwrap();
        let outcome = sync_owned(&store, &owner, config_map("a"), SyncPolicy::Converge, "test")
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert_eq!(store.writes_of(Verb::Create), 1);
        assert_eq!(store.writes_of(Verb::Apply), 0);
    }

    #[tokio::test]
    async fn server_defaults_do_not_trigger_patches() {
        let store = MemoryStore::default();
        let owner = owner_reference(&store.insert(fixtures::cluster("c1"))).unwrap();
        let service = Service {
            metadata: kube::api::ObjectMeta {
                name: Some("svc".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), "x".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };

        sync_owned(&store, &owner, service.clone(), SyncPolicy::Converge, "test").await.unwrap();
        store.update::<Service>("default", "svc", |doc| {
            doc["spec"]["clusterIP"] = serde_json::json!("10.0.0.12");
            doc["spec"]["type"] = serde_json::json!("ClusterIP");
        });

        let outcome = sync_owned(&store, &owner, service, SyncPolicy::Converge, "test").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn drift_is_force_applied() {
        let store = MemoryStore::default();
        let owner = owner_reference(&store.insert(fixtures::cluster("c1"))).unwrap();

        sync_owned(&store, &owner, config_map("a"), SyncPolicy::Converge, "test").await.unwrap();
        let outcome = sync_owned(&store, &owner, config_map("b"), SyncPolicy::Converge, "test")
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Patched);
        let stored: ConfigMap = store.fetch("default", "c1-config").unwrap();
        assert_eq!(stored.data.unwrap()["key"], "b");
        assert_eq!(store.last_field_manager().as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn create_only_children_are_never_patched() {
        let store = MemoryStore::default();
        let owner = owner_reference(&store.insert(fixtures::cluster("c1"))).unwrap();
        let pvc = |size: &str| PersistentVolumeClaim {
            metadata: kube::api::ObjectMeta {
                name: Some("data".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::PersistentVolumeClaimSpec {
                volume_name: Some(size.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        sync_owned(&store, &owner, pvc("10Gi"), SyncPolicy::CreateOnly, "test").await.unwrap();
        let outcome = sync_owned(&store, &owner, pvc("20Gi"), SyncPolicy::CreateOnly, "test")
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert_eq!(store.writes_of(Verb::Apply), 0);
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let store = MemoryStore::default();
        let owner = owner_reference(&store.insert(fixtures::cluster("c1"))).unwrap();
        store.fail_next(Verb::Create, "ConfigMap");

        let err = sync_owned(&store, &owner, config_map("a"), SyncPolicy::Converge, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeError(_)));
        assert!(store.fetch::<ConfigMap>("default", "c1-config").is_none());
    }

    #[test]
    fn owner_reference_requires_uid() {
        let cluster = fixtures::cluster("c1");
        assert!(owner_reference(&cluster).is_err());
    }
}
