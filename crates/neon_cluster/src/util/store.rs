use std::fmt::Debug;

use async_trait::async_trait;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    core::NamespaceResourceScope,
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::util::errors::{Error, Result};

/// Namespaced object the controllers read and write.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Access to the declared-state store.
///
/// Every write names its field manager. Status writes carry the resourceVersion that was read,
/// so a concurrent writer surfaces as a 409 instead of being overwritten.
#[async_trait]
pub trait ResourceStore: Clone + Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Lists objects in `namespace`, or across the cluster when `None`.
    async fn list<K: Object>(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>>;

    async fn create<K: Object>(&self, namespace: &str, object: &K, field_manager: &str) -> Result<K>;

    /// Forced server-side apply of `object`.
    async fn apply<K: Object>(&self, namespace: &str, object: &K, field_manager: &str) -> Result<K>;

    /// JSON merge patch of the object (spec or metadata).
    async fn merge_patch<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        field_manager: &str,
    ) -> Result<K>;

    /// Merge patch of the status subresource guarded by `resource_version`.
    async fn patch_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        status: &Value,
        field_manager: &str,
    ) -> Result<K>;
}

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn write_params(field_manager: &str) -> PatchParams {
    PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: Object>(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn create<K: Object>(&self, namespace: &str, object: &K, field_manager: &str) -> Result<K> {
        let pp = PostParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };
        Ok(self.api::<K>(namespace).create(&pp, object).await?)
    }

    async fn apply<K: Object>(&self, namespace: &str, object: &K, field_manager: &str) -> Result<K> {
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::MetadataMissing(format!("name of {} to apply", K::kind(&()))))?;
        Ok(self
            .api::<K>(namespace)
            .patch(&name, &PatchParams::apply(field_manager).force(), &Patch::Apply(object))
            .await?)
    }

    async fn merge_patch<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        field_manager: &str,
    ) -> Result<K> {
        Ok(self
            .api::<K>(namespace)
            .patch(name, &write_params(field_manager), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        status: &Value,
        field_manager: &str,
    ) -> Result<K> {
        let body = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        Ok(self
            .api::<K>(namespace)
            .patch_status(name, &write_params(field_manager), &Patch::Merge(&body))
            .await?)
    }
}
