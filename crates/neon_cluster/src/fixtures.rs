//! Test doubles: an in-memory resource store and resource builders.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ErrorResponse;
use serde_json::{Map, Value};

use crate::api::v1::neonbranch::{NeonBranch, NeonBranchSpec};
use crate::api::v1::neoncluster::{NeonCluster, NeonClusterSpec, SecretKeyReference};
use crate::api::v1::neonproject::{NeonProject, NeonProjectSpec};
use crate::api::v1::PGVersion;
use crate::api::v1alpha1::neonpageserver::{NeonPageserver, NeonPageserverSpec};
use crate::api::v1alpha1::neonsafekeeper::{NeonSafekeeper, NeonSafekeeperSpec};
use crate::api::v1alpha1::{NodeId, StorageConfig};
use crate::util::errors::{Error, Result};
use crate::util::jwt_keys::{jwt_secret_name, Ed25519KeyPair};
use crate::util::store::{Object, ResourceStore};

pub const NAMESPACE: &str = "default";
pub const TENANT_ID: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f9";
pub const TIMELINE_ID: &str = "f9e8d7c6b5a4938271605f4e3d2c1b0a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Apply,
    MergePatch,
    PatchStatus,
}

#[derive(Debug, Clone)]
pub struct Write {
    pub verb: Verb,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub field_manager: String,
}

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    revision: u64,
    writes: Vec<Write>,
    failures: Vec<(Verb, String)>,
    touch_after_get: Vec<Key>,
}

impl Inner {
    fn bump(&mut self, key: &Key) {
        self.revision += 1;
        let revision = self.revision.to_string();
        if let Some(doc) = self.objects.get_mut(key) {
            doc["metadata"]["resourceVersion"] = Value::String(revision);
        }
    }

    fn take_failure(&mut self, verb: Verb, kind: &str) -> Option<Error> {
        let position = self.failures.iter().position(|(v, k)| *v == verb && k == kind)?;
        self.failures.remove(position);
        Some(api_error(500, "InternalError", format!("injected {verb:?} failure for {kind}")))
    }

    fn record(&mut self, verb: Verb, key: &Key, field_manager: &str) {
        self.writes.push(Write {
            verb,
            kind: key.0.clone(),
            namespace: key.1.clone(),
            name: key.2.clone(),
            field_manager: field_manager.to_string(),
        });
    }
}

/// In-memory [`ResourceStore`] that mimics the API server semantics the controllers rely on:
/// uids and resourceVersions are assigned, creates of existing objects and status writes with
/// a stale resourceVersion answer 409, and every write is logged.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

pub fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn key_of<K: Object>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

/// RFC 7386 merge of `patch` into `target`.
pub fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(existing) = target {
                for (key, value) in fields {
                    if value.is_null() {
                        existing.remove(key);
                    } else {
                        merge(existing.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

fn matches_selector(doc: &Value, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    selector.split(',').filter(|s| !s.is_empty()).all(|requirement| {
        let (key, value) = requirement.split_once('=').unwrap_or((requirement, ""));
        doc["metadata"]["labels"][key].as_str() == Some(value)
    })
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Seeds an object without logging a write. Assigns namespace, uid and resourceVersion.
    pub fn insert<K: Object>(&self, object: K) -> K {
        let mut doc = serde_json::to_value(&object).unwrap();
        if doc["metadata"]["namespace"].is_null() {
            doc["metadata"]["namespace"] = Value::String(NAMESPACE.to_string());
        }
        let namespace = doc["metadata"]["namespace"].as_str().unwrap().to_string();
        let name = doc["metadata"]["name"].as_str().unwrap().to_string();
        let key = key_of::<K>(&namespace, &name);

        let mut inner = self.lock();
        if doc["metadata"]["uid"].is_null() {
            doc["metadata"]["uid"] = Value::String(format!("uid-{}-{}", key.0.to_lowercase(), name));
        }
        inner.objects.insert(key.clone(), doc);
        inner.bump(&key);
        serde_json::from_value(inner.objects[&key].clone()).unwrap()
    }

    pub fn fetch<K: Object>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&key_of::<K>(namespace, name))
            .map(|doc| serde_json::from_value(doc.clone()).unwrap())
    }

    /// Edits a stored document in place, the way another writer would.
    pub fn update<K: Object>(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut Value)) {
        let key = key_of::<K>(namespace, name);
        let mut inner = self.lock();
        edit(inner.objects.get_mut(&key).expect("object to update exists"));
        inner.bump(&key);
    }

    /// Bumps the resourceVersion as if someone else wrote the object.
    pub fn touch<K: Object>(&self, namespace: &str, name: &str) {
        self.update::<K>(namespace, name, |_| {});
    }

    /// Bumps the resourceVersion right after the next read of the object.
    pub fn touch_after_next_get<K: Object>(&self, namespace: &str, name: &str) {
        self.lock().touch_after_get.push(key_of::<K>(namespace, name));
    }

    /// Makes the next `verb` on an object of `kind` fail with a 500.
    pub fn fail_next(&self, verb: Verb, kind: &str) {
        self.lock().failures.push((verb, kind.to_string()));
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn writes_of(&self, verb: Verb) -> usize {
        self.lock().writes.iter().filter(|w| w.verb == verb).count()
    }

    pub fn status_writes(&self) -> usize {
        self.writes_of(Verb::PatchStatus)
    }

    pub fn last_field_manager(&self) -> Option<String> {
        self.lock().writes.last().map(|w| w.field_manager.clone())
    }

    pub fn count<K: Object>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.lock().objects.keys().filter(|(k, _, _)| *k == kind).count()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let key = key_of::<K>(namespace, name);
        let mut inner = self.lock();
        let found = inner.objects.get(&key).cloned();
        if let Some(position) = inner.touch_after_get.iter().position(|k| *k == key) {
            inner.touch_after_get.remove(position);
            inner.bump(&key);
        }
        Ok(found.map(serde_json::from_value).transpose()?)
    }

    async fn list<K: Object>(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let inner = self.lock();
        inner
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.map_or(true, |wanted| wanted == ns))
            .filter(|(_, doc)| matches_selector(doc, label_selector))
            .map(|(_, doc)| Ok(serde_json::from_value(doc.clone())?))
            .collect()
    }

    async fn create<K: Object>(&self, namespace: &str, object: &K, field_manager: &str) -> Result<K> {
        let mut doc = serde_json::to_value(object)?;
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let key = key_of::<K>(namespace, &name);

        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(Verb::Create, &key.0) {
            return Err(err);
        }
        if inner.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} {name} already exists", key.0)));
        }
        doc["metadata"]["namespace"] = Value::String(namespace.to_string());
        doc["metadata"]["uid"] = Value::String(format!("uid-{}-{}", key.0.to_lowercase(), name));
        inner.objects.insert(key.clone(), doc);
        inner.bump(&key);
        inner.record(Verb::Create, &key, field_manager);
        Ok(serde_json::from_value(inner.objects[&key].clone())?)
    }

    async fn apply<K: Object>(&self, namespace: &str, object: &K, field_manager: &str) -> Result<K> {
        let doc = serde_json::to_value(object)?;
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let key = key_of::<K>(namespace, &name);

        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(Verb::Apply, &key.0) {
            return Err(err);
        }
        let stored = inner.objects.entry(key.clone()).or_insert(Value::Null);
        merge(stored, &doc);
        stored["metadata"]["namespace"] = Value::String(namespace.to_string());
        inner.bump(&key);
        inner.record(Verb::Apply, &key, field_manager);
        Ok(serde_json::from_value(inner.objects[&key].clone())?)
    }

    async fn merge_patch<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        field_manager: &str,
    ) -> Result<K> {
        let key = key_of::<K>(namespace, name);
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(Verb::MergePatch, &key.0) {
            return Err(err);
        }
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound", format!("{} {name} not found", key.0)));
        };
        if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
            if stored["metadata"]["resourceVersion"].as_str() != Some(expected) {
                return Err(api_error(409, "Conflict", format!("{} {name} was modified", key.0)));
            }
        }
        merge(stored, patch);
        inner.bump(&key);
        inner.record(Verb::MergePatch, &key, field_manager);
        Ok(serde_json::from_value(inner.objects[&key].clone())?)
    }

    async fn patch_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        status: &Value,
        field_manager: &str,
    ) -> Result<K> {
        let key = key_of::<K>(namespace, name);
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(Verb::PatchStatus, &key.0) {
            return Err(err);
        }
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound", format!("{} {name} not found", key.0)));
        };
        if stored["metadata"]["resourceVersion"].as_str() != Some(resource_version) {
            return Err(api_error(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version".to_string(),
            ));
        }
        merge(&mut stored["status"], status);
        inner.bump(&key);
        inner.record(Verb::PatchStatus, &key, field_manager);
        Ok(serde_json::from_value(inner.objects[&key].clone())?)
    }
}

fn namespaced<K: kube::Resource>(mut object: K) -> K {
    object.meta_mut().namespace = Some(NAMESPACE.to_string());
    object
}

pub fn cluster(name: &str) -> NeonCluster {
    namespaced(NeonCluster::new(
        name,
        NeonClusterSpec {
            num_safekeepers: 3,
            default_pg_version: PGVersion::PG16,
            neon_image: "neondatabase/neon:8463".to_string(),
            bucket_credentials_secret: format!("{name}-bucket"),
            storage_controller_database_secret: SecretKeyReference {
                name: format!("{name}-db"),
                key: "uri".to_string(),
            },
        },
    ))
}

pub fn project(name: &str, cluster: &str) -> NeonProject {
    namespaced(NeonProject::new(
        name,
        NeonProjectSpec {
            cluster_name: cluster.to_string(),
            tenant_id: None,
            pg_version: PGVersion::PG16,
        },
    ))
}

/// Project whose tenant id has already been generated.
pub fn ready_project(name: &str, cluster: &str) -> NeonProject {
    let mut project = project(name, cluster);
    project.spec.tenant_id = Some(TENANT_ID.to_string());
    project
}

pub fn branch(name: &str, project: &str) -> NeonBranch {
    namespaced(NeonBranch::new(
        name,
        NeonBranchSpec {
            id: format!("br-{name}"),
            name: name.to_string(),
            timeline_id: None,
            pg_version: PGVersion::PG16,
            project_id: project.to_string(),
        },
    ))
}

pub fn branch_with_timeline(name: &str, project: &str) -> NeonBranch {
    let mut branch = branch(name, project);
    branch.spec.timeline_id = Some(TIMELINE_ID.to_string());
    branch
}

pub fn safekeeper(name: &str, cluster: &str, id: u32) -> NeonSafekeeper {
    namespaced(NeonSafekeeper::new(
        name,
        NeonSafekeeperSpec {
            id,
            cluster: cluster.to_string(),
            storage_config: StorageConfig::default(),
        },
    ))
}

pub fn pageserver(name: &str, cluster: &str, id: u64) -> NeonPageserver {
    namespaced(NeonPageserver::new(
        name,
        NeonPageserverSpec {
            id: NodeId(id),
            cluster: cluster.to_string(),
            bucket_credentials_secret: format!("{cluster}-bucket"),
            storage_config: StorageConfig::default(),
        },
    ))
}

fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn bucket_secret(name: &str) -> Secret {
    secret(
        name,
        &[
            ("AWS_ACCESS_KEY_ID", "access"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_REGION", "eu-north-1"),
            ("BUCKET_NAME", "neon-bucket"),
            ("AWS_ENDPOINT_URL", "http://minio:9000"),
        ],
    )
}

pub fn database_secret(name: &str) -> Secret {
    secret(name, &[("uri", "postgres://storage:pw@db:5432/storage")])
}

pub fn jwt_secret(cluster: &str, key_pair: &Ed25519KeyPair) -> Secret {
    Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(jwt_secret_name(cluster)),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(key_pair.to_secret_data().unwrap()),
        ..Default::default()
    }
}
