use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::util::errors::{Error, Result};
use crate::util::jwt_keys::{jwt_secret_name, Ed25519KeyPair};
use crate::util::store::ResourceStore;

/// UTF-8 value of `key` in `secret`, from `data` or `stringData`.
pub fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return String::from_utf8(bytes.0.clone())
            .map_err(|_| Error::DecodingError(format!("invalid UTF-8 in {key} of secret {}", secret.name_any())));
    }
    secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("key {key} in secret {}", secret.name_any())))
}

/// Reads a secret that must exist.
pub async fn get_secret<St: ResourceStore>(store: &St, namespace: &str, name: &str) -> Result<Secret> {
    store
        .get::<Secret>(namespace, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Secret {namespace}/{name}")))
}

/// Signing keypair of `cluster`, as written by the cluster controller.
pub async fn load_key_pair<St: ResourceStore>(store: &St, namespace: &str, cluster: &str) -> Result<Ed25519KeyPair> {
    let secret = get_secret(store, namespace, &jwt_secret_name(cluster)).await?;
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| Error::MetadataMissing(format!("data of secret {}", secret.name_any())))?;
    Ed25519KeyPair::from_secret_data(data)
}
