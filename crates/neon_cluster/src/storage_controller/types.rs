use serde::{Deserialize, Serialize};

/// Body of `PUT /v1/tenant/{tenant_id}/location_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfigRequest {
    pub mode: LocationMode,
    pub generation: u32,
    pub tenant_conf: TenantConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationMode {
    AttachedSingle,
}

/// Per-tenant overrides; the operator always sends the storage defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {}

impl LocationConfigRequest {
    /// Single attached location, first generation.
    pub fn attach_single() -> Self {
        Self {
            mode: LocationMode::AttachedSingle,
            generation: 1,
            tenant_conf: TenantConfig::default(),
        }
    }
}

/// Body of `POST /v1/tenant/{tenant_id}/timeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineCreateRequest {
    pub new_timeline_id: String,
    pub pg_version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn attach_body_shape() {
        assert_json_eq!(
            serde_json::to_value(LocationConfigRequest::attach_single()).unwrap(),
            json!({"mode": "AttachedSingle", "generation": 1, "tenant_conf": {}})
        );
    }
}
