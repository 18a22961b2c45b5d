use core::fmt;
use std::fmt::Display;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod neonbranch;
pub mod neoncluster;
pub mod neonproject;

#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum PGVersion {
    PG14 = 14,
    PG15 = 15,
    #[default]
    PG16 = 16,
    PG17 = 17,
}

impl PGVersion {
    /// Major version number as the storage controller and compute images expect it.
    pub fn major(self) -> u32 {
        self as u32
    }
}

impl Display for PGVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.major())
    }
}

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let schema = serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    });
    serde_json::from_value(schema).unwrap_or(schemars::schema::Schema::Bool(true))
}
