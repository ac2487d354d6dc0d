//! Types for the `docker buildx bake` JSON file format.
//!
//! Only the subset of the format used when submitting a build graph on
//! stdin is modelled here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap as Map;

/// Reference to another target of the same file, usable as a named context.
pub fn target_context(name: &str) -> String {
    format!("target:{}", name)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    #[serde(rename = "group")]
    pub groups: Map<String, Group>,

    #[serde(rename = "target")]
    pub targets: Map<String, Target>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub targets: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, String>,

    pub context: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, String>,

    #[serde(rename = "cache-from", default, skip_serializing_if = "Vec::is_empty")]
    pub cache_from: Vec<String>,

    #[serde(rename = "cache-to", default, skip_serializing_if = "Vec::is_empty")]
    pub cache_to: Vec<String>,

    #[serde(default)]
    pub dockerfile: String,

    #[serde(
        rename = "dockerfile-inline",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dockerfile_inline: Option<String>,

    #[serde(rename = "output", default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl File {
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
