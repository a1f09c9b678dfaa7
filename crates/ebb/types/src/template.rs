//! Data-plane templates
//!
//! A [`LayerTemplate`] is the declared set of resources the data layer owns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Class of a data-plane resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Database,
    SecretStore,
    Storage,
    Registry,
    Network,
}

impl ResourceKind {
    /// Classes whose names must be unique across the whole provider
    pub fn globally_unique_by_default(self) -> bool {
        matches!(
            self,
            ResourceKind::SecretStore | ResourceKind::Storage | ResourceKind::Registry
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Database => "database",
            ResourceKind::SecretStore => "secret_store",
            ResourceKind::Storage => "storage",
            ResourceKind::Registry => "registry",
            ResourceKind::Network => "network",
        };
        write!(f, "{}", name)
    }
}

/// One declared resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,

    pub name: String,

    /// Overrides the kind's default global-uniqueness requirement
    #[serde(default)]
    pub globally_unique: Option<bool>,

    /// Provider parameters (sku, region, ...)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            globally_unique: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn is_globally_unique(&self) -> bool {
        self.globally_unique
            .unwrap_or_else(|| self.kind.globally_unique_by_default())
    }
}

/// Declared resources of a layer, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTemplate {
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

impl LayerTemplate {
    pub fn new(resources: Vec<ResourceSpec>) -> Self {
        Self { resources }
    }

    pub fn globally_unique(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.iter().filter(|r| r.is_globally_unique())
    }
}
