//! Build interface
//!
//! Build args carry secret values for the duration of one build only. They are
//! deliberately not `Serialize`, so they cannot be written into a config file.

use crate::error::CloudResult;
use crate::vault::SecretValue;
use async_trait::async_trait;
use ebb_types::ImageRef;
use std::collections::BTreeMap;
use std::fmt;

/// Build-time arguments, keyed by name (sorted)
#[derive(Clone, Default)]
pub struct BuildArgs {
    args: BTreeMap<String, SecretValue>,
}

impl BuildArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: SecretValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.args.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.args.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretValue)> {
        self.args.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Debug for BuildArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.args.keys()).finish()
    }
}

/// One image build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Workload the image is for
    pub workload: String,

    /// Source reference (path, git ref, ...)
    pub source_ref: String,

    pub args: BuildArgs,
}

/// Builds content-addressed images
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> CloudResult<ImageRef>;
}
