//! Stored entities and the inputs used to create them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, Result};

/// FIM section name -> ordered watched paths, for every stored section.
pub type FimSections = BTreeMap<String, Vec<String>>;

/// A named group of filesystem path patterns to watch. Returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FimSection {
    pub id: i64,
    pub section_name: String,
    pub description: String,
    pub paths: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A named group of YARA rule-file paths. Returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YaraSignatureGroup {
    pub id: i64,
    pub signature_name: String,
    pub paths: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A FIM section to be created. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, Default)]
pub struct NewFimSection {
    pub section_name: String,
    pub description: String,
    pub paths: Vec<String>,
}

impl NewFimSection {
    pub fn new<I, S>(section_name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            section_name: section_name.into(),
            description: String::new(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_named_paths("section_name", &self.section_name, &self.paths)
    }
}

/// A YARA signature group to be created. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, Default)]
pub struct NewYaraSignatureGroup {
    pub signature_name: String,
    pub paths: Vec<String>,
}

impl NewYaraSignatureGroup {
    pub fn new<I, S>(signature_name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            signature_name: signature_name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_named_paths("signature_name", &self.signature_name, &self.paths)
    }
}

fn validate_named_paths(field: &str, name: &str, paths: &[String]) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DatastoreError::Validation(format!("{field} must not be empty")));
    }
    if name.contains('\0') {
        return Err(DatastoreError::Validation(format!(
            "{field} must not contain NUL bytes"
        )));
    }
    if paths.is_empty() {
        return Err(DatastoreError::Validation(format!(
            "{name}: at least one path is required"
        )));
    }
    if let Some(pos) = paths.iter().position(|p| p.trim().is_empty()) {
        return Err(DatastoreError::Validation(format!(
            "{name}: path at position {pos} is blank"
        )));
    }
    if let Some(pos) = paths.iter().position(|p| p.contains('\0')) {
        return Err(DatastoreError::Validation(format!(
            "{name}: path at position {pos} contains a NUL byte"
        )));
    }
    Ok(())
}
