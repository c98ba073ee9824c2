//! The denormalized YARA read model.
//!
//! Built from association rows and signature-group paths on every read. It is
//! never stored and never patched in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// FIM/YARA configuration flattened for the agent-configuration generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YaraSection {
    /// FIM section name -> names of the signature groups that scan it.
    pub file_paths: BTreeMap<String, Vec<String>>,
    /// Signature group name -> the group's own signature paths.
    pub signatures: BTreeMap<String, Vec<String>>,
}

impl YaraSection {
    /// Group `(section name, signature group name)` association rows by
    /// section and pair them with every signature group's paths.
    ///
    /// Group names under a section are sorted and deduplicated. Groups with no
    /// association still appear in `signatures`.
    pub fn build<A, G>(associations: A, groups: G) -> Self
    where
        A: IntoIterator<Item = (String, String)>,
        G: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut file_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (section, group) in associations {
            file_paths.entry(section).or_default().push(group);
        }
        for groups in file_paths.values_mut() {
            groups.sort();
            groups.dedup();
        }

        Self {
            file_paths,
            signatures: groups.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_paths.is_empty() && self.signatures.is_empty()
    }
}
