//! In-memory datastore. Every write auto-commits; explicit transactions are
//! not supported, and handing one in is an error rather than a silent no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::datastore::Datastore;
use crate::error::{DatastoreError, EntityKind, Result};
use crate::transaction::Transaction;
use crate::types::{
    FimSection, FimSections, NewFimSection, NewYaraSignatureGroup, YaraSignatureGroup,
};
use crate::yara::YaraSection;

const NO_TRANSACTIONS: &str = "explicit transactions are not supported by the inmem datastore";

#[derive(Default)]
struct State {
    next_section_id: i64,
    next_group_id: i64,
    sections: BTreeMap<String, FimSection>,
    groups: BTreeMap<String, YaraSignatureGroup>,
    /// (section name, signature group name)
    file_paths: BTreeSet<(String, String)>,
}

impl State {
    fn yara_section(&self) -> YaraSection {
        YaraSection::build(
            self.file_paths.iter().cloned(),
            self.groups
                .values()
                .map(|g| (g.signature_name.clone(), g.paths.clone())),
        )
    }

    fn fim_sections(&self) -> FimSections {
        self.sections
            .values()
            .map(|s| (s.section_name.clone(), s.paths.clone()))
            .collect()
    }
}

/// Thread-safe in-process store. All access goes through one mutex, so every
/// read sees a consistent state.
#[derive(Default)]
pub struct MemoryDatastore {
    state: Mutex<State>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Writes check everything before mutating, so a poisoned lock still
        // guards consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn reject_transaction(tx: Option<&mut Transaction>) -> Result<()> {
    match tx {
        Some(_) => Err(DatastoreError::Unsupported(NO_TRANSACTIONS)),
        None => Ok(()),
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    fn name(&self) -> &'static str {
        "inmem"
    }

    fn supports_transactions(&self) -> bool {
        false
    }

    async fn begin(&self) -> Result<Transaction> {
        Err(DatastoreError::Unsupported(NO_TRANSACTIONS))
    }

    async fn new_fim_section(
        &self,
        section: NewFimSection,
        tx: Option<&mut Transaction>,
    ) -> Result<FimSection> {
        reject_transaction(tx)?;
        section.validate()?;

        let mut state = self.state();
        if state.sections.contains_key(&section.section_name) {
            return Err(DatastoreError::DuplicateName {
                kind: EntityKind::FimSection,
                name: section.section_name,
            });
        }

        state.next_section_id += 1;
        let created = FimSection {
            id: state.next_section_id,
            section_name: section.section_name,
            description: section.description,
            paths: section.paths,
            created_at: Utc::now(),
        };
        state
            .sections
            .insert(created.section_name.clone(), created.clone());

        info!(id = created.id, section_name = %created.section_name, "Created FIM section");
        Ok(created)
    }

    async fn new_yara_signature_group(
        &self,
        group: NewYaraSignatureGroup,
        tx: Option<&mut Transaction>,
    ) -> Result<YaraSignatureGroup> {
        reject_transaction(tx)?;
        group.validate()?;

        let mut state = self.state();
        if state.groups.contains_key(&group.signature_name) {
            return Err(DatastoreError::DuplicateName {
                kind: EntityKind::YaraSignatureGroup,
                name: group.signature_name,
            });
        }

        state.next_group_id += 1;
        let created = YaraSignatureGroup {
            id: state.next_group_id,
            signature_name: group.signature_name,
            paths: group.paths,
            created_at: Utc::now(),
        };
        state
            .groups
            .insert(created.signature_name.clone(), created.clone());

        info!(
            id = created.id,
            signature_name = %created.signature_name,
            "Created YARA signature group"
        );
        Ok(created)
    }

    async fn new_yara_file_path(
        &self,
        section_name: &str,
        signature_group_name: &str,
        tx: Option<&mut Transaction>,
    ) -> Result<()> {
        reject_transaction(tx)?;

        let mut state = self.state();
        if !state.sections.contains_key(section_name) {
            return Err(DatastoreError::NotFound {
                kind: EntityKind::FimSection,
                name: section_name.to_string(),
            });
        }
        if !state.groups.contains_key(signature_group_name) {
            return Err(DatastoreError::NotFound {
                kind: EntityKind::YaraSignatureGroup,
                name: signature_group_name.to_string(),
            });
        }

        let inserted = state
            .file_paths
            .insert((section_name.to_string(), signature_group_name.to_string()));
        if inserted {
            info!(section_name, signature_group_name, "Created YARA file path association");
        } else {
            debug!(section_name, signature_group_name, "Association already present");
        }
        Ok(())
    }

    async fn yara_section(&self) -> Result<YaraSection> {
        Ok(self.state().yara_section())
    }

    async fn fim_sections(&self) -> Result<FimSections> {
        Ok(self.state().fim_sections())
    }

    async fn fim_snapshot(&self) -> Result<(FimSections, YaraSection)> {
        let state = self.state();
        Ok((state.fim_sections(), state.yara_section()))
    }

    async fn clear_fim_sections(&self, tx: Option<&mut Transaction>) -> Result<()> {
        reject_transaction(tx)?;

        let mut state = self.state();
        let deleted = state.sections.len();
        state.sections.clear();
        state.file_paths.clear();

        info!(deleted, "Cleared FIM sections");
        Ok(())
    }
}
