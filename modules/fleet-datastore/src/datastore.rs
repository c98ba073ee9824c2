//! The `Datastore` capability boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transaction::Transaction;
use crate::types::{
    FimSection, FimSections, NewFimSection, NewYaraSignatureGroup, YaraSignatureGroup,
};
use crate::yara::YaraSection;

/// FIM/YARA configuration storage.
///
/// Implemented by `PgDatastore` (Postgres) and `MemoryDatastore` (tests and
/// embedded use). Also implemented for `Arc<D>` so one store can be shared.
///
/// Every write takes an optional transaction. `None` auto-commits the write on
/// success. `Some(tx)` scopes it to `tx`; backends for which
/// [`supports_transactions`](Datastore::supports_transactions) is false reject
/// that with `Unsupported`.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Backend identifier, e.g. `"postgres"` or `"inmem"`.
    fn name(&self) -> &'static str;

    /// Whether `begin` and `Some(tx)` writes are available.
    fn supports_transactions(&self) -> bool;

    /// Start an explicit transaction.
    async fn begin(&self) -> Result<Transaction>;

    /// Create a FIM section and its paths. Returns it with its new id.
    async fn new_fim_section(
        &self,
        section: NewFimSection,
        tx: Option<&mut Transaction>,
    ) -> Result<FimSection>;

    /// Create a YARA signature group and its paths. Returns it with its new id.
    async fn new_yara_signature_group(
        &self,
        group: NewYaraSignatureGroup,
        tx: Option<&mut Transaction>,
    ) -> Result<YaraSignatureGroup>;

    /// Associate an existing FIM section with an existing signature group.
    /// Re-associating an existing pair succeeds without adding a row.
    async fn new_yara_file_path(
        &self,
        section_name: &str,
        signature_group_name: &str,
        tx: Option<&mut Transaction>,
    ) -> Result<()>;

    /// Rebuild the YARA aggregate from current committed state.
    async fn yara_section(&self) -> Result<YaraSection>;

    /// Every FIM section's ordered paths, keyed by section name.
    async fn fim_sections(&self) -> Result<FimSections>;

    /// FIM sections and the YARA aggregate read together from one
    /// consistent state.
    async fn fim_snapshot(&self) -> Result<(FimSections, YaraSection)>;

    /// Delete every FIM section along with its paths and associations.
    async fn clear_fim_sections(&self, tx: Option<&mut Transaction>) -> Result<()>;
}

#[async_trait]
impl<D: Datastore + ?Sized> Datastore for Arc<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports_transactions(&self) -> bool {
        (**self).supports_transactions()
    }

    async fn begin(&self) -> Result<Transaction> {
        (**self).begin().await
    }

    async fn new_fim_section(
        &self,
        section: NewFimSection,
        tx: Option<&mut Transaction>,
    ) -> Result<FimSection> {
        (**self).new_fim_section(section, tx).await
    }

    async fn new_yara_signature_group(
        &self,
        group: NewYaraSignatureGroup,
        tx: Option<&mut Transaction>,
    ) -> Result<YaraSignatureGroup> {
        (**self).new_yara_signature_group(group, tx).await
    }

    async fn new_yara_file_path(
        &self,
        section_name: &str,
        signature_group_name: &str,
        tx: Option<&mut Transaction>,
    ) -> Result<()> {
        (**self)
            .new_yara_file_path(section_name, signature_group_name, tx)
            .await
    }

    async fn yara_section(&self) -> Result<YaraSection> {
        (**self).yara_section().await
    }

    async fn fim_sections(&self) -> Result<FimSections> {
        (**self).fim_sections().await
    }

    async fn fim_snapshot(&self) -> Result<(FimSections, YaraSection)> {
        (**self).fim_snapshot().await
    }

    async fn clear_fim_sections(&self, tx: Option<&mut Transaction>) -> Result<()> {
        (**self).clear_fim_sections(tx).await
    }
}
