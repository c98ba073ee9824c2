//! The FIM/YARA fragment of a deployed agent configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::datastore::Datastore;
use crate::error::Result;
use crate::types::FimSections;
use crate::yara::YaraSection;

/// Agent-facing FIM configuration: watched paths per section and, when any
/// signature group exists, the YARA scanning section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FimConfig {
    pub file_paths: FimSections,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yara: Option<YaraSection>,
}

impl FimConfig {
    pub fn new(file_paths: FimSections, yara: YaraSection) -> Self {
        let yara = (!yara.signatures.is_empty()).then_some(yara);
        Self { file_paths, yara }
    }
}

/// Read the current FIM sections and YARA aggregate from one snapshot and
/// combine them. Every section named under `yara.file_paths` is also present
/// in `file_paths`.
///
/// Errors are returned as-is. An empty configuration is never substituted for
/// one that could not be read.
pub async fn fim_config(ds: &dyn Datastore) -> Result<FimConfig> {
    let (file_paths, yara) = ds.fim_snapshot().await.inspect_err(|e| {
        warn!(error = %e, backend = ds.name(), "FIM configuration unavailable");
    })?;

    Ok(FimConfig::new(file_paths, yara))
}
