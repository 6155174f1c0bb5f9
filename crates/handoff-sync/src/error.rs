use std::path::PathBuf;

use handoff_adapters::AdapterError;
use handoff_storage::StoreError;
use thiserror::Error;

use crate::consolidate::ConsolidationError;
use crate::naming::RenderIntegrityError;
use crate::resolve::ResolutionAborted;

/// Failures that abort a whole run. Nothing is written when one of these
/// surfaces; entity-level problems become [`crate::RunWarning`]s instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("fetching {stage} from {adapter} failed: {source}")]
    ProviderFetch {
        adapter: String,
        stage: &'static str,
        #[source]
        source: AdapterError,
    },
    #[error(transparent)]
    ResolutionAborted(#[from] ResolutionAborted),
    #[error(transparent)]
    RenderIntegrity(#[from] RenderIntegrityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
    #[error("writing {path}: {message}")]
    Output { path: PathBuf, message: String },
}

impl MigrationError {
    pub(crate) fn fetch(adapter: &str, stage: &'static str, source: AdapterError) -> Self {
        MigrationError::ProviderFetch {
            adapter: adapter.to_string(),
            stage,
            source,
        }
    }
}
