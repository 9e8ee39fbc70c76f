use crate::config::PipelineConfig;
use crate::error::Result;
use crate::merge::{self, MergeReport};
use crate::store::CsvStore;
use std::path::Path;
use tracing::info;

/// Nothing is written unless every step before the save succeeded.
pub fn run(config: &PipelineConfig) -> Result<MergeReport> {
    let history = store_at(config, &config.historical_store_path);
    let existing = history.load()?;

    info!(source = %config.increment_source, "reading increment");
    let increment = config.increment_source.read()?;

    let outcome = merge::merge(existing, &increment, &config.merge_options())?;

    let output = store_at(config, &config.output_store_path);
    output.save(&outcome.dataset)?;

    info!(
        output = %output.path().display(),
        total = outcome.report.total_rows,
        "pipeline run complete"
    );
    Ok(outcome.report)
}

fn store_at(config: &PipelineConfig, path: &Path) -> CsvStore {
    CsvStore::new(path).with_identifier_columns(config.identifier_columns.clone())
}
