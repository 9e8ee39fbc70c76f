use crate::error::{PipelineError, Result};
use crate::merge::{self, DEFAULT_IDENTIFIER_COLUMN};
use crate::model::CanonicalDataset;
use crate::table;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// `save` replaces the file through a rename, so readers see either snapshot whole.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
    identifier_columns: Vec<String>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identifier_columns: vec![DEFAULT_IDENTIFIER_COLUMN.to_string()],
        }
    }

    pub fn with_identifier_columns(mut self, columns: Vec<String>) -> Self {
        self.identifier_columns = columns;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    /// `Ok(None)` when nothing has been stored yet.
    pub fn load(&self) -> Result<Option<CanonicalDataset>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no stored dataset");
            return Ok(None);
        }

        let file = File::open(&self.path)
            .map_err(|err| PipelineError::persistence(&self.path, err))?;
        let raw = table::read_strict_table(file)
            .map_err(|err| PipelineError::persistence(&self.path, err))?;
        if raw.header.iter().all(|name| name.trim().is_empty()) {
            return Err(PipelineError::persistence(&self.path, "file has no header row"));
        }

        let conformed = merge::conform(&raw, &self.identifier_columns, false)
            .map_err(|reason| PipelineError::persistence(&self.path, reason))?;
        if conformed.unparsed_timestamps > 0 {
            warn!(
                path = %self.path.display(),
                count = conformed.unparsed_timestamps,
                "stored play times could not be parsed and were set to null"
            );
        }

        info!(
            path = %self.path.display(),
            rows = conformed.dataset.len(),
            "loaded dataset"
        );
        Ok(Some(conformed.dataset))
    }

    pub fn save(&self, dataset: &CanonicalDataset) -> Result<()> {
        merge::check_writable(dataset, &self.identifier_columns)
            .map_err(|reason| PipelineError::persistence(&self.path, reason))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|err| PipelineError::persistence(&dir, err))?;

        let mut staged =
            NamedTempFile::new_in(&dir).map_err(|err| PipelineError::persistence(&dir, err))?;
        write_snapshot(staged.as_file_mut(), dataset)
            .map_err(|err| PipelineError::persistence(staged.path(), err))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|err| PipelineError::persistence(staged.path(), err))?;

        if self.path.exists() {
            let backup = self.backup_path();
            if let Err(err) = fs::copy(&self.path, &backup) {
                warn!(path = %backup.display(), %err, "failed to back up previous snapshot");
            }
        }

        staged
            .persist(&self.path)
            .map_err(|err| PipelineError::persistence(&self.path, err.error))?;

        info!(path = %self.path.display(), rows = dataset.len(), "saved dataset");
        Ok(())
    }
}

fn write_snapshot<W: Write>(writer: W, dataset: &CanonicalDataset) -> csv::Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(dataset.schema.header())?;
    for event in &dataset.events {
        csv_writer.write_record(event.to_record())?;
    }
    csv_writer.flush()?;
    Ok(())
}
