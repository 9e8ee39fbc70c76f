use crate::error::{PipelineError, Result};
use crate::model::RawTable;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const STDIN_MARKER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementSource {
    Stdin,
    File(PathBuf),
}

impl IncrementSource {
    pub fn read(&self) -> Result<RawTable> {
        match self {
            Self::Stdin => read_table(io::stdin().lock()).map_err(|err| self.unavailable(err)),
            Self::File(path) => read_table_from_path(path).map_err(|err| self.unavailable(err)),
        }
    }

    fn unavailable(&self, reason: impl ToString) -> PipelineError {
        PipelineError::Collaborator {
            source_name: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for IncrementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => f.write_str(STDIN_MARKER),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<&str> for IncrementSource {
    fn from(value: &str) -> Self {
        if value.trim() == STDIN_MARKER {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(value))
        }
    }
}

impl FromStr for IncrementSource {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(value))
    }
}

impl Serialize for IncrementSource {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IncrementSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value.as_str()))
    }
}

pub fn read_table<R: Read>(reader: R) -> csv::Result<RawTable> {
    read_with(reader, true)
}

pub fn read_table_from_path(path: &Path) -> csv::Result<RawTable> {
    let file = File::open(path)?;
    read_with(file, true)
}

pub(crate) fn read_strict_table<R: Read>(reader: R) -> csv::Result<RawTable> {
    read_with(reader, false)
}

fn read_with<R: Read>(reader: R, flexible: bool) -> csv::Result<RawTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(flexible)
        .from_reader(reader);

    let header = csv_reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if idx == 0 {
                name.trim_start_matches('\u{feff}').to_string()
            } else {
                name.to_string()
            }
        })
        .collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawTable::new(header, rows))
}
