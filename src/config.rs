use crate::merge::{DEFAULT_IDENTIFIER_COLUMN, DedupPolicy, MergeOptions};
use crate::table::IncrementSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "tunelog";
const CONFIG_FILE: &str = "pipeline.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_historical_store_path")]
    pub historical_store_path: PathBuf,
    #[serde(default = "default_increment_source")]
    pub increment_source: IncrementSource,
    #[serde(default = "default_output_store_path")]
    pub output_store_path: PathBuf,
    #[serde(default = "default_identifier_columns")]
    pub identifier_columns: Vec<String>,
    #[serde(default)]
    pub dedup: DedupPolicy,
}

fn default_historical_store_path() -> PathBuf {
    PathBuf::from("listening-history.csv")
}

fn default_increment_source() -> IncrementSource {
    IncrementSource::File(PathBuf::from("recent-plays.csv"))
}

fn default_output_store_path() -> PathBuf {
    default_historical_store_path()
}

fn default_identifier_columns() -> Vec<String> {
    vec![DEFAULT_IDENTIFIER_COLUMN.to_string()]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            historical_store_path: default_historical_store_path(),
            increment_source: default_increment_source(),
            output_store_path: default_output_store_path(),
            identifier_columns: default_identifier_columns(),
            dedup: DedupPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            dedup: self.dedup,
            identifier_columns: self.identifier_columns.clone(),
        }
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("TUNELOG_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE))
}

pub fn load_config() -> Result<PipelineConfig> {
    let path = config_path()?;
    load_config_from_path(&path)
}

pub fn load_config_from_path(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

pub fn save_config(config: &PipelineConfig) -> Result<()> {
    let path = config_path()?;
    save_config_to_path(&path, config)
}

pub fn save_config_to_path(path: &Path, config: &PipelineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
