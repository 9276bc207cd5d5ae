//! Dataset discovery and per-dataset metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{PrepError, Result};
use crate::helpers::split_paragraphs;

/// File names marking a dataset directory.
#[derive(Debug, Clone)]
pub struct DatasetFileNames {
    /// Presence of this file makes a directory a dataset.
    pub full: String,
    /// Used instead of `full` when present.
    pub train: String,
    /// Validation split, processed without augmentation.
    pub dev: String,
}

impl Default for DatasetFileNames {
    fn default() -> Self {
        Self {
            full: "full.txt".to_string(),
            train: "train.txt".to_string(),
            dev: "dev.txt".to_string(),
        }
    }
}

/// One text file to prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    pub path: PathBuf,
    /// Directory path relative to the source root, `/`-separated.
    pub dataset: String,
    pub is_dev: bool,
}

impl DatasetFile {
    /// Dataset name of this split; validation splits get a `/dev` suffix.
    pub fn name(&self) -> String {
        if self.is_dev {
            format!("{}/dev", self.dataset)
        } else {
            self.dataset.clone()
        }
    }

    /// Prefix of the shard and metadata files of this split.
    pub fn prefix(&self) -> String {
        self.name().replace('/', "--")
    }
}

/// Find every dataset under `root`, sorted by path.
pub fn discover_datasets(root: &Path, names: &DatasetFileNames) -> Result<Vec<DatasetFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == names.full.as_str())
    {
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        let dataset = dataset_name(root, dir);

        let train = dir.join(&names.train);
        let dev = dir.join(&names.dev);
        if train.is_file() {
            files.push(DatasetFile {
                path: train,
                dataset: dataset.clone(),
                is_dev: false,
            });
        } else if !dev.is_file() {
            files.push(DatasetFile {
                path: entry.path().to_path_buf(),
                dataset: dataset.clone(),
                is_dev: false,
            });
        }
        if dev.is_file() {
            files.push(DatasetFile {
                path: dev,
                dataset,
                is_dev: true,
            });
        }
    }

    if files.is_empty() {
        return Err(PrepError::NoInputFiles(root.display().to_string()));
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn dataset_name(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    } else {
        parts.join("/")
    }
}

/// Conversations of a dataset file: its blank-line separated paragraphs.
pub fn read_conversations(path: &Path) -> Result<Vec<String>> {
    Ok(split_paragraphs(&std::fs::read_to_string(path)?))
}

/// What is known about one dataset split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetMetadata {
    pub dataset: String,
    pub conversations: Option<usize>,
    pub spontaneous: bool,
    pub is_dev: bool,
}

/// A row from the metadata CSV file.
#[derive(Debug, Deserialize)]
struct MetadataRow {
    dataset: String,
    #[serde(default)]
    conversations: Option<usize>,
    #[serde(default)]
    spontaneous: Option<String>,
}

/// Dataset properties read from a CSV keyed by dataset name.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    rows: HashMap<String, (Option<usize>, bool)>,
}

impl MetadataTable {
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = HashMap::new();
        for result in reader.deserialize() {
            let row: MetadataRow = result?;
            let spontaneous = match row.spontaneous.as_deref() {
                Some(flag) => parse_flag(flag).ok_or_else(|| {
                    PrepError::Config(format!(
                        "invalid spontaneous flag {flag:?} for dataset {}",
                        row.dataset
                    ))
                })?,
                None => false,
            };
            rows.insert(row.dataset, (row.conversations, spontaneous));
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Metadata of `file`, defaulting (with a warning) when the dataset is
    /// not listed.
    pub fn lookup(&self, file: &DatasetFile) -> DatasetMetadata {
        let (conversations, spontaneous) = match self.rows.get(&file.dataset) {
            Some(&row) => row,
            None => {
                if !self.rows.is_empty() {
                    warn!(dataset = %file.dataset, "no metadata for dataset, assuming not spontaneous");
                }
                (None, false)
            }
        };
        DatasetMetadata {
            dataset: file.name(),
            conversations,
            spontaneous,
            is_dev: file.is_dev,
        }
    }
}

fn parse_flag(flag: &str) -> Option<bool> {
    match flag.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}
