//! Streaming server configuration.
//!
//! A JSON file names the data shards, optionally the label shards, and an
//! optional label filter:
//!
//! ```json
//! {
//!   "data":  { "dataset": "mfcc", "files": ["a.tls", "b.tls"] },
//!   "label": { "dataset": "speaker",
//!              "files": { "prefix": "labels/", "suffix": ".tls", "list": "uris.lst" } },
//!   "filter": { "kind": "equal_to", "reference": 3 }
//! }
//! ```
//!
//! `files` is either an explicit list or a pattern whose `list` file holds
//! one base name per line. Labels are only resolved when a filter is set.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::join::FilterSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileList {
    List(Vec<PathBuf>),
    Pattern {
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
        list: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Dataset path inside every file of the section.
    pub dataset: String,
    pub files: FileList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub data: Section,
    #[serde(default)]
    pub label: Option<Section>,
    /// Absent means no filtering at all, which differs from
    /// `{"kind": "none"}`: the latter still drops unlabelled positions.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    /// Accepted for compatibility; the server does not cap anything.
    #[serde(default)]
    pub max_samples_per_label: Option<u32>,
    /// Directory relative `list` paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One physical shard: a data dataset, optionally paired with labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    pub data_path: PathBuf,
    pub data_dataset: String,
    pub label_path: Option<PathBuf>,
    pub label_dataset: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub shards: Vec<ShardSpec>,
    pub filter: Option<FilterSpec>,
    pub max_samples_per_label: Option<u32>,
}

impl ServerConfig {
    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing file and `Json` for malformed
    /// content.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        let json = fs::read_to_string(path)?;
        let mut config = Self::from_json(&json)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Expands file lists into shard specs.
    ///
    /// # Errors
    ///
    /// - `LabelUnavailable` when a filter is set without a label section.
    /// - `ShardCountMismatch` when data and label file counts differ.
    /// - `Config` for an empty data file list.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let data = self.expand(&self.data.files)?;
        if data.is_empty() {
            return Err(Error::Config("no data files".to_string()));
        }

        let labels = match (&self.filter, &self.label) {
            (None, _) => None,
            (Some(_), None) => return Err(Error::LabelUnavailable),
            (Some(_), Some(section)) => {
                let files = self.expand(&section.files)?;
                if files.len() != data.len() {
                    return Err(Error::ShardCountMismatch {
                        data: data.len(),
                        label: files.len(),
                    });
                }
                Some((files, section.dataset.clone()))
            }
        };

        let shards = data
            .into_iter()
            .enumerate()
            .map(|(i, data_path)| ShardSpec {
                data_path,
                data_dataset: self.data.dataset.clone(),
                label_path: labels.as_ref().map(|(files, _)| files[i].clone()),
                label_dataset: labels.as_ref().map(|(_, dataset)| dataset.clone()),
            })
            .collect();

        Ok(ResolvedConfig {
            shards,
            filter: self.filter,
            max_samples_per_label: self.max_samples_per_label,
        })
    }

    fn expand(&self, files: &FileList) -> Result<Vec<PathBuf>> {
        match files {
            FileList::List(paths) => Ok(paths.clone()),
            FileList::Pattern {
                prefix,
                suffix,
                list,
            } => {
                let list = if list.is_relative() {
                    self.base_dir.join(list)
                } else {
                    list.clone()
                };
                if !list.exists() {
                    return Err(Error::NotFound { path: list });
                }
                Ok(fs::read_to_string(&list)?
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|name| PathBuf::from(format!("{prefix}{name}{suffix}")))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::FilterKind;
    use tempfile::TempDir;

    #[test]
    fn unfiltered_ignores_labels() {
        let config = ServerConfig::from_json(
            r#"{"data": {"dataset": "mfcc", "files": ["a", "b"]},
                "label": {"dataset": "spk", "files": ["x"]}}"#,
        )
        .unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.filter, None);
        assert_eq!(resolved.shards.len(), 2);
        assert_eq!(resolved.shards[1].data_path, PathBuf::from("b"));
        assert!(resolved.shards.iter().all(|s| s.label_path.is_none()));
    }

    #[test]
    fn filter_requires_matching_labels() {
        let missing = ServerConfig::from_json(
            r#"{"data": {"dataset": "d", "files": ["a"]},
                "filter": {"kind": "equal_to", "reference": 3}}"#,
        )
        .unwrap();
        assert!(matches!(missing.resolve(), Err(Error::LabelUnavailable)));

        let uneven = ServerConfig::from_json(
            r#"{"data": {"dataset": "d", "files": ["a", "b"]},
                "label": {"dataset": "l", "files": ["x"]},
                "filter": {"kind": "none"}}"#,
        )
        .unwrap();
        assert!(matches!(
            uneven.resolve(),
            Err(Error::ShardCountMismatch { data: 2, label: 1 })
        ));
        assert_eq!(uneven.filter, Some(FilterSpec::accept_all()));
    }

    #[test]
    fn pattern_list_expands() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("uris.lst"), "show1\n\nshow2\n").unwrap();
        let config_path = dir.path().join("server.json");
        fs::write(
            &config_path,
            r#"{"data": {"dataset": "d",
                         "files": {"prefix": "/data/", "suffix": ".tls", "list": "uris.lst"}},
                "label": {"dataset": "l",
                          "files": {"prefix": "/lab/", "suffix": ".tls", "list": "uris.lst"}},
                "filter": {"kind": "greater_than", "reference": 0},
                "max_samples_per_label": 10}"#,
        )
        .unwrap();

        let resolved = ServerConfig::load(&config_path).unwrap().resolve().unwrap();
        assert_eq!(resolved.max_samples_per_label, Some(10));
        assert_eq!(resolved.filter, Some(FilterSpec::new(FilterKind::GreaterThan, 0)));
        assert_eq!(
            resolved.shards,
            vec![
                ShardSpec {
                    data_path: "/data/show1.tls".into(),
                    data_dataset: "d".into(),
                    label_path: Some("/lab/show1.tls".into()),
                    label_dataset: Some("l".into()),
                },
                ShardSpec {
                    data_path: "/data/show2.tls".into(),
                    data_dataset: "d".into(),
                    label_path: Some("/lab/show2.tls".into()),
                    label_dataset: Some("l".into()),
                },
            ]
        );
    }

    #[test]
    fn missing_files() {
        assert!(matches!(
            ServerConfig::load(Path::new("/nonexistent/server.json")),
            Err(Error::NotFound { .. })
        ));
        let config = ServerConfig::from_json(
            r#"{"data": {"dataset": "d", "files": {"list": "/nonexistent/list"}}}"#,
        )
        .unwrap();
        assert!(matches!(config.resolve(), Err(Error::NotFound { .. })));
        assert!(ServerConfig::from_json(r#"{"data": {"dataset": "d", "files": []}}"#)
            .unwrap()
            .resolve()
            .is_err());
    }
}
