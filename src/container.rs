//! Containers: one physical store holding named timelines and datasets.
//!
//! A container maps logical paths such as `"speaker/turns"` onto arrays of
//! its [`ArrayStore`]:
//!
//! ```text
//! timeline/<path>          one encoded TimeRange per element
//! dataset/<path>/data      flat records
//! dataset/<path>/link      one (offset, count) pair per timeline position
//! ```

use std::path::Path;

use crate::array::{ArrayStore, AttrValue, DirStore, Rights};
use crate::error::Result;

const TIMELINE_NS: &str = "timeline/";
const DATASET_NS: &str = "dataset/";
const MEDIUM_ATTR: &str = "medium";
const FORMAT_ATTR: &str = "format_version";
const FORMAT_VERSION: i64 = 1;

pub(crate) fn timeline_array(path: &str) -> String {
    format!("{TIMELINE_NS}{path}")
}

pub(crate) fn data_array(path: &str) -> String {
    format!("{DATASET_NS}{path}/data")
}

pub(crate) fn link_array(path: &str) -> String {
    format!("{DATASET_NS}{path}/link")
}

pub struct Container<S: ArrayStore = DirStore> {
    store: S,
}

impl<S: ArrayStore> Container<S> {
    /// Creates an empty container describing `medium` (a URI of the source
    /// media, e.g. an audio file).
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `path` is taken.
    pub fn create(path: &Path, medium: &str) -> Result<Self> {
        let mut store = S::create(path)?;
        store.set_root_attr(MEDIUM_ATTR, AttrValue::from(medium))?;
        store.set_root_attr(FORMAT_ATTR, AttrValue::Int(FORMAT_VERSION))?;
        log::debug!("created container {} for {medium}", path.display());
        Ok(Self { store })
    }

    pub fn open(path: &Path, rights: Rights) -> Result<Self> {
        Ok(Self {
            store: S::open(path, rights)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn medium(&self) -> Option<String> {
        self.store
            .get_root_attr(MEDIUM_ATTR)
            .and_then(|v| v.as_text().map(str::to_string))
    }

    pub fn list_timelines(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_arrays(TIMELINE_NS)?
            .into_iter()
            .filter_map(|name| name.strip_prefix(TIMELINE_NS).map(str::to_string))
            .collect())
    }

    pub fn list_datasets(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_arrays(DATASET_NS)?
            .into_iter()
            .filter_map(|name| {
                name.strip_prefix(DATASET_NS)?
                    .strip_suffix("/link")
                    .map(str::to_string)
            })
            .collect())
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn medium_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("show.tls");
        let container: Container = Container::create(&path, "file:///show.wav").unwrap();
        container.close().unwrap();

        let container: Container = Container::open(&path, Rights::ReadOnly).unwrap();
        assert_eq!(container.medium().as_deref(), Some("file:///show.wav"));
        assert!(container.list_timelines().unwrap().is_empty());
        assert!(container.list_datasets().unwrap().is_empty());

        let err = Container::<DirStore>::create(&path, "again").err().unwrap();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }
}
