//! Write-once sorted timelines.
//!
//! A timeline is the index axis of one or more datasets: position `i` of a
//! dataset holds the records for `ranges[i]`. Timelines are validated and
//! written once, then only ever read.

use std::cmp::Ordering;

use crate::array::{ArrayHandle, ArrayStore, AttrValue};
use crate::container::{timeline_array, Container};
use crate::error::{Error, Result};
use crate::time::{self, TimeRange, TimelineRelation, TIME_RANGE_LEN};

const TIMELINE_VERSION: i64 = 1;
const DESCRIPTION_ATTR: &str = "description";
const VERSION_ATTR: &str = "version";
const TIMES_USED_ATTR: &str = "times_used";

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    path: String,
    description: String,
    ranges: Vec<TimeRange>,
}

impl Timeline {
    /// Validates an in-memory timeline.
    ///
    /// # Errors
    ///
    /// - `MissingDescription` for an empty description.
    /// - `InvalidTimeRange` for a range with negative duration or a
    ///   non-positive scale.
    /// - `UnsortedInput` when `ranges[index - 1]` sorts after `ranges[index]`.
    ///   Equal neighbours are accepted.
    pub fn new(ranges: Vec<TimeRange>, description: &str) -> Result<Self> {
        if description.trim().is_empty() {
            return Err(Error::MissingDescription);
        }
        if let Some(index) = ranges.iter().position(|r| !r.is_valid()) {
            return Err(Error::InvalidTimeRange { index });
        }
        if let Some(index) = ranges
            .windows(2)
            .position(|pair| pair[0].compare(&pair[1]) == Ordering::Greater)
        {
            return Err(Error::UnsortedInput { index: index + 1 });
        }
        Ok(Self {
            path: String::new(),
            description: description.to_string(),
            ranges,
        })
    }

    /// Validates `ranges` and stores them at `path` in `container`.
    ///
    /// # Errors
    ///
    /// Same as [`Timeline::new`], plus `AlreadyExists` when `path` is taken.
    pub fn create<S: ArrayStore>(
        container: &mut Container<S>,
        path: &str,
        ranges: Vec<TimeRange>,
        description: &str,
    ) -> Result<Self> {
        let mut timeline = Self::new(ranges, description)?;
        let name = timeline_array(path);
        let store = container.store_mut();
        if store.contains_array(&name) {
            return Err(Error::AlreadyExists {
                path: store.path().join(&name),
            });
        }

        let handle = store.create_array(&name, TIME_RANGE_LEN)?;
        let mut bytes = Vec::with_capacity(timeline.ranges.len() * TIME_RANGE_LEN);
        for range in &timeline.ranges {
            bytes.extend_from_slice(&range.to_le_bytes());
        }
        store.extend_array(handle, timeline.ranges.len())?;
        store.write_range(handle, 0, &bytes)?;
        store.set_attr(handle, DESCRIPTION_ATTR, AttrValue::from(description))?;
        store.set_attr(handle, VERSION_ATTR, AttrValue::Int(TIMELINE_VERSION))?;
        store.set_attr(handle, TIMES_USED_ATTR, AttrValue::Int(0))?;
        store.close_array(handle)?;

        timeline.path = path.to_string();
        Ok(timeline)
    }

    /// Loads the timeline stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such timeline.
    pub fn open<S: ArrayStore>(container: &mut Container<S>, path: &str) -> Result<Self> {
        let store = container.store_mut();
        let handle = store.open_array(&timeline_array(path))?;
        let loaded = read_ranges(store, handle);
        let description = store
            .get_attr(handle, DESCRIPTION_ATTR)
            .map(|v| v.and_then(|v| v.as_text().map(str::to_string)));
        store.close_array(handle)?;
        Ok(Self {
            path: path.to_string(),
            description: description?.unwrap_or_default(),
            ranges: loaded?,
        })
    }

    /// Number of datasets created against the timeline at `path`.
    pub fn times_used<S: ArrayStore>(container: &mut Container<S>, path: &str) -> Result<i64> {
        let store = container.store_mut();
        let handle = store.open_array(&timeline_array(path))?;
        let used = store.get_attr(handle, TIMES_USED_ATTR);
        store.close_array(handle)?;
        Ok(used?.and_then(|v| v.as_int()).unwrap_or(0))
    }

    pub(crate) fn mark_used<S: ArrayStore>(container: &mut Container<S>, path: &str) -> Result<()> {
        let store = container.store_mut();
        let handle = store.open_array(&timeline_array(path))?;
        let used = store
            .get_attr(handle, TIMES_USED_ATTR)?
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        store.set_attr(handle, TIMES_USED_ATTR, AttrValue::Int(used + 1))?;
        store.close_array(handle)
    }

    /// Path inside the container; empty for a timeline never stored.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TimeRange> {
        self.ranges.get(index)
    }

    pub fn search(&self, target: &TimeRange) -> Option<usize> {
        time::search(&self.ranges, target)
    }

    pub fn classify(&self, other: &Timeline) -> TimelineRelation {
        time::classify(&self.ranges, &other.ranges)
    }
}

fn read_ranges<S: ArrayStore>(store: &S, handle: ArrayHandle) -> Result<Vec<TimeRange>> {
    let len = store.len(handle)?;
    let bytes = store.read_range(handle, 0, len)?;
    bytes
        .chunks_exact(TIME_RANGE_LEN)
        .map(|chunk| TimeRange::from_le_bytes(chunk).ok_or(Error::Corrupt("truncated time range")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Rights;
    use tempfile::TempDir;

    fn seconds(pairs: &[(i64, i64)]) -> Vec<TimeRange> {
        pairs
            .iter()
            .map(|&(start, stop)| TimeRange::new(start, stop - start, 1))
            .collect()
    }

    #[test]
    fn validation() {
        assert!(matches!(
            Timeline::new(seconds(&[(0, 5)]), "  "),
            Err(Error::MissingDescription)
        ));
        assert!(matches!(
            Timeline::new(seconds(&[(0, 5), (5, 9), (1, 2)]), "turns"),
            Err(Error::UnsortedInput { index: 2 })
        ));
        assert!(matches!(
            Timeline::new(vec![TimeRange::new(0, 1, 1), TimeRange::new(3, -1, 1)], "turns"),
            Err(Error::InvalidTimeRange { index: 1 })
        ));
        assert!(matches!(
            Timeline::new(vec![TimeRange::new(0, 1, 0)], "turns"),
            Err(Error::InvalidTimeRange { index: 0 })
        ));
        let dup = Timeline::new(seconds(&[(0, 5), (0, 5), (5, 9)]), "turns").unwrap();
        assert_eq!(dup.len(), 3);
        assert!(Timeline::new(Vec::new(), "empty").unwrap().is_empty());
    }

    #[test]
    fn stored_timeline_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c");
        let mut container: Container = Container::create(&path, "m").unwrap();
        let created = Timeline::create(
            &mut container,
            "speaker/turns",
            seconds(&[(0, 5), (5, 9), (9, 12)]),
            "speaker turns",
        )
        .unwrap();
        assert_eq!(created.path(), "speaker/turns");
        assert!(matches!(
            Timeline::create(&mut container, "speaker/turns", Vec::new(), "again"),
            Err(Error::AlreadyExists { .. })
        ));
        container.close().unwrap();

        let mut container: Container = Container::open(&path, Rights::ReadOnly).unwrap();
        let opened = Timeline::open(&mut container, "speaker/turns").unwrap();
        assert_eq!(opened, created);
        assert_eq!(opened.description(), "speaker turns");
        assert_eq!(opened.search(&TimeRange::new(5, 4, 1)), Some(1));
        assert_eq!(opened.classify(&created), TimelineRelation::Same);
        assert_eq!(Timeline::times_used(&mut container, "speaker/turns").unwrap(), 0);
        assert_eq!(container.list_timelines().unwrap(), vec!["speaker/turns".to_string()]);
        assert!(matches!(
            Timeline::open(&mut container, "missing"),
            Err(Error::NotFound { .. })
        ));
    }
}
