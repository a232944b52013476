//! Copying timelines and datasets between containers.
//!
//! A dataset is copied together with its timeline. When the destination
//! already holds a timeline at that path it is reused, provided it has the
//! same ranges. Only reachable records are copied, so orphaned runs left by
//! rewrites do not follow the dataset.

use crate::array::ArrayStore;
use crate::container::Container;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::time::TimelineRelation;
use crate::timeline::Timeline;

/// Copies the timeline at `path` from `from` into `to`.
///
/// # Errors
///
/// - `NotFound` when `from` has no such timeline.
/// - `AlreadyExists` when `to` holds a different timeline at `path`.
pub fn copy_timeline<S: ArrayStore, T: ArrayStore>(
    from: &mut Container<S>,
    to: &mut Container<T>,
    path: &str,
) -> Result<Timeline> {
    let source = Timeline::open(from, path)?;
    match Timeline::open(to, path) {
        Ok(existing) if existing.classify(&source) == TimelineRelation::Same => {
            log::debug!("reusing timeline {path} in {}", to.path().display());
            Ok(existing)
        }
        Ok(_) => Err(Error::AlreadyExists {
            path: to.path().join(path),
        }),
        Err(Error::NotFound { .. }) => {
            Timeline::create(to, path, source.ranges().to_vec(), source.description())
        }
        Err(err) => Err(err),
    }
}

/// Copies the dataset at `path`, and its timeline, from `from` into `to`.
/// Returns the copy, still open.
///
/// # Errors
///
/// Same as [`copy_timeline`] for the timeline; `AlreadyExists` when `to`
/// already has a dataset at `path`.
pub fn copy_dataset<S: ArrayStore, T: ArrayStore>(
    from: &mut Container<S>,
    to: &mut Container<T>,
    path: &str,
) -> Result<Dataset> {
    let source = Dataset::open(from, path)?;
    let result = copy_records(from, to, &source);
    let closed = source.close(from);
    let copied = result?;
    closed?;
    Ok(copied)
}

fn copy_records<S: ArrayStore, T: ArrayStore>(
    from: &mut Container<S>,
    to: &mut Container<T>,
    source: &Dataset,
) -> Result<Dataset> {
    let timeline = copy_timeline(from, to, source.timeline_path())?;
    let datatype = source.datatype();
    let mut copied = Dataset::create(to, source.path(), &timeline, datatype, source.description())?;
    for position in 0..source.len() {
        let records = source.read(from, position, datatype)?;
        if !records.is_empty() {
            copied.write(to, position, &records)?;
        }
    }
    log::debug!(
        "copied dataset {} ({} of {} records reachable)",
        source.path(),
        copied.stored_len(),
        source.stored_len()
    );
    Ok(copied)
}
