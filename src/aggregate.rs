//! Reduction of a dataset onto another timeline.
//!
//! Every position of the source dataset is mapped to the first position of
//! the target timeline it intersects, with the same cursor walk as the label
//! join. Each target position then receives a single record holding the
//! per-dimension maximum or minimum of every record mapped to it. Target
//! positions that nothing maps to stay empty.
//!
//! The result is stored next to the source as `<dataset>/maximum` or
//! `<dataset>/minimum`, indexed by the target timeline.

use serde::{Deserialize, Serialize};

use crate::array::ArrayStore;
use crate::container::Container;
use crate::dataset::Dataset;
use crate::datatype::{BaseType, Records};
use crate::error::{Error, Result};
use crate::join::join;
use crate::time::TimeRange;
use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Maximum,
    Minimum,
}

impl Aggregation {
    pub fn name(self) -> &'static str {
        match self {
            Aggregation::Maximum => "maximum",
            Aggregation::Minimum => "minimum",
        }
    }

    fn fold(self, acc: &mut [f64], record: &[f64]) {
        for (a, &x) in acc.iter_mut().zip(record) {
            *a = match self {
                Aggregation::Maximum => a.max(x),
                Aggregation::Minimum => a.min(x),
            };
        }
    }
}

/// Target position of every source position; `None` when no target range
/// intersects it.
pub fn map_positions(source: &[TimeRange], target: &[TimeRange]) -> Vec<Option<usize>> {
    join(source, target)
        .into_iter()
        .map(|run| (!run.is_empty()).then_some(run.first))
        .collect()
}

/// Aggregates dataset `dataset_path` onto timeline `target_path` of the same
/// container and returns the new dataset, still open.
///
/// # Errors
///
/// - `NotFound` when the dataset or either timeline is missing.
/// - `AlreadyExists` when the aggregated dataset was already computed.
pub fn aggregate<S: ArrayStore>(
    container: &mut Container<S>,
    dataset_path: &str,
    target_path: &str,
    how: Aggregation,
) -> Result<Dataset> {
    let source = Dataset::open(container, dataset_path)?;
    let result = aggregate_open(container, &source, target_path, how);
    let closed = source.close(container);
    let aggregated = result?;
    closed?;
    Ok(aggregated)
}

fn aggregate_open<S: ArrayStore>(
    container: &mut Container<S>,
    source: &Dataset,
    target_path: &str,
    how: Aggregation,
) -> Result<Dataset> {
    let source_timeline = Timeline::open(container, source.timeline_path())?;
    let target = Timeline::open(container, target_path)?;
    let mapping = map_positions(source_timeline.ranges(), target.ranges());

    let datatype = source.datatype();
    let dimension = datatype.dimension;
    let as_double = datatype.with_base(BaseType::Double);
    let mut reduced: Vec<Option<Vec<f64>>> = vec![None; target.len()];
    for (position, mapped) in mapping.into_iter().enumerate() {
        let Some(target_position) = mapped else {
            continue;
        };
        let records = source.read(container, position, as_double)?;
        let values = records
            .as_doubles()
            .ok_or(Error::Corrupt("records not converted to double"))?;
        for record in values.chunks_exact(dimension) {
            if let Some(acc) = reduced[target_position].as_mut() {
                how.fold(acc, record);
            } else {
                reduced[target_position] = Some(record.to_vec());
            }
        }
    }

    let path = format!("{}/{}", source.path(), how.name());
    let description = format!("{} ({})", source.description(), how.name());
    let mut aggregated = Dataset::create(container, &path, &target, datatype, &description)?;
    let mut written = 0;
    for (position, acc) in reduced.into_iter().enumerate() {
        if let Some(acc) = acc {
            aggregated.write(container, position, &Records::from_values(dimension, acc)?)?;
            written += 1;
        }
    }
    log::info!(
        "aggregated {} onto {target_path}: {written} of {} positions filled",
        source.path(),
        target.len()
    );
    Ok(aggregated)
}
