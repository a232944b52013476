//! Label-to-data interval join and label filtering.
//!
//! # Design
//!
//! Both timelines of a shard are sorted, so the label positions overlapping
//! consecutive data positions move forward together. [`join`] walks the two
//! with a single label cursor: for each data range it skips labels that end
//! before it, then counts the consecutive labels that intersect it. The
//! cursor stays on the first overlapping label since the next data range
//! may overlap it too.
//!
//! A label position can carry several values. The values joined to a data
//! position are all values of all positions in its run, and a filter passes
//! when any one of them satisfies the predicate.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::TimeRange;

/// Overlapping label positions `first..first + count` of one data position.
/// A zero `count` means no label intersects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelRun {
    pub first: usize,
    pub count: usize,
}

impl LabelRun {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn positions(&self) -> std::ops::Range<usize> {
        self.first..self.first + self.count
    }
}

/// Computes the overlapping label run of every data range.
pub fn join(data: &[TimeRange], labels: &[TimeRange]) -> Vec<LabelRun> {
    let mut cursor = 0;
    data.iter()
        .map(|range| {
            // labels ending by the start of this range cannot meet any later one
            while cursor < labels.len()
                && labels[cursor].end_time().compare(&range.start_time()) != Ordering::Greater
            {
                cursor += 1;
            }
            let count = labels[cursor..]
                .iter()
                .take_while(|label| label.intersects(range))
                .count();
            LabelRun {
                first: cursor,
                count,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Accepts every labelled position.
    None,
    EqualTo,
    DiffersFrom,
    GreaterThan,
    SmallerThan,
}

/// Predicate over label values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    #[serde(default)]
    pub reference: i32,
}

impl FilterSpec {
    pub fn new(kind: FilterKind, reference: i32) -> Self {
        Self { kind, reference }
    }

    pub fn accept_all() -> Self {
        Self::new(FilterKind::None, 0)
    }

    pub fn accepts(&self, value: i32) -> bool {
        match self.kind {
            FilterKind::None => true,
            FilterKind::EqualTo => value == self.reference,
            FilterKind::DiffersFrom => value != self.reference,
            FilterKind::GreaterThan => value > self.reference,
            FilterKind::SmallerThan => value < self.reference,
        }
    }
}

/// True when any of `values` passes `spec`. `FilterKind::None` passes even
/// an empty list; every other kind rejects it.
pub fn evaluate_filter(values: &[i32], spec: &FilterSpec) -> bool {
    spec.kind == FilterKind::None || values.iter().any(|&v| spec.accepts(v))
}

/// Outcome of the filter for one data position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mask {
    Served,
    /// Labelled, but no joined value passed the filter.
    Excluded,
    /// No label intersects the position.
    NoLabel,
}

/// Label values of one shard, grouped by label timeline position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelTrack {
    ranges: Vec<TimeRange>,
    starts: Vec<usize>,
    values: Vec<i32>,
}

impl LabelTrack {
    /// Builds a track from per-position value counts and the concatenated
    /// values, as returned by a dataset dump.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` when the counts do not line up with `ranges` or
    /// `values`.
    pub fn from_counts(ranges: Vec<TimeRange>, counts: &[usize], values: Vec<i32>) -> Result<Self> {
        if counts.len() != ranges.len() {
            return Err(Error::Corrupt("label counts do not match timeline"));
        }
        let mut starts = Vec::with_capacity(counts.len() + 1);
        let mut total = 0;
        starts.push(0);
        for count in counts {
            total += count;
            starts.push(total);
        }
        if total != values.len() {
            return Err(Error::Corrupt("label counts do not match values"));
        }
        Ok(Self {
            ranges,
            starts,
            values,
        })
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

    /// Values of label position `position`.
    pub fn values_at(&self, position: usize) -> &[i32] {
        match (self.starts.get(position), self.starts.get(position + 1)) {
            (Some(&start), Some(&end)) => &self.values[start..end],
            _ => &[],
        }
    }

    /// Values of every position in `run`, in timeline order.
    pub fn run_values(&self, run: LabelRun) -> &[i32] {
        if run.is_empty() {
            return &[];
        }
        match (self.starts.get(run.first), self.starts.get(run.first + run.count)) {
            (Some(&start), Some(&end)) => &self.values[start..end],
            _ => &[],
        }
    }

    pub fn all_values(&self) -> &[i32] {
        &self.values
    }
}

/// Mask of every data position given its label runs.
pub fn build_mask(runs: &[LabelRun], track: &LabelTrack, spec: &FilterSpec) -> Vec<Mask> {
    runs.iter()
        .map(|&run| {
            if run.is_empty() {
                Mask::NoLabel
            } else if evaluate_filter(track.run_values(run), spec) {
                Mask::Served
            } else {
                Mask::Excluded
            }
        })
        .collect()
}

/// Every `(shard, label position)` whose values contain `value`. A position
/// is reported once even if the value repeats in it.
pub fn timeranges_for_label(tracks: &[LabelTrack], value: i32) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    for (shard, track) in tracks.iter().enumerate() {
        for position in 0..track.len() {
            if track.values_at(position).contains(&value) {
                found.push((shard, position));
            }
        }
    }
    found
}

/// Counts for one distinct label value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRow {
    pub value: i32,
    /// Occurrences across every label position of every shard.
    pub count: usize,
    pub count_per_shard: Vec<usize>,
    /// Served data positions whose joined values contain this value.
    pub served: usize,
    pub served_per_shard: Vec<usize>,
}

/// Label statistics across shards, one row per distinct value in ascending
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelStatistics {
    shards: usize,
    rows: Vec<LabelRow>,
}

impl LabelStatistics {
    /// `tracks[i]` pairs with `joins[i]`, the runs and mask of shard `i`.
    pub fn compute(tracks: &[LabelTrack], joins: &[(&[LabelRun], &[Mask])]) -> Self {
        let shards = tracks.len();
        let mut rows: BTreeMap<i32, LabelRow> = BTreeMap::new();

        for (shard, track) in tracks.iter().enumerate() {
            for &value in track.all_values() {
                let r = row_for(&mut rows, value, shards);
                r.count += 1;
                r.count_per_shard[shard] += 1;
            }
        }

        let mut distinct = Vec::new();
        for (shard, (track, (runs, mask))) in tracks.iter().zip(joins).enumerate() {
            for (run, _) in runs.iter().zip(mask.iter()).filter(|(_, m)| **m == Mask::Served) {
                distinct.clear();
                distinct.extend_from_slice(track.run_values(*run));
                distinct.sort_unstable();
                distinct.dedup();
                for &value in &distinct {
                    let r = row_for(&mut rows, value, shards);
                    r.served += 1;
                    r.served_per_shard[shard] += 1;
                }
            }
        }

        Self {
            shards,
            rows: rows.into_values().collect(),
        }
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    pub fn labels(&self) -> impl Iterator<Item = i32> + '_ {
        self.rows.iter().map(|r| r.value)
    }

    pub fn row(&self, value: i32) -> Option<&LabelRow> {
        self.rows
            .binary_search_by_key(&value, |r| r.value)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Tab-separated table: `label total served` followed by one
    /// `total/served` column per shard.
    pub fn write_table<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "label\ttotal\tserved")?;
        for shard in 0..self.shards {
            write!(out, "\tshard{shard}")?;
        }
        writeln!(out)?;
        for row in &self.rows {
            write!(out, "{}\t{}\t{}", row.value, row.count, row.served)?;
            for shard in 0..self.shards {
                write!(out, "\t{}/{}", row.count_per_shard[shard], row.served_per_shard[shard])?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

fn row_for(rows: &mut BTreeMap<i32, LabelRow>, value: i32, shards: usize) -> &mut LabelRow {
    rows.entry(value).or_insert_with(|| LabelRow {
        value,
        count: 0,
        count_per_shard: vec![0; shards],
        served: 0,
        served_per_shard: vec![0; shards],
    })
}
