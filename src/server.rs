//! Multi-shard streaming with label filtering.
//!
//! # Design
//!
//! A [`StreamingServer`] presents N shards as one sequence of entries, one
//! per served data position, shard after shard. Everything that decides
//! *which* positions are served is computed when the server is opened:
//!
//! 1. each shard's data timeline and link table are loaded and the record
//!    shapes are checked to agree across shards;
//! 2. when a filter is configured, each shard's label dataset is loaded in
//!    full, joined against the data timeline and turned into a [`Mask`];
//! 3. label statistics are computed over all shards.
//!
//! Opening fails as a whole on the first error; nothing stays open.
//!
//! Record payloads are only read by [`StreamingServer::read_next`]. Each
//! shard's container is opened the first time one of its positions is read
//! and closed when the cursor leaves the shard.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use timeline_store::config::ServerConfig;
//! use timeline_store::server::StreamingServer;
//!
//! let config = ServerConfig::load(Path::new("server.json"))?.resolve()?;
//! let mut server: StreamingServer = StreamingServer::from_config(&config)?;
//! let datatype = server.datatype();
//! while let Some(entry) = server.read_next(datatype)? {
//!     println!("{} {:?} {}", entry.shard, entry.labels, entry.records.len());
//! }
//! # Ok::<(), timeline_store::Error>(())
//! ```

use std::path::{Path, PathBuf};

use crate::array::{ArrayStore, DirStore, Rights};
use crate::config::{ResolvedConfig, ShardSpec};
use crate::container::Container;
use crate::dataset::{Dataset, Link};
use crate::datatype::{BaseType, Datatype, Records};
use crate::error::{Error, Result};
use crate::join::{self, FilterSpec, LabelRun, LabelStatistics, LabelTrack, Mask};
use crate::time::TimeRange;
use crate::timeline::Timeline;

/// Position of the stream. `eof` is set once the cursor walked past the last
/// shard; the position is then back at `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamCursor {
    pub shard: usize,
    pub position: usize,
    pub eof: bool,
}

/// One served data position. Borrows server buffers; valid until the next
/// call that mutates the server.
#[derive(Debug)]
pub struct Entry<'a> {
    pub shard: usize,
    pub position: usize,
    pub range: TimeRange,
    pub records: &'a Records,
    /// Joined label values; empty when no filter is configured.
    pub labels: &'a [i32],
}

struct Shard {
    path: PathBuf,
    dataset: String,
    ranges: Vec<TimeRange>,
    links: Vec<Link>,
    labels: Option<ShardLabels>,
}

struct ShardLabels {
    track: LabelTrack,
    runs: Vec<LabelRun>,
    mask: Vec<Mask>,
}

impl Shard {
    fn len(&self) -> usize {
        self.ranges.len()
    }

    fn mask(&self, position: usize) -> Mask {
        match &self.labels {
            Some(labels) => labels.mask[position],
            None => Mask::Served,
        }
    }

    fn labels(&self, position: usize) -> &[i32] {
        match &self.labels {
            Some(labels) => labels.track.run_values(labels.runs[position]),
            None => &[],
        }
    }
}

struct OpenShard<S: ArrayStore> {
    container: Container<S>,
    dataset: Dataset,
}

pub struct StreamingServer<S: ArrayStore = DirStore> {
    shards: Vec<Shard>,
    datatype: Datatype,
    filter: Option<FilterSpec>,
    statistics: Option<LabelStatistics>,
    cursor: StreamCursor,
    current: Option<OpenShard<S>>,
    records: Records,
}

impl<S: ArrayStore> StreamingServer<S> {
    /// Opens a server over resolved configuration.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        if let Some(cap) = config.max_samples_per_label {
            log::warn!("max_samples_per_label = {cap} is not enforced");
        }
        Self::open(&config.shards, config.filter)
    }

    /// Opens every shard and precomputes label masks and statistics.
    ///
    /// With `filter == None` every data position is served and no labels
    /// are read. With a filter, positions without any overlapping label are
    /// dropped even for `FilterKind::None`.
    ///
    /// # Errors
    ///
    /// - `Config` when `shards` is empty.
    /// - `LabelUnavailable` when a filter is set but no shard has labels.
    /// - `ShardCountMismatch` when only some shards have labels.
    /// - `Shard { .. }` wrapping any failure of one shard: a missing file
    ///   or dataset, a datatype differing from shard 0, a label dataset
    ///   whose dimension is not 1.
    pub fn open(shards: &[ShardSpec], filter: Option<FilterSpec>) -> Result<Self> {
        if shards.is_empty() {
            return Err(Error::Config("no data shards".to_string()));
        }
        if filter.is_some() {
            let labelled = shards.iter().filter(|s| s.label_path.is_some()).count();
            if labelled == 0 {
                return Err(Error::LabelUnavailable);
            }
            if labelled != shards.len() {
                return Err(Error::ShardCountMismatch {
                    data: shards.len(),
                    label: labelled,
                });
            }
        }

        let mut loaded = Vec::with_capacity(shards.len());
        let mut datatype = None;
        for (index, spec) in shards.iter().enumerate() {
            let (shard, shard_type) = load_data::<S>(spec)
                .map_err(|e| e.in_shard(index, &spec.data_path))?;
            match datatype {
                None => datatype = Some(shard_type),
                Some(expected) if expected != shard_type => {
                    return Err(Error::ShapeMismatch {
                        expected: expected.to_string(),
                        found: shard_type.to_string(),
                        context: format!("dataset {}", spec.data_dataset),
                    }
                    .in_shard(index, &spec.data_path));
                }
                Some(_) => {}
            }
            loaded.push(shard);
        }
        let datatype = datatype.ok_or_else(|| Error::Config("no data shards".to_string()))?;

        let mut statistics = None;
        if let Some(filter) = filter {
            for (index, (shard, spec)) in loaded.iter_mut().zip(shards).enumerate() {
                let (Some(path), Some(dataset)) = (&spec.label_path, &spec.label_dataset) else {
                    return Err(Error::LabelUnavailable);
                };
                let track = load_labels::<S>(path, dataset).map_err(|e| e.in_shard(index, path))?;
                let runs = join::join(&shard.ranges, track.ranges());
                let mask = join::build_mask(&runs, &track, &filter);
                shard.labels = Some(ShardLabels { track, runs, mask });
            }
            let tracks: Vec<LabelTrack> = loaded
                .iter()
                .filter_map(|s| s.labels.as_ref().map(|l| l.track.clone()))
                .collect();
            let joins: Vec<(&[LabelRun], &[Mask])> = loaded
                .iter()
                .filter_map(|s| s.labels.as_ref().map(|l| (l.runs.as_slice(), l.mask.as_slice())))
                .collect();
            statistics = Some(LabelStatistics::compute(&tracks, &joins));
        }

        let server = Self {
            shards: loaded,
            datatype,
            filter,
            statistics,
            cursor: StreamCursor::default(),
            current: None,
            records: Records::new(datatype),
        };
        log::info!(
            "streaming server opened: {} shards, {} positions, {} served, datatype {}",
            server.shards.len(),
            server.shards.iter().map(Shard::len).sum::<usize>(),
            server.served_count(),
            datatype
        );
        Ok(server)
    }

    /// Record shape shared by every shard.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn filter(&self) -> Option<FilterSpec> {
        self.filter
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn cursor(&self) -> StreamCursor {
        self.cursor
    }

    pub fn is_eof(&self) -> bool {
        self.cursor.eof
    }

    /// `None` unless a filter is configured.
    pub fn statistics(&self) -> Option<&LabelStatistics> {
        self.statistics.as_ref()
    }

    /// Mask of one shard; `None` without a filter or for an unknown shard.
    pub fn shard_mask(&self, shard: usize) -> Option<&[Mask]> {
        self.shards
            .get(shard)?
            .labels
            .as_ref()
            .map(|l| l.mask.as_slice())
    }

    pub fn shard_path(&self, shard: usize) -> Option<&Path> {
        self.shards.get(shard).map(|s| s.path.as_path())
    }

    /// Number of served positions across all shards.
    pub fn served_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| (0..s.len()).filter(|&p| s.mask(p) == Mask::Served).count())
            .sum()
    }

    /// Every `(shard, label position)` carrying `value`; empty without a
    /// filter.
    pub fn timeranges_for_label(&self, value: i32) -> Vec<(usize, usize)> {
        let tracks: Vec<LabelTrack> = self
            .shards
            .iter()
            .filter_map(|s| s.labels.as_ref().map(|l| l.track.clone()))
            .collect();
        join::timeranges_for_label(&tracks, value)
    }

    /// Advances to the next served position and returns it, or `None` at
    /// the end of the stream.
    ///
    /// Reaching the end resets the cursor to `(0, 0)` and sets `eof`; the
    /// following call starts a new pass and clears it.
    ///
    /// # Errors
    ///
    /// Read failures are returned wrapped in `Shard { .. }` and leave the
    /// cursor on the failing position.
    pub fn read_next(&mut self, requested: Datatype) -> Result<Option<Entry<'_>>> {
        if requested.dimension != self.datatype.dimension {
            return Err(Error::ShapeMismatch {
                expected: self.datatype.to_string(),
                found: requested.to_string(),
                context: "stream read".to_string(),
            });
        }
        self.cursor.eof = false;

        loop {
            let StreamCursor { shard, position, .. } = self.cursor;
            if shard < self.shards.len() && position == self.shards[shard].len() {
                self.close_current();
                self.cursor.position = 0;
                self.cursor.shard += 1;
                continue;
            }
            if shard >= self.shards.len() {
                self.close_current();
                self.cursor = StreamCursor {
                    shard: 0,
                    position: 0,
                    eof: true,
                };
                return Ok(None);
            }
            if self.shards[shard].mask(position) != Mask::Served {
                self.cursor.position += 1;
                continue;
            }

            self.records = self
                .read_position(shard, position, requested)
                .map_err(|e| e.in_shard(shard, &self.shards[shard].path))?;
            self.cursor.position += 1;

            let data = &self.shards[shard];
            return Ok(Some(Entry {
                shard,
                position,
                range: data.ranges[position],
                records: &self.records,
                labels: data.labels(position),
            }));
        }
    }

    fn read_position(
        &mut self,
        shard: usize,
        position: usize,
        requested: Datatype,
    ) -> Result<Records> {
        if self.current.is_none() {
            let spec = &self.shards[shard];
            let mut container = Container::<S>::open(&spec.path, Rights::ReadOnly)?;
            let dataset = Dataset::open(&mut container, &spec.dataset)?;
            log::debug!("opened shard {shard} ({})", spec.path.display());
            self.current = Some(OpenShard { container, dataset });
        }
        match &self.current {
            Some(open) => open.dataset.read(&open.container, position, requested),
            None => Err(Error::Corrupt("shard not open")),
        }
    }

    fn close_current(&mut self) {
        if let Some(open) = self.current.take() {
            let path = open.container.path().to_path_buf();
            if let Err(err) = open.container.close() {
                log::warn!("failed to close shard {}: {err}", path.display());
            } else {
                log::debug!("closed shard {}", path.display());
            }
        }
    }

    /// Reads every remaining served position. Returns the record count of
    /// each entry and all records concatenated.
    pub fn dump_all(&mut self, requested: Datatype) -> Result<(Vec<usize>, Records)> {
        let mut counts = Vec::new();
        let mut all = Records::new(requested);
        while let Some(entry) = self.read_next(requested)? {
            counts.push(entry.records.len());
            all.extend(entry.records)?;
        }
        Ok((counts, all))
    }

    /// Byte size of a full [`StreamingServer::dump_all`] pass with base type
    /// `base`, from link tables only.
    pub fn dump_size(&self, base: BaseType) -> usize {
        let element_size = self.datatype.with_base(base).element_size();
        self.shards
            .iter()
            .map(|s| {
                (0..s.len())
                    .filter(|&p| s.mask(p) == Mask::Served)
                    .map(|p| s.links[p].count as usize)
                    .sum::<usize>()
            })
            .sum::<usize>()
            * element_size
    }
}

fn load_data<S: ArrayStore>(spec: &ShardSpec) -> Result<(Shard, Datatype)> {
    let mut container = Container::<S>::open(&spec.data_path, Rights::ReadOnly)?;
    let dataset = Dataset::open(&mut container, &spec.data_dataset)?;
    let timeline = Timeline::open(&mut container, dataset.timeline_path())?;
    if timeline.len() != dataset.len() {
        return Err(Error::Corrupt("link table length differs from timeline"));
    }
    let datatype = dataset.datatype();
    let links = dataset.links().to_vec();
    dataset.close(&mut container)?;
    container.close()?;
    log::debug!(
        "loaded shard {} ({} positions, {datatype})",
        spec.data_path.display(),
        timeline.len()
    );
    Ok((
        Shard {
            path: spec.data_path.clone(),
            dataset: spec.data_dataset.clone(),
            ranges: timeline.ranges().to_vec(),
            links,
            labels: None,
        },
        datatype,
    ))
}

fn load_labels<S: ArrayStore>(path: &Path, dataset_path: &str) -> Result<LabelTrack> {
    let mut container = Container::<S>::open(path, Rights::ReadOnly)?;
    let dataset = Dataset::open(&mut container, dataset_path)?;
    let datatype = dataset.datatype();
    if datatype.dimension != 1 {
        return Err(Error::ShapeMismatch {
            expected: "dimension 1".to_string(),
            found: datatype.to_string(),
            context: format!("label dataset {dataset_path}"),
        });
    }
    let timeline = Timeline::open(&mut container, dataset.timeline_path())?;
    let (counts, values) = dataset.dump(&container, Datatype::new(BaseType::Int, 1))?;
    let values = values
        .as_ints()
        .map(<[i32]>::to_vec)
        .ok_or(Error::Corrupt("label values are not integers"))?;
    dataset.close(&mut container)?;
    container.close()?;
    LabelTrack::from_counts(timeline.ranges().to_vec(), &counts, values)
}

impl<S: ArrayStore> Drop for StreamingServer<S> {
    fn drop(&mut self) {
        self.close_current();
    }
}
