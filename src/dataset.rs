//! Variable-length record stores.
//!
//! # Design
//!
//! A dataset attaches a run of records to each position of a timeline. The
//! records of every position live in a single flat, append-only array; a
//! parallel link table holds one `(offset, count)` pair per timeline
//! position pointing into it.
//!
//! Writing a position always appends at the tail and repoints its link.
//! Rewriting a position therefore leaves the previous bytes in place,
//! unreachable; storage only grows.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use timeline_store::{BaseType, Container, Dataset, Datatype, Records, TimeRange, Timeline};
//!
//! let mut file: Container = Container::create(Path::new("show.tls"), "file:///show.wav")?;
//! let ranges = vec![TimeRange::new(0, 5, 1), TimeRange::new(5, 4, 1)];
//! let timeline = Timeline::create(&mut file, "turns", ranges, "speaker turns")?;
//! let datatype = Datatype::new(BaseType::Int, 1);
//! let mut labels = Dataset::create(&mut file, "speaker", &timeline, datatype, "speaker ids")?;
//! labels.write(&mut file, 1, &Records::from_values(1, vec![3i32, 7])?)?;
//! let read = labels.read(&file, 1, datatype)?;
//! assert_eq!(read.as_ints(), Some(&[3, 7][..]));
//! # Ok::<(), timeline_store::Error>(())
//! ```

use crate::array::{ArrayHandle, ArrayStore, AttrValue};
use crate::container::{data_array, link_array, timeline_array, Container};
use crate::datatype::{BaseType, Datatype, Records};
use crate::error::{Error, Result};
use crate::timeline::Timeline;

const LINK_LEN: usize = 8;
const DESCRIPTION_ATTR: &str = "description";
const TIMELINE_ATTR: &str = "timeline";
const BASE_TYPE_ATTR: &str = "base_type";
const DIMENSION_ATTR: &str = "dimension";

/// Location of one position's records in the flat array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub offset: u32,
    pub count: u32,
}

impl Link {
    fn to_le_bytes(self) -> [u8; LINK_LEN] {
        let mut out = [0u8; LINK_LEN];
        out[..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..].copy_from_slice(&self.count.to_le_bytes());
        out
    }

    fn from_le_bytes(bytes: &[u8]) -> Self {
        Self {
            offset: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn end(&self) -> usize {
        self.offset as usize + self.count as usize
    }
}

/// A record store opened from a container.
///
/// The dataset keeps array handles into the container it was created or
/// opened from; every operation must be given that same container.
#[derive(Debug)]
pub struct Dataset {
    path: String,
    description: String,
    timeline: String,
    datatype: Datatype,
    links: Vec<Link>,
    stored: usize,
    data: ArrayHandle,
    link: ArrayHandle,
}

impl Dataset {
    /// Creates an empty dataset indexed by `timeline`, which must already be
    /// stored in `container`. Every link starts as `(0, 0)`.
    ///
    /// # Errors
    ///
    /// - `MissingDescription` for an empty description.
    /// - `ShapeMismatch` for a zero dimension.
    /// - `NotFound` when the timeline is not stored in `container`.
    /// - `AlreadyExists` when `path` is taken.
    pub fn create<S: ArrayStore>(
        container: &mut Container<S>,
        path: &str,
        timeline: &Timeline,
        datatype: Datatype,
        description: &str,
    ) -> Result<Self> {
        if description.trim().is_empty() {
            return Err(Error::MissingDescription);
        }
        if datatype.dimension == 0 {
            return Err(Error::ShapeMismatch {
                expected: "dimension > 0".to_string(),
                found: datatype.to_string(),
                context: format!("dataset {path}"),
            });
        }
        let store = container.store_mut();
        if !store.contains_array(&timeline_array(timeline.path())) {
            return Err(Error::NotFound {
                path: store.path().join(timeline_array(timeline.path())),
            });
        }
        for name in [data_array(path), link_array(path)] {
            if store.contains_array(&name) {
                return Err(Error::AlreadyExists {
                    path: store.path().join(name),
                });
            }
        }

        let data = store.create_array(&data_array(path), datatype.element_size())?;
        let link = store.create_array(&link_array(path), LINK_LEN)?;
        store.extend_array(link, timeline.len())?;
        store.set_attr(data, DESCRIPTION_ATTR, AttrValue::from(description))?;
        store.set_attr(data, TIMELINE_ATTR, AttrValue::from(timeline.path()))?;
        store.set_attr(data, BASE_TYPE_ATTR, AttrValue::from(datatype.base.name()))?;
        store.set_attr(data, DIMENSION_ATTR, AttrValue::Int(datatype.dimension as i64))?;
        Timeline::mark_used(container, timeline.path())?;

        Ok(Self {
            path: path.to_string(),
            description: description.to_string(),
            timeline: timeline.path().to_string(),
            datatype,
            links: vec![Link::default(); timeline.len()],
            stored: 0,
            data,
            link,
        })
    }

    /// Opens the dataset at `path`, loading its link table.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either array is missing, `Corrupt` if the
    /// stored shape is unreadable.
    pub fn open<S: ArrayStore>(container: &mut Container<S>, path: &str) -> Result<Self> {
        let store = container.store_mut();
        let data = store.open_array(&data_array(path))?;
        let link = store.open_array(&link_array(path))?;

        let text = |name: &str| -> Result<String> {
            Ok(store
                .get_attr(data, name)?
                .and_then(|v| v.as_text().map(str::to_string))
                .unwrap_or_default())
        };
        let description = text(DESCRIPTION_ATTR)?;
        let timeline = text(TIMELINE_ATTR)?;
        let base = BaseType::from_name(&text(BASE_TYPE_ATTR)?)
            .ok_or(Error::Corrupt("unknown base type"))?;
        let dimension = store
            .get_attr(data, DIMENSION_ATTR)?
            .and_then(|v| v.as_int())
            .filter(|&d| d > 0)
            .ok_or(Error::Corrupt("missing dataset dimension"))? as usize;
        let datatype = Datatype::new(base, dimension);
        if store.element_size(data)? != datatype.element_size() {
            return Err(Error::Corrupt("element size disagrees with datatype"));
        }

        let stored = store.len(data)?;
        let count = store.len(link)?;
        let links: Vec<Link> = store
            .read_range(link, 0, count)?
            .chunks_exact(LINK_LEN)
            .map(Link::from_le_bytes)
            .collect();
        if links.iter().any(|l| l.end() > stored) {
            return Err(Error::Corrupt("link points past stored records"));
        }

        Ok(Self {
            path: path.to_string(),
            description,
            timeline,
            datatype,
            links,
            stored,
            data,
            link,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Path of the indexing timeline in the same container.
    pub fn timeline_path(&self) -> &str {
        &self.timeline
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Number of timeline positions.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Records held by the flat array, reachable or not.
    pub fn stored_len(&self) -> usize {
        self.stored
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, position: usize) -> Option<Link> {
        self.links.get(position).copied()
    }

    fn check_position(&self, position: usize) -> Result<Link> {
        self.link(position).ok_or(Error::OutOfRange {
            position,
            len: self.links.len(),
        })
    }

    fn check_dimension(&self, dimension: usize, context: &str) -> Result<()> {
        if dimension == self.datatype.dimension {
            return Ok(());
        }
        Err(Error::ShapeMismatch {
            expected: format!("dimension {}", self.datatype.dimension),
            found: format!("dimension {dimension}"),
            context: format!("{context} of dataset {}", self.path),
        })
    }

    /// Appends `records` at the tail of the flat array and points
    /// `position` at them. Returns the number of records written.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` when `position` is not a timeline position.
    /// - `ShapeMismatch` when the record dimension differs.
    pub fn write<S: ArrayStore>(
        &mut self,
        container: &mut Container<S>,
        position: usize,
        records: &Records,
    ) -> Result<usize> {
        self.check_position(position)?;
        self.check_dimension(records.dimension(), "write")?;
        let count = records.len();

        let store = container.store_mut();
        // the store's length is the tail, another handle may have appended
        let tail = store.len(self.data)?;
        let link = Link {
            offset: u32::try_from(tail)
                .map_err(|_| Error::Corrupt("flat array exceeds u32 offsets"))?,
            count: u32::try_from(count)
                .map_err(|_| Error::Corrupt("record run exceeds u32 count"))?,
        };
        if u32::try_from(link.end()).is_err() {
            return Err(Error::Corrupt("flat array exceeds u32 offsets"));
        }

        if count > 0 {
            let bytes = records.convert(self.datatype.base).to_le_bytes();
            store.extend_array(self.data, tail + count)?;
            store.write_range(self.data, tail, &bytes)?;
        }
        store.write_range(self.link, position, &link.to_le_bytes())?;

        self.links[position] = link;
        self.stored = tail + count;
        Ok(count)
    }

    /// Records at `position`, converted to `requested.base`. An unwritten
    /// position yields an empty buffer.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` when `position` is not a timeline position.
    /// - `ShapeMismatch` when `requested.dimension` differs.
    pub fn read<S: ArrayStore>(
        &self,
        container: &Container<S>,
        position: usize,
        requested: Datatype,
    ) -> Result<Records> {
        let link = self.check_position(position)?;
        self.check_dimension(requested.dimension, "read")?;
        if link.count == 0 {
            return Ok(Records::new(requested));
        }
        let bytes = container
            .store()
            .read_range(self.data, link.offset as usize, link.count as usize)?;
        let records = Records::from_le_bytes(self.datatype, &bytes)?;
        if requested.base == self.datatype.base {
            Ok(records)
        } else {
            Ok(records.convert(requested.base))
        }
    }

    /// Every position's records, concatenated in timeline order, with the
    /// per-position record counts.
    pub fn dump<S: ArrayStore>(
        &self,
        container: &Container<S>,
        requested: Datatype,
    ) -> Result<(Vec<usize>, Records)> {
        let mut counts = Vec::with_capacity(self.links.len());
        let mut all = Records::new(requested);
        for position in 0..self.links.len() {
            let records = self.read(container, position, requested)?;
            counts.push(records.len());
            all.extend(&records)?;
        }
        Ok((counts, all))
    }

    /// Byte size of [`Dataset::dump`] output for `requested`, computed from
    /// the link table alone.
    pub fn dump_size(&self, requested: Datatype) -> usize {
        let records: usize = self.links.iter().map(|l| l.count as usize).sum();
        records * requested.element_size()
    }

    /// Releases the dataset's arrays.
    pub fn close<S: ArrayStore>(self, container: &mut Container<S>) -> Result<()> {
        let store = container.store_mut();
        store.close_array(self.data)?;
        store.close_array(self.link)
    }
}
