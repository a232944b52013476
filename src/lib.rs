//! Time-indexed storage for variable-length records.
//!
//! A [`Container`] holds sorted [`Timeline`]s and the [`Dataset`]s indexed
//! by them. Each dataset position stores any number of fixed-shape records
//! behind a link table over one append-only array.
//!
//! On top of the storage layer, a [`StreamingServer`] joins data datasets
//! with label datasets across many containers ("shards") and streams the
//! positions whose overlapping labels pass a [`FilterSpec`].
//!
//! [`aggregate`] reduces a dataset onto another timeline and [`copy`]
//! moves timelines and datasets between containers.

pub mod aggregate;
pub mod array;
pub mod ascii;
pub mod config;
pub mod container;
pub mod copy;
pub mod dataset;
pub mod datatype;
pub mod error;
pub mod join;
pub mod server;
pub mod time;
pub mod timeline;

pub use aggregate::Aggregation;
pub use container::Container;
pub use dataset::{Dataset, Link};
pub use datatype::{BaseType, Datatype, Records, Values};
pub use error::{Error, Result};
pub use join::{FilterKind, FilterSpec, LabelStatistics, Mask};
pub use server::{Entry, StreamCursor, StreamingServer};
pub use time::{Time, TimeRange, TimelineRelation};
pub use timeline::Timeline;
