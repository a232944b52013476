//! Persistent extensible arrays.
//!
//! Timelines and record stores never touch bytes on disk directly. They go
//! through an [`ArrayStore`]: a named collection of growable arrays of
//! fixed-size elements, each carrying scalar attributes. [`DirStore`] is the
//! implementation backed by a plain directory.

mod dir;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use dir::DirStore;

/// Access mode for an opened store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rights {
    ReadOnly,
    ReadWrite,
}

/// Handle to an array opened in a store. Only meaningful for the store that
/// returned it, until that array is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayHandle(pub(crate) usize);

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Text(String),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            AttrValue::Int(_) => None,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

/// Storage backend for named, growable arrays of fixed-size elements.
///
/// Offsets, counts and lengths are in elements, never bytes. Implementations
/// perform blocking I/O and never retry.
pub trait ArrayStore: Sized {
    /// Creates a new, empty store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if something already lives at `path`.
    fn create(path: &Path) -> Result<Self>;

    /// Opens an existing store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no store at `path`.
    fn open(path: &Path, rights: Rights) -> Result<Self>;

    fn path(&self) -> &Path;

    fn rights(&self) -> Rights;

    fn contains_array(&self, name: &str) -> bool;

    /// Creates an empty array. Fails with `AlreadyExists` on a used name.
    fn create_array(&mut self, name: &str, element_size: usize) -> Result<ArrayHandle>;

    /// Opens an existing array. Fails with `NotFound` on an unknown name.
    fn open_array(&mut self, name: &str) -> Result<ArrayHandle>;

    /// Names of every array starting with `prefix`, sorted.
    fn list_arrays(&self, prefix: &str) -> Result<Vec<String>>;

    fn element_size(&self, handle: ArrayHandle) -> Result<usize>;

    /// Number of elements currently stored.
    fn len(&self, handle: ArrayHandle) -> Result<usize>;

    /// Grows the array to `new_len` elements, zero filled. Shrinking is not
    /// supported; a smaller `new_len` is a no-op.
    fn extend_array(&mut self, handle: ArrayHandle, new_len: usize) -> Result<()>;

    /// Reads `count` elements starting at element `offset`.
    fn read_range(&self, handle: ArrayHandle, offset: usize, count: usize) -> Result<Vec<u8>>;

    /// Overwrites whole elements starting at element `offset`. The target
    /// range must already lie inside the array.
    fn write_range(&mut self, handle: ArrayHandle, offset: usize, bytes: &[u8]) -> Result<()>;

    fn get_attr(&self, handle: ArrayHandle, name: &str) -> Result<Option<AttrValue>>;

    fn set_attr(&mut self, handle: ArrayHandle, name: &str, value: AttrValue) -> Result<()>;

    fn get_root_attr(&self, name: &str) -> Option<AttrValue>;

    fn set_root_attr(&mut self, name: &str, value: AttrValue) -> Result<()>;

    /// Releases one array. Pending attribute changes are flushed.
    fn close_array(&mut self, handle: ArrayHandle) -> Result<()>;

    /// Flushes everything and releases the store.
    fn close(self) -> Result<()>;
}
