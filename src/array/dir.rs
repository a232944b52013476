use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use serde::{Deserialize, Serialize};

use super::{ArrayHandle, ArrayStore, AttrValue, Rights};
use crate::error::{Error, Result};

const STORE_VERSION: u32 = 1;
const STORE_FILENAME: &str = "store.json";
const ARRAY_EXT: &str = ".arr";
const ATTRS_EXT: &str = ".attrs.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMeta {
    version: u32,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArrayMeta {
    version: u32,
    element_size: usize,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
}

struct OpenArray {
    name: String,
    file: File,
    meta: ArrayMeta,
    len: usize,
    dirty: bool,
    /// Outstanding `open_array`/`create_array` handles sharing this slot.
    refs: usize,
}

/// Array store laid out as a directory.
///
/// ```text
/// <root>/store.json              version and store attributes
/// <root>/<name>.arr              raw little-endian elements
/// <root>/<name>.attrs.json       element size and array attributes
/// ```
///
/// Names may contain `/`, which maps to subdirectories. Attribute changes
/// are buffered and written when the array is closed or the store dropped.
///
/// Opening an array that is already open returns the same handle and bumps
/// its reference count; the slot is released by the matching last
/// `close_array`.
pub struct DirStore {
    root: PathBuf,
    rights: Rights,
    meta: StoreMeta,
    arrays: Vec<Option<OpenArray>>,
}

impl DirStore {
    fn array_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{ARRAY_EXT}"))
    }

    fn attrs_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{ATTRS_EXT}"))
    }

    fn writable(&self) -> Result<()> {
        match self.rights {
            Rights::ReadWrite => Ok(()),
            Rights::ReadOnly => Err(Error::ReadOnly),
        }
    }

    fn slot(&self, handle: ArrayHandle) -> Result<&OpenArray> {
        self.arrays
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(Error::Corrupt("stale array handle"))
    }

    fn slot_mut(&mut self, handle: ArrayHandle) -> Result<&mut OpenArray> {
        self.arrays
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(Error::Corrupt("stale array handle"))
    }

    fn insert(&mut self, array: OpenArray) -> ArrayHandle {
        if let Some(index) = self.arrays.iter().position(Option::is_none) {
            self.arrays[index] = Some(array);
            ArrayHandle(index)
        } else {
            self.arrays.push(Some(array));
            ArrayHandle(self.arrays.len() - 1)
        }
    }

    fn save_meta(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.meta)?;
        fs::write(self.root.join(STORE_FILENAME), json)?;
        Ok(())
    }

    fn flush_array(root: &Path, array: &mut OpenArray) -> Result<()> {
        if !array.dirty {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(&array.meta)?;
        fs::write(root.join(format!("{}{ATTRS_EXT}", array.name)), json)?;
        array.dirty = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let root = self.root.clone();
        for array in self.arrays.iter_mut().flatten() {
            Self::flush_array(&root, array)?;
        }
        Ok(())
    }

    fn collect_arrays(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_arrays(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if let Some(name) = relative.strip_suffix(ARRAY_EXT) {
                out.push(name.to_string());
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.contains('\\')
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid array name {name:?}")))
    }
}

impl ArrayStore for DirStore {
    fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        fs::create_dir_all(path)?;
        let store = Self {
            root: path.to_path_buf(),
            rights: Rights::ReadWrite,
            meta: StoreMeta {
                version: STORE_VERSION,
                attrs: BTreeMap::new(),
            },
            arrays: Vec::new(),
        };
        store.save_meta()?;
        Ok(store)
    }

    fn open(path: &Path, rights: Rights) -> Result<Self> {
        let meta_path = path.join(STORE_FILENAME);
        if !meta_path.exists() {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        let json = fs::read_to_string(&meta_path)?;
        let meta: StoreMeta =
            serde_json::from_str(&json).map_err(|_| Error::Corrupt("invalid store metadata JSON"))?;
        if meta.version != STORE_VERSION {
            return Err(Error::Corrupt("unsupported store version"));
        }
        Ok(Self {
            root: path.to_path_buf(),
            rights,
            meta,
            arrays: Vec::new(),
        })
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn rights(&self) -> Rights {
        self.rights
    }

    fn contains_array(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.array_path(name).exists()
    }

    fn create_array(&mut self, name: &str, element_size: usize) -> Result<ArrayHandle> {
        self.writable()?;
        validate_name(name)?;
        if element_size == 0 {
            return Err(Error::Corrupt("zero element size"));
        }
        let path = self.array_path(name);
        if path.exists() {
            return Err(Error::AlreadyExists { path });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let mut array = OpenArray {
            name: name.to_string(),
            file,
            meta: ArrayMeta {
                version: STORE_VERSION,
                element_size,
                attrs: BTreeMap::new(),
            },
            len: 0,
            dirty: true,
            refs: 1,
        };
        Self::flush_array(&self.root, &mut array)?;
        Ok(self.insert(array))
    }

    fn open_array(&mut self, name: &str) -> Result<ArrayHandle> {
        validate_name(name)?;
        if let Some(index) = self
            .arrays
            .iter()
            .position(|a| a.as_ref().is_some_and(|a| a.name == name))
        {
            let handle = ArrayHandle(index);
            self.slot_mut(handle)?.refs += 1;
            return Ok(handle);
        }
        let path = self.array_path(name);
        if !path.exists() {
            return Err(Error::NotFound { path });
        }
        let json = fs::read_to_string(self.attrs_path(name))?;
        let meta: ArrayMeta =
            serde_json::from_str(&json).map_err(|_| Error::Corrupt("invalid array metadata JSON"))?;
        if meta.element_size == 0 {
            return Err(Error::Corrupt("zero element size"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(self.rights == Rights::ReadWrite)
            .open(&path)?;
        let bytes = file.metadata()?.len() as usize;
        if bytes % meta.element_size != 0 {
            return Err(Error::Corrupt("array length is not a whole number of elements"));
        }
        let len = bytes / meta.element_size;
        Ok(self.insert(OpenArray {
            name: name.to_string(),
            file,
            meta,
            len,
            dirty: false,
            refs: 1,
        }))
    }

    fn list_arrays(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.collect_arrays(&self.root, &mut names)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn element_size(&self, handle: ArrayHandle) -> Result<usize> {
        Ok(self.slot(handle)?.meta.element_size)
    }

    fn len(&self, handle: ArrayHandle) -> Result<usize> {
        Ok(self.slot(handle)?.len)
    }

    fn extend_array(&mut self, handle: ArrayHandle, new_len: usize) -> Result<()> {
        self.writable()?;
        let array = self.slot_mut(handle)?;
        if new_len > array.len {
            array
                .file
                .set_len((new_len * array.meta.element_size) as u64)?;
            array.len = new_len;
        }
        Ok(())
    }

    fn read_range(&self, handle: ArrayHandle, offset: usize, count: usize) -> Result<Vec<u8>> {
        let array = self.slot(handle)?;
        let end = offset
            .checked_add(count)
            .ok_or(Error::Corrupt("range overflow"))?;
        if end > array.len {
            return Err(Error::OutOfRange {
                position: end,
                len: array.len,
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = array.meta.element_size;
        let map = unsafe {
            MmapOptions::new()
                .offset((offset * size) as u64)
                .len(count * size)
                .map(&array.file)?
        };
        Ok(map.to_vec())
    }

    fn write_range(&mut self, handle: ArrayHandle, offset: usize, bytes: &[u8]) -> Result<()> {
        self.writable()?;
        let array = self.slot_mut(handle)?;
        let size = array.meta.element_size;
        if bytes.len() % size != 0 {
            return Err(Error::Corrupt("partial element write"));
        }
        let end = offset + bytes.len() / size;
        if end > array.len {
            return Err(Error::OutOfRange {
                position: end,
                len: array.len,
            });
        }
        array.file.seek(SeekFrom::Start((offset * size) as u64))?;
        array.file.write_all(bytes)?;
        Ok(())
    }

    fn get_attr(&self, handle: ArrayHandle, name: &str) -> Result<Option<AttrValue>> {
        Ok(self.slot(handle)?.meta.attrs.get(name).cloned())
    }

    fn set_attr(&mut self, handle: ArrayHandle, name: &str, value: AttrValue) -> Result<()> {
        self.writable()?;
        let array = self.slot_mut(handle)?;
        array.meta.attrs.insert(name.to_string(), value);
        array.dirty = true;
        Ok(())
    }

    fn get_root_attr(&self, name: &str) -> Option<AttrValue> {
        self.meta.attrs.get(name).cloned()
    }

    fn set_root_attr(&mut self, name: &str, value: AttrValue) -> Result<()> {
        self.writable()?;
        self.meta.attrs.insert(name.to_string(), value);
        self.save_meta()
    }

    fn close_array(&mut self, handle: ArrayHandle) -> Result<()> {
        let root = self.root.clone();
        let slot = self
            .arrays
            .get_mut(handle.0)
            .ok_or(Error::Corrupt("stale array handle"))?;
        let Some(array) = slot.as_mut() else {
            return Ok(());
        };
        Self::flush_array(&root, array)?;
        array.refs = array.refs.saturating_sub(1);
        if array.refs == 0 {
            *slot = None;
        }
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        self.flush()?;
        self.arrays.clear();
        Ok(())
    }
}

impl Drop for DirStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("failed to flush array attributes in {}: {err}", self.root.display());
        }
    }
}
