//! Local store: the file-based portable representation.
//!
//! Layout is one file per item, `<typeName>/<key>.json`, holding the
//! item's portable-form field map pretty-printed. Types with extractable
//! code additionally get sibling files with the type-appropriate
//! extension (`<key>.sql`, `<key>.ssjs`, ...), referenced from the JSON
//! by a sentinel the pre-deploy hook re-merges.
//!
//! The engine consumes the store through the [`LocalStore`] trait so
//! tests (and alternative layouts) can swap the backend; [`FsStore`] is
//! the production implementation.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

use crate::core::Result;
use crate::item::{MetadataItem, TypeName};

/// Storage collaborator for the portable on-disk representation.
pub trait LocalStore: Send + Sync {
    /// Read one item, `None` when absent.
    fn read(&self, type_name: &TypeName, key: &str) -> Result<Option<MetadataItem>>;

    /// Read every item of a type, keyed by key.
    fn read_all(&self, type_name: &TypeName) -> Result<BTreeMap<String, MetadataItem>>;

    /// Persist one item under `(type, key)`, replacing any previous value.
    fn write(&self, item: &MetadataItem) -> Result<()>;

    /// Persist an extracted code payload as a sibling artifact.
    fn write_text(&self, type_name: &TypeName, name: &str, ext: &str, content: &str)
    -> Result<()>;

    /// Read an extracted code payload, `None` when absent.
    fn read_text(&self, type_name: &TypeName, name: &str, ext: &str) -> Result<Option<String>>;
}

/// File-system backed [`LocalStore`].
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// A store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, type_name: &TypeName, key: &str) -> Result<PathBuf> {
        Ok(self.type_dir(type_name).join(format!("{}.json", checked_file_stem(key)?)))
    }

    fn text_path(&self, type_name: &TypeName, name: &str, ext: &str) -> Result<PathBuf> {
        Ok(self.type_dir(type_name).join(format!("{}.{ext}", checked_file_stem(name)?)))
    }

    fn type_dir(&self, type_name: &TypeName) -> PathBuf {
        self.root.join(type_name.as_str())
    }
}

/// Keys become file stems; anything that would escape the type directory
/// is rejected rather than silently rewritten.
fn checked_file_stem(key: &str) -> Result<&str> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.contains("..");
    if bad {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("key '{key}' is not usable as a file name"),
        )
        .into());
    }
    Ok(key)
}

impl LocalStore for FsStore {
    fn read(&self, type_name: &TypeName, key: &str) -> Result<Option<MetadataItem>> {
        let path = self.item_path(type_name, key)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let fields: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(Some(MetadataItem::new(type_name.clone(), key, fields)))
    }

    fn read_all(&self, type_name: &TypeName) -> Result<BTreeMap<String, MetadataItem>> {
        let dir = self.type_dir(type_name);
        let mut out = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(out);
        }
        for entry in WalkDir::new(&dir).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(item) = self.read(type_name, key)? {
                out.insert(key.to_string(), item);
            }
        }
        Ok(out)
    }

    fn write(&self, item: &MetadataItem) -> Result<()> {
        let path = self.item_path(&item.type_name, &item.key)?;
        fs::create_dir_all(path.parent().expect("item path has a parent"))?;
        let mut pretty = serde_json::to_string_pretty(&item.to_value())?;
        pretty.push('\n');
        trace!(type_name = %item.type_name, key = %item.key, "writing item");
        fs::write(&path, pretty)?;
        Ok(())
    }

    fn write_text(
        &self,
        type_name: &TypeName,
        name: &str,
        ext: &str,
        content: &str,
    ) -> Result<()> {
        let path = self.text_path(type_name, name, ext)?;
        fs::create_dir_all(path.parent().expect("text path has a parent"))?;
        fs::write(&path, content)?;
        Ok(())
    }

    fn read_text(&self, type_name: &TypeName, name: &str, ext: &str) -> Result<Option<String>> {
        let path = self.text_path(type_name, name, ext)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
