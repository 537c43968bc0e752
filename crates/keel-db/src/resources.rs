//! Resource bundles supplying table definition scripts.
//!
//! A bundle is a read-only tree of named byte blobs addressed by
//! `/`-separated virtual paths. The schema bootstrapper lists
//! `database/tables` and runs each `<table>.sql` it finds there.

use std::fs;
use std::io;
use std::path::PathBuf;

use keel_types::TABLE_DEFINITIONS_DIR;

/// One file in a resource bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// File name of the entry, without its directory.
    pub name: String,
    /// Raw content.
    pub data: Vec<u8>,
}

impl ResourceEntry {
    /// Returns the file name without its extension.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    /// Returns the extension of the file name, if any.
    pub fn extension(&self) -> Option<&str> {
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }
}

/// Read access to a tree of bundled resources.
pub trait ResourceBundle: Send + Sync {
    /// Lists the files directly inside the virtual directory `dir`.
    ///
    /// Returns `Ok(None)` if the directory does not exist.
    fn dir_entries(&self, dir: &str) -> io::Result<Option<Vec<ResourceEntry>>>;

    /// Fetches the file at the virtual path `path`.
    ///
    /// Returns `Ok(None)` if there is no such file.
    fn entry_at_path(&self, path: &str) -> io::Result<Option<ResourceEntry>>;
}

/// A bundle compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedBundle {
    files: &'static [(&'static str, &'static [u8])],
}

impl EmbeddedBundle {
    /// Creates a bundle from `(virtual path, content)` pairs.
    pub const fn new(files: &'static [(&'static str, &'static [u8])]) -> Self {
        Self { files }
    }
}

impl ResourceBundle for EmbeddedBundle {
    fn dir_entries(&self, dir: &str) -> io::Result<Option<Vec<ResourceEntry>>> {
        let prefix = format!("{}/", dir.trim_matches('/'));
        let entries: Vec<ResourceEntry> = self
            .files
            .iter()
            .filter_map(|(path, data)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| ResourceEntry {
                    name: name.to_string(),
                    data: data.to_vec(),
                })
            })
            .collect();

        Ok((!entries.is_empty()).then_some(entries))
    }

    fn entry_at_path(&self, path: &str) -> io::Result<Option<ResourceEntry>> {
        let path = path.trim_start_matches('/');
        Ok(self
            .files
            .iter()
            .find(|(candidate, _)| *candidate == path)
            .map(|(candidate, data)| ResourceEntry {
                name: candidate.rsplit('/').next().unwrap_or_default().to_string(),
                data: data.to_vec(),
            }))
    }
}

/// A bundle read from a directory on disk.
///
/// Directory listings are returned in file-name order.
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    root: PathBuf,
}

impl DirectoryBundle {
    /// Creates a bundle rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, virtual_path: &str) -> PathBuf {
        virtual_path
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ResourceBundle for DirectoryBundle {
    fn dir_entries(&self, dir: &str) -> io::Result<Option<Vec<ResourceEntry>>> {
        let dir = self.resolve(dir);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for item in listing {
            let item = item?;
            if !item.file_type()?.is_file() {
                continue;
            }
            entries.push(ResourceEntry {
                name: item.file_name().to_string_lossy().into_owned(),
                data: fs::read(item.path())?,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(entries))
    }

    fn entry_at_path(&self, path: &str) -> io::Result<Option<ResourceEntry>> {
        let file = self.resolve(path);
        match fs::read(&file) {
            Ok(data) => Ok(Some(ResourceEntry {
                name: file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                data,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

const BUNDLED_FILES: &[(&str, &[u8])] = &[(
    "database/tables/archive_file.sql",
    include_bytes!("tables/archive_file.sql"),
)];

/// Returns the table definitions shipped with this crate.
pub fn bundled_resources() -> EmbeddedBundle {
    EmbeddedBundle::new(BUNDLED_FILES)
}

/// Returns the virtual path of the definition script for `table`.
pub fn table_definition_path(table: &str) -> String {
    format!("{TABLE_DEFINITIONS_DIR}/{table}.sql")
}
