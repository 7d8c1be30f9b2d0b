//! Filesystem access for the archiver.
//!
//! The archiver never touches the filesystem directly. It asks a
//! [`FileAccessor`] to open files, list one directory level, and describe a
//! path, always with paths relative to the source root. Recursion is driven by
//! the archiver, not the accessor.
//!
//! Two implementations are provided:
//!
//! - [`DirectFileAccessor`] reads a real directory tree
//! - [`MemoryFileAccessor`] serves an in-memory tree, for tests and for
//!   packaging generated content

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, warn};
use walkdir::WalkDir;

/// Readable handle returned by [`FileAccessor::open`].
pub type FileReader = Box<dyn Read + Send>;

/// Metadata the archiver needs for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub is_directory: bool,
    pub last_modified: SystemTime,
}

/// Direct children of a directory, split by type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<PathBuf>,
    pub subdirs: Vec<PathBuf>,
}

/// Filesystem capability used by the archiver.
///
/// All paths are relative to the accessor's root and never absolute.
pub trait FileAccessor: Send + Sync {
    /// Opens each path for reading.
    ///
    /// Returns one slot per input path, in order. `None` marks a path that
    /// could not be opened (including directories).
    fn open(&self, paths: &[PathBuf]) -> Vec<Option<FileReader>>;

    /// Lists the direct children of `dir` (non-recursive).
    ///
    /// Returned paths are relative to the root, i.e. `dir` joined with the
    /// child name.
    fn list(&self, dir: &Path) -> io::Result<Listing>;

    /// Describes `path`.
    fn info(&self, path: &Path) -> io::Result<EntryInfo>;
}

/// [`FileAccessor`] over a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectFileAccessor {
    root: PathBuf,
}

impl DirectFileAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if `target` is, or contains, the root or any directory on
    /// the way down to `dir`. Descending into such a link never terminates.
    fn is_walk_ancestor(&self, dir: &Path, target: &Path) -> bool {
        let mut walked = self.root.clone();
        let mut visited = vec![walked.clone()];
        for component in dir.components() {
            walked.push(component);
            visited.push(walked.clone());
        }

        visited
            .iter()
            .filter_map(|path| fs::canonicalize(path).ok())
            .any(|path| path.starts_with(target))
    }
}

impl FileAccessor for DirectFileAccessor {
    fn open(&self, paths: &[PathBuf]) -> Vec<Option<FileReader>> {
        paths
            .iter()
            .map(|path| {
                debug_assert!(!path.is_absolute());
                let absolute_path = self.root.join(path);
                if absolute_path.is_dir() {
                    error!(path = %path.display(), "Cannot open: it is a directory");
                    return None;
                }
                match File::open(&absolute_path) {
                    Ok(file) => Some(Box::new(file) as FileReader),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Cannot open");
                        None
                    }
                }
            })
            .collect()
    }

    fn list(&self, dir: &Path) -> io::Result<Listing> {
        debug_assert!(!dir.is_absolute());
        let mut listing = Listing::default();

        // Links are classified by their target. A broken link is listed as a
        // file and fails when opened.
        for entry in WalkDir::new(self.root.join(dir))
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::other)?;
            let relative = dir.join(entry.file_name());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                listing.subdirs.push(relative);
                continue;
            }
            if file_type.is_symlink() {
                match fs::canonicalize(entry.path()) {
                    Ok(target) if target.is_dir() => {
                        if self.is_walk_ancestor(dir, &target) {
                            warn!(path = %relative.display(), target = %target.display(), "Skipping symlink that loops back into the walk");
                        } else {
                            listing.subdirs.push(relative);
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            listing.files.push(relative);
        }

        Ok(listing)
    }

    fn info(&self, path: &Path) -> io::Result<EntryInfo> {
        debug_assert!(!path.is_absolute());
        let metadata = fs::metadata(self.root.join(path)).inspect_err(|e| {
            error!(path = %path.display(), error = %e, "Cannot get info");
        })?;

        Ok(EntryInfo {
            is_directory: metadata.is_dir(),
            last_modified: metadata.modified()?,
        })
    }
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    Directory,
    File(Vec<u8>),
    Unreadable,
}

/// In-memory [`FileAccessor`].
///
/// Parent directories are created implicitly. Every entry reports the same
/// modification time, so archives of a memory tree are reproducible.
///
/// # Examples
///
/// ```
/// use crxpack::archive::MemoryFileAccessor;
///
/// let tree = MemoryFileAccessor::new()
///     .with_file("manifest.json", br#"{"name":"x"}"#.to_vec())
///     .with_file("js/popup.js", b"void 0".to_vec());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryFileAccessor {
    entries: BTreeMap<PathBuf, MemoryEntry>,
    modified: SystemTime,
}

impl MemoryFileAccessor {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    /// Sets the modification time reported for every entry.
    pub fn modified(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        let path = path.into();
        self.add_parents(&path);
        self.entries.insert(path, MemoryEntry::File(contents));
        self
    }

    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.add_parents(&path);
        self.entries.insert(path, MemoryEntry::Directory);
        self
    }

    /// Adds a file that is listed but fails to open.
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.add_parents(&path);
        self.entries.insert(path, MemoryEntry::Unreadable);
        self
    }

    fn add_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.entries
                .entry(ancestor.to_path_buf())
                .or_insert(MemoryEntry::Directory);
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("No such entry: {}", path.display()),
        )
    }
}

impl Default for MemoryFileAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAccessor for MemoryFileAccessor {
    fn open(&self, paths: &[PathBuf]) -> Vec<Option<FileReader>> {
        paths
            .iter()
            .map(|path| match self.entries.get(path) {
                Some(MemoryEntry::File(contents)) => {
                    Some(Box::new(Cursor::new(contents.clone())) as FileReader)
                }
                _ => None,
            })
            .collect()
    }

    fn list(&self, dir: &Path) -> io::Result<Listing> {
        if !dir.as_os_str().is_empty()
            && !matches!(self.entries.get(dir), Some(MemoryEntry::Directory))
        {
            return Err(Self::not_found(dir));
        }

        let mut listing = Listing::default();
        for (path, entry) in &self.entries {
            if path.parent() != Some(dir) {
                continue;
            }
            match entry {
                MemoryEntry::Directory => listing.subdirs.push(path.clone()),
                MemoryEntry::File(_) | MemoryEntry::Unreadable => listing.files.push(path.clone()),
            }
        }
        Ok(listing)
    }

    fn info(&self, path: &Path) -> io::Result<EntryInfo> {
        let is_directory = path.as_os_str().is_empty()
            || matches!(
                self.entries.get(path).ok_or_else(|| Self::not_found(path))?,
                MemoryEntry::Directory
            );

        Ok(EntryInfo {
            is_directory,
            last_modified: self.modified,
        })
    }
}
