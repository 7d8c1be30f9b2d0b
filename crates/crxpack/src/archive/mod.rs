//! Deterministic, filtered directory archiving.
//!
//! Produces the ZIP payload of a container from a source tree. Two selection
//! modes are supported:
//!
//! - [`EntrySelection::WholeTree`] walks the source root depth-first,
//!   applying a [`PathFilter`] to every candidate
//! - [`EntrySelection::Paths`] archives a fixed list of root-relative paths
//!   without filtering; listed directories expand to their full subtree
//!
//! Entries are written in lexical path order and carry the source modification
//! time, so archiving an unchanged tree twice yields identical bytes.
//!
//! # Examples
//!
//! ```no_run
//! use crxpack::archive::{Archiver, CompressionLevel, PathFilter};
//!
//! let progress = Archiver::new("my-extension")
//!     .filter(PathFilter::new())
//!     .compression_level(CompressionLevel::MAX)
//!     .write_to_file("my-extension.zip")?;
//! println!("{progress}");
//! # Ok::<(), crxpack::Error>(())
//! ```

pub mod accessor;
pub mod filter;
pub mod progress;

pub use accessor::{DirectFileAccessor, EntryInfo, FileAccessor, FileReader, Listing, MemoryFileAccessor};
pub use filter::{is_hidden, may_contain_packaged_files, should_package_file, FilterFn, PathFilter};
pub use progress::{Progress, ProgressCallback, ProgressCounters, ProgressPeriod, ProgressReporter};

use crate::{Error, Result};
use chrono::{Datelike, Timelike, Utc};
use progress::ProgressTracker;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// ZIP compression level for the archive payload.
///
/// Controls the trade-off between compression speed and output file size.
/// Use the provided constants for common use cases, or [`CompressionLevel::new`]
/// for custom levels.
///
/// # Examples
///
/// ```
/// use crxpack::archive::CompressionLevel;
///
/// let fast = CompressionLevel::NONE;
/// let balanced = CompressionLevel::DEFAULT;
/// let small = CompressionLevel::MAX;
///
/// // Custom levels are clamped to 0-9
/// assert_eq!(CompressionLevel::new(3).level(), 3);
/// assert_eq!(CompressionLevel::new(42).level(), 9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// No compression (level 0), entries are stored.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Default compression (level 6).
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Maximum compression (level 9).
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9.
    ///
    /// Values greater than 9 are clamped to 9.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    /// Returns the compression level value (0-9).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(&self) -> SimpleFileOptions {
        if self.0 == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(self.0)))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Which entries an [`Archiver`] writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EntrySelection {
    /// Every entry under the root accepted by the filter.
    #[default]
    WholeTree,
    /// Exactly these root-relative paths, in this order. Directories expand
    /// to their full subtree; the filter is not consulted.
    Paths(Vec<PathBuf>),
}

/// Builder and driver for one archive.
pub struct Archiver {
    accessor: Box<dyn FileAccessor>,
    selection: EntrySelection,
    filter: PathFilter,
    continue_on_error: bool,
    compression_level: CompressionLevel,
    progress: Option<ProgressReporter>,
}

impl Archiver {
    /// Archives the directory at `source_root`.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self::with_accessor(DirectFileAccessor::new(source_root))
    }

    /// Archives whatever `accessor` serves.
    pub fn with_accessor(accessor: impl FileAccessor + 'static) -> Self {
        Self {
            accessor: Box::new(accessor),
            selection: EntrySelection::WholeTree,
            filter: PathFilter::new(),
            continue_on_error: false,
            compression_level: CompressionLevel::DEFAULT,
            progress: None,
        }
    }

    pub fn selection(mut self, selection: EntrySelection) -> Self {
        self.selection = selection;
        self
    }

    /// Shorthand for [`EntrySelection::Paths`].
    pub fn paths<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.selection(EntrySelection::Paths(paths.into_iter().map(Into::into).collect()))
    }

    pub fn filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Skip entries that cannot be read instead of failing.
    ///
    /// Skipped entries are counted in [`Progress::errors`].
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Writes the archive to `dest` and returns it with the final counters.
    ///
    /// # Panics
    ///
    /// Panics if a listed path is absolute or escapes the root with `..`.
    /// Listed paths are validated before any file is touched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackagingFailure`] if an entry cannot be read (unless
    /// continuing on error), the ZIP cannot be written, or the progress
    /// callback asks to abort.
    pub fn write_to<W: Write + Seek>(&self, dest: W) -> Result<(W, Progress)> {
        if let EntrySelection::Paths(paths) = &self.selection {
            for path in paths {
                check_relative_path(path);
            }
        }

        let mut writer = ArchiveWriter {
            zip: ZipWriter::new(dest),
            accessor: self.accessor.as_ref(),
            options: self.compression_level.file_options(),
            continue_on_error: self.continue_on_error,
            counters: ProgressCounters::new(),
            tracker: self.progress.as_ref().map(ProgressReporter::tracker),
        };

        match &self.selection {
            EntrySelection::WholeTree => writer.add_directory_contents(Path::new(""), Some(&self.filter))?,
            EntrySelection::Paths(paths) => writer.add_mixed_entries(paths)?,
        }

        writer.close()
    }

    /// Writes the archive to a new file at `path`.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<Progress> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            Error::PackagingFailure(format!("Cannot create {}: {}", path.display(), e))
        })?;

        let (out, progress) = self.write_to(BufWriter::new(file))?;
        let file = out.into_inner().map_err(|e| {
            Error::PackagingFailure(format!("Cannot flush {}: {}", path.display(), e.error()))
        })?;
        file.sync_all()
            .map_err(|e| Error::PackagingFailure(format!("Cannot flush {}: {}", path.display(), e)))?;
        Ok(progress)
    }

    /// Writes the archive to memory.
    pub fn to_vec(&self) -> Result<(Vec<u8>, Progress)> {
        let (cursor, progress) = self.write_to(Cursor::new(Vec::new()))?;
        Ok((cursor.into_inner(), progress))
    }
}

/// Returns true for non-empty paths made only of normal components.
pub fn is_root_relative(path: &Path) -> bool {
    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    has_normal
}

fn check_relative_path(path: &Path) {
    assert!(
        is_root_relative(path),
        "archive path must be relative to the source root and stay inside it: {}",
        path.display()
    );
}

/// ZIP entry name: components joined with `/`.
fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Converts a modification time to a ZIP timestamp (UTC).
///
/// Times outside the DOS range fall back to 1980-01-01 00:00:00.
fn zip_timestamp(time: SystemTime) -> zip::DateTime {
    let utc: chrono::DateTime<Utc> = time.into();
    u16::try_from(utc.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                utc.month() as u8,
                utc.day() as u8,
                utc.hour() as u8,
                utc.minute() as u8,
                utc.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

/// One open archive. Consumed by [`ArchiveWriter::close`], after which no
/// further entries can be written.
struct ArchiveWriter<'a, W: Write + Seek> {
    zip: ZipWriter<W>,
    accessor: &'a dyn FileAccessor,
    options: SimpleFileOptions,
    continue_on_error: bool,
    counters: ProgressCounters,
    tracker: Option<ProgressTracker<'a>>,
}

impl<W: Write + Seek> ArchiveWriter<'_, W> {
    /// Adds the children of `dir`, recursively, in lexical order.
    ///
    /// `filter` is `None` when expanding an explicitly listed directory.
    fn add_directory_contents(&mut self, dir: &Path, filter: Option<&PathFilter>) -> Result<()> {
        let listing = match self.accessor.list(dir) {
            Ok(listing) => listing,
            Err(e) => return self.record_error(dir, &e.to_string()),
        };

        let mut children: Vec<(PathBuf, bool)> = listing
            .files
            .into_iter()
            .map(|p| (p, false))
            .chain(listing.subdirs.into_iter().map(|p| (p, true)))
            .collect();
        children.sort();

        for (path, is_directory) in children {
            check_relative_path(&path);
            let included = filter.map_or(true, |f| f.include(&path));

            if !is_directory {
                if included {
                    self.add_file_entry(&path)?;
                } else {
                    debug!(path = %path.display(), "Excluded from archive");
                }
                continue;
            }

            if included {
                self.add_directory_entry(&path)?;
            }
            if filter.map_or(true, |f| f.should_descend(&path)) {
                self.add_directory_contents(&path, filter)?;
            } else {
                debug!(path = %path.display(), "Skipping excluded directory");
            }
        }

        Ok(())
    }

    /// Adds explicitly listed files and directories.
    fn add_mixed_entries(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let info = match self.accessor.info(path) {
                Ok(info) => info,
                Err(e) => {
                    self.record_error(path, &e.to_string())?;
                    continue;
                }
            };

            if info.is_directory {
                self.write_directory(path, info.last_modified)?;
                self.add_directory_contents(path, None)?;
            } else {
                self.add_file_entry(path)?;
            }
        }
        Ok(())
    }

    fn add_directory_entry(&mut self, path: &Path) -> Result<()> {
        match self.accessor.info(path) {
            Ok(info) => self.write_directory(path, info.last_modified),
            Err(e) => self.record_error(path, &e.to_string()),
        }
    }

    fn write_directory(&mut self, path: &Path, last_modified: SystemTime) -> Result<()> {
        let name = format!("{}/", entry_name(path));
        let options = self.options.last_modified_time(zip_timestamp(last_modified));

        self.zip
            .add_directory(name, options)
            .map_err(|e| Error::PackagingFailure(format!("Cannot add {}: {}", path.display(), e)))?;

        self.counters.add_directory();
        self.entry_written()
    }

    fn add_file_entry(&mut self, path: &Path) -> Result<()> {
        let info = match self.accessor.info(path) {
            Ok(info) => info,
            Err(e) => return self.record_error(path, &e.to_string()),
        };

        let Some(mut reader) = self
            .accessor
            .open(std::slice::from_ref(&path.to_path_buf()))
            .pop()
            .flatten()
        else {
            return self.record_error(path, "cannot open for reading");
        };

        let options = self.options.last_modified_time(zip_timestamp(info.last_modified));
        self.zip
            .start_file(entry_name(path), options)
            .map_err(|e| Error::PackagingFailure(format!("Cannot add {}: {}", path.display(), e)))?;

        let bytes = io::copy(&mut reader, &mut self.zip)
            .map_err(|e| Error::PackagingFailure(format!("Cannot read {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), bytes, "Added to archive");
        self.counters.add_file(bytes);
        self.entry_written()
    }

    /// Counts a failed entry; fails unless continuing on error.
    fn record_error(&mut self, path: &Path, reason: &str) -> Result<()> {
        self.counters.add_error();
        if self.continue_on_error {
            warn!(path = %path.display(), reason, "Skipping unreadable entry");
            Ok(())
        } else {
            Err(Error::PackagingFailure(format!(
                "Cannot archive {}: {}",
                path.display(),
                reason
            )))
        }
    }

    fn entry_written(&mut self) -> Result<()> {
        let progress = self.counters.snapshot();
        let keep_going = self
            .tracker
            .as_mut()
            .map_or(true, |tracker| tracker.entry_written(&progress));
        if !keep_going {
            return Err(Error::PackagingFailure(
                "Archiving aborted by progress callback".into(),
            ));
        }
        Ok(())
    }

    /// Finalizes the archive and reports the final counters.
    fn close(self) -> Result<(W, Progress)> {
        let dest = self
            .zip
            .finish()
            .map_err(|e| Error::PackagingFailure(format!("Cannot finalize archive: {}", e)))?;

        let progress = self.counters.snapshot();
        if let Some(mut tracker) = self.tracker {
            if !tracker.report(&progress) {
                return Err(Error::PackagingFailure(
                    "Archiving aborted by progress callback".into(),
                ));
            }
        }

        debug!(%progress, "Archive closed");
        Ok((dest, progress))
    }
}
