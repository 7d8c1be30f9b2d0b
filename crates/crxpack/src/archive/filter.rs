//! Inclusion policy for whole-tree archiving.
//!
//! A [`PathFilter`] decides, for each path relative to the source root,
//! whether it becomes an archive entry:
//!
//! 1. A caller-supplied predicate, when present, decides alone.
//! 2. Otherwise hidden paths (any component starting with `.`) are excluded
//!    unless hidden files were explicitly included.
//!
//! Whether the walk enters a directory is a separate decision, see
//! [`PathFilter::should_descend`].
//!
//! The filter holds no mutable state and may be shared across threads.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;

/// Caller-supplied inclusion predicate over root-relative paths.
pub type FilterFn = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Path components that never belong in a packaged extension.
const NAMES_TO_EXCLUDE: &[&str] = &[
    ".DS_Store",
    ".git",
    ".svn",
    "__MACOSX",
    "desktop.ini",
    "Thumbs.db",
];

/// Reserved directory at the extension root, generated by the store.
const RESERVED_METADATA_DIR: &str = "_metadata";

/// Per-path inclusion decision for the whole-tree walk.
#[derive(Clone)]
pub struct PathFilter {
    include_hidden: bool,
    predicate: Option<FilterFn>,
    descend: Option<FilterFn>,
}

impl PathFilter {
    /// Default policy: hidden paths excluded, no predicate.
    pub fn new() -> Self {
        Self {
            include_hidden: false,
            predicate: None,
            descend: None,
        }
    }

    /// Includes or excludes hidden paths when no predicate is set.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Sets a predicate that takes over the decision for every path.
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets a predicate deciding which directories the walk enters.
    ///
    /// Use it to prune subtrees in which the inclusion predicate can never
    /// accept anything.
    pub fn descend_predicate<F>(mut self, descend: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.descend = Some(Arc::new(descend));
        self
    }

    /// Returns whether `relative_path` should be emitted as an archive entry.
    pub fn include(&self, relative_path: &Path) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(relative_path);
        }
        self.include_hidden || !is_hidden(relative_path)
    }

    /// Returns whether the walk needs to look inside `relative_dir`.
    ///
    /// A descend predicate decides alone. Without one, excluded directories
    /// are still walked, since an inclusion predicate may accept some of
    /// their children. Under the plain hidden-file policy nothing below a
    /// hidden directory can be included, so that subtree is skipped.
    pub fn should_descend(&self, relative_dir: &Path) -> bool {
        if let Some(descend) = &self.descend {
            return descend(relative_dir);
        }
        self.predicate.is_some() || self.include_hidden || !is_hidden(relative_dir)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFilter")
            .field("include_hidden", &self.include_hidden)
            .field("predicate", &self.predicate.is_some())
            .field("descend", &self.descend.is_some())
            .finish()
    }
}

/// Returns true if any component of `path` starts with `.`.
pub fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Packaging policy for browser extensions.
///
/// Rejects version-control and OS metadata, hidden files, editor backups and
/// autosaves, and the reserved `_metadata` directory at the root.
///
/// # Examples
///
/// ```
/// use crxpack::archive::should_package_file;
/// use std::path::Path;
///
/// assert!(should_package_file(Path::new("icons/16.png")));
/// assert!(!should_package_file(Path::new(".git/config")));
/// assert!(!should_package_file(Path::new("background.js~")));
/// ```
pub fn should_package_file(relative_path: &Path) -> bool {
    let Some(base_name) = relative_path.file_name().map(OsStr::to_string_lossy) else {
        return false;
    };
    if base_name.is_empty() || !may_contain_packaged_files(relative_path) {
        return false;
    }

    // Emacs backup and autosave files.
    if base_name.ends_with('~') {
        return false;
    }
    if base_name.len() > 1 && base_name.starts_with('#') && base_name.ends_with('#') {
        return false;
    }

    true
}

/// Returns false for directories under which [`should_package_file`] rejects
/// every path: excluded names, dot-directories, and the root `_metadata`.
///
/// Used as the descend predicate of the extension filter, so the walk never
/// enters `.git` and friends.
pub fn may_contain_packaged_files(relative_path: &Path) -> bool {
    let mut components = relative_path.components().peekable();
    if let Some(Component::Normal(first)) = components.peek() {
        if *first == RESERVED_METADATA_DIR {
            return false;
        }
    }

    components.all(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            !NAMES_TO_EXCLUDE.iter().any(|n| *n == name) && !name.starts_with('.')
        }
        _ => true,
    })
}
