//! Archiving progress counters and reporting cadence.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress callback. Returning `false` aborts the archiving operation.
pub type ProgressCallback = Arc<dyn Fn(&Progress) -> bool + Send + Sync>;

/// Snapshot of the archiving counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes of file content written.
    pub bytes: u64,
    /// Files written.
    pub files: u64,
    /// Directory entries written.
    pub directories: u64,
    /// Entries that could not be read.
    pub errors: u64,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes, {} files, {} dirs, {} errors",
            self.bytes, self.files, self.directories, self.errors
        )
    }
}

/// Live counters shared between the archiver and observers.
///
/// Counters only ever increase during one archiving operation.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    bytes: AtomicU64,
    files: AtomicU64,
    directories: AtomicU64,
    errors: AtomicU64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.files.fetch_add(1, Ordering::Release);
    }

    pub fn add_directory(&self) {
        self.directories.fetch_add(1, Ordering::Release);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            files: self.files.load(Ordering::Acquire),
            directories: self.directories.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// How often the progress callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPeriod {
    /// After every `n` written entries.
    Entries(u64),
    /// At most once per interval, checked after each written entry.
    Interval(Duration),
}

impl Default for ProgressPeriod {
    fn default() -> Self {
        ProgressPeriod::Interval(Duration::from_secs(1))
    }
}

/// Callback plus cadence, as configured on the archiver.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: ProgressCallback,
    period: ProgressPeriod,
}

impl ProgressReporter {
    pub fn new<F>(period: ProgressPeriod, callback: F) -> Self
    where
        F: Fn(&Progress) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            period,
        }
    }

    pub(crate) fn tracker(&self) -> ProgressTracker<'_> {
        ProgressTracker {
            reporter: self,
            entries_since_report: 0,
            last_report: Instant::now(),
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// Cadence state for one archiving operation.
pub(crate) struct ProgressTracker<'a> {
    reporter: &'a ProgressReporter,
    entries_since_report: u64,
    last_report: Instant,
}

impl ProgressTracker<'_> {
    /// Records one written entry; reports if the period has elapsed.
    ///
    /// Returns the callback's verdict, or `true` when no report was due.
    pub(crate) fn entry_written(&mut self, progress: &Progress) -> bool {
        self.entries_since_report += 1;
        let due = match self.reporter.period {
            ProgressPeriod::Entries(n) => self.entries_since_report >= n.max(1),
            ProgressPeriod::Interval(interval) => self.last_report.elapsed() >= interval,
        };
        if due {
            self.report(progress)
        } else {
            true
        }
    }

    /// Reports unconditionally.
    pub(crate) fn report(&mut self, progress: &Progress) -> bool {
        self.entries_since_report = 0;
        self.last_report = Instant::now();
        (self.reporter.callback)(progress)
    }
}
