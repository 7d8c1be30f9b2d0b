//! Packaging pipeline with builder pattern API.
//!
//! [`Packager`] runs one packaging job end to end:
//!
//! 1. Load the private key
//! 2. Archive the source directory into a scoped temporary workspace
//! 3. Sign the archive and write the container to the destination
//! 4. Remove the intermediate archive and the workspace
//!
//! Every failure is reported as a single [`Error`]; the temporary workspace is
//! removed on every exit path.

use crate::archive::{
    may_contain_packaged_files, should_package_file, Archiver, CompressionLevel, PathFilter,
    Progress, ProgressPeriod, ProgressReporter,
};
use crate::container::{ContainerAssembler, HeaderExtra};
use crate::crypto::{extension_id, PrivateKey, Signer};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// File name of the intermediate archive inside the temporary workspace.
const INTERMEDIATE_ARCHIVE: &str = "extension.zip";

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    /// Path the container was written to.
    pub crx_path: PathBuf,
    /// Extension id derived from the signing key.
    pub extension_id: String,
    /// Final archiving counters.
    pub progress: Progress,
    /// Size of the written container in bytes.
    pub container_size: u64,
}

/// Signed container packager (builder pattern API).
///
/// # Example
///
/// ```no_run
/// use crxpack::Packager;
///
/// let summary = Packager::new()
///     .private_key("extension.pem")
///     .overwrite(true)
///     .run("my-extension", "my-extension.crx")?;
/// println!("{} -> {}", summary.extension_id, summary.crx_path.display());
/// # Ok::<(), crxpack::Error>(())
/// ```
pub struct Packager {
    private_key: Option<PathBuf>,
    overwrite: bool,
    compression_level: CompressionLevel,
    filter: PathFilter,
    header_extra: HeaderExtra,
    progress: Option<ProgressReporter>,
    workspace_parent: Option<PathBuf>,
}

impl Packager {
    /// Create a new Packager builder.
    ///
    /// Defaults: no overwrite, compression level 6, the extension packaging
    /// filter ([`should_package_file`]), no verified contents.
    pub fn new() -> Self {
        Self {
            private_key: None,
            overwrite: false,
            compression_level: CompressionLevel::DEFAULT,
            filter: PathFilter::new()
                .predicate(should_package_file)
                .descend_predicate(may_contain_packaged_files),
            header_extra: HeaderExtra::None,
            progress: None,
            workspace_parent: None,
        }
    }

    /// Set the private key file (PEM-wrapped or bare base64 PKCS#8).
    pub fn private_key(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key = Some(path.as_ref().to_path_buf());
        self
    }

    /// Allow replacing an existing container at the destination.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set ZIP compression level for the payload (0-9).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = CompressionLevel::new(level);
        self
    }

    /// Replace the inclusion policy for source files.
    pub fn filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Embed a verified-contents blob in the signed header.
    pub fn verified_contents(mut self, blob: Vec<u8>) -> Self {
        self.header_extra = HeaderExtra::VerifiedContents(blob);
        self
    }

    /// Observe archiving progress.
    pub fn progress<F>(mut self, period: ProgressPeriod, callback: F) -> Self
    where
        F: Fn(&Progress) -> bool + Send + Sync + 'static,
    {
        self.progress = Some(ProgressReporter::new(period, callback));
        self
    }

    /// Create the temporary workspace under `dir` instead of the system
    /// temporary directory.
    pub fn temp_dir_in(mut self, dir: impl AsRef<Path>) -> Self {
        self.workspace_parent = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if no private key is set.
    pub fn validate(&self) -> Result<()> {
        if self.private_key.is_none() {
            return Err(Error::KeyMissing(
                "A private key must be set using .private_key()".into(),
            ));
        }
        Ok(())
    }

    /// Package `source_dir` into a signed container at `crx_path`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage: key loading
    /// (`Key*`), source validation ([`Error::SourceInvalid`]), archiving
    /// ([`Error::PackagingFailure`]), or assembly (`SigningFailure`,
    /// `DestinationNotWritable`, `SourceNotReadable`, `WriteFailure`).
    pub fn run(
        &self,
        source_dir: impl AsRef<Path>,
        crx_path: impl AsRef<Path>,
    ) -> Result<PackageSummary> {
        let source_dir = source_dir.as_ref();
        let crx_path = crx_path.as_ref();

        let key = self.load_key()?;
        debug!(algorithm = key.algorithm(), "Private key loaded");

        if !source_dir.is_dir() {
            return Err(Error::SourceInvalid(format!(
                "{} is not a directory",
                source_dir.display()
            )));
        }

        let assembler = ContainerAssembler::new(&key).overwrite(self.overwrite);
        assembler.check_destination(crx_path)?;

        let public_key = key.public_key_der()?;
        let extension_id = extension_id(&public_key);

        let workspace = match &self.workspace_parent {
            Some(parent) => TempDir::new_in(parent),
            None => TempDir::new(),
        }
        .map_err(|e| Error::PackagingFailure(format!("Failed to create temp directory: {}", e)))?;
        let archive_path = workspace.path().join(INTERMEDIATE_ARCHIVE);

        let progress = self.archiver(source_dir).write_to_file(&archive_path)?;
        debug!(%progress, archive = %archive_path.display(), "Source archived");

        let container_size = assembler.assemble(&archive_path, crx_path, &self.header_extra)?;

        if let Err(e) = fs::remove_file(&archive_path) {
            warn!(archive = %archive_path.display(), error = %e, "Failed to delete intermediate archive");
        }

        info!(
            crx = %crx_path.display(),
            extension_id = %extension_id,
            bytes = container_size,
            %progress,
            "Container packaged"
        );

        Ok(PackageSummary {
            crx_path: crx_path.to_path_buf(),
            extension_id,
            progress,
            container_size,
        })
    }

    fn load_key(&self) -> Result<PrivateKey> {
        self.validate()?;
        let path = self
            .private_key
            .as_ref()
            .ok_or_else(|| Error::KeyMissing("No private key configured".into()))?;
        PrivateKey::from_file(path)
    }

    fn archiver(&self, source_dir: &Path) -> Archiver {
        let archiver = Archiver::new(source_dir)
            .filter(self.filter.clone())
            .compression_level(self.compression_level);
        match &self.progress {
            Some(reporter) => archiver.progress(reporter.clone()),
            None => archiver,
        }
    }
}

impl Default for Packager {
    fn default() -> Self {
        Self::new()
    }
}
