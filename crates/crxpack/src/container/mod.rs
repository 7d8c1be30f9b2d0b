//! Signed container assembly.
//!
//! A container is a small binary header followed by the ZIP payload. All
//! integers are little-endian `u32`.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ magic "Cr24" (4 bytes)                       │
//! │ version (4 bytes)                            │
//! ├──────────────────────────────────────────────┤
//! │ public key length (4 bytes)                  │
//! │ public key, DER SubjectPublicKeyInfo         │
//! ├──────────────────────────────────────────────┤
//! │ signature length (4 bytes)                   │
//! │ signature                                    │
//! ├──────────────────────────────────────────────┤
//! │ verified contents length (4 bytes)  ┐ v3     │
//! │ verified contents                   ┘ only   │
//! ├──────────────────────────────────────────────┤
//! │ archive payload                              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The signature covers the payload. In version 3 it covers the verified
//! contents length, the verified contents, then the payload.

use crate::crypto::Signer;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Container magic number.
pub const CONTAINER_MAGIC: &[u8; 4] = b"Cr24";

/// Format version without a header extra.
pub const VERSION_PLAIN: u32 = 2;

/// Format version carrying a verified-contents blob.
pub const VERSION_VERIFIED_CONTENTS: u32 = 3;

/// Optional data embedded in the signed header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HeaderExtra {
    #[default]
    None,
    /// Compressed verified-contents blob, covered by the signature.
    VerifiedContents(Vec<u8>),
}

impl HeaderExtra {
    /// Format version this extra requires.
    pub fn version(&self) -> u32 {
        match self {
            HeaderExtra::None => VERSION_PLAIN,
            HeaderExtra::VerifiedContents(_) => VERSION_VERIFIED_CONTENTS,
        }
    }
}

/// Writes signed containers to disk.
///
/// # Examples
///
/// ```no_run
/// use crxpack::container::{ContainerAssembler, HeaderExtra};
/// use crxpack::crypto::PrivateKey;
///
/// let key = PrivateKey::from_file("extension.pem")?;
/// ContainerAssembler::new(&key)
///     .overwrite(true)
///     .assemble("extension.zip", "extension.crx", &HeaderExtra::None)?;
/// # Ok::<(), crxpack::Error>(())
/// ```
pub struct ContainerAssembler<'a> {
    signer: &'a dyn Signer,
    overwrite: bool,
}

impl<'a> ContainerAssembler<'a> {
    pub fn new(signer: &'a dyn Signer) -> Self {
        Self {
            signer,
            overwrite: false,
        }
    }

    /// Allow replacing an existing file at the destination.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Fails if the destination exists and overwriting is not allowed.
    pub fn check_destination(&self, dest: &Path) -> Result<()> {
        if !self.overwrite && dest.exists() {
            return Err(Error::DestinationNotWritable(format!(
                "{} already exists",
                dest.display()
            )));
        }
        if dest.is_dir() {
            return Err(Error::DestinationNotWritable(format!(
                "{} is a directory",
                dest.display()
            )));
        }
        Ok(())
    }

    /// Signs the archive at `archive_path` and writes the container to `dest`.
    ///
    /// The container is written to a temporary file next to `dest` and moved
    /// into place once complete; on failure nothing is left at `dest` and an
    /// existing file there is untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceNotReadable`] if the archive cannot be read
    /// - [`Error::SigningFailure`] if the signer fails
    /// - [`Error::DestinationNotWritable`] if `dest` cannot be created, or
    ///   exists and overwriting is not allowed
    /// - [`Error::WriteFailure`] on I/O errors while writing
    pub fn assemble(
        &self,
        archive_path: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        extra: &HeaderExtra,
    ) -> Result<u64> {
        let archive_path = archive_path.as_ref();
        let dest = dest.as_ref();

        self.check_destination(dest)?;

        let mut archive = File::open(archive_path).map_err(|e| {
            Error::SourceNotReadable(format!("{}: {}", archive_path.display(), e))
        })?;

        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(parent).map_err(|e| {
            Error::DestinationNotWritable(format!("{}: {}", dest.display(), e))
        })?;

        let mut out = BufWriter::new(temp);
        let written = write_container(self.signer, &mut archive, extra, &mut out)?;
        let temp = out
            .into_inner()
            .map_err(|e| Error::WriteFailure(format!("{}: {}", dest.display(), e.error())))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::WriteFailure(format!("{}: {}", dest.display(), e)))?;

        let persisted = if self.overwrite {
            temp.persist(dest)
        } else {
            temp.persist_noclobber(dest)
        };
        persisted.map_err(|e| match e.error.kind() {
            io::ErrorKind::AlreadyExists => {
                Error::DestinationNotWritable(format!("{} already exists", dest.display()))
            }
            _ => Error::WriteFailure(format!("{}: {}", dest.display(), e.error)),
        })?;

        debug!(dest = %dest.display(), bytes = written, version = extra.version(), "Container written");
        Ok(written)
    }
}

/// Writes a complete container to `out`, returning the number of bytes written.
///
/// `archive` is read twice: once to compute the signature, once to copy the
/// payload.
pub fn write_container<R, W>(
    signer: &dyn Signer,
    archive: &mut R,
    extra: &HeaderExtra,
    out: &mut W,
) -> Result<u64>
where
    R: Read + Seek,
    W: Write,
{
    let public_key = signer.public_key_der()?;

    let mut digest = Sha256::new();
    if let HeaderExtra::VerifiedContents(blob) = extra {
        digest.update(length_prefix(blob.len())?);
        digest.update(blob);
    }
    rewind(archive)?;
    io::copy(archive, &mut digest)
        .map_err(|e| Error::SourceNotReadable(format!("Cannot read archive: {}", e)))?;

    let signature = signer.sign_digest(digest)?;

    let mut header = Vec::with_capacity(20 + public_key.len() + signature.len());
    header.extend_from_slice(CONTAINER_MAGIC);
    header.extend_from_slice(&extra.version().to_le_bytes());
    header.extend_from_slice(&length_prefix(public_key.len())?);
    header.extend_from_slice(&public_key);
    header.extend_from_slice(&length_prefix(signature.len())?);
    header.extend_from_slice(&signature);
    if let HeaderExtra::VerifiedContents(blob) = extra {
        header.extend_from_slice(&length_prefix(blob.len())?);
        header.extend_from_slice(blob);
    }

    out.write_all(&header)
        .map_err(|e| Error::WriteFailure(format!("Cannot write header: {}", e)))?;

    rewind(archive)?;
    let payload = copy_payload(archive, out)?;
    out.flush()
        .map_err(|e| Error::WriteFailure(format!("Cannot flush container: {}", e)))?;

    Ok(header.len() as u64 + payload)
}

fn length_prefix(len: usize) -> Result<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| Error::WriteFailure(format!("Header field too large: {} bytes", len)))
}

fn rewind<R: Seek>(archive: &mut R) -> Result<()> {
    archive
        .seek(SeekFrom::Start(0))
        .map(|_| ())
        .map_err(|e| Error::SourceNotReadable(format!("Cannot rewind archive: {}", e)))
}

/// Copies the payload, keeping read and write failures apart.
fn copy_payload<R: Read, W: Write>(archive: &mut R, out: &mut W) -> Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match archive.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::SourceNotReadable(format!("Cannot read archive: {}", e)))
            }
        };
        out.write_all(&buf[..n])
            .map_err(|e| Error::WriteFailure(format!("Cannot write payload: {}", e)))?;
        total += n as u64;
    }
}
