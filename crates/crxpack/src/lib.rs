pub mod archive;
pub mod container;
pub mod crypto;
pub mod error;
pub mod packager;

pub use archive::{Archiver, CompressionLevel, EntrySelection, PathFilter, Progress};
pub use container::{ContainerAssembler, HeaderExtra};
pub use crypto::{PrivateKey, Signer};
pub use error::{Error, ErrorKind};
pub use packager::{PackageSummary, Packager};

pub type Result<T> = std::result::Result<T, Error>;
