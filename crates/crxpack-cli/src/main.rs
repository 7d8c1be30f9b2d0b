//! Command-line interface for the crxpack extension packager.
//!
//! Packs an extension directory into a signed `.crx` container using an
//! existing private key.

use clap::Parser;
use crxpack::Packager;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crxpack")]
#[command(about = "Package a browser extension directory into a signed CRX")]
struct Cli {
    /// Extension source directory
    #[arg(long, env = "CRXPACK_EXTENSION_PATH")]
    extension_path: PathBuf,

    /// Output container file
    #[arg(long, env = "CRXPACK_CRX_PATH")]
    crx_path: PathBuf,

    /// Private key file (PEM or bare base64 PKCS#8)
    #[arg(long, env = "CRXPACK_PEM_PATH")]
    pem_path: PathBuf,

    /// Fail instead of replacing an existing container
    #[arg(long)]
    no_overwrite: bool,

    /// ZIP compression level (0-9, default: 6)
    /// 0 = no compression (fastest)
    /// 9 = maximum compression (slowest, smallest file)
    #[arg(short = 'z', long, default_value = "6")]
    zip_level: u32,

    /// Compressed verified-contents blob to embed in the signed header
    #[arg(long)]
    verified_contents: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut packager = Packager::new()
        .private_key(&cli.pem_path)
        .overwrite(!cli.no_overwrite)
        .compression_level(cli.zip_level);

    if let Some(ref path) = cli.verified_contents {
        match std::fs::read(path) {
            Ok(blob) => packager = packager.verified_contents(blob),
            Err(e) => {
                println!("crx package failed: cannot read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    match packager.run(&cli.extension_path, &cli.crx_path) {
        Ok(summary) => {
            println!("crx package success ({})", summary.extension_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("crx package failed: {}: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with tracing, honoring `RUST_LOG`.
fn init_logging(verbose: bool) {
    let default = if verbose { "crxpack=debug" } else { "crxpack=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
