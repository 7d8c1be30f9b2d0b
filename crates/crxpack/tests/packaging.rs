//! End-to-end packaging tests.
//!
//! Each test builds a small extension tree and a freshly generated key in a
//! scratch directory, runs the packager, and inspects the resulting container.

use crxpack::container::{CONTAINER_MAGIC, VERSION_PLAIN, VERSION_VERIFIED_CONTENTS};
use crxpack::crypto::{extension_id, PrivateKey, Signer};
use crxpack::{Error, ErrorKind, Packager};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{DerSignature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;
use zip::ZipArchive;

/// Container fields, split out of the raw bytes.
struct Container {
    version: u32,
    public_key: Vec<u8>,
    signature: Vec<u8>,
    verified_contents: Option<Vec<u8>>,
    payload: Vec<u8>,
}

impl Container {
    fn read(path: &Path) -> Self {
        let bytes = fs::read(path).unwrap();
        let mut cursor = &bytes[..];

        let mut take = |n: usize| {
            let (head, tail) = cursor.split_at(n);
            cursor = tail;
            head.to_vec()
        };

        assert_eq!(take(4), CONTAINER_MAGIC);
        let version = u32::from_le_bytes(take(4).try_into().unwrap());
        let len = u32::from_le_bytes(take(4).try_into().unwrap()) as usize;
        let public_key = take(len);
        let len = u32::from_le_bytes(take(4).try_into().unwrap()) as usize;
        let signature = take(len);
        let verified_contents = if version == VERSION_VERIFIED_CONTENTS {
            let len = u32::from_le_bytes(take(4).try_into().unwrap()) as usize;
            Some(take(len))
        } else {
            None
        };
        drop(take);

        Container {
            version,
            public_key,
            signature,
            verified_contents,
            payload: cursor.to_vec(),
        }
    }

    fn entry_names(&self) -> Vec<String> {
        let mut archive = ZipArchive::new(Cursor::new(&self.payload)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn verifies(&self, message: &[u8]) -> bool {
        let key = VerifyingKey::from_public_key_der(&self.public_key).unwrap();
        let signature = DerSignature::try_from(self.signature.as_slice()).unwrap();
        key.verify(message, &signature).is_ok()
    }
}

/// Writes a new P-256 key as PKCS#8 PEM and returns its path.
fn write_pem_key(dir: &Path) -> PathBuf {
    let key = SigningKey::random(&mut OsRng);
    let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
    let path = dir.join("key.pem");
    fs::write(&path, pem.as_bytes()).unwrap();
    path
}

/// Extension tree with a manifest and a `.git` directory.
fn create_extension(dir: &Path) -> PathBuf {
    let ext = dir.join("extension");
    fs::create_dir_all(ext.join(".git")).unwrap();
    fs::write(ext.join("manifest.json"), b"{\"a\":\"bc\"}").unwrap();
    fs::write(ext.join(".git/config"), b"12345").unwrap();
    ext
}

#[test]
fn test_package_excludes_hidden_and_embeds_identity() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");

    let summary = Packager::new().private_key(&key_path).run(&ext, &crx).unwrap();

    let container = Container::read(&crx);
    assert_eq!(container.version, VERSION_PLAIN);
    assert_eq!(container.entry_names(), vec!["manifest.json"]);

    let key = PrivateKey::from_file(&key_path).unwrap();
    let identity = key.public_key_der().unwrap();
    assert_eq!(container.public_key, identity);
    assert!(container.verifies(&container.payload));

    assert_eq!(summary.extension_id, extension_id(&identity));
    assert_eq!(summary.progress.files, 1);
    assert_eq!(summary.progress.bytes, 10);
    assert_eq!(summary.progress.errors, 0);
    assert_eq!(summary.container_size, fs::metadata(&crx).unwrap().len());
}

#[test]
fn test_existing_destination_without_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");
    fs::write(&crx, b"old container").unwrap();

    let err = Packager::new()
        .private_key(&key_path)
        .run(&ext, &crx)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationNotWritable);
    assert_eq!(fs::read(&crx).unwrap(), b"old container");
}

#[test]
fn test_existing_destination_with_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");
    fs::write(&crx, b"old container").unwrap();

    Packager::new()
        .private_key(&key_path)
        .overwrite(true)
        .run(&ext, &crx)
        .unwrap();

    assert_eq!(Container::read(&crx).entry_names(), vec!["manifest.json"]);
}

#[test]
fn test_not_a_key() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = temp_dir.path().join("key.pem");
    fs::write(&key_path, "not a key").unwrap();
    let crx = temp_dir.path().join("extension.crx");

    let err = Packager::new()
        .private_key(&key_path)
        .run(&ext, &crx)
        .unwrap_err();

    assert!(matches!(err, Error::KeyMalformed(_)), "got {err:?}");
    assert!(!crx.exists());
}

#[test]
fn test_missing_key_file() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());

    let err = Packager::new()
        .private_key(temp_dir.path().join("absent.pem"))
        .run(&ext, temp_dir.path().join("extension.crx"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::KeyMissing);
}

#[test]
fn test_source_must_be_directory() {
    let temp_dir = TempDir::new().unwrap();
    let key_path = write_pem_key(temp_dir.path());
    let not_dir = temp_dir.path().join("file.txt");
    fs::write(&not_dir, b"x").unwrap();
    let crx = temp_dir.path().join("extension.crx");

    for source in [not_dir, temp_dir.path().join("absent")] {
        let err = Packager::new()
            .private_key(&key_path)
            .run(&source, &crx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceInvalid);
        assert!(!crx.exists());
    }
}

#[test]
fn test_nested_tree_and_extension_filter() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    fs::create_dir_all(ext.join("_locales/en")).unwrap();
    fs::create_dir_all(ext.join("_metadata")).unwrap();
    fs::write(ext.join("_locales/en/messages.json"), b"{}").unwrap();
    fs::write(ext.join("_metadata/verified_contents.json"), b"[]").unwrap();
    fs::write(ext.join("popup.js"), b"void 0").unwrap();
    fs::write(ext.join("popup.js~"), b"backup").unwrap();
    fs::write(ext.join(".DS_Store"), b"junk").unwrap();

    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");
    let summary = Packager::new().private_key(&key_path).run(&ext, &crx).unwrap();

    assert_eq!(
        Container::read(&crx).entry_names(),
        vec![
            "_locales/",
            "_locales/en/",
            "_locales/en/messages.json",
            "manifest.json",
            "popup.js",
        ]
    );
    assert_eq!(summary.progress.files, 3);
    assert_eq!(summary.progress.directories, 2);
    assert_eq!(summary.progress.bytes, 2 + 10 + 6);
}

#[test]
fn test_repackaging_is_reproducible() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    fs::create_dir_all(ext.join("icons")).unwrap();
    fs::write(ext.join("icons/16.png"), b"PNG").unwrap();
    let key_path = write_pem_key(temp_dir.path());

    let first = temp_dir.path().join("first.crx");
    let second = temp_dir.path().join("second.crx");
    Packager::new().private_key(&key_path).run(&ext, &first).unwrap();
    Packager::new().private_key(&key_path).run(&ext, &second).unwrap();

    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn test_verified_contents_in_header() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");

    Packager::new()
        .private_key(&key_path)
        .verified_contents(b"compressed".to_vec())
        .run(&ext, &crx)
        .unwrap();

    let container = Container::read(&crx);
    assert_eq!(container.version, VERSION_VERIFIED_CONTENTS);
    assert_eq!(container.verified_contents.as_deref(), Some(&b"compressed"[..]));

    let mut signed = 10u32.to_le_bytes().to_vec();
    signed.extend_from_slice(b"compressed");
    signed.extend_from_slice(&container.payload);
    assert!(container.verifies(&signed));
}

#[test]
fn test_rsa_key_in_bare_base64() {
    use rsa::RsaPrivateKey;

    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());

    let rsa_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
    let pem = rsa_key.to_pkcs8_pem(LineEnding::LF).unwrap();
    let bare: String = pem.lines().filter(|l| !l.starts_with("-----")).collect();
    let key_path = temp_dir.path().join("key.b64");
    fs::write(&key_path, bare).unwrap();

    let crx = temp_dir.path().join("extension.crx");
    Packager::new().private_key(&key_path).run(&ext, &crx).unwrap();

    let container = Container::read(&crx);
    let key = PrivateKey::from_file(&key_path).unwrap();
    assert_eq!(key.algorithm(), "rsa");
    assert_eq!(container.public_key, key.public_key_der().unwrap());
    assert_eq!(container.entry_names(), vec!["manifest.json"]);
}

#[test]
fn test_progress_callback_receives_counts() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let summary = Packager::new()
        .private_key(&key_path)
        .progress(crxpack::archive::ProgressPeriod::Entries(1), move |p| {
            sink.lock().unwrap().push(*p);
            true
        })
        .run(&ext, &crx)
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.last(), Some(&summary.progress));
}

#[test]
fn test_progress_abort_leaves_no_container() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");

    let err = Packager::new()
        .private_key(&key_path)
        .progress(crxpack::archive::ProgressPeriod::Entries(1), |_| false)
        .run(&ext, &crx)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PackagingFailure);
    assert!(!crx.exists());
}

#[test]
fn test_concurrent_runs() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ext = ext.clone();
            let key_path = key_path.clone();
            let crx = temp_dir.path().join(format!("extension-{i}.crx"));
            thread::spawn(move || {
                Packager::new().private_key(&key_path).run(&ext, &crx).unwrap();
                crx
            })
        })
        .collect();

    let outputs: Vec<Vec<u8>> = handles
        .into_iter()
        .map(|h| fs::read(h.join().unwrap()).unwrap())
        .collect();
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
}

fn assert_empty_dir(dir: &Path) {
    let leftovers: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    assert!(leftovers.is_empty(), "workspace not removed: {leftovers:?}");
}

#[test]
fn test_workspace_removed_after_success() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let workspaces = temp_dir.path().join("workspaces");
    fs::create_dir(&workspaces).unwrap();

    Packager::new()
        .private_key(&key_path)
        .temp_dir_in(&workspaces)
        .run(&ext, temp_dir.path().join("extension.crx"))
        .unwrap();

    assert_empty_dir(&workspaces);
}

#[test]
fn test_workspace_removed_after_archiving_failure() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let workspaces = temp_dir.path().join("workspaces");
    fs::create_dir(&workspaces).unwrap();

    let err = Packager::new()
        .private_key(&key_path)
        .temp_dir_in(&workspaces)
        .progress(crxpack::archive::ProgressPeriod::Entries(1), |_| false)
        .run(&ext, temp_dir.path().join("extension.crx"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PackagingFailure);
    assert_empty_dir(&workspaces);
}

#[test]
fn test_workspace_removed_after_assembly_failure() {
    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let key_path = write_pem_key(temp_dir.path());
    let workspaces = temp_dir.path().join("workspaces");
    fs::create_dir(&workspaces).unwrap();
    let crx = temp_dir.path().join("extension.crx");

    // The destination appears after the pre-flight check, while archiving.
    let late = crx.clone();
    let err = Packager::new()
        .private_key(&key_path)
        .temp_dir_in(&workspaces)
        .progress(crxpack::archive::ProgressPeriod::Entries(1), move |_| {
            fs::write(&late, b"late arrival").is_ok()
        })
        .run(&ext, &crx)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationNotWritable);
    assert_eq!(fs::read(&crx).unwrap(), b"late arrival");
    assert_empty_dir(&workspaces);
}

#[cfg(unix)]
#[test]
fn test_symlinked_subfolder_is_packaged() {
    use std::os::unix::fs::symlink;

    let temp_dir = TempDir::new().unwrap();
    let ext = create_extension(temp_dir.path());
    let shared = temp_dir.path().join("shared");
    fs::create_dir(&shared).unwrap();
    fs::write(shared.join("util.js"), b"util").unwrap();
    symlink(&shared, ext.join("lib")).unwrap();

    let key_path = write_pem_key(temp_dir.path());
    let crx = temp_dir.path().join("extension.crx");
    let summary = Packager::new().private_key(&key_path).run(&ext, &crx).unwrap();

    assert_eq!(
        Container::read(&crx).entry_names(),
        vec!["lib/", "lib/util.js", "manifest.json"]
    );
    assert_eq!(summary.progress.files, 2);
    assert_eq!(summary.progress.errors, 0);
}
