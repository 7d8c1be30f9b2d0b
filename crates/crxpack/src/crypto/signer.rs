//! Signing capability and public-key identity.
//!
//! The container assembler only needs two things from a key: a stable
//! public-key encoding to embed in the header, and a signature over a SHA-256
//! digest of the signed message. [`Signer`] captures exactly that, so tests
//! can substitute a key that fails on demand.

use super::key::{PrivateKey, SigningKeyType};
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Number of hash bytes used to derive an extension id.
const EXTENSION_ID_BYTES: usize = 16;

/// Signing capability used by the container assembler.
pub trait Signer {
    /// DER-encoded `SubjectPublicKeyInfo` of the signing key.
    fn public_key_der(&self) -> Result<Vec<u8>>;

    /// Signs the message whose SHA-256 state is `digest`.
    fn sign_digest(&self, digest: Sha256) -> Result<Vec<u8>>;
}

impl Signer for PrivateKey {
    fn public_key_der(&self) -> Result<Vec<u8>> {
        use pkcs8::EncodePublicKey;

        let document = match self.signing_key() {
            SigningKeyType::Rsa(key) => key.to_public_key().to_public_key_der(),
            SigningKeyType::Ecdsa(key) => key.verifying_key().to_public_key_der(),
        }
        .map_err(|e| Error::SigningFailure(format!("Failed to encode public key: {}", e)))?;

        Ok(document.as_bytes().to_vec())
    }

    fn sign_digest(&self, digest: Sha256) -> Result<Vec<u8>> {
        match self.signing_key() {
            SigningKeyType::Rsa(key) => {
                use rsa::signature::{DigestSigner, SignatureEncoding};

                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                let signature = signing_key
                    .try_sign_digest(digest)
                    .map_err(|e| Error::SigningFailure(format!("RSA signing failed: {}", e)))?;
                Ok(signature.to_vec())
            }
            SigningKeyType::Ecdsa(key) => {
                use p256::ecdsa::signature::DigestSigner;

                let signature: p256::ecdsa::Signature = key
                    .try_sign_digest(digest)
                    .map_err(|e| Error::SigningFailure(format!("ECDSA signing failed: {}", e)))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }
}

/// Derives the 32-character extension id from a public key.
///
/// The id is the first 16 bytes of SHA-256 over the DER public key, with each
/// nibble written as a letter from `a` (0) to `p` (15).
///
/// # Examples
///
/// ```
/// let id = crxpack::crypto::extension_id(b"public key bytes");
/// assert_eq!(id.len(), 32);
/// assert!(id.chars().all(|c| ('a'..='p').contains(&c)));
/// ```
pub fn extension_id(public_key_der: &[u8]) -> String {
    let hash = Sha256::digest(public_key_der);

    let mut id = String::with_capacity(EXTENSION_ID_BYTES * 2);
    for byte in &hash[..EXTENSION_ID_BYTES] {
        id.push(char::from(b'a' + (byte >> 4)));
        id.push(char::from(b'a' + (byte & 0x0f)));
    }
    id
}
