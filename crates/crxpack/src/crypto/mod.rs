pub mod key;
pub mod signer;

pub use key::{decode_key_bytes, PrivateKey, SigningKeyType};
pub use signer::{extension_id, Signer};
