pub mod password;
pub mod totp;

use rand::Rng;
use sha2::{Digest, Sha256};

pub use password::{hash_password, verify_password, Password, PasswordHashString};

/// Generate a random token of `bytes` random bytes, hex encoded.
pub fn generate_token(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    hex::encode(data)
}

/// Generate a 6-digit numeric one-time code, zero padded.
pub fn generate_numeric_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000u32))
}

/// SHA-256 hex digest of a value. Used for single-use codes and API keys
/// where the store must match by equality.
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
