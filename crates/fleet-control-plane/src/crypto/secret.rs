//! Task and host secrets.
//!
//! Every task and host gets a random secret when it is created. Agents echo
//! it back in a header and the control plane compares it with the stored one.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a new secret: 256 random bits, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Random identifier for stored records: 96 bits, hex encoded.
pub fn generate_record_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Exact-match comparison of a stored secret with one supplied by a caller.
///
/// Both sides are hashed first so the comparison always walks 32 bytes,
/// whatever the lengths of the inputs.
pub fn secrets_match(stored: &str, supplied: &str) -> bool {
    let stored = Sha256::digest(stored.as_bytes());
    let supplied = Sha256::digest(supplied.as_bytes());

    stored
        .iter()
        .zip(supplied.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
