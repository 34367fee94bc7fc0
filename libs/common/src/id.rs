//! Short random identifiers for rows and storage keys

use rand::Rng;

/// Length of primary keys and storage keys
pub const ID_LENGTH: usize = 14;

const URL_SAFE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a URL-safe random id of [`ID_LENGTH`] characters
pub fn new_id() -> String {
    random_token(ID_LENGTH)
}

/// Generate a URL-safe random token of the given length
pub fn random_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| URL_SAFE[rng.gen_range(0..URL_SAFE.len())] as char)
        .collect()
}
