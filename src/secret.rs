//! Random secrets and the URL-safe encoding used to put them in tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// `n` bytes from the operating system's CSPRNG.
pub fn random(n: usize) -> Vec<u8> {
    let mut buf = vec![0; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Unpadded base64 with the URL-safe alphabet (`-` and `_`).
pub fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Inverse of [`to_base64url`]. `None` on malformed input.
pub fn from_base64url(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(text).ok()
}
