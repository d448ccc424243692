/// Converts a digest string into the fixed-size key used by the store's maps.
///
/// Digests are 32 characters, so they fit exactly. Shorter inputs are
/// zero-padded and longer ones truncated.
pub trait HashKeyable {
    fn to_key(&self) -> [u8; 32];
}

impl<T: AsRef<[u8]>> HashKeyable for T {
    fn to_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        let bytes = self.as_ref();
        let len = std::cmp::min(bytes.len(), 32);
        key[..len].copy_from_slice(&bytes[..len]);
        key
    }
}

/// The inverse of [`HashKeyable::to_key()`], up to the first zero byte.
pub(crate) fn key_to_digest_string(key: &[u8; 32]) -> String {
    let len = key.iter().position(|&b| b == 0).unwrap_or(32);
    String::from_utf8_lossy(&key[..len]).to_string()
}
