//! Repeating-key XOR cipher used by the PaySys wire protocol.
//!
//! The cipher is kept bit-compatible with the legacy peers. It offers no
//! confidentiality; keys are recovered from traffic by [`crate::resolver`].

/// Length in bytes of every PaySys cipher key.
pub const KEY_LEN: usize = 16;

/// A 16-byte repeating XOR key.
pub type CipherKey = [u8; KEY_LEN];

/// Returns `data` XORed against `key` repeated over its length.
///
/// Applying the transform twice with the same key yields the input again.
/// An empty key leaves the data untouched.
pub fn transform(data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    transform_in_place(&mut out, key);
    out
}

/// In-place variant of [`transform`].
pub fn transform_in_place(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i % key.len()];
    }
}

/// Derives the key used to encrypt a reply when the request key is unknown.
///
/// Linear congruential sequence seeded with the ciphertext length, taking
/// the low byte of each state. Matches what deployed clients expect.
pub fn fallback_key(ciphertext_len: usize) -> CipherKey {
    let mut key = [0u8; KEY_LEN];
    let mut seed = ciphertext_len as u32;
    for b in key.iter_mut() {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345) & 0x7FFF_FFFF;
        *b = (seed & 0xFF) as u8;
    }
    key
}

/// Parses a 32-character hex string into a key.
pub fn parse_hex_key(s: &str) -> Option<CipherKey> {
    let raw = hex::decode(s.trim()).ok()?;
    raw.try_into().ok()
}
