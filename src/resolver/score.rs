//! Plaintext plausibility scoring shared by every resolver stage.

/// Shortest ciphertext the resolver will attempt.
pub const MIN_CIPHERTEXT_LEN: usize = 16;

const PRINTABLE_WEIGHT: i64 = 2;
const TERMINATOR_BONUS: i64 = 10;
const LOW_PRINTABLE_PENALTY: i64 = 100;

#[inline]
fn is_printable_or_nul(b: u8) -> bool {
    b == 0 || (32..=126).contains(&b)
}

/// Scores how much `plain` looks like protocol plaintext.
///
/// Two points per printable-or-NUL byte, ten per non-NUL byte directly
/// followed by NUL, minus a hundred when under a quarter is printable.
pub fn score(plain: &[u8]) -> i64 {
    let printable = plain.iter().filter(|&&b| is_printable_or_nul(b)).count();
    let terminated = plain.windows(2).filter(|w| w[0] != 0 && w[1] == 0).count();
    let mut s = printable as i64 * PRINTABLE_WEIGHT + terminated as i64 * TERMINATOR_BONUS;
    if printable < plain.len() / 4 {
        s -= LOW_PRINTABLE_PENALTY;
    }
    s
}

/// Minimum score a decryption of `len` bytes needs to be accepted.
pub fn acceptance_threshold(len: usize) -> i64 {
    let len = len as i64;
    2 * len - len / 8
}

/// Per-byte weight used by the frequency stage.
#[inline]
pub fn frequency_weight(b: u8) -> u32 {
    match b {
        0 => 3,
        b' ' => 2,
        b if b.is_ascii_alphanumeric() => 2,
        _ => 0,
    }
}
