//! Key-recovery heuristics, one [`KeyStage`] per strategy.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::network::crypt::{transform, CipherKey, KEY_LEN};
use super::learned::LearnedKeyStore;
use super::score::{frequency_weight, score};

/// Fixed plaintext prefix of a login body.
pub const LOGIN_HEADER: [u8; 9] = [0x00, 0x0A, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00];

/// Start of the NUL tail of the username field, assuming a username of at
/// most 16 characters at offset 9.
const USERNAME_TAIL: usize = 25;

/// Start of a 16-byte aligned NUL run between the password and address fields.
const PADDING_BLOCK: usize = 80;

/// Constants XORed onto known keys by [`DerivedStage`].
pub const DERIVATION_MASKS: [u8; 11] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0xFF, 0xAA, 0x55];

/// Learned keys tried when no identity is claimed.
pub const LEARNED_SCAN_LIMIT: usize = 50;

/// Candidate bytes scored between deadline checks in [`FrequencyStage`].
const DEADLINE_CHECK_EVERY: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Learned,
    KnownTable,
    RepeatedBlock,
    Frequency,
    Derived,
    Structural,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Learned => "learned",
            Stage::KnownTable => "known_table",
            Stage::RepeatedBlock => "repeated_block",
            Stage::Frequency => "frequency",
            Stage::Derived => "derived",
            Stage::Structural => "structural",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCandidate {
    pub key: CipherKey,
    pub score: i64,
}

impl KeyCandidate {
    pub fn evaluate(ciphertext: &[u8], key: CipherKey) -> Self {
        Self { key, score: score(&transform(ciphertext, &key)) }
    }
}

/// Inputs shared by every stage of one resolution.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub ciphertext: &'a [u8],
    pub claimed_identity: Option<&'a str>,
    pub deadline: Instant,
}

impl StageInput<'_> {
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

pub trait KeyStage: Send + Sync {
    fn stage(&self) -> Stage;

    /// Best candidate this stage can offer, if any.
    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate>;
}

/// Highest-scoring candidate; ties keep the earliest.
fn best_of(candidates: impl IntoIterator<Item = KeyCandidate>) -> Option<KeyCandidate> {
    let mut best: Option<KeyCandidate> = None;
    for c in candidates {
        if best.map_or(true, |b| c.score > b.score) {
            best = Some(c);
        }
    }
    best
}

pub struct LearnedStage {
    pub store: Arc<LearnedKeyStore>,
}

impl KeyStage for LearnedStage {
    fn stage(&self) -> Stage {
        Stage::Learned
    }

    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate> {
        if let Some(key) = input.claimed_identity.and_then(|id| self.store.get(id)) {
            return Some(KeyCandidate::evaluate(input.ciphertext, key));
        }
        best_of(
            self.store
                .keys(LEARNED_SCAN_LIMIT)
                .into_iter()
                .map(|k| KeyCandidate::evaluate(input.ciphertext, k)),
        )
    }
}

pub struct KnownTableStage {
    pub keys: Arc<[CipherKey]>,
}

impl KeyStage for KnownTableStage {
    fn stage(&self) -> Stage {
        Stage::KnownTable
    }

    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate> {
        best_of(self.keys.iter().map(|k| KeyCandidate::evaluate(input.ciphertext, *k)))
    }
}

/// An all-zero plaintext block reproduces the key verbatim.
pub struct RepeatedBlockStage;

impl KeyStage for RepeatedBlockStage {
    fn stage(&self) -> Stage {
        Stage::RepeatedBlock
    }

    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate> {
        // block -> (count, first index)
        let mut seen: HashMap<&[u8], (usize, usize)> = HashMap::new();
        for (i, block) in input.ciphertext.chunks_exact(KEY_LEN).enumerate() {
            seen.entry(block).or_insert((0, i)).0 += 1;
        }
        let (block, _) = seen
            .into_iter()
            .filter(|(_, (count, _))| *count >= 2)
            .max_by(|(_, (ca, ia)), (_, (cb, ib))| ca.cmp(cb).then(ib.cmp(ia)))?;
        let key: CipherKey = block.try_into().ok()?;
        Some(KeyCandidate::evaluate(input.ciphertext, key))
    }
}

/// Picks each key byte independently by how plausible its column decrypts.
pub struct FrequencyStage;

impl FrequencyStage {
    /// Best byte for key position `pos` and its column weight, or `None`
    /// once `deadline` passes.
    pub fn best_byte(ciphertext: &[u8], pos: usize, deadline: Instant) -> Option<(u8, u32)> {
        let column: Vec<u8> = ciphertext.iter().skip(pos).step_by(KEY_LEN).copied().collect();
        let mut best = (0u8, 0u32);
        let mut first = true;
        for cand in 0..=255u8 {
            if cand % DEADLINE_CHECK_EVERY == 0 && Instant::now() >= deadline {
                return None;
            }
            let weight: u32 = column.iter().map(|&c| frequency_weight(c ^ cand)).sum();
            if first || weight > best.1 {
                best = (cand, weight);
                first = false;
            }
        }
        Some(best)
    }
}

impl KeyStage for FrequencyStage {
    fn stage(&self) -> Stage {
        Stage::Frequency
    }

    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate> {
        let ct = input.ciphertext;
        let columns: Vec<Option<(u8, u32)>> = (0..KEY_LEN)
            .into_par_iter()
            .map(|pos| Self::best_byte(ct, pos, input.deadline))
            .collect();

        let mut key = [0u8; KEY_LEN];
        let mut aggregate: u64 = 0;
        for (pos, col) in columns.into_iter().enumerate() {
            let (b, w) = col?;
            key[pos] = b;
            aggregate += w as u64;
        }
        if aggregate < 2 * ct.len() as u64 {
            return None;
        }
        Some(KeyCandidate::evaluate(ct, key))
    }
}

/// Variants of known keys: byte rotations, bit rotations, XOR masks.
pub struct DerivedStage {
    pub keys: Arc<[CipherKey]>,
}

impl DerivedStage {
    pub fn variants(base: &CipherKey) -> Vec<CipherKey> {
        let mut out = Vec::with_capacity((KEY_LEN - 1) + 7 + DERIVATION_MASKS.len());
        for shift in 1..KEY_LEN {
            let mut k = *base;
            k.rotate_left(shift);
            out.push(k);
        }
        for bits in 1..8 {
            out.push(base.map(|b| b.rotate_left(bits)));
        }
        for mask in DERIVATION_MASKS {
            out.push(base.map(|b| b ^ mask));
        }
        out
    }
}

impl KeyStage for DerivedStage {
    fn stage(&self) -> Stage {
        Stage::Derived
    }

    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate> {
        let mut best: Option<KeyCandidate> = None;
        for base in self.keys.iter() {
            if input.expired() {
                break;
            }
            let local = best_of(
                Self::variants(base)
                    .into_iter()
                    .map(|k| KeyCandidate::evaluate(input.ciphertext, k)),
            );
            best = best_of(best.into_iter().chain(local));
        }
        best
    }
}

/// Derives a key from where the login plaintext is known to be fixed.
pub struct StructuralStage;

impl StructuralStage {
    pub fn candidates(ct: &[u8]) -> Vec<CipherKey> {
        let mut out = Vec::new();
        if ct.len() >= USERNAME_TAIL + KEY_LEN {
            // bytes 0..9 against the header, 9..16 against the username tail (16+9..32)
            let mut key = [0u8; KEY_LEN];
            for (i, h) in LOGIN_HEADER.iter().enumerate() {
                key[i] = ct[i] ^ h;
            }
            key[LOGIN_HEADER.len()..].copy_from_slice(&ct[KEY_LEN + LOGIN_HEADER.len()..2 * KEY_LEN]);
            out.push(key);
        }
        if ct.len() >= PADDING_BLOCK + KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&ct[PADDING_BLOCK..PADDING_BLOCK + KEY_LEN]);
            out.push(key);
        }
        out
    }
}

impl KeyStage for StructuralStage {
    fn stage(&self) -> Stage {
        Stage::Structural
    }

    fn candidate(&self, input: &StageInput<'_>) -> Option<KeyCandidate> {
        best_of(
            Self::candidates(input.ciphertext)
                .into_iter()
                .map(|k| KeyCandidate::evaluate(input.ciphertext, k)),
        )
    }
}
