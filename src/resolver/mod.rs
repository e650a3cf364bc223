//! Cipher key resolution.
//!
//! Recovers the 16-byte XOR key of a ciphertext without being told it,
//! through an ordered list of [`KeyStage`]s that stops at the first
//! candidate clearing [`acceptance_threshold`]. Stages 1-2 are cheap and
//! run inline; stages 3-6 run through the [`Governor`].

pub mod learned;
pub mod score;
pub mod stages;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{KeyNotResolved, UnresolvedReason};
use crate::network::crypt::{transform, CipherKey};
use crate::network::governor::{Governor, Outcome};
use learned::LearnedKeyStore;
use score::{acceptance_threshold, MIN_CIPHERTEXT_LEN};
use stages::{
    DerivedStage, FrequencyStage, KeyCandidate, KeyStage, KnownTableStage, LearnedStage,
    RepeatedBlockStage, Stage, StageInput, StructuralStage,
};

/// Keys observed in captured traffic.
pub const KNOWN_KEYS: [CipherKey; 2] = [
    // admin account
    [0x45, 0x73, 0x77, 0x29, 0x2F, 0xDA, 0x9A, 0x21, 0x10, 0x52, 0xB1, 0x9C, 0x70, 0x93, 0x0E, 0xA0],
    // bishop test account
    [0xAD, 0x69, 0x2B, 0xA7, 0x9D, 0x67, 0x0C, 0x50, 0x0E, 0xA5, 0xAE, 0xC3, 0x17, 0xFB, 0xA5, 0xAD],
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub plaintext: Vec<u8>,
    pub key: CipherKey,
    pub matched_via: Stage,
    pub score: i64,
}

/// Ordered stages run with early exit.
pub struct Pipeline {
    stages: Vec<Box<dyn KeyStage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn KeyStage>>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().map(|s| s.stage())
    }

    /// Runs each stage until one clears the threshold or the deadline passes.
    pub fn run(&self, input: &StageInput<'_>) -> Result<Resolution, KeyNotResolved> {
        let threshold = acceptance_threshold(input.ciphertext.len());
        let mut best_score = i64::MIN;
        for stage in &self.stages {
            if input.expired() {
                return Err(KeyNotResolved::new(UnresolvedReason::TimedOut, best_score));
            }
            let Some(KeyCandidate { key, score }) = stage.candidate(input) else {
                continue;
            };
            best_score = best_score.max(score);
            if score >= threshold {
                return Ok(Resolution {
                    plaintext: transform(input.ciphertext, &key),
                    key,
                    matched_via: stage.stage(),
                    score,
                });
            }
        }
        Err(KeyNotResolved::new(UnresolvedReason::BelowThreshold, best_score))
    }
}

pub struct KeyResolver {
    learned: Arc<LearnedKeyStore>,
    cheap: Pipeline,
    expensive: Arc<Pipeline>,
    governor: Arc<Governor>,
}

impl KeyResolver {
    /// `extra_keys` extend [`KNOWN_KEYS`] for the table and derivation stages.
    pub fn new(learned: Arc<LearnedKeyStore>, extra_keys: &[CipherKey], governor: Arc<Governor>) -> Self {
        let mut keys = KNOWN_KEYS.to_vec();
        for k in extra_keys {
            if !keys.contains(k) {
                keys.push(*k);
            }
        }
        let keys: Arc<[CipherKey]> = Arc::from(keys);

        let cheap = Pipeline::new(vec![
            Box::new(LearnedStage { store: Arc::clone(&learned) }),
            Box::new(KnownTableStage { keys: Arc::clone(&keys) }),
        ]);
        let expensive = Arc::new(Pipeline::new(vec![
            Box::new(RepeatedBlockStage),
            Box::new(FrequencyStage),
            Box::new(DerivedStage { keys }),
            Box::new(StructuralStage),
        ]));
        Self { learned, cheap, expensive, governor }
    }

    pub fn learned(&self) -> &Arc<LearnedKeyStore> {
        &self.learned
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    /// Records a key discovered for `identity`. Never blocks.
    pub fn remember(&self, identity: &str, key: CipherKey) {
        self.learned.learn(identity, key);
    }

    fn learn_if_new(&self, claimed: Option<&str>, res: &Resolution) {
        if let Some(id) = claimed {
            if res.matched_via != Stage::Learned {
                self.remember(id, res.key);
            }
        }
    }

    /// Resolves the key of `ciphertext` within `deadline`.
    ///
    /// `origin` identifies the peer for the per-origin cooldown; `cancel`
    /// aborts the wait when the owning connection goes away.
    pub async fn resolve(
        &self,
        ciphertext: &[u8],
        claimed: Option<&str>,
        origin: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Resolution, KeyNotResolved> {
        if ciphertext.len() < MIN_CIPHERTEXT_LEN {
            return Err(KeyNotResolved::new(UnresolvedReason::TooShort, 0));
        }
        let started = Instant::now();
        let input = StageInput { ciphertext, claimed_identity: claimed, deadline: started + deadline };

        let cheap_best = match self.cheap.run(&input) {
            Ok(res) => {
                tracing::debug!("[resolver] [hit] stage={} score={}", res.matched_via, res.score);
                self.learn_if_new(claimed, &res);
                return Ok(res);
            }
            Err(e) => e.best_score,
        };

        let remaining = deadline.saturating_sub(started.elapsed());
        let pipeline = Arc::clone(&self.expensive);
        let owned = ciphertext.to_vec();
        let claimed_owned = claimed.map(str::to_string);
        let outcome = self
            .governor
            .run_expensive(origin, remaining, cancel, move |deadline_at| {
                let input = StageInput {
                    ciphertext: &owned,
                    claimed_identity: claimed_owned.as_deref(),
                    deadline: deadline_at,
                };
                pipeline.run(&input)
            })
            .await;

        let fail = |reason| Err(KeyNotResolved::new(reason, cheap_best));
        match outcome {
            Outcome::Completed(Ok(res)) => {
                tracing::info!(
                    "[resolver] [hit] stage={} score={} elapsed_ms={}",
                    res.matched_via, res.score, started.elapsed().as_millis()
                );
                self.learn_if_new(claimed, &res);
                Ok(res)
            }
            Outcome::Completed(Err(e)) => {
                tracing::info!("[resolver] [miss] reason={:?} best_score={}", e.reason, e.best_score.max(cheap_best));
                Err(KeyNotResolved::new(e.reason, e.best_score.max(cheap_best)))
            }
            Outcome::TimedOut => fail(UnresolvedReason::TimedOut),
            Outcome::Faulted => fail(UnresolvedReason::Faulted),
            Outcome::Cancelled => fail(UnresolvedReason::Cancelled),
            Outcome::ShortCircuited(_) => fail(UnresolvedReason::ShortCircuited),
        }
    }

    /// Runs every stage inline on the calling thread. Used offline.
    pub fn resolve_blocking(
        &self,
        ciphertext: &[u8],
        claimed: Option<&str>,
        deadline: Duration,
    ) -> Result<Resolution, KeyNotResolved> {
        if ciphertext.len() < MIN_CIPHERTEXT_LEN {
            return Err(KeyNotResolved::new(UnresolvedReason::TooShort, 0));
        }
        let input = StageInput { ciphertext, claimed_identity: claimed, deadline: Instant::now() + deadline };
        let cheap_best = match self.cheap.run(&input) {
            Ok(res) => return Ok(res),
            Err(e) => e.best_score,
        };
        self.expensive
            .run(&input)
            .map_err(|e| KeyNotResolved::new(e.reason, e.best_score.max(cheap_best)))
    }
}
