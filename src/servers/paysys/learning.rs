//! Background key learning.
//!
//! A login whose key misses the login deadline is answered right away and
//! its ciphertext queued here. One worker retries the resolution with the
//! longer learning budget and stores the key under the username found in
//! the plaintext, so the client's next login hits the learned stage.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::credentials;
use crate::resolver::KeyResolver;

/// Pending learning jobs before new ones are dropped.
pub const LEARN_QUEUE_LEN: usize = 32;

#[derive(Debug)]
struct LearnJob {
    ciphertext: Vec<u8>,
    origin: String,
}

pub struct KeyLearner {
    tx: mpsc::Sender<LearnJob>,
}

impl KeyLearner {
    /// Spawns the worker on the current runtime. Outside a runtime the
    /// learner stays disabled and every submit is dropped.
    pub fn spawn(resolver: Arc<KeyResolver>, deadline: Duration, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(LEARN_QUEUE_LEN);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(learn_worker(rx, resolver, deadline, shutdown));
            }
            Err(_) => tracing::warn!("[learner] [disabled] no tokio runtime"),
        }
        Self { tx }
    }

    /// Queues `ciphertext` for a background resolution. Returns false when
    /// the queue is full or the worker is gone.
    pub fn submit(&self, ciphertext: &[u8], origin: &str) -> bool {
        let job = LearnJob { ciphertext: ciphertext.to_vec(), origin: origin.to_string() };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[learner] [dropped] origin={} err={}", origin, e);
                false
            }
        }
    }
}

async fn learn_worker(
    mut rx: mpsc::Receiver<LearnJob>,
    resolver: Arc<KeyResolver>,
    deadline: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        learn_one(&resolver, job, deadline, &shutdown).await;
    }
    tracing::debug!("[learner] [stopped]");
}

/// Resolves one queued ciphertext and remembers its key. Returns the
/// username the key was stored under.
async fn learn_one(
    resolver: &KeyResolver,
    job: LearnJob,
    deadline: Duration,
    shutdown: &CancellationToken,
) -> Option<String> {
    // own cooldown bucket: the login that queued this job already holds the
    // origin's slot
    let origin = format!("learn:{}", job.origin);
    let res = match resolver.resolve(&job.ciphertext, None, &origin, deadline, shutdown).await {
        Ok(res) => res,
        Err(e) => {
            tracing::info!(
                "[learner] [miss] origin={} reason={:?} best_score={}",
                job.origin, e.reason, e.best_score
            );
            return None;
        }
    };
    let Some(creds) = credentials::extract(&res.plaintext) else {
        tracing::info!("[learner] [unparsed] origin={} stage={}", job.origin, res.matched_via);
        return None;
    };
    resolver.remember(&creds.username, res.key);
    tracing::info!(
        "[learner] [learned] origin={} user={} stage={}",
        job.origin, creds.username, res.matched_via
    );
    Some(creds.username)
}
