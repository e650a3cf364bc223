//! Learned-key cache with best-effort persistence.
//!
//! Lookups and inserts hit an in-memory map. Persistence runs on one worker
//! task fed by a bounded queue; when the queue is full the write is dropped.
//! File format is one `username:hexkey` per line.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::network::crypt::{parse_hex_key, CipherKey};

/// Most records kept in memory and on disk.
pub const MAX_LEARNED_RECORDS: usize = 50;

/// Longest line accepted from the key file.
pub const MAX_LINE_LEN: usize = 100;

/// Longest identity accepted.
pub const MAX_IDENTITY_LEN: usize = 32;

/// Bytes read from the key file at startup.
pub const MAX_FILE_BYTES: usize = 4096;

/// Pending persistence jobs before new ones are dropped.
pub const PERSIST_QUEUE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnedKeyRecord {
    pub identity: String,
    pub key: CipherKey,
}

#[derive(Debug, Default)]
struct Table {
    keys: HashMap<String, CipherKey>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

impl Table {
    fn insert(&mut self, identity: &str, key: CipherKey) {
        if self.keys.insert(identity.to_string(), key).is_none() {
            self.order.push_back(identity.to_string());
            while self.order.len() > MAX_LEARNED_RECORDS {
                if let Some(old) = self.order.pop_front() {
                    self.keys.remove(&old);
                }
            }
        }
    }

    fn records(&self) -> Vec<LearnedKeyRecord> {
        self.order
            .iter()
            .filter_map(|id| self.keys.get(id).map(|k| LearnedKeyRecord { identity: id.clone(), key: *k }))
            .collect()
    }
}

pub struct LearnedKeyStore {
    table: RwLock<Table>,
    persist_tx: Option<mpsc::Sender<LearnedKeyRecord>>,
}

impl LearnedKeyStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self { table: RwLock::new(Table::default()), persist_tx: None }
    }

    /// Loads `path` (if present) into a store that never writes back.
    pub fn read_only(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut table = Table::default();
        for rec in load_file(path) {
            table.insert(&rec.identity, rec.key);
        }
        tracing::debug!("[learned] [loaded] path={} records={}", path.display(), table.keys.len());
        Self { table: RwLock::new(table), persist_tx: None }
    }

    /// Loads `path` (if present) and spawns the persistence worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_persistence(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let mut table = Table::default();
        for rec in load_file(&path) {
            table.insert(&rec.identity, rec.key);
        }
        tracing::info!("[learned] [loaded] path={} records={}", path.display(), table.keys.len());

        let (tx, rx) = mpsc::channel(PERSIST_QUEUE_LEN);
        let handle = tokio::spawn(persist_worker(path, table.records(), rx));
        (Self { table: RwLock::new(table), persist_tx: Some(tx) }, handle)
    }

    pub fn get(&self, identity: &str) -> Option<CipherKey> {
        self.table.read().unwrap_or_else(PoisonError::into_inner).keys.get(identity).copied()
    }

    /// Up to `limit` learned keys, oldest first.
    pub fn keys(&self, limit: usize) -> Vec<CipherKey> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.order.iter().filter_map(|id| table.keys.get(id).copied()).take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records `key` for `identity`. Never blocks on disk.
    pub fn learn(&self, identity: &str, key: CipherKey) {
        if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN || identity.contains(':') {
            return;
        }
        let changed = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let changed = table.keys.get(identity) != Some(&key);
            table.insert(identity, key);
            changed
        };
        if !changed {
            return;
        }
        tracing::info!("[learned] [new_key] identity={} key={}", identity, hex::encode(key));

        if let Some(tx) = &self.persist_tx {
            let rec = LearnedKeyRecord { identity: identity.to_string(), key };
            if tx.try_send(rec).is_err() {
                tracing::warn!("[learned] [persist_dropped] identity={}", identity);
            }
        }
    }
}

async fn persist_worker(
    path: PathBuf,
    initial: Vec<LearnedKeyRecord>,
    mut rx: mpsc::Receiver<LearnedKeyRecord>,
) {
    let mut table = Table::default();
    for rec in initial {
        table.insert(&rec.identity, rec.key);
    }
    while let Some(rec) = rx.recv().await {
        table.insert(&rec.identity, rec.key);
        // collapse whatever else is already queued into one write
        while let Ok(more) = rx.try_recv() {
            table.insert(&more.identity, more.key);
        }
        let contents = format_records(&table.records());
        if let Err(e) = tokio::fs::write(&path, contents).await {
            tracing::warn!("[learned] [persist_failed] path={} err={}", path.display(), e);
        }
    }
}

fn load_file(path: &Path) -> Vec<LearnedKeyRecord> {
    use std::io::Read;

    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let mut buf = Vec::with_capacity(MAX_FILE_BYTES);
    if let Err(e) = file.take(MAX_FILE_BYTES as u64).read_to_end(&mut buf) {
        tracing::warn!("[learned] [load_failed] path={} err={}", path.display(), e);
        return Vec::new();
    }
    parse_records(&String::from_utf8_lossy(&buf))
}

/// Parses `username:hexkey` lines, skipping anything malformed.
pub fn parse_records(content: &str) -> Vec<LearnedKeyRecord> {
    let mut out = Vec::new();
    for line in content.lines().take(MAX_LEARNED_RECORDS) {
        let line = line.trim();
        if line.is_empty() || line.len() > MAX_LINE_LEN {
            continue;
        }
        let Some((identity, hex_key)) = line.split_once(':') else {
            continue;
        };
        let identity = identity.trim();
        let hex_key = hex_key.trim();
        if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN || hex_key.len() != 32 {
            continue;
        }
        if let Some(key) = parse_hex_key(hex_key) {
            out.push(LearnedKeyRecord { identity: identity.to_string(), key });
        }
    }
    out
}

pub fn format_records(records: &[LearnedKeyRecord]) -> String {
    records
        .iter()
        .take(MAX_LEARNED_RECORDS)
        .map(|r| format!("{}:{}\n", r.identity, hex::encode(r.key)))
        .collect()
}
