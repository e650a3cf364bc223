//! Error taxonomy shared by the codec, resolver, and account store.

/// Frame decode failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need {need}")]
    TooShort { len: usize, need: usize },

    #[error("frame length mismatch: declared {declared}, got {actual}")]
    LengthMismatch { declared: u16, actual: usize },

    #[error("unknown frame type: 0x{0:04X}")]
    UnknownType(u16),
}

/// Why a resolution produced no key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Every stage ran and none cleared the acceptance threshold.
    BelowThreshold,
    /// Ciphertext too small to say anything about.
    TooShort,
    /// The expensive stages hit their deadline.
    TimedOut,
    /// Circuit breaker refused the expensive stages.
    ShortCircuited,
    /// A stage panicked.
    Faulted,
    /// The owning connection was torn down.
    Cancelled,
}

/// No candidate key cleared the acceptance threshold.
///
/// Not an error to the peer: callers fall back to the best-effort path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("key not resolved ({reason:?}, best score {best_score})")]
pub struct KeyNotResolved {
    pub best_score: i64,
    pub reason: UnresolvedReason,
}

impl KeyNotResolved {
    pub fn new(reason: UnresolvedReason, best_score: i64) -> Self {
        Self { best_score, reason }
    }
}

/// Account store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid credentials")]
    CredentialInvalid,

    #[error("account locked")]
    AccountLocked,

    #[error("account store timed out")]
    Timeout,

    #[error("account store fault: {0}")]
    Fault(String),

    #[error("character name already exists")]
    CharacterExists,

    #[error("character limit reached")]
    CharacterLimit,

    #[error("character not found")]
    CharacterNotFound,
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Fault(e.to_string())
    }
}
