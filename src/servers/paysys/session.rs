use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Greeting,
    AwaitingFirstFrame,
    BishopActive,
    OneShotClient,
    Closed,
}

impl Phase {
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Greeting, AwaitingFirstFrame)
                | (AwaitingFirstFrame, BishopActive)
                | (AwaitingFirstFrame, OneShotClient)
                | (BishopActive, BishopActive)
                | (_, Closed)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Greeting => "greeting",
            Phase::AwaitingFirstFrame => "awaiting_first_frame",
            Phase::BishopActive => "bishop_active",
            Phase::OneShotClient => "one_shot_client",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Per-connection bookkeeping, owned by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub peer: SocketAddr,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub frames_handled: u64,
    /// Last username verified on this connection. A Bishop link relays
    /// many players, so this is never used to pick a key.
    pub identity: Option<String>,
}

impl Session {
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        let now = Utc::now();
        Self {
            id,
            peer,
            phase: Phase::Greeting,
            started_at: now,
            last_activity_at: now,
            frames_handled: 0,
            identity: None,
        }
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                "[paysys] [phase_rejected] session={} from={} to={}",
                self.id, self.phase, next
            );
            return false;
        }
        self.phase = next;
        true
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
        self.frames_handled += 1;
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Origin key used by the per-origin cooldown.
    pub fn origin(&self) -> String {
        self.peer.ip().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(1, "127.0.0.1:5000".parse().unwrap())
    }

    #[test]
    fn test_bishop_path() {
        let mut s = session();
        assert!(s.advance(Phase::AwaitingFirstFrame));
        assert!(s.advance(Phase::BishopActive));
        assert!(s.advance(Phase::BishopActive));
        assert!(s.advance(Phase::Closed));
        assert!(s.is_closed());
    }

    #[test]
    fn test_one_shot_path() {
        let mut s = session();
        assert!(s.advance(Phase::AwaitingFirstFrame));
        assert!(s.advance(Phase::OneShotClient));
        assert!(!s.advance(Phase::BishopActive));
        assert_eq!(s.phase, Phase::OneShotClient);
        assert!(s.advance(Phase::Closed));
    }

    #[test]
    fn test_no_backwards_transitions() {
        let mut s = session();
        assert!(!s.advance(Phase::BishopActive));
        assert!(s.advance(Phase::AwaitingFirstFrame));
        assert!(!s.advance(Phase::Greeting));
        assert!(s.advance(Phase::Closed));
        assert!(!s.advance(Phase::AwaitingFirstFrame));
        assert!(s.is_closed());
    }

    #[test]
    fn test_touch_counts_frames() {
        let mut s = session();
        let before = s.last_activity_at;
        s.touch();
        s.touch();
        assert_eq!(s.frames_handled, 2);
        assert!(s.last_activity_at >= before);
        assert_eq!(s.origin(), "127.0.0.1");
    }
}
