//! PaySys account-verification server.
//!
//! Every connection is greeted, then classified by its first frame: the
//! 127-byte control handshake opens a long-lived Bishop session
//! ([`bishop`]), anything else is a one-shot client ([`client`]) that gets
//! exactly one reply before the server closes.

pub mod bishop;
pub mod client;
pub mod credentials;
pub mod db;
pub mod learning;
pub mod packet;
pub mod session;
pub mod store;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::network::acl::AllowList;
use crate::network::crypt::CipherKey;
use crate::network::governor::Governor;
use crate::network::{StreamTransport, Transport};
use crate::resolver::learned::LearnedKeyStore;
use crate::resolver::KeyResolver;
use learning::KeyLearner;
use packet::{encode, FrameKind, MAX_FRAME_LEN};
use session::{Phase, Session};
use store::{AccountStore, MemoryAccountStore};

pub struct PaysysState {
    pub config: ServerConfig,
    pub store: Arc<dyn AccountStore>,
    pub resolver: Arc<KeyResolver>,
    /// Retries logins whose key missed the login deadline.
    pub learner: KeyLearner,
    pub bishop_acl: AllowList,
    /// Parent of every connection token.
    pub shutdown: CancellationToken,
    /// session id → live Bishop session
    bishop_sessions: Mutex<HashMap<u64, Session>>,
    next_id: AtomicU64,
}

impl PaysysState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn AccountStore>,
        learned: Arc<LearnedKeyStore>,
    ) -> Result<Self> {
        let extra_keys = config.extra_keys()?;
        let bishop_acl = config.bishop_acl()?;
        Ok(Self::from_parts(config, store, learned, &extra_keys, bishop_acl))
    }

    fn from_parts(
        config: ServerConfig,
        store: Arc<dyn AccountStore>,
        learned: Arc<LearnedKeyStore>,
        extra_keys: &[CipherKey],
        bishop_acl: AllowList,
    ) -> Self {
        let governor = Arc::new(Governor::new(config.breaker_limits()));
        let resolver = Arc::new(KeyResolver::new(learned, extra_keys, governor));
        let shutdown = CancellationToken::new();
        let learner = KeyLearner::spawn(Arc::clone(&resolver), config.learning_deadline(), shutdown.child_token());
        Self {
            resolver,
            learner,
            config,
            store,
            bishop_acl,
            shutdown,
            bishop_sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Permissive in-memory state for tests. No per-origin cooldown, so
    /// repeated local connections are never throttled.
    pub fn test_only() -> Self {
        let config = ServerConfig {
            listen_ip: "127.0.0.1".to_string(),
            listen_port: 0,
            origin_cooldown_secs: 0,
            ..Default::default()
        };
        Self::from_parts(
            config,
            Arc::new(MemoryAccountStore::permissive()),
            Arc::new(LearnedKeyStore::in_memory()),
            &[],
            AllowList::allow_all(),
        )
    }

    pub async fn run(state: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        tracing::info!("[paysys] [ready] addr={}", listener.local_addr()?);
        Self::serve(state, listener).await
    }

    /// Accepts connections until [`PaysysState::shutdown`] is called.
    pub async fn serve(state: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => {
                    tracing::info!("[paysys] [stopped] open_bishop_sessions={}", state.bishop_sessions.lock().await.len());
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let s = Arc::clone(&state);
                    tokio::spawn(async move {
                        Self::handle_new_connection(s, stream, peer).await;
                    });
                }
            }
        }
    }

    pub async fn handle_new_connection(state: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        Self::handle_transport(state, StreamTransport::new(stream, peer)).await;
    }

    /// Drives one connection from greeting to close.
    pub async fn handle_transport<T: Transport>(state: Arc<Self>, mut transport: T) {
        let id = state.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = state.shutdown.child_token();
        let mut session = Session::new(id, transport.remote_address());
        tracing::info!("[paysys] [accept] session={} peer={}", id, session.peer);

        state.drive(&mut transport, &mut session, &cancel).await;

        // aborts governed work still running for this connection
        cancel.cancel();
        session.advance(Phase::Closed);
        state.bishop_sessions.lock().await.remove(&id);
        let _ = transport.close().await;
        tracing::info!(
            "[paysys] [closed] session={} peer={} frames={}",
            id, session.peer, session.frames_handled
        );
    }

    async fn drive<T: Transport>(&self, transport: &mut T, session: &mut Session, cancel: &CancellationToken) {
        if let Err(e) = transport.write(&encode(&packet::greeting())).await {
            tracing::warn!("[paysys] [greeting_failed] session={} err={}", session.id, e);
            return;
        }
        session.advance(Phase::AwaitingFirstFrame);

        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            r = transport.read(&mut buf, self.config.first_frame_timeout()) => match r {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    tracing::info!("[paysys] [first_frame_missing] session={} err={}", session.id, e);
                    return;
                }
            },
        };
        session.touch();
        let first = &buf[..n];

        if FrameKind::from_length(n) != Some(FrameKind::ControlHandshake) {
            session.advance(Phase::OneShotClient);
            client::handle_one_shot(self, transport, session, first, cancel).await;
            return;
        }

        if !self.bishop_acl.permits(session.peer.ip()) {
            tracing::warn!("[paysys] [bishop_denied] session={} peer={}", session.id, session.peer);
            session.advance(Phase::OneShotClient);
            let _ = transport.write(&encode(&packet::ack())).await;
            return;
        }

        if let Err(e) = transport.write(&encode(&packet::control_ack())).await {
            tracing::warn!("[paysys] [handshake_failed] session={} err={}", session.id, e);
            return;
        }
        session.advance(Phase::BishopActive);
        tracing::info!("[paysys] [bishop_open] session={} peer={}", session.id, session.peer);
        self.bishop_sessions.lock().await.insert(session.id, session.clone());

        bishop::run(self, transport, session, cancel).await;
    }

    pub(crate) async fn refresh_bishop_session(&self, session: &Session) {
        if let Some(slot) = self.bishop_sessions.lock().await.get_mut(&session.id) {
            *slot = session.clone();
        }
    }

    /// Snapshot of live Bishop sessions, oldest first.
    pub async fn active_bishop_sessions(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self.bishop_sessions.lock().await.values().cloned().collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Stops accepting and cancels every open connection.
    pub fn shutdown(&self) {
        tracing::info!("[paysys] [shutdown] requested");
        self.shutdown.cancel();
    }
}
