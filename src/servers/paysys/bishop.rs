//! Long-lived Bishop control sessions.
//!
//! After the handshake the peer relays login, confirmation, and character
//! traffic for many players over one connection. Every frame gets answered
//! (malformed ones with the generic ack) so the peer never stalls waiting.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::client::dispatch;
use super::packet::{self, decode, encode, MAX_FRAME_LEN};
use super::session::Session;
use super::PaysysState;
use crate::network::Transport;

/// Serves frames until the peer leaves, goes idle, or the session ceiling
/// passes.
pub async fn run<T: Transport>(
    state: &PaysysState,
    transport: &mut T,
    session: &mut Session,
    cancel: &CancellationToken,
) {
    let idle = state.config.idle_timeout();
    let ceiling = Instant::now() + state.config.bishop_max_session();
    let mut buf = vec![0u8; MAX_FRAME_LEN];

    loop {
        let remaining = ceiling.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::info!("[bishop] [ceiling] session={} frames={}", session.id, session.frames_handled);
            return;
        }

        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            r = transport.read(&mut buf, idle.min(remaining)) => match r {
                Ok(0) => {
                    tracing::info!("[bishop] [peer_closed] session={}", session.id);
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::info!("[bishop] [read_ended] session={} err={}", session.id, e);
                    return;
                }
            },
        };
        session.touch();

        for raw in packet::split_frames(&buf[..n]) {
            let reply = match decode(raw) {
                Ok(frame) => {
                    tracing::debug!(
                        "[bishop] [frame_in] session={} kind={:?} len={}",
                        session.id, frame.kind, raw.len()
                    );
                    dispatch(state, session, &frame, cancel).await
                }
                Err(e) => {
                    tracing::warn!("[bishop] [decode_failed] session={} len={} err={}", session.id, raw.len(), e);
                    Some(packet::ack())
                }
            };
            let Some(reply) = reply else { continue };
            if let Err(e) = transport.write(&encode(&reply)).await {
                tracing::info!("[bishop] [write_failed] session={} err={}", session.id, e);
                return;
            }
        }

        state.refresh_bishop_session(session).await;
    }
}
