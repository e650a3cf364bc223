//! One-shot clients, plus the per-frame handlers shared with Bishop sessions.

use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::credentials::{self, Credentials};
use super::packet::{
    self, decode, encode, fixed_str, is_valid_character_name, CharacterResult, CreateCharacterRequest,
    Frame, FrameKind, LoginResult,
};
use super::session::Session;
use super::store::LoginCheck;
use super::PaysysState;
use crate::error::{StoreError, UnresolvedReason};
use crate::network::crypt::{fallback_key, CipherKey};
use crate::network::governor::Outcome;
use crate::network::Transport;
use crate::resolver::Resolution;

pub const MSG_LOGIN_OK: &str = "Login successful";
pub const MSG_LOGIN_LEARNING: &str = "Login successful (learning key)";
pub const MSG_LOGIN_INVALID: &str = "Invalid username or password";
pub const MSG_LOGIN_LOCKED: &str = "Account locked";
pub const MSG_LOGIN_STORE: &str = "Account service unavailable";

const NAME_FIELD_LEN: usize = 32;

/// Answers the first frame of a non-Bishop connection. The caller closes.
pub async fn handle_one_shot<T: Transport>(
    state: &PaysysState,
    transport: &mut T,
    session: &mut Session,
    first: &[u8],
    cancel: &CancellationToken,
) {
    let parts = packet::split_frames(first);
    let raw = parts.first().copied().unwrap_or(first);

    let reply = match decode(raw) {
        Ok(frame) => {
            tracing::debug!(
                "[paysys] [frame_in] session={} kind={:?} len={}",
                session.id, frame.kind, raw.len()
            );
            dispatch(state, session, &frame, cancel).await.unwrap_or_else(packet::ack)
        }
        Err(e) => {
            tracing::warn!("[paysys] [decode_failed] session={} len={} err={}", session.id, raw.len(), e);
            packet::ack()
        }
    };

    if let Err(e) = transport.write(&encode(&reply)).await {
        tracing::warn!("[paysys] [write_failed] session={} err={}", session.id, e);
    }
}

/// Produces the reply for one decoded frame, or `None` when the protocol
/// expects silence.
pub async fn dispatch(
    state: &PaysysState,
    session: &mut Session,
    frame: &Frame,
    cancel: &CancellationToken,
) -> Option<Frame> {
    use FrameKind::*;
    let reply = match frame.kind {
        ControlHandshake => packet::control_ack(),
        UserLogin => verify_login(state, session, &frame.body, ReplyKind::Login, cancel).await,
        PlayerIdentity => verify_login(state, session, &frame.body, ReplyKind::Identity, cancel).await,
        GameLogin => packet::game_response(frame.correlation_key.unwrap_or(0), 0),
        SessionConfirm => packet::session_confirm_response(),
        SessionConfirmAlt => return None,
        CharacterCreate => create_character(state, session, &frame.body, cancel).await,
        CharacterList => list_characters(state, session, &frame.body, cancel).await,
        CharacterDelete => delete_character(state, session, &frame.body, cancel).await,
        CharacterData => packet::character_data_response(),
        PlayerVerify => packet::player_verify_response(),
        CharacterSelect => packet::character_select_response(),
        BishopLogin | ControlAck | AccountReply | LoginResponse | GameResponse | SessionConfirmResponse
        | CharacterDataResponse | PlayerVerifyResponse | CharacterSelectResponse => packet::ack(),
    };
    Some(reply)
}

// ── login ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    Login,
    Identity,
}

impl ReplyKind {
    fn build(self, result: LoginResult, message: &str, key: &CipherKey) -> Frame {
        match self {
            ReplyKind::Login => packet::login_response(result, message, key),
            ReplyKind::Identity => packet::identity_response(result, message, key),
        }
    }
}

async fn verify_login(
    state: &PaysysState,
    session: &mut Session,
    ciphertext: &[u8],
    reply: ReplyKind,
    cancel: &CancellationToken,
) -> Frame {
    let origin = session.origin();
    let resolution = match state
        .resolver
        .resolve(ciphertext, None, &origin, state.config.login_deadline(), cancel)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            let key = fallback_key(ciphertext.len());
            let optimistic = state.config.optimistic_unresolved_login;
            let queued = e.reason == UnresolvedReason::TimedOut && state.learner.submit(ciphertext, &origin);
            tracing::info!(
                "[paysys] [login_unresolved] session={} reason={:?} best_score={} optimistic={} queued={}",
                session.id, e.reason, e.best_score, optimistic, queued
            );
            return if optimistic {
                reply.build(LoginResult::Success, MSG_LOGIN_LEARNING, &key)
            } else {
                reply.build(LoginResult::InvalidCredentials, MSG_LOGIN_INVALID, &key)
            };
        }
    };

    let Some(creds) = credentials::extract(&resolution.plaintext) else {
        tracing::warn!("[paysys] [login_unparsed] session={} stage={}", session.id, resolution.matched_via);
        return reply.build(LoginResult::InvalidCredentials, MSG_LOGIN_INVALID, &resolution.key);
    };

    state.resolver.remember(&creds.username, resolution.key);

    let (result, message) = check_credentials(state, &creds, cancel).await;
    tracing::info!(
        "[paysys] [login] session={} user={} stage={} method={:?} result={:?}",
        session.id, creds.username, resolution.matched_via, creds.method, result
    );

    if result == LoginResult::Success {
        let ip = credentials::client_address(&resolution.plaintext)
            .map(IpAddr::V4)
            .unwrap_or(session.peer.ip());
        record_login(state, &creds.username, ip);
        session.identity = Some(creds.username);
    }
    reply.build(result, message, &resolution.key)
}

async fn check_credentials(
    state: &PaysysState,
    creds: &Credentials,
    cancel: &CancellationToken,
) -> (LoginResult, &'static str) {
    let store = Arc::clone(&state.store);
    let (username, password) = (creds.username.clone(), creds.password.clone());
    let outcome = state
        .resolver
        .governor()
        .call(state.config.store_deadline(), cancel, async move {
            store.verify_login(&username, &password).await
        })
        .await;

    match outcome {
        Outcome::Completed(Ok(LoginCheck { locked: true, .. }))
        | Outcome::Completed(Err(StoreError::AccountLocked)) => (LoginResult::Locked, MSG_LOGIN_LOCKED),
        Outcome::Completed(Ok(LoginCheck { ok: true, .. })) => (LoginResult::Success, MSG_LOGIN_OK),
        Outcome::Completed(Ok(_)) | Outcome::Completed(Err(StoreError::CredentialInvalid)) => {
            (LoginResult::InvalidCredentials, MSG_LOGIN_INVALID)
        }
        other => {
            tracing::warn!("[paysys] [store_unavailable] user={} outcome={:?}", creds.username, other);
            (LoginResult::StoreError, MSG_LOGIN_STORE)
        }
    }
}

/// Fire-and-forget post-login bookkeeping.
fn record_login(state: &PaysysState, username: &str, ip: IpAddr) {
    let store = Arc::clone(&state.store);
    let username = username.to_string();
    let deadline = state.config.store_deadline();
    tokio::spawn(async move {
        let work = async {
            store.update_last_login_ip(&username, &ip.to_string()).await?;
            store.set_online(&username, true).await
        };
        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("[paysys] [login_record_failed] user={} err={}", username, e),
            Err(_) => tracing::warn!("[paysys] [login_record_timeout] user={}", username),
        }
    });
}

// ── character management ────────────────────────────────────────────────────

/// Resolves a character payload. A Bishop link relays many players, so no
/// connection-level identity is claimed; callers learn the key under the
/// username the payload itself names.
async fn decrypt_payload(
    state: &PaysysState,
    session: &Session,
    ciphertext: &[u8],
    cancel: &CancellationToken,
) -> Option<Resolution> {
    let origin = session.origin();
    match state
        .resolver
        .resolve(ciphertext, None, &origin, state.config.login_deadline(), cancel)
        .await
    {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::info!("[paysys] [payload_unresolved] session={} reason={:?}", session.id, e.reason);
            None
        }
    }
}

async fn create_character(
    state: &PaysysState,
    session: &Session,
    ciphertext: &[u8],
    cancel: &CancellationToken,
) -> Frame {
    let op = FrameKind::CharacterCreate;
    let Some((req, key)) = decrypt_payload(state, session, ciphertext, cancel)
        .await
        .and_then(|res| CreateCharacterRequest::parse(&res.plaintext).map(|req| (req, res.key)))
    else {
        return packet::character_reply(op, CharacterResult::NameInvalid, "Invalid character data");
    };
    if !credentials::is_valid_username(&req.username) {
        return packet::character_reply(op, CharacterResult::AccountOrPassword, "Invalid account");
    }
    state.resolver.remember(&req.username, key);
    if !is_valid_character_name(&req.name) {
        return packet::character_reply(op, CharacterResult::NameInvalid, "Invalid character name");
    }

    let store = Arc::clone(&state.store);
    let (username, name, class, gender) = (req.username.clone(), req.name.clone(), req.class, req.gender);
    let outcome = state
        .resolver
        .governor()
        .call(state.config.store_deadline(), cancel, async move {
            store.create_character(&username, &name, class, gender).await
        })
        .await;

    let (result, message) = match outcome {
        Outcome::Completed(Ok(())) => (CharacterResult::Success, "Character created successfully"),
        Outcome::Completed(Err(StoreError::CharacterExists)) => {
            (CharacterResult::Exists, "Character name already exists")
        }
        Outcome::Completed(Err(StoreError::CharacterLimit)) => (CharacterResult::Limit, "Character limit reached"),
        other => {
            tracing::warn!("[paysys] [character_create_failed] name={} outcome={:?}", req.name, other);
            (CharacterResult::Failed, "Failed to create character")
        }
    };
    tracing::info!(
        "[paysys] [character_create] session={} user={} name={} result={:?}",
        session.id, req.username, req.name, result
    );
    packet::character_reply(op, result, message)
}

async fn list_characters(
    state: &PaysysState,
    session: &Session,
    ciphertext: &[u8],
    cancel: &CancellationToken,
) -> Frame {
    let op = FrameKind::CharacterList;
    let Some(res) = decrypt_payload(state, session, ciphertext, cancel).await else {
        return packet::character_reply(op, CharacterResult::AccountOrPassword, "Invalid request");
    };
    let username = fixed_str(&res.plaintext[..res.plaintext.len().min(NAME_FIELD_LEN)]);
    if !credentials::is_valid_username(&username) {
        return packet::character_reply(op, CharacterResult::AccountOrPassword, "Invalid request");
    }
    state.resolver.remember(&username, res.key);

    let store = Arc::clone(&state.store);
    let owner = username.clone();
    let outcome = state
        .resolver
        .governor()
        .call(state.config.store_deadline(), cancel, async move { store.list_characters(&owner).await })
        .await;

    match outcome {
        Outcome::Completed(Ok(records)) => {
            tracing::info!(
                "[paysys] [character_list] session={} user={} count={}",
                session.id, username, records.len()
            );
            packet::character_list_reply(&records)
        }
        other => {
            tracing::warn!("[paysys] [character_list_failed] user={} outcome={:?}", username, other);
            packet::character_reply(op, CharacterResult::Failed, "Database error")
        }
    }
}

async fn delete_character(
    state: &PaysysState,
    session: &Session,
    ciphertext: &[u8],
    cancel: &CancellationToken,
) -> Frame {
    let op = FrameKind::CharacterDelete;
    // the payload carries no username, so nothing is learned here
    let name = decrypt_payload(state, session, ciphertext, cancel)
        .await
        .map(|res| fixed_str(&res.plaintext[..res.plaintext.len().min(NAME_FIELD_LEN)]))
        .unwrap_or_default();
    if !is_valid_character_name(&name) {
        return packet::character_reply(op, CharacterResult::NameInvalid, "Invalid character name");
    }

    let store = Arc::clone(&state.store);
    let target = name.clone();
    let outcome = state
        .resolver
        .governor()
        .call(state.config.store_deadline(), cancel, async move { store.delete_character(&target).await })
        .await;

    let (result, message) = match outcome {
        Outcome::Completed(Ok(())) => (CharacterResult::Success, "Character deleted"),
        other => {
            tracing::warn!("[paysys] [character_delete_failed] name={} outcome={:?}", name, other);
            (CharacterResult::Failed, "Failed to delete character")
        }
    };
    tracing::info!("[paysys] [character_delete] session={} name={} result={:?}", session.id, name, result);
    packet::character_reply(op, result, message)
}
