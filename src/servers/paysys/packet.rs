//! PaySys frame codec and canned reply builders.
//!
//! Two lookup strategies, in priority order:
//! 1. exact total length against [`LENGTH_TABLE`] (legacy control families),
//! 2. the little-endian `u16` tag at offset 2 against [`FrameKind::from_tag`].
//!
//! Length-keyed frames keep their whole wire image in `body`; their first
//! four bytes are not a trustworthy header.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::network::crypt::{transform, CipherKey};
use super::store::CharacterRecord;

/// Basic header: `u16 length | u16 tag`.
pub const HEADER_LEN: usize = 4;

/// Extended header: basic header plus `u32 correlation key`.
pub const EXTENDED_HEADER_LEN: usize = 8;

/// Total length of the Bishop control handshake.
pub const CONTROL_FRAME_LEN: usize = 127;

/// Largest chunk read from the transport at once.
pub const MAX_FRAME_LEN: usize = 4096;

/// Plaintext size of a login reply body.
pub const LOGIN_REPLY_BODY_LEN: usize = 64;

/// Plaintext size of a player identity reply body.
pub const IDENTITY_REPLY_BODY_LEN: usize = 165;

/// Version stamped into every account sub-header.
pub const ACCOUNT_VERSION: u16 = 1;

/// Account sub-header: `u16 size | u16 version | u16 type | u32 operate`.
pub const ACCOUNT_HEADER_LEN: usize = 10;

/// Characters per account.
pub const MAX_CHARACTERS: usize = 8;

/// Serialized size of one character list record.
pub const CHARACTER_RECORD_LEN: usize = 58;

/// Frame families identified purely by total byte length.
pub const LENGTH_TABLE: &[(usize, FrameKind)] = &[(CONTROL_FRAME_LEN, FrameKind::ControlHandshake)];

const GREETING_NONCE: [u8; 8] = [0xF5, 0x4D, 0x3F, 0xC9, 0x5A, 0xCF, 0xB2, 0x5E];

const CONTROL_ACK_BODY: [u8; 49] = [
    0x61, 0x37, 0xCC, 0x16, 0x16, 0xB0, 0x5D, 0xD4, 0x00, 0xFA, 0x40, 0xA1, 0x99, 0xA1,
    0x37, 0x44, 0x61, 0x37, 0xCC, 0x16, 0x16, 0xB0, 0x5D, 0xD4, 0x00, 0xFA, 0x40, 0xA1, 0x99, 0xA1,
    0x37, 0x44, 0x61, 0x37, 0xCC, 0x16, 0x16, 0xB0, 0x5D, 0xD4, 0x00, 0xFB, 0x40, 0xA1, 0x99, 0x32,
    0xCA, 0x39, 0xDB,
];

const CHARACTER_DATA_BODY: [u8; 53] = [
    0xAB, 0xFB, 0x52, 0xF0, 0xBE, 0x69, 0xE7, 0x9C, 0x4F, 0x3E, 0xD3, 0x89, 0xC9, 0x81, 0xD1, 0x90,
    0xAB, 0xFB, 0x52, 0xF0, 0xBE, 0x69, 0xE7, 0x9C, 0x4F, 0x7D, 0xE7, 0xCA, 0x88, 0xB5, 0xE3, 0xA3,
    0x93, 0xBA, 0x62, 0xB2, 0x87, 0x5B, 0xD4, 0xA4, 0x7D, 0x3F, 0xD3, 0x89, 0xC9, 0xB4, 0xE1, 0xA9,
    0xEA, 0xCD, 0x14, 0xC7, 0xD7,
];

const VERIFY_REPLY_BODY: [u8; 3] = [0xA0, 0x23, 0x7D];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// 127-byte Bishop handshake (length-keyed).
    ControlHandshake,
    /// Bishop login / greeting family.
    BishopLogin,
    /// Canned reply to the control handshake.
    ControlAck,
    /// Account-protocol reply. Its tag slot carries the account version;
    /// an empty body is the generic acknowledgement.
    AccountReply,
    UserLogin,
    LoginResponse,
    /// Game-world login, extended header.
    GameLogin,
    /// Player identity verification, extended header.
    PlayerIdentity,
    GameResponse,
    SessionConfirm,
    SessionConfirmResponse,
    /// Second session-confirmation variant; never answered.
    SessionConfirmAlt,
    CharacterCreate,
    CharacterList,
    CharacterDelete,
    CharacterData,
    CharacterDataResponse,
    PlayerVerify,
    PlayerVerifyResponse,
    CharacterSelect,
    CharacterSelectResponse,
}

impl FrameKind {
    pub fn from_length(len: usize) -> Option<Self> {
        LENGTH_TABLE.iter().find(|(l, _)| *l == len).map(|(_, k)| *k)
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        use FrameKind::*;
        Some(match tag {
            0x0020 | 0x1D97 => BishopLogin,
            0x4497 => ControlAck,
            0x0001 => AccountReply,
            0x42FF => UserLogin,
            0xA8FF => LoginResponse,
            0x003E => GameLogin,
            0xE0FF => PlayerIdentity,
            0x00FE => GameResponse,
            0x14FF => SessionConfirm,
            0x15FF => SessionConfirmResponse,
            0x9DFF => SessionConfirmAlt,
            0xDDFF => CharacterCreate,
            0xDCFF => CharacterList,
            0xDEFF => CharacterDelete,
            0xDBFF => CharacterData,
            0xCA90 => CharacterDataResponse,
            0x26FF => PlayerVerify,
            0x9764 => PlayerVerifyResponse,
            0x50FF => CharacterSelect,
            0x9776 => CharacterSelectResponse,
            _ => return None,
        })
    }

    /// Tag written when building a frame of this kind.
    pub fn tag(self) -> u16 {
        use FrameKind::*;
        match self {
            ControlHandshake | BishopLogin => 0x0020,
            ControlAck => 0x4497,
            AccountReply => ACCOUNT_VERSION,
            UserLogin => 0x42FF,
            LoginResponse => 0xA8FF,
            GameLogin => 0x003E,
            PlayerIdentity => 0xE0FF,
            GameResponse => 0x00FE,
            SessionConfirm => 0x14FF,
            SessionConfirmResponse => 0x15FF,
            SessionConfirmAlt => 0x9DFF,
            CharacterCreate => 0xDDFF,
            CharacterList => 0xDCFF,
            CharacterDelete => 0xDEFF,
            CharacterData => 0xDBFF,
            CharacterDataResponse => 0xCA90,
            PlayerVerify => 0x26FF,
            PlayerVerifyResponse => 0x9764,
            CharacterSelect => 0x50FF,
            CharacterSelectResponse => 0x9776,
        }
    }

    /// Whether the header carries a `u32` correlation key.
    pub fn is_extended(self) -> bool {
        matches!(self, FrameKind::GameLogin | FrameKind::PlayerIdentity | FrameKind::GameResponse)
    }

    pub fn is_length_keyed(self) -> bool {
        LENGTH_TABLE.iter().any(|(_, k)| *k == self)
    }
}

/// One decoded wire frame. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub declared_length: u16,
    pub type_tag: u16,
    pub correlation_key: Option<u32>,
    /// Bytes after the header; the full wire image for length-keyed kinds.
    pub body: Bytes,
}

impl Frame {
    /// Builds a basic-header frame of `kind`.
    pub fn tagged(kind: FrameKind, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            kind,
            declared_length: (HEADER_LEN + body.len()) as u16,
            type_tag: kind.tag(),
            correlation_key: None,
            body,
        }
    }

    /// Builds an extended-header frame carrying `key`.
    pub fn extended(kind: FrameKind, key: u32, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            kind,
            declared_length: (EXTENDED_HEADER_LEN + body.len()) as u16,
            type_tag: kind.tag(),
            correlation_key: Some(key),
            body,
        }
    }

    /// Total bytes on the wire.
    pub fn wire_len(&self) -> usize {
        if self.kind.is_length_keyed() {
            self.body.len()
        } else if self.correlation_key.is_some() {
            EXTENDED_HEADER_LEN + self.body.len()
        } else {
            HEADER_LEN + self.body.len()
        }
    }
}

/// Decodes one raw chunk into a [`Frame`].
pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() < HEADER_LEN {
        return Err(FrameError::TooShort { len: raw.len(), need: HEADER_LEN });
    }
    let declared = u16::from_le_bytes([raw[0], raw[1]]);
    let tag = u16::from_le_bytes([raw[2], raw[3]]);

    if let Some(kind) = FrameKind::from_length(raw.len()) {
        return Ok(Frame {
            kind,
            declared_length: raw.len() as u16,
            type_tag: tag,
            correlation_key: None,
            body: Bytes::copy_from_slice(raw),
        });
    }

    if declared as usize != raw.len() {
        return Err(FrameError::LengthMismatch { declared, actual: raw.len() });
    }
    let kind = FrameKind::from_tag(tag).ok_or(FrameError::UnknownType(tag))?;

    if kind.is_extended() {
        if raw.len() < EXTENDED_HEADER_LEN {
            return Err(FrameError::TooShort { len: raw.len(), need: EXTENDED_HEADER_LEN });
        }
        let key = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        return Ok(Frame {
            kind,
            declared_length: declared,
            type_tag: tag,
            correlation_key: Some(key),
            body: Bytes::copy_from_slice(&raw[EXTENDED_HEADER_LEN..]),
        });
    }

    Ok(Frame {
        kind,
        declared_length: declared,
        type_tag: tag,
        correlation_key: None,
        body: Bytes::copy_from_slice(&raw[HEADER_LEN..]),
    })
}

/// Splits one transport read into frame-sized slices, in arrival order.
///
/// A chunk matching [`LENGTH_TABLE`] is one frame. Otherwise each declared
/// length that fits inside the remaining bytes marks a frame boundary; a
/// header that does not fit swallows the rest so [`decode`] can reject it.
pub fn split_frames(chunk: &[u8]) -> Vec<&[u8]> {
    if FrameKind::from_length(chunk.len()).is_some() {
        return vec![chunk];
    }
    let mut out = Vec::new();
    let mut rest = chunk;
    while !rest.is_empty() {
        let mut take = rest.len();
        if rest.len() >= HEADER_LEN {
            let declared = u16::from_le_bytes([rest[0], rest[1]]) as usize;
            if (HEADER_LEN..rest.len()).contains(&declared) {
                take = declared;
            }
        }
        let (head, tail) = rest.split_at(take);
        out.push(head);
        rest = tail;
    }
    out
}

/// Encodes a [`Frame`] into its wire image.
pub fn encode(frame: &Frame) -> Bytes {
    if frame.kind.is_length_keyed() {
        return frame.body.clone();
    }
    let mut buf = BytesMut::with_capacity(frame.wire_len());
    buf.put_u16_le(frame.declared_length);
    buf.put_u16_le(frame.type_tag);
    if let Some(key) = frame.correlation_key {
        buf.put_u32_le(key);
    }
    buf.put_slice(&frame.body);
    buf.freeze()
}

// ── canned replies ──────────────────────────────────────────────────────────

/// Login result codes carried in the first plaintext byte of a login reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginResult {
    Success = 0,
    StoreError = 2,
    InvalidCredentials = 3,
    Locked = 4,
}

/// Character operation result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharacterResult {
    Success = 1,
    Failed = 2,
    AccountOrPassword = 3,
    NameInvalid = 9,
    Exists = 0x0A,
    Limit = 0x0B,
}

/// 34-byte greeting written on accept, before any read.
pub fn greeting() -> Frame {
    let mut body = BytesMut::with_capacity(30);
    body.put_bytes(0, 6);
    body.put_slice(&GREETING_NONCE);
    body.put_bytes(0, 16);
    Frame::tagged(FrameKind::BishopLogin, body.freeze())
}

/// 53-byte reply to the control handshake.
pub fn control_ack() -> Frame {
    Frame::tagged(FrameKind::ControlAck, Bytes::from_static(&CONTROL_ACK_BODY))
}

/// Generic 4-byte acknowledgement `04 00 01 00`.
pub fn ack() -> Frame {
    Frame::tagged(FrameKind::AccountReply, Bytes::new())
}

pub fn session_confirm_response() -> Frame {
    Frame::tagged(FrameKind::SessionConfirmResponse, Bytes::from_static(&[0, 0]))
}

/// Extended-header game reply echoing the request's correlation key.
pub fn game_response(key: u32, result: u8) -> Frame {
    Frame::extended(FrameKind::GameResponse, key, vec![result, 0])
}

/// Encrypted login reply: `result | message | NUL`, zero-padded to 64 bytes.
pub fn login_response(result: LoginResult, message: &str, key: &CipherKey) -> Frame {
    encrypted_reply(result, message, key, LOGIN_REPLY_BODY_LEN)
}

/// Encrypted player identity reply, 169 bytes on the wire.
pub fn identity_response(result: LoginResult, message: &str, key: &CipherKey) -> Frame {
    encrypted_reply(result, message, key, IDENTITY_REPLY_BODY_LEN)
}

fn encrypted_reply(result: LoginResult, message: &str, key: &CipherKey, min_len: usize) -> Frame {
    let mut plain = Vec::with_capacity(min_len.max(message.len() + 2));
    plain.push(result as u8);
    plain.extend_from_slice(message.as_bytes());
    plain.push(0);
    if plain.len() < min_len {
        plain.resize(min_len, 0);
    }
    Frame::tagged(FrameKind::LoginResponse, transform(&plain, key))
}

pub fn player_verify_response() -> Frame {
    Frame::tagged(FrameKind::PlayerVerifyResponse, Bytes::from_static(&VERIFY_REPLY_BODY))
}

pub fn character_select_response() -> Frame {
    Frame::tagged(FrameKind::CharacterSelectResponse, Bytes::from_static(&VERIFY_REPLY_BODY))
}

pub fn character_data_response() -> Frame {
    Frame::tagged(FrameKind::CharacterDataResponse, Bytes::from_static(&CHARACTER_DATA_BODY))
}

fn put_account_subheader(buf: &mut BytesMut, op: FrameKind) {
    buf.put_u16_le(op.tag());
    buf.put_u32_le(0);
}

/// Reply to a character create/delete/list request that carries only a result.
pub fn character_reply(op: FrameKind, result: CharacterResult, message: &str) -> Frame {
    let mut body = BytesMut::with_capacity(ACCOUNT_HEADER_LEN - HEADER_LEN + 1 + message.len());
    put_account_subheader(&mut body, op);
    body.put_u8(result as u8);
    body.put_slice(message.as_bytes());
    Frame::tagged(FrameKind::AccountReply, body.freeze())
}

/// Character list reply: count plus a fixed array of eight records.
pub fn character_list_reply(records: &[CharacterRecord]) -> Frame {
    let shown = &records[..records.len().min(MAX_CHARACTERS)];
    let mut body = BytesMut::with_capacity(
        ACCOUNT_HEADER_LEN - HEADER_LEN + 1 + MAX_CHARACTERS * CHARACTER_RECORD_LEN,
    );
    put_account_subheader(&mut body, FrameKind::CharacterList);
    body.put_u8(shown.len() as u8);
    for i in 0..MAX_CHARACTERS {
        match shown.get(i) {
            Some(rec) => put_character_record(&mut body, rec),
            None => body.put_bytes(0, CHARACTER_RECORD_LEN),
        }
    }
    Frame::tagged(FrameKind::AccountReply, body.freeze())
}

fn put_character_record(buf: &mut BytesMut, rec: &CharacterRecord) {
    let mut name = [0u8; 32];
    let n = rec.name.len().min(32);
    name[..n].copy_from_slice(&rec.name.as_bytes()[..n]);
    buf.put_slice(&name);
    buf.put_u16_le(rec.level);
    buf.put_u8(rec.class);
    buf.put_u8(rec.gender);
    buf.put_u16_le(rec.map_id);
    buf.put_u16_le(rec.x);
    buf.put_u16_le(rec.y);
    buf.put_bytes(0, 16);
}

// ── character request payloads (decrypted) ──────────────────────────────────

/// Decrypted character-create payload: `username[32] | name[32] | class | gender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCharacterRequest {
    pub username: String,
    pub name: String,
    pub class: u8,
    pub gender: u8,
}

impl CreateCharacterRequest {
    pub fn parse(plain: &[u8]) -> Option<Self> {
        if plain.len() < 66 {
            return None;
        }
        Some(Self {
            username: fixed_str(&plain[..32]),
            name: fixed_str(&plain[32..64]),
            class: plain[64],
            gender: plain[65],
        })
    }
}

/// Reads a NUL-padded field up to its first NUL. Bytes are kept as sent
/// (invalid UTF-8 becomes U+FFFD) so name validation sees the real value.
pub fn fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

pub fn is_valid_character_name(name: &str) -> bool {
    (2..=32).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_bytes() {
        let raw = encode(&greeting());
        assert_eq!(raw.len(), 34);
        assert_eq!(&raw[..4], &[0x22, 0x00, 0x20, 0x00]);
        assert_eq!(&raw[10..18], &GREETING_NONCE);
        assert!(raw[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_control_ack_length() {
        let raw = encode(&control_ack());
        assert_eq!(raw.len(), 53);
        assert_eq!(&raw[..4], &[0x35, 0x00, 0x97, 0x44]);
        assert_eq!(raw[52], 0xDB);
    }

    #[test]
    fn test_ack_bytes() {
        assert_eq!(&encode(&ack())[..], &[0x04, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_session_confirm_response_bytes() {
        assert_eq!(&encode(&session_confirm_response())[..], &[0x06, 0x00, 0xFF, 0x15, 0x00, 0x00]);
    }

    #[test]
    fn test_game_response_echoes_key() {
        let raw = encode(&game_response(0xDEADBEEF, 0));
        assert_eq!(raw.len(), 10);
        assert_eq!(&raw[..4], &[0x0A, 0x00, 0xFE, 0x00]);
        assert_eq!(&raw[4..8], &0xDEADBEEFu32.to_le_bytes());
        assert_eq!(&raw[8..], &[0, 0]);
    }

    #[test]
    fn test_login_response_decrypts() {
        let key = [7u8; 16];
        let raw = encode(&login_response(LoginResult::Locked, "locked", &key));
        assert_eq!(raw.len(), 4 + LOGIN_REPLY_BODY_LEN);
        assert_eq!(&raw[2..4], &[0xFF, 0xA8]);
        let plain = transform(&raw[4..], &key);
        assert_eq!(plain[0], 4);
        assert_eq!(&plain[1..7], b"locked");
        assert_eq!(plain[7], 0);
    }

    #[test]
    fn test_long_login_message_not_truncated() {
        let key = [1u8; 16];
        let msg = "x".repeat(100);
        let f = login_response(LoginResult::Success, &msg, &key);
        assert_eq!(f.body.len(), 102);
        assert_eq!(f.declared_length as usize, f.wire_len());
    }

    #[test]
    fn test_identity_response_length() {
        let key = [0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEA, 0x49, 0xC8,
                   0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8];
        let raw = encode(&identity_response(LoginResult::Success, "", &key));
        assert_eq!(raw.len(), 169);
        assert_eq!(&raw[..2], &169u16.to_le_bytes());
        // zero plaintext after the result byte leaks the key verbatim
        assert_eq!(&raw[4 + 16..4 + 32], &key);
    }

    #[test]
    fn test_seven_byte_replies() {
        assert_eq!(&encode(&player_verify_response())[..], &[0x07, 0x00, 0x64, 0x97, 0xA0, 0x23, 0x7D]);
        assert_eq!(&encode(&character_select_response())[..], &[0x07, 0x00, 0x76, 0x97, 0xA0, 0x23, 0x7D]);
        assert_eq!(encode(&character_data_response()).len(), 57);
    }

    #[test]
    fn test_character_reply_layout() {
        let raw = encode(&character_reply(FrameKind::CharacterCreate, CharacterResult::Exists, "taken"));
        assert_eq!(raw.len(), ACCOUNT_HEADER_LEN + 1 + 5);
        assert_eq!(&raw[..2], &(raw.len() as u16).to_le_bytes());
        assert_eq!(&raw[2..4], &ACCOUNT_VERSION.to_le_bytes());
        assert_eq!(&raw[4..6], &0xDDFFu16.to_le_bytes());
        assert_eq!(raw[10], 0x0A);
        assert_eq!(&raw[11..], b"taken");
    }

    #[test]
    fn test_character_list_reply_layout() {
        let rec = CharacterRecord {
            name: "Hero".into(), level: 12, class: 3, gender: 1, map_id: 2, x: 100, y: 101,
        };
        let raw = encode(&character_list_reply(&[rec]));
        assert_eq!(raw.len(), ACCOUNT_HEADER_LEN + 1 + MAX_CHARACTERS * CHARACTER_RECORD_LEN);
        assert_eq!(raw[10], 1);
        assert_eq!(&raw[11..15], b"Hero");
        assert_eq!(&raw[43..45], &12u16.to_le_bytes());
        assert_eq!(raw[45], 3);
        assert_eq!(raw[46], 1);
        assert!(raw[11 + CHARACTER_RECORD_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(decode(&[0x04, 0x00, 0x01]), Err(FrameError::TooShort { len: 3, need: 4 }));
    }

    #[test]
    fn test_decode_length_mismatch() {
        assert_eq!(
            decode(&[0x09, 0x00, 0xFF, 0x42, 0x00]),
            Err(FrameError::LengthMismatch { declared: 9, actual: 5 })
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(decode(&[0x05, 0x00, 0x34, 0x12, 0x00]), Err(FrameError::UnknownType(0x1234)));
    }

    #[test]
    fn test_decode_extended_too_short() {
        assert_eq!(
            decode(&[0x06, 0x00, 0x3E, 0x00, 0x01, 0x02]),
            Err(FrameError::TooShort { len: 6, need: 8 })
        );
    }

    #[test]
    fn test_control_frame_wins_over_tag() {
        // 127 bytes whose header would otherwise read as a user login
        let mut raw = vec![0u8; 127];
        raw[..4].copy_from_slice(&[0xE5, 0x00, 0xFF, 0x42]);
        let f = decode(&raw).unwrap();
        assert_eq!(f.kind, FrameKind::ControlHandshake);
        assert_eq!(f.declared_length, 127);
        assert_eq!(&encode(&f)[..], &raw[..]);
    }

    #[test]
    fn test_decode_extended_header() {
        let mut raw = vec![0u8; 227];
        raw[..2].copy_from_slice(&227u16.to_le_bytes());
        raw[2..4].copy_from_slice(&0x003Eu16.to_le_bytes());
        raw[4..8].copy_from_slice(&0x01020304u32.to_le_bytes());
        let f = decode(&raw).unwrap();
        assert_eq!(f.kind, FrameKind::GameLogin);
        assert_eq!(f.correlation_key, Some(0x01020304));
        assert_eq!(f.body.len(), 219);
    }

    #[test]
    fn test_alternate_bishop_tag_round_trips() {
        let raw = [0x08, 0x00, 0x97, 0x1D, 1, 2, 3, 4];
        let f = decode(&raw).unwrap();
        assert_eq!(f.kind, FrameKind::BishopLogin);
        assert_eq!(&encode(&f)[..], &raw);
    }

    #[test]
    fn test_round_trip_every_kind() {
        use FrameKind::*;
        let key = [0x11u8; 16];
        let mut control = vec![0x5Au8; CONTROL_FRAME_LEN];
        control[0] = 0x7F;
        let frames = vec![
            decode(&control).unwrap(),
            greeting(),
            control_ack(),
            ack(),
            Frame::tagged(UserLogin, vec![0xAB; 225]),
            login_response(LoginResult::Success, "ok", &key),
            Frame::extended(GameLogin, 42, vec![1u8; 219]),
            Frame::extended(PlayerIdentity, 7, vec![2u8; 221]),
            game_response(9, 1),
            Frame::tagged(SessionConfirm, vec![3u8; 43]),
            session_confirm_response(),
            Frame::tagged(SessionConfirmAlt, vec![4u8; 12]),
            Frame::tagged(CharacterCreate, vec![5u8; 66]),
            Frame::tagged(CharacterList, vec![6u8; 32]),
            Frame::tagged(CharacterDelete, vec![7u8; 32]),
            Frame::tagged(CharacterData, vec![8u8; 20]),
            character_data_response(),
            Frame::tagged(PlayerVerify, vec![9u8; 5]),
            player_verify_response(),
            Frame::tagged(CharacterSelect, vec![10u8; 9]),
            character_select_response(),
            character_reply(CharacterDelete, CharacterResult::Success, "gone"),
            character_list_reply(&[]),
        ];
        for f in frames {
            let raw = encode(&f);
            assert_eq!(raw.len(), f.wire_len(), "{:?}", f.kind);
            assert_eq!(decode(&raw).unwrap(), f, "{:?}", f.kind);
        }
    }

    #[test]
    fn test_split_coalesced_frames() {
        let mut chunk = encode(&ack()).to_vec();
        chunk.extend_from_slice(&encode(&session_confirm_response()));
        chunk.extend_from_slice(&[0x09, 0x00, 0xFF]);
        let parts = split_frames(&chunk);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], &[0x04, 0x00, 0x01, 0x00]);
        assert_eq!(parts[1].len(), 6);
        assert!(decode(parts[2]).is_err());
    }

    #[test]
    fn test_split_keeps_control_frame_whole() {
        let mut raw = vec![0u8; CONTROL_FRAME_LEN];
        raw[0] = 0x04;
        assert_eq!(split_frames(&raw), vec![&raw[..]]);
        assert!(split_frames(&[]).is_empty());
    }

    #[test]
    fn test_create_character_parse() {
        let mut plain = vec![0u8; 66];
        plain[..5].copy_from_slice(b"alice");
        plain[32..36].copy_from_slice(b"Hero");
        plain[64] = 2;
        plain[65] = 1;
        let req = CreateCharacterRequest::parse(&plain).unwrap();
        assert_eq!(req.username, "alice");
        assert_eq!(req.name, "Hero");
        assert_eq!((req.class, req.gender), (2, 1));
        assert!(CreateCharacterRequest::parse(&plain[..40]).is_none());
    }

    #[test]
    fn test_fixed_str_keeps_field_bytes() {
        assert_eq!(fixed_str(b"bad name\0\0junk"), "bad name");
        assert_eq!(fixed_str(b"ad\tmin"), "ad\tmin");
        assert_eq!(fixed_str(b"Hero"), "Hero");
        assert!(!is_valid_character_name(&fixed_str(b"bad name\0")));
        assert!(!is_valid_character_name(&fixed_str(b"Hero\x80\0")));
    }

    #[test]
    fn test_character_name_validation() {
        assert!(is_valid_character_name("Hero_01"));
        assert!(!is_valid_character_name("x"));
        assert!(!is_valid_character_name("bad name"));
    }
}
