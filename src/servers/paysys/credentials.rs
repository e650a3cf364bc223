//! Username/password extraction from decrypted login payloads.
//!
//! Clients disagree on layout, so several extraction methods are tried in
//! order and the first one yielding a plausible username wins.

use std::net::Ipv4Addr;

const USERNAME_OFFSET: usize = 9;
const PASSWORD_OFFSET: usize = 41;
const FIELD_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 64;
const CLIENT_ADDRESS_OFFSET: usize = 105;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    NulDelimited,
    EmbeddedStrings,
    FixedOffset,
    FirstToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub method: ExtractionMethod,
}

pub fn is_valid_username(s: &str) -> bool {
    (3..=16).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_plausible_password(s: &str) -> bool {
    s.len() <= MAX_PASSWORD_LEN && s.chars().all(|c| c.is_ascii_graphic())
}

fn printable(seg: &[u8]) -> Option<&str> {
    if seg.iter().all(|b| (32..=126).contains(b)) {
        std::str::from_utf8(seg).ok()
    } else {
        None
    }
}

/// Pairs the first valid username in `fields` with the field after it.
fn pick<'a>(mut fields: impl Iterator<Item = &'a str>, method: ExtractionMethod) -> Option<Credentials> {
    let username = fields.by_ref().find(|f| is_valid_username(f))?;
    let password = fields.next().filter(|p| is_plausible_password(p)).unwrap_or("");
    Some(Credentials { username: username.to_string(), password: password.to_string(), method })
}

fn nul_delimited(plain: &[u8]) -> Option<Credentials> {
    let fields = plain.split(|&b| b == 0).filter(|s| !s.is_empty()).filter_map(printable);
    pick(fields, ExtractionMethod::NulDelimited)
}

fn embedded_strings(plain: &[u8]) -> Option<Credentials> {
    let fields = plain
        .split(|b| !(32..=126).contains(b))
        .filter(|s| s.len() >= 3)
        .filter_map(printable)
        .map(str::trim);
    pick(fields, ExtractionMethod::EmbeddedStrings)
}

/// NUL-terminated field with non-graphic bytes dropped. Only the fixed
/// offset method reads fields this loosely.
fn graphic_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    field[..end].iter().filter(|b| b.is_ascii_graphic()).map(|&b| b as char).collect()
}

fn fixed_offset(plain: &[u8]) -> Option<Credentials> {
    if plain.len() < PASSWORD_OFFSET + FIELD_LEN {
        return None;
    }
    let username = graphic_str(&plain[USERNAME_OFFSET..USERNAME_OFFSET + FIELD_LEN]);
    if !is_valid_username(&username) {
        return None;
    }
    let password = graphic_str(&plain[PASSWORD_OFFSET..PASSWORD_OFFSET + FIELD_LEN]);
    Some(Credentials { username, password, method: ExtractionMethod::FixedOffset })
}

fn first_token(plain: &[u8]) -> Option<Credentials> {
    let mut tokens = plain
        .split(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
        .filter(|s| s.len() >= 3)
        .filter_map(|s| std::str::from_utf8(s).ok());
    let first = tokens.next()?;
    let username = &first[..first.len().min(16)];
    let password = tokens.next().unwrap_or("");
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
        method: ExtractionMethod::FirstToken,
    })
}

/// Extracts credentials from a decrypted login payload.
pub fn extract(plain: &[u8]) -> Option<Credentials> {
    nul_delimited(plain)
        .or_else(|| embedded_strings(plain))
        .or_else(|| fixed_offset(plain))
        .or_else(|| first_token(plain))
}

/// Client address the game embeds in the login body, if present.
pub fn client_address(plain: &[u8]) -> Option<Ipv4Addr> {
    let raw: [u8; 4] = plain.get(CLIENT_ADDRESS_OFFSET..CLIENT_ADDRESS_OFFSET + 4)?.try_into().ok()?;
    let ip = Ipv4Addr::from(raw);
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_layout(user: &[u8], pass: &[u8]) -> Vec<u8> {
        let mut p = vec![0u8; 225];
        p[..9].copy_from_slice(&[0x00, 0x0A, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00]);
        p[9..9 + user.len()].copy_from_slice(user);
        p[41..41 + pass.len()].copy_from_slice(pass);
        p[105..109].copy_from_slice(&[0xC0, 0xA8, 0x31, 0x01]);
        p
    }

    #[test]
    fn test_standard_layout_nul_delimited() {
        let p = login_layout(b"admin", b"C4CA4238A0B923820DCC509A6F75849B");
        let c = extract(&p).unwrap();
        assert_eq!(c.username, "admin");
        assert_eq!(c.password, "C4CA4238A0B923820DCC509A6F75849B");
        assert_eq!(c.method, ExtractionMethod::NulDelimited);
    }

    #[test]
    fn test_embedded_strings_without_nuls() {
        let mut p = vec![0x01u8; 80];
        p[10..17].copy_from_slice(b"player1");
        p[30..38].copy_from_slice(b"secret99");
        let c = extract(&p).unwrap();
        assert_eq!(c.method, ExtractionMethod::EmbeddedStrings);
        assert_eq!((c.username.as_str(), c.password.as_str()), ("player1", "secret99"));
    }

    #[test]
    fn test_fixed_offset_when_fields_are_dirty() {
        // characters interleaved with high bytes: no clean run for either split method
        let mut p = vec![0x80u8; 225];
        p[9..18].copy_from_slice(b"c\x80a\x80r\x80o\x80l");
        p[18] = 0;
        p[41..44].copy_from_slice(b"p\x80w");
        p[44] = 0;
        let c = extract(&p).unwrap();
        assert_eq!(c.method, ExtractionMethod::FixedOffset);
        assert_eq!(c.username, "carol");
        assert_eq!(c.password, "pw");
    }

    #[test]
    fn test_first_token_fallback() {
        let p = b"\x80\x81averyveryverylongusername\x82\x83abc-".to_vec();
        let c = extract(&p).unwrap();
        assert_eq!(c.method, ExtractionMethod::FirstToken);
        assert_eq!(c.username, "averyveryverylon");
        assert_eq!(c.password, "abc");
    }

    #[test]
    fn test_nothing_plausible() {
        assert!(extract(&[0x80, 0x00, 0x91, 0x00]).is_none());
    }

    #[test]
    fn test_client_address() {
        let p = login_layout(b"admin", b"1");
        assert_eq!(client_address(&p), Some(Ipv4Addr::new(192, 168, 49, 1)));
        assert_eq!(client_address(&p[..100]), None);
        assert_eq!(client_address(&[0u8; 225]), None);
    }

    #[test]
    fn test_username_rules() {
        assert!(is_valid_username("abc"));
        assert!(is_valid_username("user_16_chars_ok"));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("user_17_chars_bad"));
        assert!(!is_valid_username("bad-name"));
    }
}
