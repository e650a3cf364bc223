//! Account store abstraction.
//!
//! The session controller only talks to [`AccountStore`]. [`super::db`]
//! provides the MySQL implementation; [`MemoryAccountStore`] backs tests and
//! the permissive mode used when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use super::packet::MAX_CHARACTERS;

/// Outcome of a credential check that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginCheck {
    pub ok: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRecord {
    pub name: String,
    pub level: u16,
    pub class: u8,
    pub gender: u8,
    pub map_id: u16,
    pub x: u16,
    pub y: u16,
}

impl CharacterRecord {
    /// A freshly created character at the starting position.
    pub fn new(name: &str, class: u8, gender: u8) -> Self {
        Self { name: name.to_string(), level: 1, class, gender, map_id: 1, x: 100, y: 100 }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn verify_login(&self, username: &str, password: &str) -> Result<LoginCheck, StoreError>;

    async fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError>;

    /// `ip` is the dotted-quad peer address.
    async fn update_last_login_ip(&self, username: &str, ip: &str) -> Result<(), StoreError>;

    async fn list_characters(&self, username: &str) -> Result<Vec<CharacterRecord>, StoreError>;

    async fn create_character(
        &self,
        username: &str,
        name: &str,
        class: u8,
        gender: u8,
    ) -> Result<(), StoreError>;

    async fn delete_character(&self, name: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
struct MemoryAccount {
    password: String,
    locked: bool,
    online: bool,
    last_ip: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    accounts: HashMap<String, MemoryAccount>,
    /// (owner, record)
    characters: Vec<(String, CharacterRecord)>,
}

/// Account store held entirely in memory.
///
/// In permissive mode any well-formed credentials are accepted and unknown
/// usernames are created on first login.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    inner: Mutex<MemoryInner>,
    permissive: bool,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self { inner: Mutex::default(), permissive: true }
    }

    pub async fn add_account(&self, username: &str, password: &str) {
        self.inner.lock().await.accounts.insert(
            username.to_string(),
            MemoryAccount { password: password.to_string(), ..Default::default() },
        );
    }

    pub async fn set_locked(&self, username: &str, locked: bool) {
        if let Some(acc) = self.inner.lock().await.accounts.get_mut(username) {
            acc.locked = locked;
        }
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.inner.lock().await.accounts.get(username).map(|a| a.online).unwrap_or(false)
    }

    pub async fn last_ip(&self, username: &str) -> Option<String> {
        self.inner.lock().await.accounts.get(username).and_then(|a| a.last_ip.clone())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn verify_login(&self, username: &str, password: &str) -> Result<LoginCheck, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.accounts.get(username) {
            Some(acc) if acc.locked => Ok(LoginCheck { ok: false, locked: true }),
            Some(acc) => Ok(LoginCheck {
                ok: self.permissive || super::db::password_matches(&acc.password, password),
                locked: false,
            }),
            None if self.permissive => {
                inner.accounts.insert(
                    username.to_string(),
                    MemoryAccount { password: password.to_string(), ..Default::default() },
                );
                Ok(LoginCheck { ok: true, locked: false })
            }
            None => Ok(LoginCheck { ok: false, locked: false }),
        }
    }

    async fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError> {
        if let Some(acc) = self.inner.lock().await.accounts.get_mut(username) {
            acc.online = online;
        }
        Ok(())
    }

    async fn update_last_login_ip(&self, username: &str, ip: &str) -> Result<(), StoreError> {
        if let Some(acc) = self.inner.lock().await.accounts.get_mut(username) {
            acc.last_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn list_characters(&self, username: &str) -> Result<Vec<CharacterRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .characters
            .iter()
            .filter(|(owner, _)| owner == username)
            .map(|(_, rec)| rec.clone())
            .collect())
    }

    async fn create_character(
        &self,
        username: &str,
        name: &str,
        class: u8,
        gender: u8,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.characters.iter().any(|(_, rec)| rec.name == name) {
            return Err(StoreError::CharacterExists);
        }
        let owned = inner.characters.iter().filter(|(owner, _)| owner == username).count();
        if owned >= MAX_CHARACTERS {
            return Err(StoreError::CharacterLimit);
        }
        inner
            .characters
            .push((username.to_string(), CharacterRecord::new(name, class, gender)));
        Ok(())
    }

    async fn delete_character(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.characters.len();
        inner.characters.retain(|(_, rec)| rec.name != name);
        if inner.characters.len() == before {
            return Err(StoreError::CharacterNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_login_plain_and_md5() {
        let store = MemoryAccountStore::new();
        store.add_account("admin", "1").await;
        assert!(store.verify_login("admin", "1").await.unwrap().ok);
        // md5("1")
        assert!(store.verify_login("admin", "C4CA4238A0B923820DCC509A6F75849B").await.unwrap().ok);
        assert!(!store.verify_login("admin", "2").await.unwrap().ok);
        assert!(!store.verify_login("nobody", "1").await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_locked_account() {
        let store = MemoryAccountStore::new();
        store.add_account("bob", "pw").await;
        store.set_locked("bob", true).await;
        let check = store.verify_login("bob", "pw").await.unwrap();
        assert_eq!(check, LoginCheck { ok: false, locked: true });
    }

    #[tokio::test]
    async fn test_permissive_creates_account() {
        let store = MemoryAccountStore::permissive();
        assert!(store.verify_login("newuser", "anything").await.unwrap().ok);
        store.set_online("newuser", true).await.unwrap();
        assert!(store.is_online("newuser").await);
    }

    #[tokio::test]
    async fn test_character_lifecycle() {
        let store = MemoryAccountStore::new();
        store.create_character("alice", "Hero", 2, 1).await.unwrap();
        assert!(matches!(
            store.create_character("bob", "Hero", 0, 0).await,
            Err(StoreError::CharacterExists)
        ));
        let list = store.list_characters("alice").await.unwrap();
        assert_eq!(list, vec![CharacterRecord::new("Hero", 2, 1)]);
        assert_eq!(list[0].level, 1);
        store.delete_character("Hero").await.unwrap();
        assert!(matches!(store.delete_character("Hero").await, Err(StoreError::CharacterNotFound)));
    }

    #[tokio::test]
    async fn test_character_limit() {
        let store = MemoryAccountStore::new();
        for i in 0..MAX_CHARACTERS {
            store.create_character("alice", &format!("Hero{}", i), 0, 0).await.unwrap();
        }
        assert!(matches!(
            store.create_character("alice", "OneTooMany", 0, 0).await,
            Err(StoreError::CharacterLimit)
        ));
    }
}
