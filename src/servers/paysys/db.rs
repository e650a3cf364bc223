use async_trait::async_trait;
use md5::{Digest, Md5};
use sqlx::MySqlPool;

use crate::error::StoreError;
use super::packet::MAX_CHARACTERS;
use super::store::{AccountStore, CharacterRecord, LoginCheck};

/// Returns the lowercase MD5 hex digest of `input`.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::new().chain_update(input.as_bytes()).finalize())
}

/// Clients send either the raw password or its MD5 hex digest, in either case.
pub fn password_matches(stored: &str, supplied: &str) -> bool {
    stored == supplied
        || md5_hex(stored).eq_ignore_ascii_case(supplied)
        || (stored.len() == 32 && stored.eq_ignore_ascii_case(supplied))
}

/// MySQL-backed [`AccountStore`].
pub struct MySqlAccountStore {
    pool: MySqlPool,
}

impl MySqlAccountStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Fault(e.to_string()))
    }
}

#[async_trait]
impl AccountStore for MySqlAccountStore {
    async fn verify_login(&self, username: &str, password: &str) -> Result<LoginCheck, StoreError> {
        let row: Option<(String, i8, i8)> = sqlx::query_as(
            "SELECT `password`, `active`, `locked` FROM `account` WHERE `username` = ?"
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some((stored, active, locked)) = row else {
            return Ok(LoginCheck { ok: false, locked: false });
        };
        if locked != 0 {
            return Ok(LoginCheck { ok: false, locked: true });
        }
        Ok(LoginCheck { ok: active != 0 && password_matches(&stored, password), locked: false })
    }

    async fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE `account` SET `online` = ? WHERE `username` = ?")
            .bind(online as i8)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_last_login_ip(&self, username: &str, ip: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE `account` SET `last_login_ip` = ? WHERE `username` = ?")
            .bind(ip)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_characters(&self, username: &str) -> Result<Vec<CharacterRecord>, StoreError> {
        let rows: Vec<(String, u16, u8, u8, u16, u16, u16)> = sqlx::query_as(
            "SELECT `name`, `level`, `class`, `gender`, `map_id`, `x`, `y`
             FROM `characters` WHERE `username` = ? ORDER BY `created` LIMIT ?"
        )
        .bind(username)
        .bind(MAX_CHARACTERS as u32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, level, class, gender, map_id, x, y)| CharacterRecord {
                name, level, class, gender, map_id, x, y,
            })
            .collect())
    }

    async fn create_character(
        &self,
        username: &str,
        name: &str,
        class: u8,
        gender: u8,
    ) -> Result<(), StoreError> {
        let exists: Option<(i64,)> = sqlx::query_as(
            "SELECT COUNT(*) FROM `characters` WHERE `name` = ?"
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        if exists.map(|(n,)| n > 0).unwrap_or(false) {
            return Err(StoreError::CharacterExists);
        }

        let owned: Option<(i64,)> = sqlx::query_as(
            "SELECT COUNT(*) FROM `characters` WHERE `username` = ?"
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        if owned.map(|(n,)| n as usize >= MAX_CHARACTERS).unwrap_or(false) {
            return Err(StoreError::CharacterLimit);
        }

        let rec = CharacterRecord::new(name, class, gender);
        sqlx::query(
            "INSERT INTO `characters` (`name`, `username`, `level`, `class`, `gender`, `map_id`, `x`, `y`, `created`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NOW())"
        )
        .bind(&rec.name)
        .bind(username)
        .bind(rec.level)
        .bind(rec.class)
        .bind(rec.gender)
        .bind(rec.map_id)
        .bind(rec.x)
        .bind(rec.y)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_character(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM `characters` WHERE `name` = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CharacterNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Queries need a live DATABASE_URL; only the pure helpers are covered here.
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex("1"), "c4ca4238a0b923820dcc509a6f75849b");
    }

    #[test]
    fn test_password_matches() {
        assert!(password_matches("hello", "hello"));
        assert!(password_matches("hello", "5D41402ABC4B2A76B9719D911017C592"));
        assert!(password_matches("5d41402abc4b2a76b9719d911017c592", "5D41402ABC4B2A76B9719D911017C592"));
        assert!(!password_matches("hello", "world"));
    }
}
