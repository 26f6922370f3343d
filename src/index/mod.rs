//! Metadata index — SQLite-based listing, search and dedup.
//!
//! Stores only non-sensitive data in `<data_dir>/index.db`: artifact id,
//! owner id, creation time, the keyed content fingerprint and keyed
//! search tokens.  Prompt text never reaches the database; a keyword is
//! searched by computing the same keyed token from it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rusqlite::{params, Connection};
use sha2::Sha256;

use crate::crypto::VaultMasterKey;
use crate::errors::{ArtVaultError, Result};
use crate::vault::artifact::ArtifactId;
use crate::vault::user::UserId;

/// Shortest word that becomes a search token.
const MIN_WORD_LEN: usize = 2;

/// A single index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub owner_id: UserId,
    pub artifact_id: ArtifactId,
    pub created_at: DateTime<Utc>,
    /// Base64 keyed fingerprint of the plaintext payload.
    pub fingerprint: String,
}

/// SQLite-backed metadata index.
pub struct MetadataIndex {
    conn: Mutex<Connection>,
}

impl MetadataIndex {
    /// Open (or create) the index database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(index_err("open"))?;

        // Owner-only access, like every other file in the data dir.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                owner_id    TEXT NOT NULL,
                artifact_id TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                PRIMARY KEY (owner_id, artifact_id)
            );
            CREATE TABLE IF NOT EXISTS search_tokens (
                owner_id    TEXT NOT NULL,
                artifact_id TEXT NOT NULL,
                token       TEXT NOT NULL,
                PRIMARY KEY (owner_id, artifact_id, token)
            );
            CREATE INDEX IF NOT EXISTS idx_tokens ON search_tokens (owner_id, token);
            CREATE INDEX IF NOT EXISTS idx_fingerprint ON artifacts (owner_id, fingerprint);",
        )
        .map_err(index_err("create schema"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ArtVaultError::IndexError("connection lock poisoned".into()))
    }

    /// Insert or replace an entry together with its search tokens.
    pub fn upsert(&self, entry: &IndexEntry, tokens: &[String]) -> Result<()> {
        let owner = entry.owner_id.to_string();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(index_err("begin"))?;

        tx.execute(
            "INSERT OR REPLACE INTO artifacts (owner_id, artifact_id, created_at, fingerprint)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                owner,
                entry.artifact_id.as_str(),
                entry.created_at.to_rfc3339(),
                entry.fingerprint
            ],
        )
        .map_err(index_err("insert artifact"))?;

        tx.execute(
            "DELETE FROM search_tokens WHERE owner_id = ?1 AND artifact_id = ?2",
            params![owner, entry.artifact_id.as_str()],
        )
        .map_err(index_err("clear tokens"))?;

        for token in tokens {
            tx.execute(
                "INSERT OR IGNORE INTO search_tokens (owner_id, artifact_id, token)
                 VALUES (?1, ?2, ?3)",
                params![owner, entry.artifact_id.as_str(), token],
            )
            .map_err(index_err("insert token"))?;
        }

        tx.commit().map_err(index_err("commit"))
    }

    /// Drop an entry and its tokens.  Missing entries are not an error.
    pub fn remove(&self, owner: UserId, artifact_id: &ArtifactId) -> Result<()> {
        let owner = owner.to_string();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(index_err("begin"))?;
        tx.execute(
            "DELETE FROM search_tokens WHERE owner_id = ?1 AND artifact_id = ?2",
            params![owner, artifact_id.as_str()],
        )
        .map_err(index_err("delete tokens"))?;
        tx.execute(
            "DELETE FROM artifacts WHERE owner_id = ?1 AND artifact_id = ?2",
            params![owner, artifact_id.as_str()],
        )
        .map_err(index_err("delete artifact"))?;
        tx.commit().map_err(index_err("commit"))
    }

    /// Every entry of `owner`, oldest first.
    pub fn list(&self, owner: UserId) -> Result<Vec<IndexEntry>> {
        self.select(
            owner,
            "SELECT artifact_id, created_at, fingerprint FROM artifacts
             WHERE owner_id = ?1 ORDER BY created_at, artifact_id",
            None,
        )
    }

    /// Entries whose payload has the given keyed fingerprint.
    pub fn find_by_fingerprint(&self, owner: UserId, fingerprint: &str) -> Result<Vec<IndexEntry>> {
        self.select(
            owner,
            "SELECT artifact_id, created_at, fingerprint FROM artifacts
             WHERE owner_id = ?1 AND fingerprint = ?2 ORDER BY created_at, artifact_id",
            Some(fingerprint),
        )
    }

    /// Entries carrying every one of `tokens`.
    pub fn search(&self, owner: UserId, tokens: &[String]) -> Result<Vec<IndexEntry>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let owner_str = owner.to_string();
        let mut matching: Option<BTreeSet<String>> = None;
        {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(
                    "SELECT artifact_id FROM search_tokens WHERE owner_id = ?1 AND token = ?2",
                )
                .map_err(index_err("search prepare"))?;

            for token in tokens {
                let rows = stmt
                    .query_map(params![owner_str, token], |row| row.get::<_, String>(0))
                    .map_err(index_err("search exec"))?;
                let mut ids = BTreeSet::new();
                for row in rows {
                    ids.insert(row.map_err(index_err("search row"))?);
                }
                matching = Some(match matching {
                    Some(prev) => prev.intersection(&ids).cloned().collect(),
                    None => ids,
                });
            }
        }

        let matching = matching.unwrap_or_default();
        Ok(self
            .list(owner)?
            .into_iter()
            .filter(|e| matching.contains(e.artifact_id.as_str()))
            .collect())
    }

    fn select(&self, owner: UserId, sql: &str, extra: Option<&str>) -> Result<Vec<IndexEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(index_err("query prepare"))?;

        let owner_str = owner.to_string();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String)> {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        };
        let rows = match extra {
            Some(value) => stmt.query_map(params![owner_str, value], map_row),
            None => stmt.query_map(params![owner_str], map_row),
        }
        .map_err(index_err("query exec"))?;

        let mut entries = Vec::new();
        for row in rows {
            let (artifact_id, created_at, fingerprint) = row.map_err(index_err("row parse"))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| ArtVaultError::IndexError(format!("bad timestamp: {e}")))?
                .with_timezone(&Utc);
            entries.push(IndexEntry {
                owner_id: owner,
                artifact_id: ArtifactId::new(artifact_id)
                    .map_err(|e| ArtVaultError::IndexError(e.to_string()))?,
                created_at,
                fingerprint,
            });
        }
        Ok(entries)
    }
}

fn index_err(what: &'static str) -> impl Fn(rusqlite::Error) -> ArtVaultError {
    move |e| ArtVaultError::IndexError(format!("{what}: {e}"))
}

/// Split text into normalised search words: lowercase alphanumeric runs
/// of at least two characters, deduplicated and sorted.
pub fn normalize_words(text: &str) -> Vec<String> {
    let words: BTreeSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(str::to_lowercase)
        .collect();
    words.into_iter().collect()
}

/// Keyed, non-reversible tokens for every word in `text`.
pub fn search_tokens(vault_key: &VaultMasterKey, text: &str) -> Result<Vec<String>> {
    let key = vault_key.derive_search_key()?;
    normalize_words(text)
        .iter()
        .map(|word| {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                .map_err(|e| ArtVaultError::EncryptionFailed(format!("HMAC init failed: {e}")))?;
            mac.update(word.as_bytes());
            Ok(BASE64.encode(mac.finalize().into_bytes()))
        })
        .collect()
}

pub fn encode_fingerprint(fingerprint: &[u8]) -> String {
    BASE64.encode(fingerprint)
}
