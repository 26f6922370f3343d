//! Binary artifact record format and atomic file writes.
//!
//! An `.avlt` file has this layout:
//!
//! ```text
//! [AVLT: 4 bytes][version: 1 byte][header_len: 4 bytes LE][header JSON][payload ciphertext]
//! ```
//!
//! - **Magic** (`AVLT`): identifies the file as an ArtVault record.
//! - **Version**: format version (currently `1`).
//! - **Header length**: little-endian u32 telling us where the header
//!   JSON ends and the raw ciphertext begins.
//! - **Header JSON**: serialized `CiphertextRecord` (everything except
//!   the payload ciphertext, byte fields base64-encoded).
//! - **Payload ciphertext**: AES-256-GCM output including the tag.
//!
//! Integrity comes from the AEAD tags inside the record; the envelope
//! only has to be parseable.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use uuid::Uuid;

use crate::crypto::CiphertextRecord;
use crate::errors::{ArtVaultError, Result};
use crate::retry::{retry_io, RetryPolicy};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every record file.
const MAGIC: &[u8; 4] = b"AVLT";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Encode a record into its on-disk byte form.
pub fn encode_record(record: &CiphertextRecord) -> Result<Vec<u8>> {
    let header_bytes = serde_json::to_vec(record)
        .map_err(|e| ArtVaultError::SerializationError(format!("record header: {e}")))?;

    let header_len = u32::try_from(header_bytes.len()).map_err(|_| {
        ArtVaultError::SerializationError(format!(
            "header length {} exceeds u32::MAX",
            header_bytes.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + header_bytes.len() + record.ciphertext.len());
    buf.extend_from_slice(MAGIC); // 4 bytes
    buf.push(CURRENT_VERSION); // 1 byte
    buf.extend_from_slice(&header_len.to_le_bytes()); // 4 bytes LE
    buf.extend_from_slice(&header_bytes); // header JSON
    buf.extend_from_slice(&record.ciphertext); // raw ciphertext
    Ok(buf)
}

/// Decode the on-disk byte form back into a record.
pub fn decode_record(data: &[u8]) -> Result<CiphertextRecord> {
    if data.len() < PREFIX_LEN {
        return Err(ArtVaultError::InvalidRecordFormat(
            "file too small to be a valid record".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(ArtVaultError::InvalidRecordFormat(
            "missing AVLT magic bytes".into(),
        ));
    }

    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(ArtVaultError::InvalidRecordFormat(format!(
            "unsupported version {version}, expected {CURRENT_VERSION}"
        )));
    }

    let header_len_u32 = u32::from_le_bytes(
        data[5..9]
            .try_into()
            .map_err(|_| ArtVaultError::InvalidRecordFormat("bad header length".into()))?,
    );
    let header_len = usize::try_from(header_len_u32).map_err(|_| {
        ArtVaultError::InvalidRecordFormat(format!(
            "header length {header_len_u32} exceeds platform address space"
        ))
    })?;

    let header_end = PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            ArtVaultError::InvalidRecordFormat("header length exceeds file size".into())
        })?;

    let mut record: CiphertextRecord = serde_json::from_slice(&data[PREFIX_LEN..header_end])
        .map_err(|e| ArtVaultError::InvalidRecordFormat(format!("header JSON: {e}")))?;
    record.ciphertext = data[header_end..].to_vec();
    Ok(record)
}

/// Read and decode a record file.
pub fn read_record(path: &Path, policy: &RetryPolicy) -> Result<CiphertextRecord> {
    let data = retry_io(policy, "read record", || Ok(fs::read(path)?))?;
    decode_record(&data)
}

/// Write `bytes` to `path` **atomically**.
///
/// 1. Write to a uniquely named temp file in the same directory (mode 0600
///    on Unix).
/// 2. `fsync` it.
/// 3. Rename the temp file over the target path.
///
/// Readers see either the old file or the complete new one, never a
/// half-written file.  Concurrent writers never share a temp file.
/// Transient I/O errors are retried per `policy`.
pub fn write_atomic(path: &Path, bytes: &[u8], policy: &RetryPolicy) -> Result<()> {
    stage_atomic(path, bytes, policy)?.commit(policy)
}

/// A fully written and synced temp file waiting to be renamed over its
/// target.  Dropping it without [`commit`](Self::commit) removes the temp
/// file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

/// First half of [`write_atomic`]: everything except the rename.
pub fn stage_atomic(path: &Path, bytes: &[u8], policy: &RetryPolicy) -> Result<StagedWrite> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let name = path.file_name().unwrap_or_default().to_string_lossy();

    retry_io(policy, "stage write", || {
        fs::create_dir_all(parent)?;
        let tmp_path = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let staged = StagedWrite {
            tmp_path,
            target: path.to_path_buf(),
            committed: false,
        };
        let mut file = options.open(&staged.tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(staged)
    })
}

impl StagedWrite {
    /// Rename the temp file over the target.
    pub fn commit(mut self, policy: &RetryPolicy) -> Result<()> {
        retry_io(policy, "commit write", || {
            Ok(fs::rename(&self.tmp_path, &self.target)?)
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let encoded = BASE64.encode(data);
    serializer.serialize_str(&encoded)
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
