//! Secure erasure of memory buffers and files.
//!
//! `wipe` zeroes a buffer in place (the compiler may not elide it).
//! `secure_delete` overwrites a file's bytes `passes` times (random
//! passes followed by a final zero pass), syncs, reads the zero pass
//! back, and only then unlinks the file.
//!
//! On copy-on-write or log-structured filesystems an in-place overwrite
//! does not reach the original blocks.  Those cases, and any read-back
//! mismatch, are reported as [`EraseOutcome::Incomplete`] rather than
//! claimed as success.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::errors::{ArtVaultError, Result};

/// Chunk size used for overwrite and read-back.
const CHUNK: usize = 64 * 1024;

/// Result of a best-effort file erase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseOutcome {
    /// Every pass was written, synced and verified.
    Complete,
    /// The file is gone but the overwrite guarantee does not hold.
    Incomplete { reason: String },
}

impl EraseOutcome {
    /// Turn an incomplete erase into `SecureEraseIncomplete`.
    pub fn into_result(self, path: &Path) -> Result<()> {
        match self {
            Self::Complete => Ok(()),
            Self::Incomplete { reason } => Err(ArtVaultError::SecureEraseIncomplete {
                path: path.to_path_buf(),
                reason,
            }),
        }
    }
}

/// Overwrite the backing memory of a sensitive buffer.
pub fn wipe<Z: Zeroize + ?Sized>(buffer: &mut Z) {
    buffer.zeroize();
}

/// Overwrite a file in place without removing it.
pub fn overwrite_file(path: &Path, passes: u32) -> Result<EraseOutcome> {
    let len = fs::metadata(path)?.len();
    let mut reasons = Vec::new();

    if let Some(fs_name) = copy_on_write_fs(path) {
        reasons.push(format!("{fs_name} does not overwrite blocks in place"));
    }

    match overwrite_passes(path, len, passes.max(1)) {
        Ok(true) => {}
        Ok(false) => reasons.push("read-back after the final pass did not match".into()),
        Err(e) => reasons.push(format!("overwrite failed: {e}")),
    }

    if reasons.is_empty() {
        Ok(EraseOutcome::Complete)
    } else {
        Ok(EraseOutcome::Incomplete {
            reason: reasons.join("; "),
        })
    }
}

/// Overwrite and then unlink a file.
pub fn secure_delete(path: &Path, passes: u32) -> Result<EraseOutcome> {
    let outcome = overwrite_file(path, passes)?;
    fs::remove_file(path)?;

    match outcome.clone().into_result(path) {
        Ok(()) => debug!(path = %path.display(), passes, "securely deleted"),
        Err(e) => warn!(error = %e, "file removed without a confirmed overwrite"),
    }
    Ok(outcome)
}

/// Write all passes; returns whether the final zero pass reads back.
fn overwrite_passes(path: &Path, len: u64, passes: u32) -> std::io::Result<bool> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut chunk = vec![0u8; CHUNK];

    for pass in 0..passes {
        let last = pass + 1 == passes;
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = usize::try_from(remaining).map_or(CHUNK, |r| r.min(CHUNK));
            if last {
                chunk[..n].fill(0);
            } else {
                rand::rng().fill_bytes(&mut chunk[..n]);
            }
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }

    file.seek(SeekFrom::Start(0))?;
    let mut verified = true;
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        if chunk[..n].iter().any(|&b| b != 0) {
            verified = false;
            break;
        }
    }
    Ok(verified)
}

/// Name of the filesystem holding `path` if it is copy-on-write.
#[cfg(target_os = "linux")]
fn copy_on_write_fs(path: &Path) -> Option<&'static str> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const KNOWN: &[(u64, &str)] = &[
        (0x9123_683E, "btrfs"),
        (0x2FC1_2FC1, "zfs"),
        (0xF2F5_2010, "f2fs"),
        (0x3434, "nilfs"),
        (0x794C_7630, "overlayfs"),
    ];

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: `statfs` is plain old data; all-zero is a valid value.
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out-pointer.
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }

    #[allow(clippy::unnecessary_cast)]
    let magic = (stat.f_type as u64) & 0xFFFF_FFFF;
    KNOWN
        .iter()
        .find(|(m, _)| *m == magic)
        .map(|(_, name)| *name)
}

#[cfg(not(target_os = "linux"))]
fn copy_on_write_fs(_path: &Path) -> Option<&'static str> {
    None
}
