//! Filesystem helpers: hashing, owner-only files and staged atomic writes.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::domain::token::hex_encode;

/// Compute the SHA256 hex digest of a file.
///
/// Reads the file in 64 KB chunks to avoid loading large files into memory.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65536];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Create `dir` (and parents) and restrict it to `mode`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or chmod'ed.
pub fn ensure_dir(dir: &Path, mode: u32) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating directory {}", dir.display()))?;
    set_mode(dir, mode)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn create_with_mode(path: &Path, mode: u32) -> Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let file = options
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    // `mode` only applies to new files; an existing temp file keeps its bits.
    set_mode(path, mode)?;
    Ok(file)
}

/// A set of files written to sibling temp files, renamed into place together.
///
/// Temp files that were never committed are removed on drop, so an aborted
/// transaction leaves the previous files untouched.
#[derive(Default)]
pub struct StagedWrites {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedWrites {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `content` to `.<name>.tmp` next to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be written.
    pub fn stage(&mut self, target: &Path, content: &[u8], mode: u32) -> Result<()> {
        let name = target
            .file_name()
            .with_context(|| format!("{} has no file name", target.display()))?;
        let temp = target.with_file_name(format!(".{}.tmp", name.to_string_lossy()));

        let mut file = create_with_mode(&temp, mode)?;
        self.staged.push((temp.clone(), target.to_path_buf()));
        file.write_all(content)
            .with_context(|| format!("writing {}", temp.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing {}", temp.display()))?;
        Ok(())
    }

    /// Rename every staged file over its target, in staging order.
    ///
    /// # Errors
    ///
    /// Returns an error if a rename fails; files renamed before it stay.
    pub fn commit(mut self) -> Result<()> {
        for (temp, target) in std::mem::take(&mut self.staged) {
            std::fs::rename(&temp, &target)
                .with_context(|| format!("finalizing {}", target.display()))?;
        }
        Ok(())
    }
}

impl Drop for StagedWrites {
    fn drop(&mut self) {
        for (temp, _) in &self.staged {
            let _ = std::fs::remove_file(temp);
        }
    }
}

/// Atomically replace `path` with `content`, creating parent directories.
///
/// # Errors
///
/// Returns an error if any filesystem operation fails.
pub fn write_file(path: &Path, content: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let mut writes = StagedWrites::new();
    writes.stage(path, content.as_bytes(), mode)?;
    writes.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_file_matches_known_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, "abc").expect("write");
        assert_eq!(
            sha256_file(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_staged_writes_commit_replaces_all_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.json");
        let b = dir.path().join("b");
        std::fs::write(&a, "old").expect("write");

        let mut writes = StagedWrites::new();
        writes.stage(&a, b"new-a", 0o600).expect("stage a");
        writes.stage(&b, b"new-b", 0o600).expect("stage b");
        assert_eq!(std::fs::read_to_string(&a).expect("read"), "old");
        writes.commit().expect("commit");

        assert_eq!(std::fs::read_to_string(&a).expect("read"), "new-a");
        assert_eq!(std::fs::read_to_string(&b).expect("read"), "new-b");
        assert!(!dir.path().join(".a.json.tmp").exists());
    }

    #[test]
    fn test_staged_writes_dropped_without_commit_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        {
            let mut writes = StagedWrites::new();
            writes.stage(&a, b"x", 0o600).expect("stage");
        }
        assert!(!a.exists());
        assert!(!dir.path().join(".a.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_file_sets_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("secret");
        write_file(&path, "s", 0o600).expect("write");
        let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
