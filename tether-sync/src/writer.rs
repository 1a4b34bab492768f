//! Atomic file writer.
//!
//! ## `atomic_write` protocol
//!
//! 1. Create the parent directory when missing.
//! 2. Write the bytes to a sibling temp file `.<name>.<pid>.<seq>.tether.tmp`
//!    and flush it to disk.
//! 3. Apply the requested permission bits to the temp file.
//! 4. Rename the temp file over the target (atomic on POSIX).
//!
//! Any failure removes the temp file and leaves the target untouched. Each
//! call gets its own temp name, so concurrent writers never share one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{io_err, SyncError};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomically replace `path` with `bytes`, optionally setting `mode`.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: Option<u32>) -> Result<(), SyncError> {
    atomic_write_with(path, bytes, mode, |tmp, target| fs::rename(tmp, target))
}

/// Write remote config `content` verbatim to `path` with permission `mode`.
pub fn write_config(path: &Path, content: &str, mode: u32) -> Result<(), SyncError> {
    match atomic_write(path, content.as_bytes(), Some(mode)) {
        Ok(()) => {
            tracing::info!("wrote config: {} (mode {:o})", path.display(), mode);
            Ok(())
        }
        Err(err) => {
            tracing::error!("failed to write config {}: {}", path.display(), err);
            Err(err)
        }
    }
}

fn temp_path_for(path: &Path) -> Result<PathBuf, SyncError> {
    let name = path.file_name().ok_or_else(|| {
        io_err(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"),
        )
    })?;
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        ".{}.{}.{}.tether.tmp",
        name.to_string_lossy(),
        std::process::id(),
        seq
    );
    Ok(path.with_file_name(tmp_name))
}

fn atomic_write_with<F>(
    path: &Path,
    bytes: &[u8],
    mode: Option<u32>,
    commit: F,
) -> Result<(), SyncError>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let tmp = temp_path_for(path)?;
    if let Err(err) = write_temp(&tmp, bytes, mode) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    if let Err(e) = commit(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("renamed {} -> {}", tmp.display(), path.display());
    Ok(())
}

fn write_temp(tmp: &Path, bytes: &[u8], mode: Option<u32>) -> Result<(), SyncError> {
    let mut file = File::create(tmp).map_err(|e| io_err(tmp, e))?;
    file.write_all(bytes).map_err(|e| io_err(tmp, e))?;
    file.sync_all().map_err(|e| io_err(tmp, e))?;
    if let Some(mode) = mode {
        set_mode(tmp, mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SyncError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tether.tmp"))
            .collect()
    }

    #[test]
    fn writes_content_and_leaves_no_temp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.yaml");
        atomic_write(&path, b"a: 1\n", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a: 1\n");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn replaces_existing_target() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.yaml");
        fs::write(&path, "old").unwrap();
        atomic_write(&path, b"new", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etc").join("app").join("db.yaml");
        write_config(&path, "a: 1\n", 0o644).unwrap();
        assert!(path.exists());
    }

    #[test]
    #[cfg(unix)]
    fn applies_requested_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secret.yaml");
        write_config(&path, "token: x\n", 0o600).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);

        write_config(&path, "token: y\n", 0o644).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn failed_commit_keeps_target_and_cleans_temp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.yaml");
        fs::write(&path, "original").unwrap();

        let err = atomic_write_with(&path, b"replacement", Some(0o644), |staged, _| {
            assert!(staged.exists(), "temp must be fully written before commit");
            Err(io::Error::new(io::ErrorKind::Other, "simulated crash"))
        })
        .expect_err("commit failure must surface");

        assert!(matches!(err, SyncError::Io { ref path, .. } if path.ends_with("db.yaml")));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        assert!(leftovers(tmp.path()).is_empty(), "temp file left behind");
    }

    #[test]
    fn failed_commit_without_prior_target_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fresh.yaml");
        atomic_write_with(&path, b"data", None, |_, _| {
            Err(io::Error::new(io::ErrorKind::Other, "simulated crash"))
        })
        .expect_err("commit failure must surface");
        assert!(!path.exists());
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn parent_that_is_a_file_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a dir").unwrap();
        let err = atomic_write(&blocker.join("db.yaml"), b"x", None).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn temp_names_are_unique_per_call() {
        let path = Path::new("/tmp/x/db.yaml");
        let a = temp_path_for(path).unwrap();
        let b = temp_path_for(path).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".db.yaml."));
    }

    #[test]
    fn concurrent_writers_never_expose_partial_content() {
        let tmp = TempDir::new().unwrap();
        let path = Arc::new(tmp.path().join("race.txt"));
        let a = "a".repeat(256 * 1024);
        let b = "b".repeat(256 * 1024);
        atomic_write(&path, a.as_bytes(), None).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|content| {
                let path = path.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        atomic_write(&path, content.as_bytes(), None).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let path = path.clone();
            let done = done.clone();
            let (a, b) = (a.clone(), b.clone());
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let seen = fs::read_to_string(&*path).unwrap();
                    assert!(seen == a || seen == b, "observed a partial file");
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();

        let last = fs::read_to_string(&*path).unwrap();
        assert!(last == a || last == b);
        assert!(leftovers(tmp.path()).is_empty());
    }
}
