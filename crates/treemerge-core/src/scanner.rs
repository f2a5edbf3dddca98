//! Scanner: two independent pre-order walks over the source trees.
//!
//! Symlinks are never followed — the link's target string is captured
//! verbatim instead of descending into it. Each walk commits to the store
//! in batches; once both walks finish the run's phase advances to
//! `hashing`.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::error::CoreResult;
use crate::model::{Kind, ScannedEntry, Side};
use crate::shutdown::ShutdownFlag;
use crate::store::Store;

/// Walk `root` and upsert every entry reachable from it (not including the
/// root itself) into `store`, tagged as `side`. Commits in batches of
/// `store.commit_batch_size()`.
///
/// # Errors
/// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
pub fn scan(store: &Store, root: &Path, side: Side, shutdown: &ShutdownFlag) -> CoreResult<()> {
    let batch_size = store.commit_batch_size();
    let mut batch = Vec::with_capacity(batch_size);

    let walker = WalkDir::new(root).follow_links(false).min_depth(1);
    for entry in walker {
        if shutdown.is_triggered() {
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "scanner read error, skipping entry");
                continue;
            }
        };
        let Some(scanned) = to_scanned_entry(root, &entry, side) else {
            continue;
        };
        batch.push(scanned);
        if batch.len() >= batch_size {
            store.upsert_scanned(&batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        store.upsert_scanned(&batch)?;
    }
    Ok(())
}

fn to_scanned_entry(root: &Path, entry: &walkdir::DirEntry, side: Side) -> Option<ScannedEntry> {
    let rel = entry.path().strip_prefix(root).ok()?;
    let rel_path = normalize_rel_path(rel);
    if rel_path.is_empty() {
        return None;
    }

    let file_type = entry.file_type();
    if file_type.is_symlink() {
        let target = std::fs::read_link(entry.path())
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        return Some(ScannedEntry {
            rel_path,
            side,
            kind: Kind::Symlink,
            size: None,
            mtime: None,
            link_target: target,
        });
    }

    let metadata = match entry.metadata() {
        Ok(m) => m,
        Err(err) => {
            tracing::warn!(path = %entry.path().display(), error = %err, "stat failed, skipping");
            return None;
        }
    };

    let kind = if file_type.is_dir() { Kind::Dir } else { Kind::File };
    let size = if kind == Kind::File { Some(metadata.len()) } else { None };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64);

    Some(ScannedEntry {
        rel_path,
        side,
        kind,
        size,
        mtime,
        link_target: None,
    })
}

/// Normalize a relative path to forward-slash form so the same `rel_path`
/// string is comparable across platforms and across the two source trees.
fn normalize_rel_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remove stale `*.part.<run_id>` temp files under `dest_root` left by a
/// prior run that is no longer the active one (startup cleanup, §6).
///
/// # Errors
/// Propagates I/O errors from walking or removing the destination tree.
pub fn cleanup_stale_temp_files(dest_root: &Path, active_run_id: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dest_root.exists() {
        return Ok(removed);
    }
    let suffix_marker = ".part.";
    for entry in WalkDir::new(dest_root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(idx) = name.find(suffix_marker) {
            let run_suffix = &name[idx + suffix_marker.len()..];
            if run_suffix != active_run_id {
                if std::fs::remove_file(entry.path()).is_ok() {
                    removed.push(entry.path().to_path_buf());
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_upserts_files_dirs_and_symlinks() {
        let src = tempdir().unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/a.txt"), b"hello").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("a.txt", src.path().join("sub/link")).unwrap();

        let store_dir = tempdir().unwrap();
        let store = Store::open_or_create(&store_dir.path().join("merge.db")).unwrap();
        let shutdown = ShutdownFlag::new();
        scan(&store, src.path(), Side::A, &shutdown).unwrap();

        let dir_row = store.get("sub").unwrap().unwrap();
        assert_eq!(dir_row.a.kind, Some(Kind::Dir));

        let file_row = store.get("sub/a.txt").unwrap().unwrap();
        assert_eq!(file_row.a.kind, Some(Kind::File));
        assert_eq!(file_row.a.size, Some(5));

        #[cfg(unix)]
        {
            let link_row = store.get("sub/link").unwrap().unwrap();
            assert_eq!(link_row.a.kind, Some(Kind::Symlink));
            assert_eq!(link_row.a.link_target.as_deref(), Some("a.txt"));
        }
    }

    #[test]
    fn normalize_rel_path_uses_forward_slashes() {
        let rel = Path::new("a").join("b").join("c");
        assert_eq!(normalize_rel_path(&rel), "a/b/c");
    }

    #[test]
    fn cleanup_stale_temp_files_removes_foreign_run_ids_only() {
        let dest = tempdir().unwrap();
        fs::write(dest.path().join("keep.txt.part.current"), b"x").unwrap();
        fs::write(dest.path().join("drop.txt.part.stale"), b"x").unwrap();
        fs::write(dest.path().join("plain.txt"), b"x").unwrap();

        let removed = cleanup_stale_temp_files(dest.path(), "current").unwrap();

        assert_eq!(removed.len(), 1);
        assert!(dest.path().join("keep.txt.part.current").exists());
        assert!(!dest.path().join("drop.txt.part.stale").exists());
        assert!(dest.path().join("plain.txt").exists());
    }
}
