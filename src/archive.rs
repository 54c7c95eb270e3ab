use std::fs;
use std::fs::File;
use std::fs::FileTimes;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing::warn;
use walkdir::WalkDir;

/// Moves everything under `queue_root` into `archive_root`, then removes
/// `queue_root`. Existing archive content is merged into, same-named files
/// are overwritten.
///
/// Returns the number of files moved.
pub fn archive_queue(queue_root: &Path, archive_root: &Path) -> anyhow::Result<usize> {
    if !queue_root.exists() {
        warn!(queue = %queue_root.display(), "Nothing to archive");
        return Ok(0);
    }

    let mut moved = 0;
    for entry in WalkDir::new(queue_root).min_depth(1) {
        let entry = entry?;
        let dest = archive_root.join(entry.path().strip_prefix(queue_root)?);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).with_context(|| format!("creating {}", dest.display()))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        move_file(entry.path(), &dest)
            .with_context(|| format!("moving {} to {}", entry.path().display(), dest.display()))?;
        moved += 1;
    }

    fs::remove_dir_all(queue_root)
        .with_context(|| format!("removing {}", queue_root.display()))?;
    info!(
        files = moved,
        archive = %archive_root.display(),
        "Moved queue to archive"
    );
    Ok(moved)
}

/// Copies `src` to `dest` with its timestamps and permissions, then deletes
/// `src`. When `dest` is an existing directory the file keeps its name inside
/// it.
pub fn move_file(src: &Path, dest: &Path) -> io::Result<PathBuf> {
    let dest = match src.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest.to_path_buf(),
    };

    let meta = fs::metadata(src)?;
    let mut reader = File::open(src)?;
    let mut writer = File::create(&dest)?;
    io::copy(&mut reader, &mut writer)?;
    writer.set_times(
        FileTimes::new()
            .set_accessed(meta.accessed()?)
            .set_modified(meta.modified()?),
    )?;
    drop(writer);
    // Permissions last, a read-only source would otherwise block the steps above.
    fs::set_permissions(&dest, meta.permissions())?;

    fs::remove_file(src)?;
    Ok(dest)
}

#[cfg(test)]
mod test {
    use std::time::Duration;
    use std::time::SystemTime;

    use tempfile::tempdir;

    use super::*;

    fn write_with_mtime(path: &Path, content: &str, modified: SystemTime) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    #[test]
    fn archive_moves_tree_and_keeps_times() {
        let root = tempdir().unwrap();
        let queue = root.path().join("queue");
        let kept = root.path().join("kept");
        let long_ago = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);

        write_with_mtime(&queue.join("Chan/a.mp4"), "a", long_ago);
        write_with_mtime(&queue.join("Chan/nested/b.webm"), "b", long_ago);
        write_with_mtime(&queue.join("Other/c.mkv"), "c", long_ago);
        fs::create_dir_all(queue.join("Empty")).unwrap();
        write_with_mtime(&kept.join("Chan/existing.mp4"), "old", long_ago);

        let moved = archive_queue(&queue, &kept).unwrap();

        assert_eq!(moved, 3);
        assert!(!queue.exists());
        assert_eq!(fs::read_to_string(kept.join("Chan/a.mp4")).unwrap(), "a");
        assert_eq!(fs::read_to_string(kept.join("Chan/nested/b.webm")).unwrap(), "b");
        assert_eq!(fs::read_to_string(kept.join("Other/c.mkv")).unwrap(), "c");
        assert_eq!(fs::read_to_string(kept.join("Chan/existing.mp4")).unwrap(), "old");
        assert!(kept.join("Empty").is_dir());
        assert_eq!(
            fs::metadata(kept.join("Chan/a.mp4")).unwrap().modified().unwrap(),
            long_ago
        );
    }

    #[test]
    fn archive_overwrites_same_named_file() {
        let root = tempdir().unwrap();
        let queue = root.path().join("queue");
        let kept = root.path().join("kept");
        let now = SystemTime::now();
        write_with_mtime(&queue.join("Chan/a.mp4"), "new", now);
        write_with_mtime(&kept.join("Chan/a.mp4"), "old", now);

        archive_queue(&queue, &kept).unwrap();

        assert_eq!(fs::read_to_string(kept.join("Chan/a.mp4")).unwrap(), "new");
    }

    #[test]
    fn missing_queue_is_noop() {
        let root = tempdir().unwrap();
        let moved = archive_queue(&root.path().join("queue"), &root.path().join("kept")).unwrap();
        assert_eq!(moved, 0);
        assert!(!root.path().join("kept").exists());
    }

    #[test]
    fn move_into_existing_directory_appends_name() {
        let root = tempdir().unwrap();
        let src = root.path().join("clip.mp4");
        fs::write(&src, "x").unwrap();
        let target = root.path().join("target");
        fs::create_dir(&target).unwrap();

        let dest = move_file(&src, &target).unwrap();

        assert_eq!(dest, target.join("clip.mp4"));
        assert!(dest.exists());
        assert!(!src.exists());
    }

    #[cfg(unix)]
    #[test]
    fn move_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempdir().unwrap();
        let src = root.path().join("clip.mp4");
        fs::write(&src, "x").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

        let dest = move_file(&src, &root.path().join("moved.mp4")).unwrap();

        let mode = fs::metadata(dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
