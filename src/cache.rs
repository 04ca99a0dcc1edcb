//! A content-addressed store of archives on disk, keyed by action digest.
//!
//! Entries live at `<dir>/<first two hex digits>/<hex>-a`.  Reads refresh an
//! entry's mtime, and trimming removes entries not used for a while.

use crate::hash::Digest;
use anyhow::anyhow;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Reads refresh an entry's mtime only when it is older than this.
const MTIME_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Trimming runs at most this often.
const TRIM_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Trimming removes entries unused for this long.
const TRIM_LIMIT: Duration = Duration::from_secs(5 * 24 * 60 * 60);

pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn open(dir: &Path) -> anyhow::Result<Cache> {
        std::fs::create_dir_all(dir)
            .map_err(|err| anyhow!("create cache dir {}: {}", dir.display(), err))?;
        Ok(Cache {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, id: &Digest) -> PathBuf {
        let hex = id.to_string();
        self.dir.join(&hex[..2]).join(format!("{}-a", hex))
    }

    /// The file holding the entry for id, if present.
    pub fn get_file(&self, id: &Digest) -> anyhow::Result<Option<PathBuf>> {
        let path = self.entry_path(id);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(anyhow!("stat {}: {}", path.display(), err)),
        };
        let now = SystemTime::now();
        let stale = match meta.modified() {
            Ok(mtime) => now.duration_since(mtime).unwrap_or_default() > MTIME_INTERVAL,
            Err(_) => true,
        };
        if stale {
            let mtime = filetime::FileTime::from_system_time(now);
            if let Err(err) = filetime::set_file_mtime(&path, mtime) {
                warn!("refreshing {}: {}", path.display(), err);
            }
        }
        Ok(Some(path))
    }

    /// Store the contents of r as the entry for id.  The entry appears
    /// atomically.
    pub fn put(&self, id: &Digest, r: &mut impl Read) -> anyhow::Result<PathBuf> {
        let path = self.entry_path(id);
        let subdir = path
            .parent()
            .ok_or_else(|| anyhow!("bad cache path {}", path.display()))?;
        std::fs::create_dir_all(subdir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(subdir)?;
        std::io::copy(r, &mut tmp)?;
        tmp.persist(&path)
            .map_err(|err| anyhow!("write {}: {}", path.display(), err.error))?;
        debug!("cached {}", path.display());
        Ok(path)
    }

    /// Remove entries unused for five days.  Does nothing if a trim ran in
    /// the last day.
    pub fn trim(&self) -> anyhow::Result<()> {
        let now = SystemTime::now();
        let stamp = self.dir.join("trim.txt");
        if let Ok(text) = std::fs::read_to_string(&stamp) {
            if let Ok(secs) = text.trim().parse::<u64>() {
                let last = UNIX_EPOCH + Duration::from_secs(secs);
                if now.duration_since(last).unwrap_or_default() < TRIM_INTERVAL {
                    return Ok(());
                }
            }
        }

        let cutoff = now - TRIM_LIMIT;
        let mut removed = 0;
        for sub in std::fs::read_dir(&self.dir)? {
            let sub = sub?;
            let name = sub.file_name();
            let name = name.to_string_lossy();
            if name.len() != 2 || !sub.path().is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(sub.path())? {
                let entry = entry?;
                let mtime = entry.metadata()?.modified()?;
                if mtime < cutoff {
                    std::fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        debug!("trimmed {} cache entries", removed);

        let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        std::fs::write(&stamp, format!("{}", secs))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    fn digest(b: u8) -> Digest {
        Digest([b; 32])
    }

    #[test]
    fn put_then_get() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let cache = Cache::open(&tmp.path().join("c"))?;
        assert!(cache.get_file(&digest(1))?.is_none());

        let path = cache.put(&digest(1), &mut &b"1hello"[..])?;
        assert!(path.starts_with(tmp.path().join("c/01")));
        assert!(path.to_string_lossy().ends_with("-a"));
        assert_eq!(cache.get_file(&digest(1))?, Some(path.clone()));
        assert_eq!(std::fs::read(&path)?, b"1hello");

        // Overwriting an entry replaces it.
        cache.put(&digest(1), &mut &b"1"[..])?;
        assert_eq!(std::fs::read(&path)?, b"1");
        Ok(())
    }

    #[test]
    fn get_refreshes_old_entries() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let cache = Cache::open(tmp.path())?;
        let path = cache.put(&digest(2), &mut &b""[..])?;
        let old = FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&path, old)?;
        cache.get_file(&digest(2))?;
        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&path)?);
        assert!(mtime > old);
        Ok(())
    }

    #[test]
    fn trim_removes_unused_entries_once_a_day() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let cache = Cache::open(tmp.path())?;
        let old = cache.put(&digest(3), &mut &b""[..])?;
        let fresh = cache.put(&digest(4), &mut &b""[..])?;
        filetime::set_file_mtime(&old, FileTime::from_unix_time(1_000_000, 0))?;

        cache.trim()?;
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(tmp.path().join("trim.txt").is_file());

        // A second trim the same day does nothing.
        filetime::set_file_mtime(&fresh, FileTime::from_unix_time(1_000_000, 0))?;
        cache.trim()?;
        assert!(fresh.exists());
        Ok(())
    }
}
