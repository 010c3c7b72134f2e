use crate::candidate::Candidate;
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

const DIR_PREFIX: &str = "temp_config";

/// Temp directory for one run; removed with its contents on close or drop.
pub struct Workspace {
    dir: TempDir,
    seq: AtomicU64,
}

impl Workspace {
    pub fn create(base: &Path) -> io::Result<Self> {
        fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new().prefix(DIR_PREFIX).tempdir_in(base)?;
        debug!("workspace created at {}", dir.path().display());
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn materialize(&self, candidate: &Candidate) -> io::Result<MaterializedConfig> {
        let path = self.dir.path().join(self.next_file_name());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let written = file.write_all(&candidate.raw);
        drop(file);
        let config = MaterializedConfig {
            path,
            released: false,
        };
        // config drops (and removes the partial file) if the write failed
        written?;
        debug!("line {} materialized to {}", candidate.line, config.path.display());
        Ok(config)
    }

    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("workspace {} removed", path.display());
        Ok(())
    }

    fn next_file_name(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("config_{}_{}.json", nanos, seq)
    }
}

/// A config file owned by exactly one trial; deleted on release or drop.
#[derive(Debug)]
pub struct MaterializedConfig {
    path: PathBuf,
    released: bool,
}

impl MaterializedConfig {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for MaterializedConfig {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_if_present(&self.path) {
            warn!("failed to remove config file {}: {}", self.path.display(), e);
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_writes_payload_verbatim() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path()).unwrap();
        let config = ws
            .materialize(&Candidate::new(1, "{\"outbounds\": []}  "))
            .unwrap();
        assert!(config.path().starts_with(ws.path()));
        assert_eq!(fs::read_to_string(config.path()).unwrap(), "{\"outbounds\": []}  ");
        config.release().unwrap();
    }

    #[test]
    fn binary_payload_is_written_unchanged() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path()).unwrap();
        let config = ws.materialize(&Candidate::new(1, b"\xff\x00{}".to_vec())).unwrap();
        assert_eq!(fs::read(config.path()).unwrap(), b"\xff\x00{}");
    }

    #[test]
    fn file_names_are_unique() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path()).unwrap();
        let a = ws.materialize(&Candidate::new(1, "A")).unwrap();
        let b = ws.materialize(&Candidate::new(2, "A")).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn dropping_a_config_removes_its_file() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path()).unwrap();
        let path = {
            let config = ws.materialize(&Candidate::new(1, "A")).unwrap();
            config.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn release_tolerates_missing_file() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path()).unwrap();
        let config = ws.materialize(&Candidate::new(1, "A")).unwrap();
        fs::remove_file(config.path()).unwrap();
        config.release().unwrap();
    }

    #[test]
    fn close_removes_directory_with_leftovers() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path()).unwrap();
        let dir = ws.path().to_path_buf();
        let released = ws.materialize(&Candidate::new(1, "A")).unwrap();
        released.release().unwrap();
        fs::write(dir.join("stray.json"), "x").unwrap();
        ws.close().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn create_fails_on_unusable_base() {
        let base = tempfile::tempdir().unwrap();
        let file = base.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        assert!(Workspace::create(&file).is_err());
    }
}
