//! The namespace tree and the epoch file
//!
//! The namespace is mirrored onto the host filesystem under
//! `<meta_root>/gdfs`: directories are real directories, and each regular
//! file holds the ordered block list of one distributed file as a JSON array
//! of strings. The namespace epoch lives in `<meta_root>/nid` as a text
//! integer. No journal: every namespace operation is a single host
//! filesystem call.

use crate::common::{CoordinatorConfig, Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

pub struct Namespace {
    root: PathBuf,
    epoch_path: PathBuf,
}

fn make_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

fn make_dir_all(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

impl Namespace {
    /// Open the namespace, creating the tree on first start.
    pub fn open(config: &CoordinatorConfig) -> Result<Self> {
        let root = config.namespace_root();
        if !root.exists() {
            tracing::info!("namespace root {} absent, creating", root.display());
            make_dir_all(&root)?;
        }
        Ok(Self {
            root,
            epoch_path: config.epoch_path(),
        })
    }

    /// Read the persisted epoch, initializing it to 1 when the file is
    /// missing, empty, or unreadable.
    pub fn load_epoch(&self) -> Result<i64> {
        match fs::read_to_string(&self.epoch_path) {
            Ok(content) => match content.trim().parse::<i64>() {
                Ok(epoch) if epoch > 0 => Ok(epoch),
                _ => {
                    tracing::warn!("epoch file unreadable, resetting to 1");
                    self.store_epoch(1)?;
                    Ok(1)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("epoch file absent, initializing to 1");
                self.store_epoch(1)?;
                Ok(1)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the epoch as a text integer, fsynced.
    pub fn store_epoch(&self, epoch: i64) -> Result<()> {
        let mut file = File::create(&self.epoch_path)?;
        file.write_all(epoch.to_string().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Map a distributed path onto the mirror tree.
    ///
    /// Leading separators are stripped so "/" addresses the root; parent
    /// components are rejected outright.
    pub fn resolve(&self, dpath: &str) -> Result<PathBuf> {
        let trimmed = dpath.trim_start_matches('/');
        let relative = Path::new(trimmed);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(Error::InvalidPath(dpath.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }

    /// List directory entries, sorted.
    pub fn ls(&self, dpath: &str) -> Result<Vec<String>> {
        let path = self.resolve(dpath)?;
        let meta = fs::metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(dpath.to_string()),
            _ => e.into(),
        })?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(dpath.to_string()));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&path)? {
            entries.push(entry?.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        Ok(entries)
    }

    /// Create one directory level.
    pub fn mkdir(&self, dpath: &str) -> Result<()> {
        let path = self.resolve(dpath)?;
        make_dir(&path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::AlreadyExists(dpath.to_string()),
            ErrorKind::NotFound => Error::NotFound(dpath.to_string()),
            _ => e.into(),
        })
    }

    /// Create a directory and any missing parents.
    pub fn mkdir_p(&self, dpath: &str) -> Result<()> {
        let path = self.resolve(dpath)?;
        make_dir_all(&path).map_err(Into::into)
    }

    /// Remove file entries.
    pub fn rm(&self, dpaths: &[String]) -> Result<()> {
        for dpath in dpaths {
            let path = self.resolve(dpath)?;
            fs::remove_file(&path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::NotFound(dpath.to_string()),
                _ => e.into(),
            })?;
        }
        Ok(())
    }

    /// Remove directory trees.
    pub fn rmdir(&self, dpaths: &[String]) -> Result<()> {
        for dpath in dpaths {
            let path = self.resolve(dpath)?;
            fs::remove_dir_all(&path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::NotFound(dpath.to_string()),
                _ => e.into(),
            })?;
        }
        Ok(())
    }

    /// Create an empty file entry.
    pub fn touch(&self, dpath: &str) -> Result<()> {
        let path = self.resolve(dpath)?;
        self.write_list_file(&path, dpath, &[])
    }

    /// Persist a file entry holding an ordered block list.
    ///
    /// `dir` must resolve to an existing directory and the entry must not
    /// exist yet (the write-path preconditions).
    pub fn create_file(&self, dir: &str, file_name: &str, blocks: &[String]) -> Result<PathBuf> {
        let dir_path = self.resolve(dir)?;
        let meta = fs::metadata(&dir_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(dir.to_string()),
            _ => e.into(),
        })?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(dir.to_string()));
        }
        let file_path = dir_path.join(file_name);
        self.write_list_file(&file_path, file_name, blocks)?;
        Ok(file_path)
    }

    fn write_list_file(&self, path: &Path, display: &str, blocks: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::AlreadyExists(display.to_string()),
                ErrorKind::NotFound => Error::NotFound(display.to_string()),
                _ => Error::from(e),
            })?;
        let encoded = serde_json::to_vec(blocks)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read back the ordered block list of a file entry.
    pub fn read_block_list(&self, dpath: &str) -> Result<Vec<String>> {
        let path = self.resolve(dpath)?;
        let content = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(dpath.to_string()),
            _ => e.into(),
        })?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Wipe and recreate the namespace tree.
    pub fn format(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        make_dir_all(&self.root)?;
        Ok(())
    }
}
