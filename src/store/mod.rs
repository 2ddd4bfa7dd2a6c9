//! Storage for generated pages.
//!
//! Pages are addressed by key; the key of a generated page is derived from
//! the md5 of the formatted prompt, so the same prompt always lands on the
//! same key and later writes replace earlier ones.

use fs_err as fs;
use parking_lot::Mutex;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{ServiceError, ServiceResult};

pub const PAGE_EXT: &str = "tsx";

pub trait PageStore: Send + Sync {
    fn put(&self, key: &str, content: &str) -> ServiceResult<()>;
    fn get(&self, key: &str) -> ServiceResult<String>;
    fn list(&self) -> ServiceResult<Vec<String>>;
    fn delete(&self, key: &str) -> ServiceResult<()>;
    /// Removes every stored entry. Fails with the first error encountered
    /// after attempting all of them; returns how many entries were removed.
    fn clear(&self) -> ServiceResult<usize>;
}

pub type DynStore = Arc<dyn PageStore>;

const LOCK_STRIPES: usize = 16;
#[cfg(unix)]
const PAGE_MODE: u32 = 0o644;

pub fn artifact_key(prompt: &str) -> String {
    format!("convert_{:x}", md5::compute(prompt.as_bytes()))
}

/// Writes `code` under the key derived from `prompt` and returns the
/// extension-less path the frontend routes to, e.g. `convert_pages/convert_<hex>`.
pub fn persist(store: &dyn PageStore, route: &str, prompt: &str, code: &str) -> ServiceResult<String> {
    let key = artifact_key(prompt);
    store.put(&key, code)?;
    tracing::info!(%key, bytes = code.len(), "page stored");
    Ok(format!("{}/{}", route.trim_end_matches('/'), key))
}

pub fn validate_key(key: &str) -> ServiceResult<()> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0'])
        || key.contains("..");
    if bad {
        return Err(ServiceError::InvalidRequest(format!("invalid page name `{key}`")));
    }
    Ok(())
}

/// One `<key>.tsx` file per page in a single flat directory. Writers to the
/// same key are serialized through a fixed set of lock stripes.
pub struct DirStore {
    dir: PathBuf,
    locks: [Mutex<()>; LOCK_STRIPES],
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), locks: std::array::from_fn(|_| Mutex::new(())) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{PAGE_EXT}"))
    }

    fn stripe(key: &str) -> usize {
        md5::compute(key.as_bytes()).0[0] as usize % LOCK_STRIPES
    }

    fn key_lock(&self, key: &str) -> &Mutex<()> {
        &self.locks[Self::stripe(key)]
    }
}

impl PageStore for DirStore {
    fn put(&self, key: &str, content: &str) -> ServiceResult<()> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir)?;

        let _guard = self.key_lock(key).lock();

        // Write next to the target and rename so readers never see a partial page.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        // Temp files are created 0600; the frontend may run as another user.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file().set_permissions(std::fs::Permissions::from_mode(PAGE_MODE))?;
        }
        tmp.persist(self.path_for(key)).map_err(|e| ServiceError::from(e.error))?;
        Ok(())
    }

    fn get(&self, key: &str) -> ServiceResult<String> {
        validate_key(key)?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ServiceError::NotFound(format!("page `{key}`")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> ServiceResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAGE_EXT) || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> ServiceResult<()> {
        validate_key(key)?;
        let _guard = self.key_lock(key).lock();
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ServiceError::NotFound(format!("page `{key}`")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> ServiceResult<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        let mut errors = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    errors.push(e.to_string());
                    continue;
                }
            };
            let result = std::fs::symlink_metadata(&path).and_then(|meta| {
                if meta.is_dir() {
                    // Directories are left alone, not recursed into.
                    Ok(false)
                } else {
                    std::fs::remove_file(&path).map(|_| true)
                }
            });
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => errors.push(format!("Failed to delete {}. Reason: {e}", path.display())),
            }
        }

        match errors.into_iter().next() {
            None => Ok(removed),
            Some(first) => Err(ServiceError::Storage(first)),
        }
    }
}
