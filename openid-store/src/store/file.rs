//! Filesystem-based storage
//!
//! One file per association and one (empty) file per consumed nonce, under
//! `associations/` and `nonces/` of a root directory. Names are built from
//! SHA-1 digests so arbitrary URLs, handles and salts map to safe file
//! names. Association writes land in `temp/` first and are renamed into
//! place; nonce files are created with create-new semantics, so the
//! filesystem itself arbitrates concurrent `use_nonce` calls.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use openid_core::Association;
use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;

use super::{newest_unexpired, OpenIdStore, SkewWindow, StoreResult};

const ASSOCIATIONS_DIR: &str = "associations";
const NONCES_DIR: &str = "nonces";
const TEMP_DIR: &str = "temp";

fn digest_name(s: &str) -> String {
    hex::encode(Sha1::digest(s.as_bytes()))
}

/// Durable store backed by a directory tree
#[derive(Debug)]
pub struct FileStore {
    associations_dir: PathBuf,
    nonces_dir: PathBuf,
    temp_dir: PathBuf,
    skew: SkewWindow,
}

impl FileStore {
    /// Open a store rooted at `root`, creating its directories as needed
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        let store = Self {
            associations_dir: root.join(ASSOCIATIONS_DIR),
            nonces_dir: root.join(NONCES_DIR),
            temp_dir: root.join(TEMP_DIR),
            skew: SkewWindow::default(),
        };
        for dir in [&store.associations_dir, &store.nonces_dir, &store.temp_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    fn server_prefix(server_url: &str) -> String {
        format!("{}-", digest_name(server_url))
    }

    fn association_path(&self, server_url: &str, handle: &str) -> PathBuf {
        self.associations_dir.join(format!(
            "{}{}",
            Self::server_prefix(server_url),
            digest_name(handle)
        ))
    }

    fn nonce_path(&self, server_url: &str, timestamp: i64, salt: &str) -> PathBuf {
        self.nonces_dir.join(format!(
            "{}{}-{}",
            Self::server_prefix(server_url),
            timestamp,
            digest_name(salt)
        ))
    }

    /// Read an association file. Missing files are `None`; unreadable ones
    /// are deleted and also reported as `None`.
    fn load(&self, path: &Path) -> StoreResult<Option<Association>> {
        Ok(self.load_with_contents(path)?.map(|(_, association)| association))
    }

    /// Like [`FileStore::load`], also returning the bytes that were read
    fn load_with_contents(&self, path: &Path) -> StoreResult<Option<(String, Association)>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                self.discard(path, &e.to_string())?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match Association::deserialize(&contents) {
            Ok(association) => Ok(Some((contents, association))),
            Err(e) => {
                self.discard(path, &e.to_string())?;
                Ok(None)
            }
        }
    }

    /// Remove `path` only if it still holds `expected`.
    ///
    /// The file is first renamed into `temp/`, which takes whatever is there
    /// atomically. A rewrite that landed after `expected` was read is put
    /// back, unless an even newer write already took its place.
    fn remove_if_unchanged(&self, path: &Path, expected: &str) -> StoreResult<bool> {
        let held = NamedTempFile::new_in(&self.temp_dir)?;
        match fs::rename(path, held.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if fs::read(held.path())? == expected.as_bytes() {
            return Ok(true);
        }

        match held.persist_noclobber(path) {
            Ok(_) => Ok(false),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error.into()),
        }
    }

    fn discard(&self, path: &Path, reason: &str) -> StoreResult<()> {
        tracing::warn!(path = %path.display(), reason, "Removing corrupt association file");
        remove_if_present(path)?;
        Ok(())
    }

    /// Association files in the store, optionally limited to one server
    fn association_files(&self, server_url: Option<&str>) -> StoreResult<Vec<PathBuf>> {
        let prefix = server_url.map(Self::server_prefix);
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.associations_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let matches = match (&prefix, name.to_str()) {
                (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
                (None, _) => true,
                (Some(_), None) => false,
            };
            if matches {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

/// Remove a file, reporting whether it existed
fn remove_if_present(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// The timestamp field of a nonce file name
fn nonce_timestamp(name: &str) -> Option<i64> {
    name.splitn(3, '-').nth(1)?.parse().ok()
}

impl OpenIdStore for FileStore {
    fn store_association(&self, server_url: &str, association: &Association) -> StoreResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.temp_dir)?;
        tmp.write_all(association.serialize().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.association_path(server_url, association.handle()))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> StoreResult<Option<Association>> {
        let now = Utc::now();
        match handle {
            Some(handle) => Ok(self
                .load(&self.association_path(server_url, handle))?
                .filter(|a| !a.is_expired(now))),
            None => {
                let mut associations = Vec::new();
                for path in self.association_files(Some(server_url))? {
                    associations.extend(self.load(&path)?);
                }
                Ok(newest_unexpired(associations, now))
            }
        }
    }

    fn remove_association(&self, server_url: &str, handle: &str) -> StoreResult<bool> {
        remove_if_present(&self.association_path(server_url, handle))
    }

    fn cleanup_associations(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut removed = 0u64;
        for path in self.association_files(None)? {
            if let Some((contents, association)) = self.load_with_contents(&path)? {
                if association.is_expired(now) && self.remove_if_unchanged(&path, &contents)? {
                    removed += 1;
                }
            }
        }

        tracing::debug!(removed, "Cleaned up expired associations");
        Ok(removed)
    }

    fn use_nonce(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool> {
        if !self.skew.accepts(timestamp, Utc::now().timestamp()) {
            return Ok(false);
        }
        let path = self.nonce_path(server_url, timestamp, salt);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn cleanup_nonces(&self) -> StoreResult<u64> {
        let cutoff = self.skew.cutoff(Utc::now().timestamp());
        let mut removed = 0u64;
        for entry in fs::read_dir(&self.nonces_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(timestamp) = name.to_str().and_then(nonce_timestamp) else {
                tracing::warn!(name = ?name, "Skipping unrecognized file in nonce directory");
                continue;
            };
            if timestamp < cutoff && remove_if_present(&entry.path())? {
                removed += 1;
            }
        }

        tracing::debug!(removed, "Cleaned up stale nonces");
        Ok(removed)
    }

    fn nonce_skew(&self) -> Duration {
        self.skew.get()
    }

    fn set_nonce_skew(&self, skew: Duration) {
        self.skew.set(skew)
    }
}
