use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use lfsvault_core::{Oid, RepoName, RepoSet};

use crate::error::StoreError;

/// Configuration for the blob store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory under which each repository gets its own subtree.
    pub data_dir: PathBuf,
    /// Repositories this store serves.
    pub repositories: RepoSet,
    /// Mode for created directories (unix only).
    pub dir_mode: u32,
    /// Mode for committed blob files (unix only).
    pub file_mode: u32,
}

impl StoreConfig {
    /// Config with the secure default modes (`0o700` dirs, `0o600` files).
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, repositories: RepoSet) -> Self {
        Self {
            data_dir: data_dir.into(),
            repositories,
            dir_mode: 0o700,
            file_mode: 0o600,
        }
    }
}

/// Content-addressed blob storage rooted at a data directory.
///
/// The store itself is cheap to clone and carries no open handles; all I/O
/// happens through per-repository [`RepoStore`] handles.
#[derive(Debug, Clone)]
pub struct BlobStore {
    config: StoreConfig,
}

impl BlobStore {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Scope the store to one repository.
    ///
    /// Fails with [`StoreError::UnknownRepo`] when the repository is not in
    /// the configured allowlist; no filesystem path is ever built for an
    /// unlisted repository.
    pub fn scoped(&self, repo: &RepoName) -> Result<RepoStore, StoreError> {
        if !self.config.repositories.contains(repo) {
            return Err(StoreError::UnknownRepo(repo.to_string()));
        }
        Ok(RepoStore {
            base: self.config.data_dir.join(repo.as_str()),
            dir_mode: self.config.dir_mode,
            file_mode: self.config.file_mode,
        })
    }
}

/// Blob operations scoped to a single repository.
#[derive(Debug, Clone)]
pub struct RepoStore {
    base: PathBuf,
    dir_mode: u32,
    file_mode: u32,
}

impl RepoStore {
    fn blob_path(&self, oid: &Oid) -> PathBuf {
        self.base.join(oid.fanout_path())
    }

    /// Whether the blob is present, optionally requiring an exact size.
    ///
    /// A size mismatch reports absence: the caller should treat the object
    /// as needing re-upload. The stale file is left in place and will be
    /// replaced atomically by the next committed upload. This never returns
    /// a hard error; unreadable metadata is logged and reported as absent.
    pub async fn exists(&self, oid: &Oid, size: Option<u64>) -> bool {
        let path = self.blob_path(oid);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => size.is_none_or(|expected| meta.len() == expected),
            Ok(_) => false,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(oid = %oid, path = %path.display(), error = %e, "failed to stat blob");
                false
            }
        }
    }

    /// Open the blob for streaming reads, returning the handle and its length.
    pub async fn reader(&self, oid: &Oid) -> Result<(fs::File, u64), StoreError> {
        let path = self.blob_path(oid);
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound(oid.clone())
            } else {
                StoreError::Io(e)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Begin a streaming write for the blob.
    ///
    /// Fan-out directories are created as needed. Bytes go to a
    /// uniquely-named tempfile next to the final location; nothing becomes
    /// visible under the object id until [`BlobWriter::commit`] succeeds.
    pub async fn writer(&self, oid: &Oid) -> Result<BlobWriter, StoreError> {
        let dest = self.blob_path(oid);
        let dir = dest.parent().expect("fan-out path always has a parent");
        create_dir_all_with_mode(dir, self.dir_mode).await?;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let tmp = dir.join(format!("{oid}.{suffix}.tmp"));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(self.file_mode);
        let file = options.open(&tmp).await?;

        Ok(BlobWriter {
            oid: oid.clone(),
            file,
            tmp,
            dest,
            hasher: Sha256::new(),
            written: 0,
            committed: false,
        })
    }
}

/// An in-progress blob upload.
///
/// Dropping an uncommitted writer removes the tempfile, so an aborted
/// transfer (client disconnect, digest mismatch) leaves the committed
/// namespace untouched.
pub struct BlobWriter {
    oid: Oid,
    file: fs::File,
    tmp: PathBuf,
    dest: PathBuf,
    hasher: Sha256,
    written: u64,
    committed: bool,
}

impl BlobWriter {
    /// Append a chunk to the blob.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Verify the received bytes against the object id and atomically
    /// publish the blob. Returns the committed size.
    ///
    /// On digest mismatch the tempfile is removed and any previously
    /// committed blob under this id is untouched.
    pub async fn commit(mut self) -> Result<u64, StoreError> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let actual = hex::encode(self.hasher.finalize_reset());
        if actual != self.oid.as_str() {
            return Err(StoreError::DigestMismatch {
                oid: self.oid.clone(),
                actual,
            });
        }

        fs::rename(&self.tmp, &self.dest).await?;
        self.committed = true;
        debug!(oid = %self.oid, size = self.written, "blob committed");
        Ok(self.written)
    }

    /// Discard the upload and remove the tempfile.
    pub async fn abort(mut self) {
        self.committed = true;
        if let Err(e) = fs::remove_file(&self.tmp).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.tmp.display(), error = %e, "failed to remove blob tempfile");
        }
    }
}

impl std::fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("oid", &self.oid)
            .field("tmp", &self.tmp)
            .field("written", &self.written)
            .field("committed", &self.committed)
            .finish()
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

async fn create_dir_all_with_mode(dir: &Path, mode: u32) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(dir).await
}
