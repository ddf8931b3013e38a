//! Fetch an artifact, or reuse it if it is already in the archive.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    errors::GribArchiveErr,
    index::ArchiveIndex,
    locks::ArchiveLocks,
    models::{ArchiveRecord, ArtifactKey, ModelProfile},
    naming::NamingScheme,
    remote::{RemoteResponse, RemoteSource},
};

/// What happened when an artifact was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// It was already in the archive, nothing was downloaded.
    Reused(PathBuf),
    /// It was downloaded and indexed.
    Downloaded(PathBuf),
    /// The remote service does not have it. Nothing was written.
    NotAvailable,
    /// The download failed in a way that may succeed later. Nothing was written.
    TransientFailure(String),
}

impl FetchOutcome {
    /// Where the artifact is stored, if it is stored.
    pub fn path(&self) -> Option<&Path> {
        match self {
            FetchOutcome::Reused(path) | FetchOutcome::Downloaded(path) => Some(path),
            FetchOutcome::NotAvailable | FetchOutcome::TransientFailure(_) => None,
        }
    }
}

/// Downloads single artifacts into the archive without duplicating work.
#[derive(Clone, Copy)]
pub struct Fetcher<'a> {
    index: &'a dyn ArchiveIndex,
    remote: &'a dyn RemoteSource,
    naming: &'a NamingScheme,
    locks: &'a ArchiveLocks,
}

impl<'a> Fetcher<'a> {
    /// Temporary download files start with this.
    pub const TEMP_PREFIX: &'static str = ".gribdn-";

    /// Create a fetcher.
    pub fn new(
        index: &'a dyn ArchiveIndex,
        remote: &'a dyn RemoteSource,
        naming: &'a NamingScheme,
        locks: &'a ArchiveLocks,
    ) -> Self {
        Fetcher {
            index,
            remote,
            naming,
            locks,
        }
    }

    /// The index this fetcher writes to.
    pub fn index(&self) -> &'a dyn ArchiveIndex {
        self.index
    }

    /// The locks this fetcher coordinates with.
    pub fn locks(&self) -> &'a ArchiveLocks {
        self.locks
    }

    /// Make sure the artifact for `key` is in the archive.
    ///
    /// An indexed artifact whose file is missing is treated as absent and fetched again. The
    /// record is only inserted after the file has been moved into its final place.
    pub fn fetch(
        &self,
        profile: &ModelProfile,
        key: &ArtifactKey,
    ) -> Result<FetchOutcome, GribArchiveErr> {
        debug_assert_eq!(profile.name, key.model);

        let _claim = self.locks.claim(key)?;
        let _gate = self.locks.fetch_gate()?;

        self.fetch_claimed(profile, key)
    }

    /// Find out whether the remote service has `key`, leaving the archive as it was.
    ///
    /// Works like [`fetch`](Self::fetch), but something downloaded here is removed again, record
    /// and file, before the key is released. An artifact that was already stored is untouched.
    pub fn probe(
        &self,
        profile: &ModelProfile,
        key: &ArtifactKey,
    ) -> Result<FetchOutcome, GribArchiveErr> {
        let _claim = self.locks.claim(key)?;
        let _gate = self.locks.fetch_gate()?;

        let outcome = self.fetch_claimed(profile, key)?;
        if let FetchOutcome::Downloaded(path) = &outcome {
            self.index.delete(key)?;
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(outcome)
    }

    fn fetch_claimed(
        &self,
        profile: &ModelProfile,
        key: &ArtifactKey,
    ) -> Result<FetchOutcome, GribArchiveErr> {
        let (indexed, path) = self.index.exists(key, self.naming, profile)?;
        if indexed {
            if path.is_file() {
                debug!(%key, "already archived");
                return Ok(FetchOutcome::Reused(path));
            }

            warn!(%key, path = %path.display(), "indexed file missing from disk, fetching again");
            self.index.delete(key)?;
        }

        let path = self.naming.local_path_for(profile, key);
        let request = self.naming.remote_request_for(profile, key);

        match self.remote.fetch(&request) {
            RemoteResponse::Available(payload) => {
                write_atomic(&path, &payload)?;

                let record = ArchiveRecord {
                    key: key.clone(),
                    path: path.clone(),
                };

                match self.index.insert(&record) {
                    Ok(()) => {
                        debug!(%key, bytes = payload.len(), "downloaded");
                        Ok(FetchOutcome::Downloaded(path))
                    }
                    Err(GribArchiveErr::DuplicateKey(_)) => {
                        // Someone outside this process indexed it in the meantime.
                        match self.index.lookup(key)? {
                            Some(existing) => Ok(FetchOutcome::Reused(existing)),
                            None => Err(GribArchiveErr::LogicError(
                                "duplicate key reported for a key that is not indexed",
                            )),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
            RemoteResponse::NotAvailable => {
                debug!(%key, url = request.url(), "not available");
                Ok(FetchOutcome::NotAvailable)
            }
            RemoteResponse::TransientFailure(msg) => {
                warn!(%key, url = request.url(), %msg, "download failed");
                Ok(FetchOutcome::TransientFailure(msg))
            }
        }
    }
}

/// Write `payload` next to `path` and rename it into place, so `path` is either absent or
/// complete.
fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), GribArchiveErr> {
    let parent = path
        .parent()
        .ok_or(GribArchiveErr::LogicError("artifact path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(Fetcher::TEMP_PREFIX)
        .tempfile_in(parent)?;
    tmp.write_all(payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
