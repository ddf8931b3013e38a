//! The interface every component uses to reach the archive index.

use std::{collections::BTreeSet, path::PathBuf};

use crate::{
    cycle::Cycle,
    errors::GribArchiveErr,
    models::{ArchiveRecord, ArtifactKey, ModelProfile},
    naming::NamingScheme,
};

/// Persistent record of which artifacts are stored locally.
///
/// Implementations must serialize mutations so that a sweep's read and delete happen atomically
/// with respect to inserts.
pub trait ArchiveIndex: Send + Sync {
    /// Every record, oldest cycle first.
    fn list_all(&self) -> Result<Vec<ArchiveRecord>, GribArchiveErr>;

    /// For each model, or only `model` if given, the records of that model's latest cycle.
    fn latest(&self, model: Option<&str>) -> Result<Vec<ArchiveRecord>, GribArchiveErr>;

    /// The indexed path of `key`, if it is indexed.
    fn lookup(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr>;

    /// Add a record. Fails with [`GribArchiveErr::DuplicateKey`] if the key is already indexed.
    fn insert(&self, record: &ArchiveRecord) -> Result<(), GribArchiveErr>;

    /// Remove the record for `key` and return the path it pointed at. Absent keys are not an
    /// error. The file itself is left alone.
    fn delete(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr>;

    /// Remove every record with a cycle before `threshold`, optionally only for `model`, and try
    /// to remove the files. Returns the removed records.
    fn delete_older_than(
        &self,
        threshold: Cycle,
        model: Option<&str>,
    ) -> Result<Vec<ArchiveRecord>, GribArchiveErr>;

    /// Distinct `(cycle, model)` pairs, optionally only for `model`.
    fn distinct_cycles(
        &self,
        model: Option<&str>,
    ) -> Result<BTreeSet<(Cycle, String)>, GribArchiveErr>;

    /// Whether `key` is indexed, with the indexed path, or the path it would have if it were.
    fn exists(
        &self,
        key: &ArtifactKey,
        naming: &NamingScheme,
        profile: &ModelProfile,
    ) -> Result<(bool, PathBuf), GribArchiveErr> {
        Ok(match self.lookup(key)? {
            Some(path) => (true, path),
            None => (false, naming.local_path_for(profile, key)),
        })
    }
}

#[cfg(test)]
pub(crate) mod unit {
    use super::*;
    use crate::Archive;

    /// How [`FlakyIndex::insert`] behaves.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum InsertMode {
        /// Pass through.
        Normal,
        /// Another writer indexes the key first, then this insert collides with it.
        LoseRace,
        /// Report a collision without anything being indexed.
        PhantomDuplicate,
    }

    /// An index over a real archive that fails on demand.
    pub(crate) struct FlakyIndex<'a> {
        pub(crate) inner: &'a Archive,
        pub(crate) fail_lookup: fn(&ArtifactKey) -> bool,
        pub(crate) fail_distinct: bool,
        pub(crate) insert: InsertMode,
    }

    impl<'a> FlakyIndex<'a> {
        pub(crate) fn new(inner: &'a Archive) -> Self {
            FlakyIndex {
                inner,
                fail_lookup: |_| false,
                fail_distinct: false,
                insert: InsertMode::Normal,
            }
        }
    }

    impl ArchiveIndex for FlakyIndex<'_> {
        fn list_all(&self) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
            self.inner.list_all()
        }

        fn latest(&self, model: Option<&str>) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
            self.inner.latest(model)
        }

        fn lookup(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr> {
            if (self.fail_lookup)(key) {
                return Err(GribArchiveErr::LogicError("db busy"));
            }
            self.inner.lookup(key)
        }

        fn insert(&self, record: &ArchiveRecord) -> Result<(), GribArchiveErr> {
            match self.insert {
                InsertMode::Normal => self.inner.insert(record),
                InsertMode::LoseRace => {
                    self.inner.insert(record)?;
                    Err(GribArchiveErr::DuplicateKey(record.key.clone()))
                }
                InsertMode::PhantomDuplicate => {
                    Err(GribArchiveErr::DuplicateKey(record.key.clone()))
                }
            }
        }

        fn delete(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr> {
            self.inner.delete(key)
        }

        fn delete_older_than(
            &self,
            threshold: Cycle,
            model: Option<&str>,
        ) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
            self.inner.delete_older_than(threshold, model)
        }

        fn distinct_cycles(
            &self,
            model: Option<&str>,
        ) -> Result<BTreeSet<(Cycle, String)>, GribArchiveErr> {
            if self.fail_distinct {
                return Err(GribArchiveErr::LogicError("db busy"));
            }
            self.inner.distinct_cycles(model)
        }
    }
}
