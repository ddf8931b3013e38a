//! An archive of ensemble GRIB files, indexed with sqlite.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use crate::{
    cycle::Cycle,
    errors::GribArchiveErr,
    index::ArchiveIndex,
    models::{ArchiveRecord, ArtifactKey, Member},
};

pub use clean::CleanReport;

/// The archive.
#[derive(Debug)]
pub struct Archive {
    root: PathBuf,                        // The root directory.
    db_conn: Mutex<rusqlite::Connection>, // An sqlite connection, one user at a time.
}

mod add_data;
mod clean;
mod modify;
mod query;
mod root;

impl Archive {
    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, GribArchiveErr> {
        self.db_conn
            .lock()
            .map_err(|_| GribArchiveErr::LogicError("index connection lock poisoned"))
    }

    fn parse_row_to_record(row: &rusqlite::Row) -> Result<ArchiveRecord, rusqlite::Error> {
        let model: String = row.get(0)?;
        let cycle: Cycle = row.get(1)?;
        let member: i64 = row.get(2)?;
        let member = Member::from_db(member).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Integer,
                Box::new(err),
            )
        })?;
        let forecast_hour: u32 = row.get(3)?;
        let path: String = row.get(4)?;

        Ok(ArchiveRecord {
            key: ArtifactKey {
                model,
                cycle,
                member,
                forecast_hour,
            },
            path: PathBuf::from(path),
        })
    }

    fn path_to_text(path: &Path) -> Result<&str, GribArchiveErr> {
        path.to_str()
            .ok_or(GribArchiveErr::LogicError("archive paths must be valid unicode"))
    }
}

impl ArchiveIndex for Archive {
    fn list_all(&self) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        Archive::list_all(self)
    }

    fn latest(&self, model: Option<&str>) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        Archive::latest(self, model)
    }

    fn lookup(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr> {
        Archive::lookup(self, key)
    }

    fn insert(&self, record: &ArchiveRecord) -> Result<(), GribArchiveErr> {
        Archive::insert(self, record)
    }

    fn delete(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr> {
        Archive::delete(self, key)
    }

    fn delete_older_than(
        &self,
        threshold: Cycle,
        model: Option<&str>,
    ) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        Archive::delete_older_than(self, threshold, model)
    }

    fn distinct_cycles(
        &self,
        model: Option<&str>,
    ) -> Result<BTreeSet<(Cycle, String)>, GribArchiveErr> {
        Archive::distinct_cycles(self, model)
    }
}

#[cfg(test)]
pub(crate) mod unit {
    use super::*;

    use tempfile::TempDir;

    // struct to hold temporary data for tests.
    pub(crate) struct TestArchive {
        pub(crate) tmp: TempDir,
        pub(crate) arch: Archive,
    }

    // Function to create a new archive to test.
    pub(crate) fn create_test_archive() -> Result<TestArchive, GribArchiveErr> {
        let tmp = tempfile::Builder::new()
            .prefix("grib-archive-test")
            .tempdir()?;
        let arch = Archive::create(&tmp.path().join("grib"), &tmp.path().join("index.db"))?;

        Ok(TestArchive { tmp, arch })
    }

    pub(crate) fn key(model: &str, cycle: &str, member: Member, fhour: u32) -> ArtifactKey {
        ArtifactKey::new(model, cycle.parse().unwrap(), member, fhour)
    }

    // Write a file for `key` under the archive root and index it.
    pub(crate) fn add_file(arch: &Archive, key: ArtifactKey) -> ArchiveRecord {
        let path = arch
            .root()
            .join(&key.model)
            .join(key.cycle.to_string())
            .join(format!("{}.f{:03}.{}.grib", key.model, key.forecast_hour, key.member));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"GRIB").unwrap();

        let record = ArchiveRecord { key, path };
        arch.insert(&record).expect("Error inserting.");
        record
    }

    // Function to fill the archive with some example data.
    pub(crate) fn fill_test_archive(arch: &Archive) {
        for cycle in &["2022100100", "2022100112", "2022100200"] {
            for member in &[Member::Control, Member::Perturbation(1)] {
                add_file(arch, key("GEPS", cycle, *member, 0));
            }
        }
        add_file(arch, key("GEFS", "2022100112", Member::Control, 0));
    }

    #[test]
    fn test_archive_create_new() {
        assert!(create_test_archive().is_ok());
    }

    #[test]
    fn test_archive_connect() {
        let TestArchive { tmp, arch } =
            create_test_archive().expect("Failed to create test archive.");
        drop(arch);

        let root = tmp.path().join("grib");
        assert!(Archive::connect(&root, &tmp.path().join("index.db")).is_ok());
        assert!(Archive::connect(&root, &tmp.path().join("unlikely_index.db")).is_err());
    }

    #[test]
    fn test_connect_rejects_foreign_database() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("other.db");
        {
            let conn = rusqlite::Connection::open(&db).unwrap();
            conn.execute_batch("CREATE TABLE grib (name TEXT)").unwrap();
        }

        match Archive::connect(&tmp.path(), &db) {
            Err(GribArchiveErr::InvalidSchema) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_creates_then_connects() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("nested").join("index.db");

        let arch = Archive::open(&tmp.path(), &db).expect("create");
        add_file(&arch, key("GEPS", "2022100100", Member::Control, 0));
        drop(arch);

        let arch = Archive::open(&tmp.path(), &db).expect("connect");
        assert_eq!(arch.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_get_root() {
        let TestArchive { tmp, arch } =
            create_test_archive().expect("Failed to create test archive.");

        assert_eq!(arch.root(), tmp.path().join("grib"));
    }

    #[test]
    fn test_usable_through_trait_object() {
        let TestArchive { tmp: _tmp, arch } =
            create_test_archive().expect("Failed to create test archive.");
        fill_test_archive(&arch);

        let index: &dyn ArchiveIndex = &arch;
        assert_eq!(index.list_all().unwrap().len(), 7);
        assert_eq!(index.distinct_cycles(Some("GEFS")).unwrap().len(), 1);
    }
}
