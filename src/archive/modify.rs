use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::Archive;

use crate::{errors::GribArchiveErr, models::ArtifactKey};

use std::path::PathBuf;

impl Archive {
    /// Remove the record for `key` from the index, leaving any file in place.
    pub fn delete(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr> {
        let conn = self.conn()?;

        let path: Option<String> = conn
            .query_row(
                "SELECT path FROM grib WHERE model = ?1 AND cycle = ?2 AND member = ?3 AND fhour = ?4",
                params![key.model, key.cycle, key.member.to_db(), key.forecast_hour],
                |row| row.get(0),
            )
            .optional()?;

        if path.is_some() {
            conn.execute(
                "DELETE FROM grib WHERE model = ?1 AND cycle = ?2 AND member = ?3 AND fhour = ?4",
                params![key.model, key.cycle, key.member.to_db(), key.forecast_hour],
            )?;
            debug!(%key, "removed from index");
        }

        Ok(path.map(PathBuf::from))
    }

    /// Remove a file from the archive, both the record and the file on disk.
    pub fn remove(&self, key: &ArtifactKey) -> Result<(), GribArchiveErr> {
        let path = self.delete(key)?.ok_or(GribArchiveErr::NotInIndex)?;

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod unit {
    use super::*;
    use crate::archive::unit::*; // test helpers.
    use crate::models::Member;

    #[test]
    fn test_delete_is_noop_when_absent() {
        let TestArchive { tmp: _tmp, arch } =
            create_test_archive().expect("Failed to create test archive.");

        let missing = key("GEPS", "2022100100", Member::Control, 0);
        assert_eq!(arch.delete(&missing).expect("Error deleting."), None);
    }

    #[test]
    fn test_delete_leaves_file() {
        let TestArchive { tmp: _tmp, arch } =
            create_test_archive().expect("Failed to create test archive.");

        let record = add_file(&arch, key("GEPS", "2022100100", Member::Control, 0));
        assert_eq!(arch.delete(&record.key).unwrap(), Some(record.path.clone()));
        assert!(arch.lookup(&record.key).unwrap().is_none());
        assert!(record.path.exists());
    }

    #[test]
    fn test_remove_file() {
        let TestArchive { tmp: _tmp, arch } =
            create_test_archive().expect("Failed to create test archive.");

        fill_test_archive(&arch);
        let gone = key("GEPS", "2022100112", Member::Perturbation(1), 0);
        let path = arch.lookup(&gone).unwrap().expect("indexed");

        arch.remove(&gone).expect("Error while removing.");
        assert!(arch.lookup(&gone).unwrap().is_none());
        assert!(!path.exists());

        match arch.remove(&gone) {
            Err(GribArchiveErr::NotInIndex) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}
