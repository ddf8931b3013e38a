use rusqlite::params;
use tracing::debug;

use super::Archive;

use crate::{errors::GribArchiveErr, models::ArchiveRecord};

impl Archive {
    /// Add a record for a file that is already on disk.
    pub fn insert(&self, record: &ArchiveRecord) -> Result<(), GribArchiveErr> {
        let ArchiveRecord { key, path } = record;
        let path_text = Self::path_to_text(path)?;

        let res = self.conn()?.execute(
            "INSERT INTO grib (model, cycle, member, fhour, path) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key.model, key.cycle, key.member.to_db(), key.forecast_hour, path_text],
        );

        match res {
            Ok(_) => {
                debug!(%key, path = path_text, "indexed");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(GribArchiveErr::DuplicateKey(key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
