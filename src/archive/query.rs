use std::{collections::BTreeSet, path::PathBuf};

use rusqlite::{params, OptionalExtension};

use super::Archive;

use crate::{
    cycle::Cycle,
    errors::GribArchiveErr,
    inventory::Inventory,
    models::{ArchiveRecord, ArtifactKey, ModelProfile},
};

impl Archive {
    /// Retrieve every record in the archive, oldest cycle first.
    pub fn list_all(&self) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
                SELECT model, cycle, member, fhour, path
                FROM grib
                ORDER BY cycle ASC, model ASC, member ASC, fhour ASC
            ",
        )?;

        let vals: Result<Vec<ArchiveRecord>, GribArchiveErr> = stmt
            .query_map([], Self::parse_row_to_record)?
            .map(|res| res.map_err(GribArchiveErr::Database))
            .collect();

        vals
    }

    /// Retrieve the records of the most recent cycle of each model, or of just `model`.
    ///
    /// The most recent cycle is computed per model, so a model that has fallen behind still
    /// reports its own latest cycle.
    pub fn latest(&self, model: Option<&str>) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(include_str!("query/latest.sql"))?;

        let vals: Result<Vec<ArchiveRecord>, GribArchiveErr> = stmt
            .query_map(params![model], Self::parse_row_to_record)?
            .map(|res| res.map_err(GribArchiveErr::Database))
            .collect();

        vals
    }

    /// Retrieve the indexed path for an artifact.
    pub fn lookup(&self, key: &ArtifactKey) -> Result<Option<PathBuf>, GribArchiveErr> {
        let path: Option<String> = self
            .conn()?
            .query_row(
                "SELECT path FROM grib WHERE model = ?1 AND cycle = ?2 AND member = ?3 AND fhour = ?4",
                params![key.model, key.cycle, key.member.to_db(), key.forecast_hour],
                |row| row.get(0),
            )
            .optional()?;

        Ok(path.map(PathBuf::from))
    }

    /// Get the distinct cycles in the archive along with their model.
    pub fn distinct_cycles(
        &self,
        model: Option<&str>,
    ) -> Result<BTreeSet<(Cycle, String)>, GribArchiveErr> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
                SELECT DISTINCT cycle, model
                FROM grib
                WHERE (?1 IS NULL OR model = ?1)
            ",
        )?;

        let vals: Result<BTreeSet<(Cycle, String)>, GribArchiveErr> = stmt
            .query_map(params![model], |row| Ok((row.get(0)?, row.get(1)?)))?
            .map(|res| res.map_err(GribArchiveErr::Database))
            .collect();

        vals
    }

    /// Get the list of models in the archive.
    pub fn models(&self) -> Result<Vec<String>, GribArchiveErr> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT model FROM grib ORDER BY model")?;

        let vals: Result<Vec<String>, GribArchiveErr> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|res| res.map_err(GribArchiveErr::Database))
            .collect();

        vals
    }

    /// Count the artifacts indexed for every cycle of a model, oldest first.
    pub fn cycle_counts(&self, model: &str) -> Result<Vec<(Cycle, usize)>, GribArchiveErr> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
                SELECT cycle, COUNT(*)
                FROM grib
                WHERE model = ?1
                GROUP BY cycle
                ORDER BY cycle ASC
            ",
        )?;

        let vals: Result<Vec<(Cycle, usize)>, GribArchiveErr> = stmt
            .query_map(params![model], |row| {
                let count: i64 = row.get(1)?;
                Ok((row.get(0)?, count as usize))
            })?
            .map(|res| res.map_err(GribArchiveErr::Database))
            .collect();

        vals
    }

    /// Get an inventory of the cycles stored for a model.
    pub fn inventory(&self, profile: &ModelProfile) -> Result<Inventory, GribArchiveErr> {
        let counts = self.cycle_counts(&profile.name)?;
        Inventory::new(counts, profile)
    }
}
