//! Removing data from the archive in bulk: age based sweeps and index cleaning.

use std::path::{Path, PathBuf};

use rusqlite::params;
use tracing::{info, warn};

use super::Archive;

use crate::{
    cycle::Cycle,
    errors::GribArchiveErr,
    fetch::Fetcher,
    models::{ArchiveRecord, ArtifactKey},
};

/// What [`Archive::clean`] removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Records whose file was missing.
    pub orphans: Vec<ArtifactKey>,
    /// Leftover temporary files from interrupted downloads.
    pub stray_files: Vec<PathBuf>,
}

impl Archive {
    /// Delete every record older than `threshold`, optionally for a single model, and the files
    /// they point to.
    ///
    /// The records are selected and deleted in one transaction. File removal happens afterwards
    /// and is best effort: a file that cannot be removed is logged and skipped, the record is gone
    /// either way.
    pub fn delete_older_than(
        &self,
        threshold: Cycle,
        model: Option<&str>,
    ) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        let mut conn = self.conn()?;

        let removed = {
            let tx = conn.transaction()?;

            let removed: Vec<ArchiveRecord> = {
                let mut stmt = tx.prepare(
                    "
                        SELECT model, cycle, member, fhour, path
                        FROM grib
                        WHERE cycle < ?1 AND (?2 IS NULL OR model = ?2)
                        ORDER BY cycle ASC, model ASC, member ASC, fhour ASC
                    ",
                )?;

                let vals: Result<Vec<ArchiveRecord>, rusqlite::Error> = stmt
                    .query_map(params![threshold, model], Self::parse_row_to_record)?
                    .collect();
                vals?
            };

            tx.execute(
                "DELETE FROM grib WHERE cycle < ?1 AND (?2 IS NULL OR model = ?2)",
                params![threshold, model],
            )?;
            tx.commit()?;

            removed
        };

        for record in &removed {
            match std::fs::remove_file(&record.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(key = %record.key, path = %record.path.display(), %err, "unable to remove file");
                }
            }
            remove_dir_if_empty(record.path.parent());
        }

        drop(conn);

        if !removed.is_empty() {
            info!(%threshold, model = model.unwrap_or("all"), count = removed.len(), "deleted old records");
        }

        Ok(removed)
    }

    /// Validate files listed in the index are in the archive too, if not remove them from the
    /// index. Also removes temporary files left behind by interrupted downloads.
    pub fn clean(&self) -> Result<CleanReport, GribArchiveErr> {
        let records = self.list_all()?;

        let orphans: Vec<ArtifactKey> = records
            .into_iter()
            .filter(|record| !record.path.is_file())
            .map(|record| record.key)
            .collect();

        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            {
                let mut del_stmt = tx.prepare(
                    "DELETE FROM grib WHERE model = ?1 AND cycle = ?2 AND member = ?3 AND fhour = ?4",
                )?;

                for key in &orphans {
                    del_stmt.execute(params![
                        key.model,
                        key.cycle,
                        key.member.to_db(),
                        key.forecast_hour
                    ])?;
                    info!(%key, "removing orphaned record from index");
                }
            }
            tx.commit()?;
        }

        let mut stray_files = vec![];
        collect_temp_files(self.root(), &mut stray_files)?;
        for path in &stray_files {
            match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "removed stray temporary file"),
                Err(err) => warn!(path = %path.display(), %err, "unable to remove stray file"),
            }
        }

        self.conn()?.execute_batch("VACUUM")?;

        Ok(CleanReport {
            orphans,
            stray_files,
        })
    }
}

fn collect_temp_files(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), GribArchiveErr> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)?.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            collect_temp_files(&path, found)?;
        } else if path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(Fetcher::TEMP_PREFIX))
            .unwrap_or(false)
        {
            found.push(path);
        }
    }

    Ok(())
}

fn remove_dir_if_empty(dir: Option<&Path>) {
    if let Some(dir) = dir {
        // Fails harmlessly if the directory still has files in it.
        let _ = std::fs::remove_dir(dir);
    }
}
