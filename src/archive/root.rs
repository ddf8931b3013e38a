use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use super::Archive;

use crate::errors::GribArchiveErr;

impl Archive {
    /// Initialize a new archive, or open an existing one and make sure the index table exists.
    pub fn create(
        root: &dyn AsRef<Path>,
        db_file: &dyn AsRef<Path>,
    ) -> Result<Self, GribArchiveErr> {
        let root = root.as_ref().to_path_buf();

        std::fs::create_dir_all(&root)?; // The folder to store the grib files.
        if let Some(db_dir) = db_file.as_ref().parent() {
            std::fs::create_dir_all(db_dir)?;
        }

        let db_conn = rusqlite::Connection::open_with_flags(
            db_file.as_ref(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_CREATE,
        )?;

        db_conn.execute_batch(include_str!("root/create_index.sql"))?;
        debug!(root = %root.display(), db = %db_file.as_ref().display(), "archive created");

        Ok(Archive {
            root,
            db_conn: Mutex::new(db_conn),
        })
    }

    /// Open an existing archive.
    pub fn connect(
        root: &dyn AsRef<Path>,
        db_file: &dyn AsRef<Path>,
    ) -> Result<Self, GribArchiveErr> {
        let root = root.as_ref().to_path_buf();

        let db_conn = rusqlite::Connection::open_with_flags(
            db_file.as_ref(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
        )?;

        Self::validate_db_structure(&db_conn)?;

        Ok(Archive {
            root,
            db_conn: Mutex::new(db_conn),
        })
    }

    /// Connect if the index exists, otherwise create it.
    pub fn open(
        root: &dyn AsRef<Path>,
        db_file: &dyn AsRef<Path>,
    ) -> Result<Self, GribArchiveErr> {
        if db_file.as_ref().exists() {
            Self::connect(root, db_file)
        } else {
            Self::create(root, db_file)
        }
    }

    /// Retrieve a path to the root. Allows caller to store files in the archive.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate the database structure is correct.
    fn validate_db_structure(db_conn: &rusqlite::Connection) -> Result<(), GribArchiveErr> {
        let mut stmt = db_conn.prepare("SELECT name FROM pragma_table_info('grib')")?;

        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let expected = ["model", "cycle", "member", "fhour", "path"];
        let complete = expected.iter().all(|c| columns.iter().any(|n| n == c));
        if columns.len() != expected.len() || !complete {
            return Err(GribArchiveErr::InvalidSchema);
        }

        Ok(())
    }
}
