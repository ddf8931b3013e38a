//! Age based eviction.

use chrono::{Duration, NaiveDateTime};
use tracing::info;

use crate::{
    cycle::Cycle, errors::GribArchiveErr, index::ArchiveIndex, locks::ArchiveLocks,
    models::ArchiveRecord,
};

/// Deletes records, and their files, for cycles older than a retention window.
pub struct RetentionSweeper<'a> {
    index: &'a dyn ArchiveIndex,
    locks: &'a ArchiveLocks,
    retention: Duration,
}

impl<'a> RetentionSweeper<'a> {
    /// Create a sweeper that keeps `retention_days` of data.
    pub fn new(index: &'a dyn ArchiveIndex, locks: &'a ArchiveLocks, retention_days: i64) -> Self {
        RetentionSweeper {
            index,
            locks,
            retention: Duration::days(retention_days),
        }
    }

    /// Records with a cycle before this are evicted by a sweep at `now`.
    pub fn threshold(&self, now: NaiveDateTime) -> Cycle {
        Cycle::containing(now - self.retention)
    }

    /// Evict everything older than the retention window, optionally for a single model.
    ///
    /// Waits for in-flight fetches to finish and keeps new ones out until it is done.
    pub fn sweep(
        &self,
        now: NaiveDateTime,
        model: Option<&str>,
    ) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        let threshold = self.threshold(now);

        let _gate = self.locks.sweep_gate()?;
        let evicted = self.index.delete_older_than(threshold, model)?;

        info!(
            %threshold,
            model = model.unwrap_or("all"),
            evicted = evicted.len(),
            "retention sweep"
        );

        Ok(evicted)
    }
}

#[cfg(test)]
mod unit {
    use super::*;
    use crate::{archive::unit::*, models::Member};

    use chrono::NaiveDate;

    fn time(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 10, d)
            .unwrap()
            .and_hms_opt(h, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_threshold() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let locks = ArchiveLocks::new();
        let sweeper = RetentionSweeper::new(&arch, &locks, 3);

        assert_eq!(sweeper.threshold(time(4, 12)).to_string(), "2022100112");
    }

    #[test]
    fn test_sweep_empty_index() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let locks = ArchiveLocks::new();
        let sweeper = RetentionSweeper::new(&arch, &locks, 3);

        assert!(sweeper.sweep(time(10, 0), None).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_evicts_old_cycles() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        fill_test_archive(&arch);
        let locks = ArchiveLocks::new();
        let sweeper = RetentionSweeper::new(&arch, &locks, 3);

        // Threshold 2022100112: only the 00Z GEPS run goes.
        let evicted = sweeper.sweep(time(4, 12), Some("GEPS")).unwrap();
        assert_eq!(evicted.len(), 2);
        assert!(evicted.iter().all(|r| !r.path.exists()));

        // Already pruned.
        assert!(sweeper.sweep(time(4, 12), None).unwrap().is_empty());
        assert!(arch
            .lookup(&key("GEFS", "2022100112", Member::Control, 0))
            .unwrap()
            .is_some());
    }
}
