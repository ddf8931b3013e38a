//! One update pass for a model: fetch what the remote has and we do not, then evict old data.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::{
    cycle::Cycle,
    discovery::CycleDiscovery,
    errors::GribArchiveErr,
    fanout::{CycleReport, EnsembleFanout},
    fetch::Fetcher,
    locks::CancelFlag,
    models::{ArchiveRecord, ModelProfile},
    sweep::RetentionSweeper,
};

/// What a reconciliation pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Model that was reconciled.
    pub model: String,
    /// Cycles the remote service publishes, oldest first.
    pub remote_cycles: Vec<Cycle>,
    /// Cycles whose fan-out completed.
    pub fetched: Vec<(Cycle, CycleReport)>,
    /// Cycles whose fan-out stopped early, with the reason.
    pub failures: Vec<(Cycle, GribArchiveErr)>,
    /// Artifacts of the attempted cycles that are still not in the archive.
    pub unresolved: usize,
    /// Index errors that cut the pass short or left `unresolved` undercounted.
    pub local_errors: Vec<GribArchiveErr>,
    /// Records removed by the retention sweep.
    pub evicted: Vec<ArchiveRecord>,
}

/// Runs discovery, fan-out and retention for a model.
pub struct Reconciler<'a> {
    fetcher: Fetcher<'a>,
    discovery: CycleDiscovery<'a>,
    fanout: EnsembleFanout<'a>,
    sweeper: RetentionSweeper<'a>,
    cancel: CancelFlag,
}

impl<'a> Reconciler<'a> {
    /// Build a reconciler on top of `fetcher`.
    pub fn new(
        fetcher: Fetcher<'a>,
        max_workers: usize,
        retention_days: i64,
        cancel: CancelFlag,
    ) -> Self {
        Reconciler {
            fetcher,
            discovery: CycleDiscovery::new(fetcher),
            fanout: EnsembleFanout::new(fetcher, max_workers, cancel.clone()),
            sweeper: RetentionSweeper::new(fetcher.index(), fetcher.locks(), retention_days),
            cancel,
        }
    }

    /// Bring the archive for `profile` up to date as of `now`.
    ///
    /// Cycles that are published remotely but not present locally are fetched, oldest first. With
    /// `refill`, every published cycle is fanned out again so partially stored cycles get
    /// completed; artifacts already present cost nothing. A failing cycle does not stop the
    /// following ones.
    ///
    /// The retention sweep for the model always runs at the end. Index errors met before it are
    /// kept in [`ReconcileReport::local_errors`]; only a failing sweep is returned as an error.
    pub fn reconcile(
        &self,
        profile: &ModelProfile,
        now: NaiveDateTime,
        refill: bool,
    ) -> Result<ReconcileReport, GribArchiveErr> {
        let mut report = ReconcileReport {
            model: profile.name.clone(),
            ..ReconcileReport::default()
        };

        self.fetch_missing(profile, now, refill, &mut report);

        report.evicted = self.sweeper.sweep(now, Some(&profile.name))?;

        Ok(report)
    }

    /// Sweep every model in the index, including ones no longer configured.
    pub fn sweep_all(&self, now: NaiveDateTime) -> Result<Vec<ArchiveRecord>, GribArchiveErr> {
        self.sweeper.sweep(now, None)
    }

    fn fetch_missing(
        &self,
        profile: &ModelProfile,
        now: NaiveDateTime,
        refill: bool,
        report: &mut ReconcileReport,
    ) {
        let index = self.fetcher.index();

        let local: BTreeSet<Cycle> = match index.distinct_cycles(Some(&profile.name)) {
            Ok(cycles) => cycles.into_iter().map(|(cycle, _model)| cycle).collect(),
            Err(err) => {
                warn!(model = %profile.name, %err, "could not list local cycles");
                report.local_errors.push(err);
                return;
            }
        };

        report.remote_cycles = match self.discovery.discover(profile, now) {
            Ok(found) => found
                .into_iter()
                .filter_map(|(cycle, available)| if available { Some(cycle) } else { None })
                .collect(),
            Err(err) => {
                warn!(model = %profile.name, %err, "discovery failed");
                report.local_errors.push(err);
                return;
            }
        };

        let to_fetch: Vec<Cycle> = report
            .remote_cycles
            .iter()
            .copied()
            .filter(|cycle| refill || !local.contains(cycle))
            .collect();

        info!(
            model = %profile.name,
            local = local.len(),
            remote = report.remote_cycles.len(),
            to_fetch = to_fetch.len(),
            "reconciling"
        );

        for cycle in to_fetch {
            if self.cancel.is_cancelled() {
                warn!(model = %profile.name, "cancelled, skipping remaining cycles");
                break;
            }

            match self.fanout.download_cycle(profile, cycle, None) {
                Ok(cycle_report) => report.fetched.push((cycle, cycle_report)),
                Err(err) => {
                    warn!(model = %profile.name, %cycle, %err, "cycle incomplete");
                    match self.count_unresolved(profile, cycle) {
                        Ok(count) => report.unresolved += count,
                        Err(count_err) => report.local_errors.push(count_err),
                    }
                    report.failures.push((cycle, err));
                }
            }
        }
    }

    fn count_unresolved(&self, profile: &ModelProfile, cycle: Cycle) -> Result<usize, GribArchiveErr> {
        let index = self.fetcher.index();

        let mut unresolved = 0;
        for key in EnsembleFanout::keys(profile, cycle, None) {
            if index.lookup(&key)?.is_none() {
                unresolved += 1;
            }
        }

        Ok(unresolved)
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
#[cfg(test)]
mod unit {
    use super::*;
    use crate::{
        archive::unit::*,
        errors::ArtifactFailure,
        fetch::unit::naming_for,
        index::unit::FlakyIndex,
        locks::ArchiveLocks,
        models::{unit::geps, ArtifactKey, Member},
        remote::unit::FakeRemote,
    };

    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn time(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 10, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn small_profile() -> ModelProfile {
        ModelProfile {
            members: 1,
            max_forecast_hour: 48,
            ..geps()
        }
    }

    fn c(s: &str) -> Cycle {
        s.parse().unwrap()
    }

    #[test]
    fn test_fetches_only_missing_cycles() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 4, 3, CancelFlag::new());
        let profile = small_profile();

        // 2022100100 is already partly here, so it is local.
        add_file(&arch, key("GEPS", "2022100100", Member::Control, 0));

        let report = reconciler.reconcile(&profile, time(2, 11), false).unwrap();

        assert_eq!(report.remote_cycles, vec![c("2022100100"), c("2022100112"), c("2022100200")]);
        let fetched: Vec<Cycle> = report.fetched.iter().map(|(cycle, _)| *cycle).collect();
        assert_eq!(fetched, vec![c("2022100112"), c("2022100200")]);
        assert!(report.failures.is_empty());
        assert_eq!(report.unresolved, 0);
        assert!(report.evicted.is_empty());

        let cycles = arch.distinct_cycles(Some("GEPS")).unwrap();
        assert_eq!(cycles.len(), 3);
        assert_eq!(arch.list_all().unwrap().len(), 1 + 2 * 4);
    }

    #[test]
    fn test_refill_completes_partial_cycles() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 4, 3, CancelFlag::new());
        let profile = small_profile();

        fetcher
            .fetch(&profile, &key("GEPS", "2022100100", Member::Control, 0))
            .unwrap();

        let report = reconciler.reconcile(&profile, time(2, 11), true).unwrap();
        assert_eq!(report.fetched.len(), 3);
        assert_eq!(report.fetched[0].1, CycleReport { downloaded: 3, reused: 1 });
        assert_eq!(arch.list_all().unwrap().len(), 3 * 4);
    }

    #[test]
    fn test_failed_cycle_does_not_stop_later_cycles() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 1, 3, CancelFlag::new());
        let profile = small_profile();

        let broken = ArtifactKey::new("GEPS", c("2022100112"), Member::Perturbation(1), 0);
        remote.withhold(naming.remote_request_for(&profile, &broken).url());

        let report = reconciler.reconcile(&profile, time(2, 11), false).unwrap();

        let fetched: Vec<Cycle> = report.fetched.iter().map(|(cycle, _)| *cycle).collect();
        assert_eq!(fetched, vec![c("2022100100"), c("2022100200")]);
        assert_eq!(report.failures.len(), 1);
        assert_matches!(
            &report.failures[0],
            (cycle, GribArchiveErr::ArtifactFailed { key, cause: ArtifactFailure::NotAvailable })
                if *cycle == c("2022100112") && *key == broken
        );
        // Control f000 and f024 made it, both perturbation hours did not.
        assert_eq!(report.unresolved, 2);
    }

    #[test]
    fn test_sweep_runs_after_failures() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_nothing();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 4, 3, CancelFlag::new());
        let profile = small_profile();

        fill_test_archive(&arch);

        // Nothing is published, threshold is 2022100112.
        let report = reconciler.reconcile(&profile, time(4, 12), false).unwrap();
        assert!(report.remote_cycles.is_empty());
        assert_eq!(report.evicted.len(), 2);
        assert!(report
            .evicted
            .iter()
            .all(|r| r.key.model == "GEPS" && r.key.cycle == c("2022100100")));
    }

    #[test]
    fn test_cancelled_run_still_sweeps() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);
        let cancel = CancelFlag::new();
        let reconciler = Reconciler::new(fetcher, 4, 3, cancel.clone());

        cancel.cancel();
        let report = reconciler.reconcile(&small_profile(), time(2, 11), false).unwrap();

        assert!(report.fetched.is_empty());
        assert!(report.failures.is_empty());
        assert!(arch.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_index_errors_do_not_skip_the_sweep() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let stale = add_file(&arch, key("GEPS", "2022090100", Member::Control, 0));
        let index = FlakyIndex {
            fail_lookup: |k| k.member != Member::Control,
            ..FlakyIndex::new(&arch)
        };
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&index, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 1, 3, CancelFlag::new());

        let report = reconciler.reconcile(&small_profile(), time(2, 11), false).unwrap();

        assert_eq!(report.remote_cycles.len(), 3);
        assert_eq!(report.failures.len(), 3);
        assert_matches!(&report.failures[0], (_, GribArchiveErr::LogicError(_)));
        assert_eq!(report.local_errors.len(), 3);
        assert_eq!(report.evicted, vec![stale.clone()]);
        assert!(arch.lookup(&stale.key).unwrap().is_none());
    }

    #[test]
    fn test_listing_error_still_sweeps() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let stale = add_file(&arch, key("GEPS", "2022090100", Member::Control, 0));
        let index = FlakyIndex {
            fail_distinct: true,
            ..FlakyIndex::new(&arch)
        };
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&index, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 4, 3, CancelFlag::new());

        let report = reconciler.reconcile(&small_profile(), time(2, 11), false).unwrap();

        assert!(report.remote_cycles.is_empty());
        assert_eq!(remote.calls(), 0);
        assert_matches!(report.local_errors.as_slice(), [GribArchiveErr::LogicError(_)]);
        assert_eq!(report.evicted, vec![stale]);
    }

    #[test]
    fn test_discovery_error_still_sweeps() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let stale = add_file(&arch, key("GEPS", "2022090100", Member::Control, 0));
        let index = FlakyIndex {
            fail_lookup: |_| true,
            ..FlakyIndex::new(&arch)
        };
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_everything();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&index, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 4, 3, CancelFlag::new());

        let report = reconciler.reconcile(&small_profile(), time(2, 11), false).unwrap();

        assert!(report.remote_cycles.is_empty());
        assert!(report.fetched.is_empty());
        assert_eq!(report.local_errors.len(), 1);
        assert_eq!(report.evicted, vec![stale]);
    }

    #[test]
    fn test_sweep_all_reaches_unconfigured_models() {
        let TestArchive { tmp: _tmp, arch } = create_test_archive().unwrap();
        let retired = add_file(&arch, key("RETIRED", "2022090100", Member::Control, 0));
        let naming = naming_for(&arch);
        let remote = FakeRemote::serving_nothing();
        let locks = ArchiveLocks::new();
        let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);
        let reconciler = Reconciler::new(fetcher, 4, 3, CancelFlag::new());

        let report = reconciler.reconcile(&small_profile(), time(2, 11), false).unwrap();
        assert!(report.evicted.is_empty());
        assert!(arch.lookup(&retired.key).unwrap().is_some());

        assert_eq!(reconciler.sweep_all(time(2, 11)).unwrap(), vec![retired.clone()]);
        assert!(!retired.path.exists());
    }
}
