//! Fetch every artifact of a model run.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    thread,
};

use tracing::{debug, info, warn};

use crate::{
    cycle::Cycle,
    errors::{ArtifactFailure, GribArchiveErr},
    fetch::{FetchOutcome, Fetcher},
    locks::CancelFlag,
    models::{ArtifactKey, Member, ModelProfile},
};

/// Counts from a fan-out that completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Artifacts downloaded by this fan-out.
    pub downloaded: usize,
    /// Artifacts that were already in the archive.
    pub reused: usize,
}

/// Fetches all members and forecast hours of a cycle with a bounded pool of workers.
pub struct EnsembleFanout<'a> {
    fetcher: Fetcher<'a>,
    max_workers: usize,
    cancel: CancelFlag,
}

impl<'a> EnsembleFanout<'a> {
    /// Upper limit on simultaneous fetches.
    pub const MAX_WORKERS: usize = 8;

    /// Create a fan-out running at most `max_workers` fetches at a time, clamped to
    /// `1..=MAX_WORKERS`.
    pub fn new(fetcher: Fetcher<'a>, max_workers: usize, cancel: CancelFlag) -> Self {
        EnsembleFanout {
            fetcher,
            max_workers: max_workers.clamp(1, Self::MAX_WORKERS),
            cancel,
        }
    }

    /// The artifacts of `cycle` in the order they are attempted: the control member across all
    /// forecast hours, then each perturbed member across all forecast hours. With `member` set,
    /// only that member's forecast hours.
    pub fn keys(profile: &ModelProfile, cycle: Cycle, member: Option<Member>) -> Vec<ArtifactKey> {
        let members: Vec<Member> = match member {
            Some(member) => vec![member],
            None => profile.all_members().collect(),
        };

        members
            .into_iter()
            .flat_map(|member| {
                profile
                    .forecast_hours()
                    .map(move |fh| ArtifactKey::new(&profile.name, cycle, member, fh))
            })
            .collect()
    }

    /// Make sure every artifact of `cycle` is in the archive, optionally for a single member.
    ///
    /// Stops handing out work at the first artifact that is not available, fails transiently, or
    /// when cancelled. Artifacts fetched before that stay in the archive. The error names the
    /// earliest failing artifact in attempt order.
    pub fn download_cycle(
        &self,
        profile: &ModelProfile,
        cycle: Cycle,
        member: Option<Member>,
    ) -> Result<CycleReport, GribArchiveErr> {
        let keys = Self::keys(profile, cycle, member);
        let workers = self.max_workers.min(keys.len());

        info!(model = %profile.name, %cycle, artifacts = keys.len(), workers, "fetching cycle");

        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let downloaded = AtomicUsize::new(0);
        let reused = AtomicUsize::new(0);
        let failures: Mutex<Vec<(usize, ArtifactFailure)>> = Mutex::new(vec![]);
        let hard_error: Mutex<Option<(usize, GribArchiveErr)>> = Mutex::new(None);

        let record_failure = |idx: usize, cause: ArtifactFailure| {
            abort.store(true, Ordering::SeqCst);
            let mut failures = match failures.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            failures.push((idx, cause));
        };

        let worker = || loop {
            if abort.load(Ordering::SeqCst) {
                break;
            }

            let idx = next.fetch_add(1, Ordering::SeqCst);
            let Some(key) = keys.get(idx) else {
                break;
            };

            if self.cancel.is_cancelled() {
                record_failure(idx, ArtifactFailure::Cancelled);
                break;
            }

            match self.fetcher.fetch(profile, key) {
                Ok(FetchOutcome::Downloaded(_)) => {
                    downloaded.fetch_add(1, Ordering::SeqCst);
                }
                Ok(FetchOutcome::Reused(_)) => {
                    reused.fetch_add(1, Ordering::SeqCst);
                }
                Ok(FetchOutcome::NotAvailable) => {
                    record_failure(idx, ArtifactFailure::NotAvailable);
                }
                Ok(FetchOutcome::TransientFailure(msg)) => {
                    record_failure(idx, ArtifactFailure::Transient(msg));
                }
                Err(err) => {
                    abort.store(true, Ordering::SeqCst);
                    let mut slot = match hard_error.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if slot.as_ref().map(|(first, _)| idx < *first).unwrap_or(true) {
                        *slot = Some((idx, err));
                    }
                }
            }
        };

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(worker);
            }
        });

        let hard_error = hard_error
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((idx, err)) = hard_error {
            warn!(key = %keys[idx], %err, "fan-out stopped by a local error");
            return Err(err);
        }

        let first_failure = failures
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .min_by_key(|(idx, _)| *idx);

        if let Some((idx, cause)) = first_failure {
            let key = keys[idx].clone();
            warn!(%key, kind = cause.kind(), %cause, "fan-out aborted");
            return Err(GribArchiveErr::ArtifactFailed { key, cause });
        }

        let report = CycleReport {
            downloaded: downloaded.into_inner(),
            reused: reused.into_inner(),
        };
        debug!(model = %profile.name, %cycle, ?report, "cycle complete");

        Ok(report)
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
