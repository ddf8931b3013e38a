//! Find out which cycles the remote service is publishing right now.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, warn};

use crate::{
    cycle::Cycle,
    errors::GribArchiveErr,
    fetch::{FetchOutcome, Fetcher},
    models::{ArtifactKey, Member, ModelProfile},
};

/// Probes the remote service over a sliding window of recent cycles.
pub struct CycleDiscovery<'a> {
    fetcher: Fetcher<'a>,
}

impl<'a> CycleDiscovery<'a> {
    /// How far back before `now` the window starts.
    pub const LOOKBACK_DAYS: i64 = 1;

    /// Create a discovery that probes through `fetcher`.
    pub fn new(fetcher: Fetcher<'a>) -> Self {
        CycleDiscovery { fetcher }
    }

    /// The cycles to probe, oldest first: from the run boundary at or before one day before
    /// `now`, every `cycle_interval` hours, up to and including `now`.
    pub fn candidate_cycles(profile: &ModelProfile, now: NaiveDateTime) -> Vec<Cycle> {
        profile
            .all_runs(now - Duration::days(Self::LOOKBACK_DAYS), now)
            .collect()
    }

    /// Availability of each candidate cycle, keyed oldest to newest.
    ///
    /// A cycle is available when forecast hour 0 of its control member can be fetched. A transient
    /// failure counts as not available for this pass.
    pub fn discover(
        &self,
        profile: &ModelProfile,
        now: NaiveDateTime,
    ) -> Result<BTreeMap<Cycle, bool>, GribArchiveErr> {
        let mut availability = BTreeMap::new();

        for cycle in Self::candidate_cycles(profile, now) {
            let available = self.probe(profile, cycle, Member::Control, 0)?;
            debug!(model = %profile.name, %cycle, available, "probed");
            availability.insert(cycle, available);
        }

        Ok(availability)
    }

    /// Check whether a single artifact is published, leaving the archive as it was found.
    ///
    /// An artifact already in the archive is reported available without touching the network. One
    /// that is downloaded by the probe is removed again, record and file.
    pub fn probe(
        &self,
        profile: &ModelProfile,
        cycle: Cycle,
        member: Member,
        forecast_hour: u32,
    ) -> Result<bool, GribArchiveErr> {
        let key = ArtifactKey::new(&profile.name, cycle, member, forecast_hour);

        match self.fetcher.probe(profile, &key)? {
            FetchOutcome::Reused(_) | FetchOutcome::Downloaded(_) => Ok(true),
            FetchOutcome::NotAvailable => Ok(false),
            FetchOutcome::TransientFailure(msg) => {
                warn!(%key, %msg, "probe failed, treating cycle as not available");
                Ok(false)
            }
        }
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
