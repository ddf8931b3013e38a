//! Ensemble models, their members, and the keys of the artifacts stored in the archive.

use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{NaiveDateTime, Timelike};

use crate::{cycle::Cycle, errors::GribArchiveErr};

/// One simulation within an ensemble run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Member {
    /// The unperturbed control run.
    Control,
    /// A numbered perturbation, starting at 1.
    Perturbation(u32),
}

impl Member {
    // How the control member is stored in the index.
    const CONTROL_DB_VALUE: i64 = -1;

    /// Create a perturbation member, rejecting 0.
    pub fn perturbation(index: u32) -> Result<Self, GribArchiveErr> {
        if index == 0 {
            Err(GribArchiveErr::InvalidMember(0))
        } else {
            Ok(Member::Perturbation(index))
        }
    }

    /// Decode the integer representation used by the index and the command line.
    pub fn from_db(value: i64) -> Result<Self, GribArchiveErr> {
        match value {
            Self::CONTROL_DB_VALUE => Ok(Member::Control),
            v if v > 0 && v <= i64::from(u32::MAX) => Ok(Member::Perturbation(v as u32)),
            v => Err(GribArchiveErr::InvalidMember(v)),
        }
    }

    /// Encode as the integer representation used by the index.
    pub fn to_db(self) -> i64 {
        match self {
            Member::Control => Self::CONTROL_DB_VALUE,
            Member::Perturbation(idx) => i64::from(idx),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Member::Control => write!(f, "control"),
            Member::Perturbation(idx) => write!(f, "p{:02}", idx),
        }
    }
}

impl FromStr for Member {
    type Err = GribArchiveErr;

    /// Accepts `control`, `-1`, a positive perturbation number, or the `pNN` display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("control") {
            return Ok(Member::Control);
        }

        let digits = s.strip_prefix('p').unwrap_or(s);
        let value: i64 = digits
            .parse()
            .map_err(|_| GribArchiveErr::InvalidMember(i64::MIN))?;

        if digits.len() != s.len() && value == Self::CONTROL_DB_VALUE {
            return Err(GribArchiveErr::InvalidMember(value));
        }

        Self::from_db(value)
    }
}

/// Static description of an ensemble model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelProfile {
    /// Name of the model, e.g. GEPS.
    pub name: String,
    /// Number of perturbed members, not counting the control.
    pub members: u32,
    /// Forecast hours are fetched up to, but not including, this hour.
    pub max_forecast_hour: u32,
    /// Step between fetched forecast hours.
    pub forecast_hour_increment: u32,
    /// Prefix of perturbed member names on the remote service, e.g. `cmc_gep`.
    pub member_prefix: String,
    /// Prefix of the control member name on the remote service, e.g. `cmc_gec`.
    pub control_prefix: String,
    /// Hours between model runs.
    pub cycle_interval: u32,
    /// Hour of the first run of the day.
    pub cycle_base: u32,
    /// Template of the remote request URL, see [`NamingScheme`](crate::NamingScheme).
    pub url_pattern: String,
}

impl ModelProfile {
    /// The forecast hours fetched for every member: `0, inc, 2*inc, ...` strictly below the max.
    pub fn forecast_hours(&self) -> impl Iterator<Item = u32> {
        let step = self.forecast_hour_increment.max(1) as usize;
        (0..self.max_forecast_hour).step_by(step)
    }

    /// Every member of the ensemble, control first.
    pub fn all_members(&self) -> impl Iterator<Item = Member> {
        std::iter::once(Member::Control).chain((1..=self.members).map(Member::Perturbation))
    }

    /// Number of artifacts in one complete cycle.
    pub fn artifacts_per_cycle(&self) -> usize {
        (self.members as usize + 1) * self.forecast_hours().count()
    }

    /// The most recent run boundary at or before `time`.
    pub fn cycle_at_or_before(&self, time: NaiveDateTime) -> Cycle {
        let interval = i64::from(self.cycle_interval.max(1));
        let runs_completed = i64::from(time.hour()) / interval;

        let mut start = Cycle::containing(time)
            .offset_hours(-i64::from(time.hour()))
            .offset_hours(i64::from(self.cycle_base) + interval * runs_completed);

        // A base hour later in the day than `time` would put us in the future.
        while start.init_time() > time {
            start = start.offset_hours(-interval);
        }

        start
    }

    /// Create an iterator of all the model runs from the boundary at or before `start` up to and
    /// including `end`.
    pub fn all_runs(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> impl Iterator<Item = Cycle> {
        let delta_t = i64::from(self.cycle_interval.max(1));
        let first = self.cycle_at_or_before(start);

        let steps: i64 = if first.init_time() > end {
            -1
        } else {
            (end - first.init_time()).num_hours() / delta_t
        };

        (0..=steps).map(move |step| first.offset_hours(step * delta_t))
    }
}

/// The natural key of one artifact in the archive.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ArtifactKey {
    /// Model name.
    pub model: String,
    /// Model run.
    pub cycle: Cycle,
    /// Ensemble member.
    pub member: Member,
    /// Hours after the cycle's initialization time.
    pub forecast_hour: u32,
}

impl ArtifactKey {
    /// Build a key.
    pub fn new(model: &str, cycle: Cycle, member: Member, forecast_hour: u32) -> Self {
        ArtifactKey {
            model: model.to_owned(),
            cycle,
            member,
            forecast_hour,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} f{:03}",
            self.model, self.cycle, self.member, self.forecast_hour
        )
    }
}

/// An artifact known to the index along with where it lives on disk.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArchiveRecord {
    /// The artifact.
    pub key: ArtifactKey,
    /// Where the file is stored.
    pub path: PathBuf,
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
