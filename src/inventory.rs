use crate::{cycle::Cycle, errors::GribArchiveErr, models::ModelProfile};

/// Inventory lists first & last cycles of a model in the archive. It also contains a list of
/// cycles that are missing between the first and last, and the cycles that are only partially
/// stored.
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq)]
pub struct Inventory {
    pub model: String,
    pub first: Cycle,
    pub last: Cycle,
    pub missing: Vec<Cycle>,
    /// Cycles with fewer artifacts than a complete cycle has, with the number stored.
    pub incomplete: Vec<(Cycle, usize)>,
}

impl Inventory {
    /// Create a new inventory. Assume the provided counts are sorted from earliest to latest.
    pub fn new(
        cycle_counts: impl IntoIterator<Item = (Cycle, usize)>,
        profile: &ModelProfile,
    ) -> Result<Self, GribArchiveErr> {
        let mut cycle_counts = cycle_counts.into_iter();
        let delta_hours = i64::from(profile.cycle_interval.max(1));
        let expected = profile.artifacts_per_cycle();

        let (first, first_count) = cycle_counts
            .next()
            .ok_or(GribArchiveErr::NotInIndex)?;

        let mut missing = vec![];
        let mut incomplete = vec![];
        if first_count < expected {
            incomplete.push((first, first_count));
        }

        let mut next_cycle = first;

        for (cycle, count) in cycle_counts {
            next_cycle = next_cycle.offset_hours(delta_hours);

            while next_cycle < cycle {
                missing.push(next_cycle);
                next_cycle = next_cycle.offset_hours(delta_hours);
            }

            // Off-schedule cycles do not shift the expected schedule.
            next_cycle = cycle;

            if count < expected {
                incomplete.push((cycle, count));
            }
        }

        Ok(Inventory {
            model: profile.name.clone(),
            first,
            last: next_cycle,
            missing,
            incomplete,
        })
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
