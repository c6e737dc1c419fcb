use log::{debug, info};
use std::collections::BTreeSet;

use crate::config::*;
use crate::groups::{group_indices, group_sums, status_in};

/// Flags the 290 special cases: a total was reported, but the components are
/// all zero or missing.
///
/// Only groups with a total row are candidates. If `statuses` is not empty, only
/// groups whose status is one of them are candidates. The flag is set (or reset)
/// on every row of the group.
pub fn flag_290_case(mut obs: Vec<Observation>, statuses: &[String]) -> Vec<Observation> {
    let groups = group_indices(&obs);
    let mut num_flagged = 0;
    for (key, indices) in groups.iter() {
        let sums = group_sums(&obs, indices);
        let eligible = statuses.is_empty()
            || indices
                .iter()
                .any(|idx| status_in(&obs[*idx].status, statuses));
        let flagged = eligible
            && match (sums.total, sums.components) {
                (None, _) => false,
                // A missing breakdown never equals the total.
                (Some(_), None) => true,
                (Some(total), Some(components)) => components == 0.0 && total != components,
            };
        if flagged {
            debug!("flag_290_case: flagging {} sums: {:?}", key, sums);
            num_flagged += 1;
        }
        for idx in indices.iter() {
            obs[*idx].is_total_flagged = flagged;
        }
    }
    info!(
        "flag_290_case: {} of {} groups are 290 special cases",
        num_flagged,
        groups.len()
    );
    obs
}

/// Flags the groups that only contain a total, and where that total is zero.
pub fn flag_total_only_and_zero(mut obs: Vec<Observation>) -> Vec<Observation> {
    let groups = group_indices(&obs);
    let mut num_flagged = 0;
    for (_, indices) in groups.iter() {
        let sums = group_sums(&obs, indices);
        let flagged = sums.components.is_none() && sums.total == Some(0.0);
        if flagged {
            num_flagged += 1;
        }
        for idx in indices.iter() {
            obs[*idx].is_total_only_and_zero = flagged;
        }
    }
    info!(
        "flag_total_only_and_zero: {} groups only have a zero total",
        num_flagged
    );
    obs
}

/// The groups where the components are not expected: 290 special cases where the
/// total was answered, and zero totals without components.
pub fn total_only_groups(obs: &[Observation]) -> BTreeSet<GroupKey> {
    obs.iter()
        .filter(|o| (o.is_total_flagged && o.is_total()) || o.is_total_only_and_zero)
        .map(|o| o.key())
        .collect()
}

/// The keys of the groups flagged by `flag_290_case` and `flag_total_only_and_zero`.
pub fn classified_groups(obs: &[Observation]) -> (BTreeSet<GroupKey>, BTreeSet<GroupKey>) {
    let flagged = obs
        .iter()
        .filter(|o| o.is_total_flagged)
        .map(|o| o.key())
        .collect();
    let zero_totals = obs
        .iter()
        .filter(|o| o.is_total_only_and_zero)
        .map(|o| o.key())
        .collect();
    (flagged, zero_totals)
}

/// Sets the classification flags of every row from the group keys.
///
/// Rows added after the classification (expanded, skipped or imputed rows) get
/// the flags of their group.
pub fn broadcast_group_flags(
    mut obs: Vec<Observation>,
    flagged: &BTreeSet<GroupKey>,
    zero_totals: &BTreeSet<GroupKey>,
) -> Vec<Observation> {
    for o in obs.iter_mut() {
        let key = o.key();
        o.is_total_flagged = flagged.contains(&key);
        o.is_total_only_and_zero = zero_totals.contains(&key);
    }
    obs
}
