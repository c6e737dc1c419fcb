// Group-by primitives shared by the stages.

use std::collections::{BTreeMap, HashSet};

use crate::config::*;

/// The row indices of each reference-period group, in row order.
pub(crate) fn group_indices(obs: &[Observation]) -> BTreeMap<GroupKey, Vec<usize>> {
    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for (idx, o) in obs.iter().enumerate() {
        groups.entry(o.key()).or_default().push(idx);
    }
    groups
}

/// Sorts by reference, period and question code.
pub(crate) fn sort_observations(obs: &mut [Observation]) {
    obs.sort_by_key(|o| (o.reference, o.period, o.question_code));
}

/// The per-group sums of a group.
#[derive(PartialEq, Debug, Clone, Copy, Default)]
pub(crate) struct GroupSums {
    /// None when the group has no total row.
    pub total: Option<f64>,
    /// None when the group has no component row. Null values count as zero.
    pub components: Option<f64>,
}

pub(crate) fn group_sums(obs: &[Observation], indices: &[usize]) -> GroupSums {
    let mut sums = GroupSums::default();
    for idx in indices.iter() {
        let o = &obs[*idx];
        let v = o.value.unwrap_or(0.0);
        let acc = if o.is_total() {
            &mut sums.total
        } else {
            &mut sums.components
        };
        *acc = Some(acc.unwrap_or(0.0) + v);
    }
    sums
}

/// Fails on the first (reference, period, question) seen twice.
pub(crate) fn check_unique(obs: &[Observation]) -> Result<(), ReconcileErrors> {
    let mut seen: HashSet<(Reference, Period, QuestionCode)> = HashSet::new();
    for o in obs.iter() {
        if !seen.insert((o.reference, o.period, o.question_code)) {
            return Err(ReconcileErrors::DuplicateObservation(
                o.reference,
                o.period,
                o.question_code,
            ));
        }
    }
    Ok(())
}

pub(crate) fn status_in(status: &Option<String>, statuses: &[String]) -> bool {
    match status {
        Some(s) => statuses.iter().any(|x| x == s),
        None => false,
    }
}
