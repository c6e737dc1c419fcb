use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::groups::status_in;

fn statuses_by_key(contributors: &[ContributorRecord]) -> BTreeMap<GroupKey, Option<&String>> {
    let mut res: BTreeMap<GroupKey, Option<&String>> = BTreeMap::new();
    for c in contributors.iter() {
        res.entry(c.key()).or_insert(c.status.as_ref());
    }
    res
}

/// The groups whose contributor has a non-response status, but that still have
/// responses.
///
/// These are reported, not removed.
pub fn validate_snapshot(
    responses: &[Observation],
    contributors: &[ContributorRecord],
    non_response_statuses: &[String],
) -> Vec<GroupKey> {
    let non_responding: BTreeSet<GroupKey> = contributors
        .iter()
        .filter(|c| status_in(&c.status, non_response_statuses))
        .map(|c| c.key())
        .collect();
    let mut num_rows = 0;
    let mut keys: BTreeSet<GroupKey> = BTreeSet::new();
    for r in responses.iter() {
        if non_responding.contains(&r.key()) {
            num_rows += 1;
            keys.insert(r.key());
        }
    }
    let res: Vec<GroupKey> = keys.into_iter().collect();
    if !res.is_empty() {
        warn!(
            "validate_snapshot: there are {} period and reference groupings ({} responses) that are listed as non-response statuses in contributors but are present in responses. The first 5 (or less) of these are: {:?}",
            res.len(),
            num_rows,
            res.iter().take(5).collect::<Vec<_>>()
        );
    }
    res
}

/// Separates the responses of the contributors in error.
///
/// In the live state, nothing is separated. In the frozen state, the responses
/// whose contributor has one of the `error_statuses` are removed, and returned
/// as the second element with their value also stored as `live_value`.
pub fn split_live_or_frozen(
    responses: Vec<Observation>,
    contributors: &[ContributorRecord],
    state: ProcessingState,
    error_statuses: &[String],
) -> (Vec<Observation>, Vec<Observation>) {
    if state == ProcessingState::Live {
        return (responses, Vec::new());
    }
    let in_error: BTreeSet<GroupKey> = contributors
        .iter()
        .filter(|c| status_in(&c.status, error_statuses))
        .map(|c| c.key())
        .collect();
    let (mut frozen, kept): (Vec<Observation>, Vec<Observation>) = responses
        .into_iter()
        .partition(|r| in_error.contains(&r.key()));
    for o in frozen.iter_mut() {
        o.live_value = o.value;
    }
    info!(
        "split_live_or_frozen: {} responses of {} contributors in error treated as non-response",
        frozen.len(),
        in_error.len()
    );
    (kept, frozen)
}

/// Attaches the values separated by `split_live_or_frozen` to the matching rows.
pub fn attach_live_values(mut obs: Vec<Observation>, frozen: &[Observation]) -> Vec<Observation> {
    if frozen.is_empty() {
        return obs;
    }
    let live: BTreeMap<(Reference, Period, QuestionCode), Option<f64>> = frozen
        .iter()
        .map(|o| ((o.reference, o.period, o.question_code), o.live_value))
        .collect();
    for o in obs.iter_mut() {
        if let Some(v) = live.get(&(o.reference, o.period, o.question_code)) {
            o.live_value = *v;
        }
    }
    obs
}

/// Copies the status of the contributor onto the responses.
pub fn attach_contributor_status(
    mut responses: Vec<Observation>,
    contributors: &[ContributorRecord],
) -> Vec<Observation> {
    let statuses = statuses_by_key(contributors);
    for r in responses.iter_mut() {
        if let Some(Some(s)) = statuses.get(&r.key()) {
            r.status = Some((*s).clone());
        }
    }
    responses
}

fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    match s.parse::<i64>() {
        Ok(x) => Some(x),
        Err(_) => s
            .parse::<f64>()
            .ok()
            .filter(|x| x.fract() == 0.0 && x.is_finite())
            .map(|x| x as i64),
    }
}

/// Bins the integer attribute `column` with the sizebands, and stores the
/// `lower-upper` label of the band as the imputation class.
///
/// All the bands are closed intervals. The first band containing the value is
/// used. Every row must fall into a band.
pub fn derive_imputation_class(
    mut obs: Vec<Observation>,
    sizebands: &[Sizeband],
    column: &str,
) -> Result<Vec<Observation>, ReconcileErrors> {
    for b in sizebands.iter() {
        if b.lower > b.upper {
            return Err(ReconcileErrors::InvalidSizeband(b.lower, b.upper));
        }
    }
    let labels: Vec<String> = sizebands.iter().map(|b| b.label()).collect();
    for o in obs.iter_mut() {
        let raw = o.attributes.get(column);
        let band_idx = raw
            .and_then(|s| parse_integer(s))
            .and_then(|x| sizebands.iter().position(|b| b.contains(x)));
        match band_idx {
            Some(idx) => {
                o.imputation_class = Some(labels[idx].clone());
            }
            None => {
                return Err(ReconcileErrors::UnbinnedValue {
                    reference: o.reference,
                    period: o.period,
                    column: column.to_string(),
                    value: raw.cloned(),
                });
            }
        }
    }
    debug!(
        "derive_imputation_class: {} rows binned into {:?}",
        obs.len(),
        labels
    );
    Ok(obs)
}
