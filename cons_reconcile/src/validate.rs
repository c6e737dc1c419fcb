use log::{info, warn};
use std::collections::BTreeMap;

use crate::config::*;
use crate::groups::{group_indices, group_sums};

/// Checks that the total of every group matches the sum of its components.
///
/// Groups without a total or without any component row are not checked.
pub fn validate_reconciliation(obs: &[Observation], tolerance: f64) -> Vec<TotalMismatch> {
    let groups = group_indices(obs);
    let mut res: Vec<TotalMismatch> = Vec::new();
    for (key, indices) in groups.iter() {
        let sums = group_sums(obs, indices);
        let component_sum = match (sums.total, sums.components) {
            (Some(_), Some(c)) => c,
            _ => continue,
        };
        let total_value = indices
            .iter()
            .map(|idx| &obs[*idx])
            .find(|o| o.is_total())
            .and_then(|o| o.value);
        let diff = (total_value.unwrap_or(0.0) - component_sum).abs();
        if diff >= tolerance {
            res.push(TotalMismatch {
                period: key.period,
                reference: key.reference,
                total_value,
                component_sum,
                failed_rescale: indices.iter().any(|idx| obs[*idx].failed_rescale),
            });
        }
    }
    if res.is_empty() {
        info!(
            "validate_reconciliation: all {} groups reconcile within {}",
            groups.len(),
            tolerance
        );
    } else {
        let first: Vec<GroupKey> = res
            .iter()
            .take(5)
            .map(|m| GroupKey::new(m.reference, m.period))
            .collect();
        warn!(
            "validate_reconciliation: {} groups have a total that differs from the sum of their components by at least {}. The first 5 (or less) of these are: {:?}",
            res.len(),
            tolerance,
            first
        );
    }
    res
}

/// Checks that a derived value is always preceded by a response, in the series
/// of a (reference, component question).
///
/// Only the first offending period of each series is reported.
pub fn validate_marker_precedence(obs: &[Observation]) -> Vec<MarkerAnomaly> {
    let mut series: BTreeMap<(Reference, QuestionCode), Vec<(Period, Option<&ImputationMarker>)>> =
        BTreeMap::new();
    for o in obs.iter().filter(|o| !o.is_total()) {
        series
            .entry((o.reference, o.question_code))
            .or_default()
            .push((o.period, o.marker.as_ref()));
    }

    let mut res: Vec<MarkerAnomaly> = Vec::new();
    for ((reference, question_code), rows) in series.iter_mut() {
        rows.sort_by_key(|(p, _)| *p);
        let mut seen_response = false;
        for (period, marker) in rows.iter() {
            match marker {
                Some(ImputationMarker::Response) => seen_response = true,
                Some(ImputationMarker::Derived) if !seen_response => {
                    res.push(MarkerAnomaly {
                        reference: *reference,
                        question_code: *question_code,
                        period: *period,
                    });
                    break;
                }
                _ => {}
            }
        }
    }
    if !res.is_empty() {
        let first: Vec<(Reference, QuestionCode)> = res
            .iter()
            .take(5)
            .map(|a| (a.reference, a.question_code))
            .collect();
        warn!(
            "validate_marker_precedence: {} (reference, question) series have a derived value before any response. The first 5 (or less) of these are: {:?}",
            res.len(),
            first
        );
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_marker(mut o: Observation, marker: ImputationMarker) -> Observation {
        o.marker = Some(marker);
        o
    }

    #[test]
    fn reconciled_groups_pass() {
        let obs = vec![
            Observation::response(1, 202201, 290, 9.0),
            Observation::response(1, 202201, 201, 4.0),
            Observation::response(1, 202201, 202, 5.0),
            // Not checked: no component.
            Observation::response(2, 202201, 290, 150.0),
        ];
        assert!(validate_reconciliation(&obs, 1e-3).is_empty());
    }

    #[test]
    fn mismatches_are_reported() {
        let mut failed = Observation::response(2, 202202, 290, 90.0);
        failed.failed_rescale = true;
        let mut failed_c = Observation::response(2, 202202, 201, 0.0);
        failed_c.failed_rescale = true;
        let obs = vec![
            Observation::response(1, 202201, 290, 10.0),
            Observation::response(1, 202201, 201, 4.0),
            Observation::response(1, 202201, 202, 5.9995),
            failed,
            failed_c,
        ];
        let res = validate_reconciliation(&obs, 1e-3);
        assert_eq!(
            res,
            vec![TotalMismatch {
                period: 202202,
                reference: 2,
                total_value: Some(90.0),
                component_sum: 0.0,
                failed_rescale: true,
            }]
        );
    }

    #[test]
    fn derived_after_response_passes() {
        let obs = vec![
            Observation::response(1, 202201, 201, 1.0),
            with_marker(Observation::new(1, 202202, 201), ImputationMarker::Derived),
            with_marker(Observation::new(1, 202203, 201), ImputationMarker::Derived),
        ];
        assert!(validate_marker_precedence(&obs).is_empty());
    }

    #[test]
    fn derived_without_response_is_flagged() {
        let obs = vec![
            with_marker(Observation::new(1, 202203, 201), ImputationMarker::Derived),
            with_marker(Observation::new(1, 202202, 201), ImputationMarker::Derived),
            // Totals are not checked.
            with_marker(Observation::new(1, 202202, 290), ImputationMarker::Derived),
        ];
        let res = validate_marker_precedence(&obs);
        assert_eq!(
            res,
            vec![MarkerAnomaly {
                reference: 1,
                question_code: 201,
                period: 202202,
            }]
        );
    }

    #[test]
    fn response_later_in_the_series_does_not_help() {
        let obs = vec![
            with_marker(Observation::new(1, 202201, 201), ImputationMarker::Derived),
            Observation::response(1, 202202, 201, 3.0),
        ];
        assert_eq!(validate_marker_precedence(&obs).len(), 1);
    }
}
