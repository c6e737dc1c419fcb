use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::groups::{group_indices, status_in};

fn created_row(template: &Observation, question_code: QuestionCode, flag: SkipFlag) -> Observation {
    let mut o = Observation::new(template.reference, template.period, question_code);
    o.value = Some(0.0);
    match flag {
        SkipFlag::Skipped => {
            o.is_skipped = true;
            o.marker = Some(ImputationMarker::Response);
        }
        SkipFlag::DerivedZero => {
            o.is_derived_zero = true;
            o.marker = Some(ImputationMarker::Derived);
        }
    }
    o
}

/// Forward fills the status and the given attributes, in row order.
fn forward_fill(rows: &mut [Observation], fill_columns: &[String]) {
    let mut last_status: Option<String> = None;
    let mut last_values: BTreeMap<&str, String> = BTreeMap::new();
    for o in rows.iter_mut() {
        match &o.status {
            Some(s) => last_status = Some(s.clone()),
            None => o.status = last_status.clone(),
        }
        for col in fill_columns.iter() {
            match o.attributes.get(col) {
                Some(v) => {
                    last_values.insert(col.as_str(), v.clone());
                }
                None => {
                    if let Some(v) = last_values.get(col.as_str()) {
                        o.attributes.insert(col.clone(), v.clone());
                    }
                }
            }
        }
    }
}

/// Creates the questions that a group with one of the given statuses did not
/// answer, as zero values.
///
/// The created rows carry the given flag. In these groups, the status and the
/// `fill_columns` attributes are forward filled so that the new rows inherit the
/// business metadata of the group. Other groups are passed through unchanged.
///
/// Groups that were classified as total-only (a flagged total, or a zero total
/// without components) are never in scope.
pub fn materialize_skips(
    obs: Vec<Observation>,
    all_questions: &[QuestionCode],
    status_filter: &[String],
    flag: SkipFlag,
    fill_columns: &[String],
) -> Vec<Observation> {
    let groups = group_indices(&obs);
    let in_scope: BTreeSet<GroupKey> = groups
        .iter()
        .filter(|(_, indices)| {
            let total_only = indices.iter().any(|idx| {
                let o = &obs[*idx];
                (o.is_total() && o.is_total_flagged) || o.is_total_only_and_zero
            });
            !total_only
                && indices
                    .iter()
                    .any(|idx| status_in(&obs[*idx].status, status_filter))
        })
        .map(|(key, _)| *key)
        .collect();

    let mut slots: Vec<Option<Observation>> = obs.into_iter().map(Some).collect();
    let mut res: Vec<Observation> = Vec::with_capacity(slots.len());
    let mut num_created = 0;
    for (key, indices) in groups.iter() {
        let mut rows: Vec<Observation> = indices
            .iter()
            .filter_map(|idx| slots[*idx].take())
            .collect();
        if in_scope.contains(key) {
            let observed: BTreeSet<QuestionCode> = rows.iter().map(|o| o.question_code).collect();
            let mut missing: Vec<QuestionCode> = Vec::new();
            for q in all_questions.iter() {
                if !observed.contains(q) && !missing.contains(q) {
                    missing.push(*q);
                }
            }
            if !missing.is_empty() {
                debug!(
                    "materialize_skips: {} creating {:?} as {:?}",
                    key, missing, flag
                );
            }
            num_created += missing.len();
            let created: Vec<Observation> = missing
                .iter()
                .map(|q| created_row(&rows[0], *q, flag))
                .collect();
            rows.extend(created);
            forward_fill(&mut rows, fill_columns);
        }
        res.extend(rows);
    }
    info!(
        "materialize_skips: created {} rows ({:?}) in {} groups",
        num_created,
        flag,
        in_scope.len()
    );
    res
}

/// Sets the missing component values of nil returns to zero.
///
/// Rows carried forward from earlier periods have no value for a nil
/// contributor; they are zeros reported by the contributor, not values to
/// impute. Rows without a marker get the response marker. Totals are left to
/// the derivation.
pub fn convert_nil_values(
    mut obs: Vec<Observation>,
    nil_statuses: &[String],
) -> Vec<Observation> {
    let mut num_converted = 0;
    for o in obs.iter_mut() {
        if o.is_total() || o.value.is_some() || !status_in(&o.status, nil_statuses) {
            continue;
        }
        o.value = Some(0.0);
        if o.marker.is_none() {
            o.marker = Some(ImputationMarker::Response);
        }
        num_converted += 1;
    }
    info!("convert_nil_values: {} values set to zero", num_converted);
    obs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(mut o: Observation, status: &str) -> Observation {
        o.status = Some(status.to_string());
        o.attributes.insert("region".to_string(), "XX".to_string());
        o
    }

    fn clear_statuses() -> Vec<String> {
        vec!["Clear".to_string(), "Clear - overridden".to_string()]
    }

    #[test]
    fn missing_questions_are_created_as_zeros() {
        let obs = vec![
            with_status(Observation::response(1, 202201, 1, 5.0), "Clear"),
            with_status(Observation::response(1, 202201, 3, 7.0), "Clear"),
        ];
        let res = materialize_skips(
            obs,
            &[1, 2, 3, 4],
            &clear_statuses(),
            SkipFlag::Skipped,
            &["region".to_string()],
        );
        assert_eq!(res.len(), 4);
        let created: Vec<&Observation> = res.iter().filter(|o| o.is_skipped).collect();
        assert_eq!(
            created.iter().map(|o| o.question_code).collect::<Vec<_>>(),
            vec![2, 4]
        );
        for o in created.iter() {
            assert_eq!(o.value, Some(0.0));
            assert_eq!(o.marker, Some(ImputationMarker::Response));
            assert_eq!(o.status, Some("Clear".to_string()));
            assert_eq!(o.attributes.get("region"), Some(&"XX".to_string()));
        }
        assert!(res.iter().all(|o| !o.is_derived_zero));
    }

    #[test]
    fn other_statuses_pass_through() {
        let obs = vec![
            with_status(Observation::response(1, 202201, 1, 5.0), "Form sent out"),
            with_status(Observation::new(2, 202201, 1), "Clear"),
        ];
        let res = materialize_skips(obs, &[1, 2], &clear_statuses(), SkipFlag::Skipped, &[]);
        let ref1: Vec<&Observation> = res.iter().filter(|o| o.reference == 1).collect();
        assert_eq!(ref1.len(), 1);
        assert!(!ref1[0].is_skipped);
        let ref2: Vec<&Observation> = res.iter().filter(|o| o.reference == 2).collect();
        assert_eq!(ref2.len(), 2);
        // The existing row keeps its missing value, it is not a skipped question.
        assert_eq!(ref2[0].value, None);
        assert!(!ref2[0].is_skipped);
        assert!(ref2[1].is_skipped);
    }

    #[test]
    fn derived_zeros_use_their_own_flag() {
        let obs = vec![with_status(Observation::new(1, 202201, 1), "Form sent out")];
        let res = materialize_skips(
            obs,
            &[1, 2],
            &["Form sent out".to_string()],
            SkipFlag::DerivedZero,
            &[],
        );
        assert_eq!(res.len(), 2);
        assert!(res[1].is_derived_zero);
        assert!(!res[1].is_skipped);
        assert_eq!(res[1].marker, Some(ImputationMarker::Derived));
    }

    #[test]
    fn total_only_groups_are_not_in_scope() {
        let mut total = with_status(Observation::response(1, 202201, 290, 150.0), "Clear");
        total.is_total_flagged = true;
        let mut zero = with_status(Observation::response(2, 202201, 290, 0.0), "Clear");
        zero.is_total_only_and_zero = true;
        let res = materialize_skips(
            vec![total, zero],
            &[1, 2],
            &clear_statuses(),
            SkipFlag::Skipped,
            &[],
        );
        assert_eq!(res.len(), 2);
        assert!(res.iter().all(|o| !o.is_skipped));
    }

    #[test]
    fn nil_returns_have_zero_components() {
        let nil = "Combined child (NIL2)";
        let mut imputed = with_status(Observation::new(1, 202202, 202), nil);
        imputed.marker = Some(ImputationMarker::ForwardImputedResponse);
        let obs = vec![
            with_status(Observation::new(1, 202201, 201), "Clear"),
            with_status(Observation::new(1, 202202, 201), nil),
            imputed,
            with_status(Observation::response(1, 202202, 203, 3.0), nil),
            with_status(Observation::new(1, 202202, 290), nil),
        ];
        let res = convert_nil_values(obs, &[nil.to_string()]);
        assert_eq!(res[0].value, None);
        assert_eq!(res[1].value, Some(0.0));
        assert_eq!(res[1].marker, Some(ImputationMarker::Response));
        assert_eq!(res[2].value, Some(0.0));
        assert_eq!(
            res[2].marker,
            Some(ImputationMarker::ForwardImputedResponse)
        );
        assert_eq!(res[3].value, Some(3.0));
        assert_eq!(res[4].value, None);
    }

    #[test]
    fn complete_groups_are_unchanged() {
        let obs = vec![
            with_status(Observation::response(1, 202201, 1, 5.0), "Clear"),
            with_status(Observation::response(1, 202201, 2, 6.0), "Clear"),
        ];
        let res = materialize_skips(
            obs.clone(),
            &[1, 2],
            &clear_statuses(),
            SkipFlag::Skipped,
            &["region".to_string()],
        );
        assert_eq!(res, obs);
    }
}
