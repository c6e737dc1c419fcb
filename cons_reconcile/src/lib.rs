mod classify;
mod config;
mod expand;
mod groups;
mod outlier;
mod rescale;
mod skipped;
mod staging;
mod total;
mod validate;

pub mod builder;
pub mod manual;

use log::{debug, info};
use std::collections::BTreeSet;

pub use crate::classify::{
    broadcast_group_flags, classified_groups, flag_290_case, flag_total_only_and_zero,
    total_only_groups,
};
pub use crate::config::*;
pub use crate::expand::expand_panel;
pub use crate::outlier::derive_total_outlier_weights;
pub use crate::rescale::rescale_290_case;
pub use crate::skipped::{convert_nil_values, materialize_skips};
pub use crate::staging::{
    attach_contributor_status, attach_live_values, derive_imputation_class,
    split_live_or_frozen, validate_snapshot,
};
pub use crate::total::{create_missing_total, derive_total};
pub use crate::validate::{validate_marker_precedence, validate_reconciliation};

use crate::groups::{check_unique, sort_observations};

/// Fills the missing values of the expanded panel.
///
/// The imputation runs between the staging and the reconciliation of the
/// totals. Implementations may overwrite values and markers and add rows, but
/// every (reference, period, question) must stay unique.
pub trait Imputer {
    fn impute(&self, obs: Vec<Observation>) -> Result<Vec<Observation>, ReconcileErrors>;
}

/// Leaves the panel as-is.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct NoImputation;

impl Imputer for NoImputation {
    fn impute(&self, obs: Vec<Observation>) -> Result<Vec<Observation>, ReconcileErrors> {
        Ok(obs)
    }
}

/// Runs the full reconciliation with the given rules.
///
/// Arguments:
/// * `inputs` the responses, contributors and manual constructions
/// * `rules` the rules of the survey. They are validated first.
/// * `imputer` fills the missing values once the panel is expanded
///
/// Structural problems (invalid rules, duplicated rows, unbinnable sizebands)
/// are errors. Everything else is reported in the diagnostics of the result.
pub fn run_reconciliation(
    inputs: &ReconcileInputs,
    rules: &ReconcileRules,
    imputer: &dyn Imputer,
) -> Result<ReconcileResult, ReconcileErrors> {
    info!(
        "Processing {:?} responses, {:?} contributors, rules: {:?}",
        inputs.responses.len(),
        inputs.contributors.len(),
        rules
    );
    rules.validate()?;
    check_unique(&inputs.responses)?;

    let mut diagnostics = Diagnostics {
        snapshot_anomalies: validate_snapshot(
            &inputs.responses,
            &inputs.contributors,
            &merged_statuses(&rules.non_response_statuses, &rules.nil_statuses),
        ),
        ..Default::default()
    };

    // ******** Staging ********
    let (responses, frozen) = split_live_or_frozen(
        inputs.responses.clone(),
        &inputs.contributors,
        rules.state,
        &rules.error_statuses,
    );
    let responses = attach_contributor_status(responses, &inputs.contributors);
    let responses = flag_290_case(responses, &rules.total_case_statuses);
    let responses = flag_total_only_and_zero(responses);
    let (flagged, zero_totals) = classified_groups(&responses);
    let total_only = total_only_groups(&responses);
    debug!(
        "run_reconciliation: {} flagged groups, {} zero total groups",
        flagged.len(),
        zero_totals.len()
    );

    let obs = expand_panel(
        &responses,
        &inputs.contributors,
        inputs.manual_constructions.as_deref(),
        &total_only,
        &rules.components_questions,
    );
    let obs = broadcast_group_flags(obs, &flagged, &zero_totals);
    let obs = materialize_skips(
        obs,
        &rules.components_questions,
        &merged_statuses(&rules.skip_statuses, &rules.nil_statuses),
        SkipFlag::Skipped,
        &rules.fill_columns,
    );
    let obs = materialize_skips(
        obs,
        &rules.components_questions,
        &rules.derived_zero_statuses,
        SkipFlag::DerivedZero,
        &rules.fill_columns,
    );
    let obs = convert_nil_values(obs, &rules.nil_statuses);
    let obs = attach_live_values(obs, &frozen);
    let obs = match (&rules.sizebands, &rules.imputation_class_column) {
        (Some(bands), Some(column)) => derive_imputation_class(obs, bands, column)?,
        _ => obs,
    };

    // ******** Imputation ********
    let obs = imputer.impute(obs)?;
    check_unique(&obs)?;

    // ******** Reconciliation ********
    let obs = broadcast_group_flags(obs, &flagged, &zero_totals);
    let obs = rescale_290_case(obs);
    diagnostics.failed_rescales = failed_groups(&obs);
    let obs = create_missing_total(obs, &rules.contributor_columns);
    let mut obs = derive_total(obs);
    if obs.iter().any(|o| o.outlier_weight.is_some()) {
        obs = derive_total_outlier_weights(obs);
    }
    sort_observations(&mut obs);

    diagnostics.mismatches = validate_reconciliation(&obs, rules.tolerance);
    diagnostics.marker_anomalies = validate_marker_precedence(&obs);
    info!(
        "Reconciliation done: {} observations, clean: {}",
        obs.len(),
        diagnostics.is_clean()
    );
    Ok(ReconcileResult {
        observations: obs,
        diagnostics,
    })
}

fn merged_statuses(statuses: &[String], extra: &[String]) -> Vec<String> {
    let mut res = statuses.to_vec();
    for s in extra.iter() {
        if !res.contains(s) {
            res.push(s.clone());
        }
    }
    res
}

fn failed_groups(obs: &[Observation]) -> Vec<GroupKey> {
    let keys: BTreeSet<GroupKey> = obs
        .iter()
        .filter(|o| o.failed_rescale)
        .map(|o| o.key())
        .collect();
    keys.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn contributor(reference: Reference, period: Period, status: &str) -> ContributorRecord {
        ContributorRecord::new(reference, period, Some(status))
    }

    fn find(obs: &[Observation], r: Reference, p: Period, q: QuestionCode) -> &Observation {
        obs.iter()
            .find(|o| o.reference == r && o.period == p && o.question_code == q)
            .unwrap()
    }

    /// Fills the components of the flagged groups with a fixed value.
    struct FixedComponents(f64);

    impl Imputer for FixedComponents {
        fn impute(&self, mut obs: Vec<Observation>) -> Result<Vec<Observation>, ReconcileErrors> {
            let keys: Vec<GroupKey> = obs
                .iter()
                .filter(|o| o.is_total_flagged)
                .map(|o| o.key())
                .collect();
            for key in keys {
                for q in [201, 202] {
                    let mut o = Observation::new(key.reference, key.period, q);
                    o.value = Some(self.0);
                    o.marker = Some(ImputationMarker::ForwardImputedResponse);
                    obs.push(o);
                }
            }
            Ok(obs)
        }
    }

    struct Failing;

    impl Imputer for Failing {
        fn impute(&self, _: Vec<Observation>) -> Result<Vec<Observation>, ReconcileErrors> {
            Err(ReconcileErrors::Imputation("no donors".to_string()))
        }
    }

    #[test]
    fn total_is_derived_from_components() {
        init();
        let inputs = ReconcileInputs {
            responses: vec![
                Observation::response(1, 202201, 201, 4.0),
                Observation::response(1, 202201, 202, 5.0),
            ],
            contributors: vec![ContributorRecord::new(1, 202201, None)],
            manual_constructions: None,
        };
        let rules = ReconcileRules::with_components(&[201, 202]);
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        let codes: Vec<QuestionCode> = res.observations.iter().map(|o| o.question_code).collect();
        assert_eq!(codes, vec![201, 202, 290]);
        let total = find(&res.observations, 1, 202201, 290);
        assert_eq!(total.value, Some(9.0));
        assert_eq!(total.marker, Some(ImputationMarker::Derived));
        assert!(res.diagnostics.is_clean());
    }

    #[test]
    fn special_cases_are_rescaled_after_imputation() {
        init();
        let inputs = ReconcileInputs {
            responses: vec![Observation::response(1, 202201, 290, 150.0)],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: None,
        };
        let rules = ReconcileRules::with_components(&[201, 202]);
        let res = run_reconciliation(&inputs, &rules, &FixedComponents(37.5)).unwrap();
        let obs = &res.observations;
        assert_eq!(obs.len(), 3);
        assert_eq!(find(obs, 1, 202201, 201).value, Some(75.0));
        assert_eq!(find(obs, 1, 202201, 201).value_pre_rescale, Some(37.5));
        assert_eq!(find(obs, 1, 202201, 202).value, Some(75.0));
        let total = find(obs, 1, 202201, 290);
        assert_eq!(total.value, Some(150.0));
        assert_eq!(total.marker, Some(ImputationMarker::Response));
        assert!(obs.iter().all(|o| o.is_total_flagged));
        assert!(res.diagnostics.mismatches.is_empty());
    }

    #[test]
    fn special_cases_without_components_stay_alone() {
        let inputs = ReconcileInputs {
            responses: vec![Observation::response(1, 202201, 290, 150.0)],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: None,
        };
        let rules = ReconcileRules::with_components(&[201, 202]);
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        assert_eq!(res.observations.len(), 1);
        assert_eq!(res.observations[0].value, Some(150.0));
        assert!(res.diagnostics.is_clean());
    }

    #[test]
    fn zero_components_fail_the_rescale() {
        let inputs = ReconcileInputs {
            responses: vec![Observation::response(1, 202201, 290, 90.0)],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: None,
        };
        let rules = ReconcileRules::with_components(&[201, 202]);
        let res = run_reconciliation(&inputs, &rules, &FixedComponents(0.0)).unwrap();
        assert_eq!(
            res.diagnostics.failed_rescales,
            vec![GroupKey::new(1, 202201)]
        );
        assert_eq!(res.diagnostics.mismatches.len(), 1);
        assert!(res.diagnostics.mismatches[0].failed_rescale);
        assert_eq!(find(&res.observations, 1, 202201, 201).value, Some(0.0));
    }

    #[test]
    fn skipped_questions_are_zeros() {
        let inputs = ReconcileInputs {
            responses: vec![
                Observation::response(1, 202201, 201, 4.0),
                Observation::response(1, 202201, 290, 4.0),
            ],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: None,
        };
        let rules = ReconcileRules::with_components(&[201, 202]);
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        let skipped = find(&res.observations, 1, 202201, 202);
        assert!(skipped.is_skipped);
        assert_eq!(skipped.value, Some(0.0));
        assert_eq!(skipped.status, Some("Clear".to_string()));
        assert!(res.diagnostics.is_clean());
    }

    #[test]
    fn nil_returns_are_zeros() {
        let nil = "Combined child (NIL2)";
        let inputs = ReconcileInputs {
            responses: vec![
                Observation::response(1, 202201, 201, 4.0),
                Observation::response(1, 202201, 202, 5.0),
                Observation::response(2, 202201, 201, 1.0),
            ],
            contributors: vec![
                contributor(1, 202201, "Clear"),
                contributor(1, 202202, nil),
                contributor(2, 202201, nil),
            ],
            manual_constructions: None,
        };
        let mut rules = ReconcileRules::with_components(&[201, 202]);
        rules.nil_statuses = vec![nil.to_string()];
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        let obs = &res.observations;
        for q in [201, 202] {
            let o = find(obs, 1, 202202, q);
            assert_eq!(o.value, Some(0.0));
            assert_eq!(o.marker, Some(ImputationMarker::Response));
            assert!(!o.is_skipped);
        }
        assert_eq!(find(obs, 1, 202202, 290).value, Some(0.0));
        // Nil returns also get their skipped questions.
        assert!(find(obs, 2, 202201, 202).is_skipped);
        assert_eq!(find(obs, 2, 202201, 290).value, Some(1.0));
        // A nil contributor with responses is a snapshot anomaly.
        assert_eq!(
            res.diagnostics.snapshot_anomalies,
            vec![GroupKey::new(2, 202201)]
        );
    }

    #[test]
    fn frozen_state_keeps_live_values() {
        let inputs = ReconcileInputs {
            responses: vec![
                Observation::response(1, 202201, 201, 4.0),
                Observation::response(1, 202202, 201, 6.0),
            ],
            contributors: vec![
                contributor(1, 202201, "Clear"),
                contributor(1, 202202, "Check needed"),
            ],
            manual_constructions: None,
        };
        let mut rules = ReconcileRules::with_components(&[201]);
        rules.state = ProcessingState::Frozen;
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        let frozen = find(&res.observations, 1, 202202, 201);
        assert_eq!(frozen.value, None);
        assert_eq!(frozen.live_value, Some(6.0));
        assert_eq!(find(&res.observations, 1, 202201, 201).live_value, None);
    }

    #[test]
    fn manual_totals_are_kept() {
        let inputs = ReconcileInputs {
            responses: vec![Observation::response(1, 202201, 201, 4.0)],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: Some(vec![ManualConstruction {
                reference: 1,
                period: 202201,
                question_code: 290,
                value: Some(4.0),
            }]),
        };
        let rules = ReconcileRules::with_components(&[201]);
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        let total = find(&res.observations, 1, 202201, 290);
        assert_eq!(total.marker, Some(ImputationMarker::ManualConstruction));
        assert_eq!(total.value, Some(4.0));
    }

    #[test]
    fn imputation_classes_are_attached() {
        let mut c = contributor(1, 202201, "Clear");
        c.attributes
            .insert("cell_number".to_string(), "12".to_string());
        let inputs = ReconcileInputs {
            responses: vec![Observation::response(1, 202201, 201, 4.0)],
            contributors: vec![c],
            manual_constructions: None,
        };
        let mut rules = ReconcileRules::with_components(&[201]);
        rules.sizebands = Some(vec![Sizeband {
            lower: 11,
            upper: 17,
        }]);
        rules.imputation_class_column = Some("cell_number".to_string());
        rules.contributor_columns = vec!["cell_number".to_string()];
        let res = run_reconciliation(&inputs, &rules, &NoImputation).unwrap();
        assert!(res
            .observations
            .iter()
            .all(|o| o.imputation_class == Some("11-17".to_string())));
        let total = find(&res.observations, 1, 202201, 290);
        assert_eq!(total.attributes.get("cell_number"), Some(&"12".to_string()));
    }

    #[test]
    fn structural_errors() {
        let inputs = ReconcileInputs {
            responses: vec![
                Observation::response(1, 202201, 201, 4.0),
                Observation::response(1, 202201, 201, 5.0),
            ],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: None,
        };
        assert_eq!(
            run_reconciliation(
                &inputs,
                &ReconcileRules::with_components(&[]),
                &NoImputation
            ),
            Err(ReconcileErrors::EmptyComponents)
        );
        assert_eq!(
            run_reconciliation(
                &inputs,
                &ReconcileRules::with_components(&[201, 290]),
                &NoImputation
            ),
            Err(ReconcileErrors::TotalInComponents)
        );
        assert_eq!(
            run_reconciliation(
                &inputs,
                &ReconcileRules::with_components(&[201]),
                &NoImputation
            ),
            Err(ReconcileErrors::DuplicateObservation(1, 202201, 201))
        );
    }

    #[test]
    fn imputation_errors_are_propagated() {
        let inputs = ReconcileInputs {
            responses: vec![Observation::response(1, 202201, 201, 4.0)],
            contributors: vec![contributor(1, 202201, "Clear")],
            manual_constructions: None,
        };
        let rules = ReconcileRules::with_components(&[201]);
        assert_eq!(
            run_reconciliation(&inputs, &rules, &Failing),
            Err(ReconcileErrors::Imputation("no donors".to_string()))
        );
    }
}
