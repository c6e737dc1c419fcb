use crate::cons::io_common::merge_columns;
use crate::cons::*;

use serde::{Deserialize, Serialize};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ConsConfig {
    pub responses_path: String,
    pub contributors_path: String,
    pub manual_constructions_path: Option<String>,
    pub output_path: Option<String>,
    pub mismatches_path: Option<String>,
    pub components_questions: Vec<QuestionCode>,
    #[serde(default)]
    pub contributors_keep_cols: Vec<String>,
    #[serde(default)]
    pub responses_keep_cols: Vec<String>,
    #[serde(default)]
    pub finalsel_keep_cols: Vec<String>,
    #[serde(default)]
    pub nil_status_values: Vec<String>,
    pub skip_statuses: Option<Vec<String>>,
    pub derived_zero_statuses: Option<Vec<String>>,
    pub total_case_statuses: Option<Vec<String>>,
    pub non_response_statuses: Option<Vec<String>>,
    pub state: Option<String>,
    pub error_statuses: Option<Vec<String>>,
    pub sizebands: Option<Vec<Vec<i64>>>,
    pub cell_number: Option<String>,
    pub tolerance: Option<f64>,
}

/// The columns read from the contributors, and copied onto the created totals.
pub fn contributor_columns(config: &ConsConfig) -> Vec<String> {
    let cell: Vec<String> = config.cell_number.iter().cloned().collect();
    merge_columns(&[
        &config.contributors_keep_cols,
        &config.finalsel_keep_cols,
        &cell,
    ])
}

/// The attribute columns of the output.
pub fn output_columns(config: &ConsConfig) -> Vec<String> {
    merge_columns(&[
        &config.contributors_keep_cols,
        &config.responses_keep_cols,
        &config.finalsel_keep_cols,
    ])
}

fn validate_sizebands(bands: &[Vec<i64>]) -> ConsResult<Vec<Sizeband>> {
    let mut res: Vec<Sizeband> = Vec::new();
    for b in bands.iter() {
        match b.as_slice() {
            [lower, upper] => res.push(Sizeband {
                lower: *lower,
                upper: *upper,
            }),
            _ => whatever!(
                "sizeband {:?} is not properly defined: expected a lower and an upper bound",
                b
            ),
        }
    }
    Ok(res)
}

/// Checks the configuration and turns it into the rules of the reconciliation.
pub fn validate_config(config: &ConsConfig) -> ConsResult<ReconcileRules> {
    let mut rules = ReconcileRules::with_components(&config.components_questions);

    let cell: Vec<String> = config.cell_number.iter().cloned().collect();
    rules.fill_columns = merge_columns(&[
        &config.contributors_keep_cols,
        &config.responses_keep_cols,
        &config.finalsel_keep_cols,
        &cell,
    ]);
    rules.contributor_columns = contributor_columns(config);

    if let Some(statuses) = &config.skip_statuses {
        rules.skip_statuses = statuses.clone();
    }
    if let Some(statuses) = &config.derived_zero_statuses {
        rules.derived_zero_statuses = statuses.clone();
    }
    if let Some(statuses) = &config.total_case_statuses {
        rules.total_case_statuses = statuses.clone();
    }
    if let Some(statuses) = &config.non_response_statuses {
        rules.non_response_statuses = statuses.clone();
    }
    // Nil returns are skipped like clear forms, and are non-responses for the
    // snapshot check.
    for s in config.nil_status_values.iter() {
        if !rules.skip_statuses.contains(s) {
            rules.skip_statuses.push(s.clone());
        }
        if !rules.non_response_statuses.contains(s) {
            rules.non_response_statuses.push(s.clone());
        }
    }
    rules.nil_statuses = config.nil_status_values.clone();
    if let Some(statuses) = &config.error_statuses {
        rules.error_statuses = statuses.clone();
    }

    rules.state = match config.state.as_deref() {
        None | Some("live") => ProcessingState::Live,
        Some("frozen") => ProcessingState::Frozen,
        Some(x) => whatever!(
            "{} is not an accepted state status, use either frozen or live",
            x
        ),
    };

    match (&config.sizebands, &config.cell_number) {
        (Some(bands), Some(column)) => {
            rules.sizebands = Some(validate_sizebands(bands)?);
            rules.imputation_class_column = Some(column.clone());
        }
        (Some(_), None) => whatever!("sizebands are defined without a cell_number column"),
        (None, _) => {}
    }

    if let Some(t) = config.tolerance {
        rules.tolerance = t;
    }

    rules.validate().context(ReconcileSnafu {})?;
    Ok(rules)
}
