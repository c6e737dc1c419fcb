use log::{debug, info, warn};

use cons_reconcile::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::Path;

use text_diff::print_diff;

use crate::cons::config_reader::*;
use crate::cons::io_common::*;

pub mod config_reader;
pub mod io_common;
pub mod io_csv;
pub mod io_excel;

#[derive(Debug, Snafu)]
pub enum ConsError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Excel file {path} has no sheet or no header"))]
    EmptyExcel { path: String },
    #[snafu(display("Excel file {path}: line {lineno}: could not read cell {content}"))]
    ExcelWrongCellType {
        path: String,
        lineno: u64,
        content: String,
    },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error reading file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON configuration"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error parsing CSV file {path}"))]
    CsvLineParse { source: csv::Error, path: String },
    #[snafu(display("CSV file {path} is missing the column {column}"))]
    CsvMissingColumn { path: String, column: String },
    #[snafu(display("CSV file {path}: line {lineno}: could not read {column}: {content:?}"))]
    CsvWrongValue {
        path: String,
        lineno: u64,
        column: String,
        content: String,
    },
    #[snafu(display("Error writing CSV data"))]
    CsvWrite { source: csv::Error },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Reconciliation error: {source}"))]
    Reconcile { source: ReconcileErrors },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ConsResult<T> = Result<T, ConsError>;

fn read_manual_constructions(path: &str) -> ConsResult<Vec<ManualConstruction>> {
    if is_excel_file(path) {
        io_excel::read_manual_constructions_excel(path)
    } else {
        io_csv::read_manual_constructions_csv(path)
    }
}

fn write_output(out: &str, content: &str) -> ConsResult<()> {
    if out == "stdout" {
        println!("{}", content);
        Ok(())
    } else {
        info!("Writing {} bytes to {}", content.len(), out);
        fs::write(out, content).context(WritingFileSnafu {
            path: out.to_string(),
        })
    }
}

/// Reads the configuration and the data, reconciles the totals and writes the
/// results.
///
/// Arguments:
/// * `config_path` the JSON configuration
/// * `out_o` the output location. It takes precedence over the `output_path` of
///   the configuration. When none is given, the output is printed.
/// * `check_reference_path` if provided, the output must be identical to the
///   content of this CSV file.
pub fn run_pipeline(
    config_path: &str,
    out_o: Option<String>,
    check_reference_path: Option<String>,
) -> ConsResult<()> {
    let config_p = Path::new(config_path);
    let config_str = fs::read_to_string(config_path).context(OpeningJsonSnafu {
        path: config_path.to_string(),
    })?;
    let config: ConsConfig = serde_json::from_str(&config_str).context(ParsingJsonSnafu {})?;
    info!("config: {:?}", config);

    // Validate the rules:
    let rules = validate_config(&config)?;
    debug!("rules: {:?}", rules);

    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;

    let responses = io_csv::read_responses(
        &resolve_path(root_p, &config.responses_path),
        &config.responses_keep_cols,
    )?;
    let contributors = io_csv::read_contributors(
        &resolve_path(root_p, &config.contributors_path),
        &contributor_columns(&config),
    )?;
    let manual_constructions = match &config.manual_constructions_path {
        Some(p) => Some(read_manual_constructions(&resolve_path(root_p, p))?),
        None => None,
    };
    info!(
        "read {} responses, {} contributors, {:?} manual constructions",
        responses.len(),
        contributors.len(),
        manual_constructions.as_ref().map(|v| v.len())
    );

    let inputs = ReconcileInputs {
        responses,
        contributors,
        manual_constructions,
    };
    let result = run_reconciliation(&inputs, &rules, &NoImputation).context(ReconcileSnafu {})?;
    if !result.diagnostics.is_clean() {
        warn!(
            "Reconciliation diagnostics: {} snapshot anomalies, {} failed rescales, {} mismatches, {} marker anomalies",
            result.diagnostics.snapshot_anomalies.len(),
            result.diagnostics.failed_rescales.len(),
            result.diagnostics.mismatches.len(),
            result.diagnostics.marker_anomalies.len()
        );
    }

    let output = io_csv::observations_to_csv(&result.observations, &output_columns(&config))?;

    let out_path = match (out_o, &config.output_path) {
        (Some(o), _) => o,
        (None, Some(p)) => resolve_path(root_p, p),
        (None, None) => "stdout".to_string(),
    };
    write_output(&out_path, &output)?;

    if let Some(p) = &config.mismatches_path {
        if result.diagnostics.mismatches.is_empty() {
            info!("No mismatched totals, {} not written", p);
        } else {
            let mismatches = io_csv::mismatches_to_csv(&result.diagnostics.mismatches)?;
            write_output(&resolve_path(root_p, p), &mismatches)?;
        }
    }

    // The reference output, if provided for comparison
    if let Some(reference_p) = check_reference_path {
        let reference = fs::read_to_string(reference_p.as_str()).context(OpeningFileSnafu {
            path: reference_p.clone(),
        })?;
        let expected = normalize_lines(&reference);
        let actual = normalize_lines(&output);
        if expected != actual {
            warn!("Found differences with the reference output");
            print_diff(expected.as_str(), actual.as_str(), "\n");
            whatever!("Difference detected between calculated output and reference output")
        }
    }

    Ok(())
}

#[cfg(test)]
fn run_pipeline_test(test_name: &str) -> ConsResult<String> {
    let test_dir = format!("{}/tests/data/{}", env!("CARGO_MANIFEST_DIR"), test_name);
    let out = std::env::temp_dir()
        .join(format!("consres_{}_{}.csv", test_name, std::process::id()))
        .display()
        .to_string();
    info!("Running test {}", test_name);
    run_pipeline(
        format!("{}/{}_config.json", test_dir, test_name).as_str(),
        Some(out.clone()),
        Some(format!("{}/{}_expected_output.csv", test_dir, test_name)),
    )?;
    let content = fs::read_to_string(&out).context(OpeningFileSnafu { path: out.clone() })?;
    let _ = fs::remove_file(&out);
    Ok(content)
}

#[cfg(test)]
fn test_wrapper(test_name: &str) {
    let _ = env_logger::builder().is_test(true).try_init();
    if let Err(e) = run_pipeline_test(test_name) {
        panic!("test {} failed: {}", test_name, e);
    }
}
