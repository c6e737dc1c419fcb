// Primitives for reading and writing CSV files.

use std::collections::BTreeMap;

use csv::StringRecord;

use crate::cons::io_common::*;
use crate::cons::*;

/// The position of the named columns in a CSV header.
struct Header {
    path: String,
    positions: BTreeMap<String, usize>,
}

impl Header {
    fn new(path: &str, record: &StringRecord) -> Header {
        let mut positions: BTreeMap<String, usize> = BTreeMap::new();
        for (idx, name) in record.iter().enumerate() {
            positions.entry(name.trim().to_string()).or_insert(idx);
        }
        Header {
            path: path.to_string(),
            positions,
        }
    }

    fn required(&self, column: &str) -> ConsResult<usize> {
        self.positions
            .get(column)
            .cloned()
            .context(CsvMissingColumnSnafu {
                path: self.path.clone(),
                column,
            })
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.positions.get(column).cloned()
    }
}

/// One line of a CSV file, with the information to report errors.
struct Line<'a> {
    header: &'a Header,
    record: &'a StringRecord,
    lineno: u64,
}

impl<'a> Line<'a> {
    fn get(&self, idx: usize) -> &'a str {
        self.record.get(idx).unwrap_or("")
    }

    fn wrong_value(&self, column: &str, content: &str) -> ConsError {
        ConsError::CsvWrongValue {
            path: self.header.path.clone(),
            lineno: self.lineno,
            column: column.to_string(),
            content: content.to_string(),
        }
    }

    fn key<T: TryFrom<u64>>(&self, column: &str) -> ConsResult<T> {
        let s = self.get(self.header.required(column)?);
        parse_key::<T>(s).ok_or_else(|| self.wrong_value(column, s))
    }

    fn value(&self, column: &str) -> ConsResult<Option<f64>> {
        let s = self.get(self.header.required(column)?);
        parse_nullable_f64(s).ok_or_else(|| self.wrong_value(column, s))
    }

    fn optional_value(&self, column: &str) -> ConsResult<Option<f64>> {
        match self.header.optional(column) {
            Some(idx) => {
                let s = self.get(idx);
                parse_nullable_f64(s).ok_or_else(|| self.wrong_value(column, s))
            }
            None => Ok(None),
        }
    }

    fn text(&self, column: &str) -> Option<String> {
        let s = self.get(self.header.optional(column)?).trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    fn attributes(&self, columns: &[String]) -> BTreeMap<String, String> {
        columns
            .iter()
            .filter_map(|c| self.text(c).map(|v| (c.clone(), v)))
            .collect()
    }
}

/// Reads all the lines of a CSV file with a header, and parses them.
fn read_lines<T, F>(path: &str, parse: F) -> ConsResult<Vec<T>>
where
    F: Fn(&Line) -> ConsResult<T>,
{
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    let header = Header::new(path, rdr.headers().context(CsvLineParseSnafu { path })?);
    let mut res: Vec<T> = Vec::new();
    for (idx, line_r) in rdr.records().enumerate() {
        let record = line_r.context(CsvLineParseSnafu { path })?;
        let line = Line {
            header: &header,
            record: &record,
            // The header is the first line.
            lineno: (idx + 2) as u64,
        };
        res.push(parse(&line)?);
    }
    debug!("read_lines: {}: {} lines", path, res.len());
    Ok(res)
}

pub fn read_responses(path: &str, keep_cols: &[String]) -> ConsResult<Vec<Observation>> {
    let attribute_cols = merge_columns(&[keep_cols]);
    read_lines(path, |line| {
        let mut o = Observation::new(
            line.key("reference")?,
            line.key("period")?,
            line.key("questioncode")?,
        );
        o.value = line.value("adjustedresponse")?;
        o.marker = line
            .text("imputation_marker")
            .map(|m| ImputationMarker::parse(&m));
        o.outlier_weight = line.optional_value("outlier_weight")?;
        o.attributes = line.attributes(&attribute_cols);
        Ok(o)
    })
}

pub fn read_contributors(path: &str, keep_cols: &[String]) -> ConsResult<Vec<ContributorRecord>> {
    let attribute_cols = merge_columns(&[keep_cols]);
    read_lines(path, |line| {
        let mut c = ContributorRecord::new(line.key("reference")?, line.key("period")?, None);
        c.status = line.text("status");
        c.attributes = line.attributes(&attribute_cols);
        Ok(c)
    })
}

pub fn read_manual_constructions_csv(path: &str) -> ConsResult<Vec<ManualConstruction>> {
    read_lines(path, |line| {
        Ok(ManualConstruction {
            reference: line.key("reference")?,
            period: line.key("period")?,
            question_code: line.key("questioncode")?,
            value: line.value("value")?,
        })
    })
}

fn writer_to_string(wtr: csv::Writer<Vec<u8>>) -> ConsResult<String> {
    let bytes = match wtr.into_inner() {
        Ok(b) => b,
        Err(e) => whatever!("Error flushing CSV data: {}", e.error()),
    };
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => whatever!("Invalid UTF-8 in CSV data: {}", e),
    }
}

/// The observations in CSV format: the keys, the value, the audit columns and
/// then the given attribute columns.
pub fn observations_to_csv(obs: &[Observation], attribute_cols: &[String]) -> ConsResult<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<String> = [
        "reference",
        "period",
        "questioncode",
        "adjustedresponse",
        "imputation_marker",
        "is_total_flagged",
        "is_total_only_and_zero",
        "is_skipped",
        "is_derived_zero",
        "failed_rescale",
        "adjustedresponse_pre_rescale",
        "live_adjustedresponse",
        "imputation_class",
        "status",
        "outlier_weight",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(attribute_cols.iter().cloned());
    wtr.write_record(&header).context(CsvWriteSnafu {})?;

    for o in obs.iter() {
        let mut row: Vec<String> = vec![
            o.reference.to_string(),
            o.period.to_string(),
            o.question_code.to_string(),
            format_value(o.value),
            o.marker
                .as_ref()
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            o.is_total_flagged.to_string(),
            o.is_total_only_and_zero.to_string(),
            o.is_skipped.to_string(),
            o.is_derived_zero.to_string(),
            o.failed_rescale.to_string(),
            format_value(o.value_pre_rescale),
            format_value(o.live_value),
            o.imputation_class.clone().unwrap_or_default(),
            o.status.clone().unwrap_or_default(),
            format_value(o.outlier_weight),
        ];
        for c in attribute_cols.iter() {
            row.push(o.attributes.get(c).cloned().unwrap_or_default());
        }
        wtr.write_record(&row).context(CsvWriteSnafu {})?;
    }
    writer_to_string(wtr)
}

pub fn mismatches_to_csv(mismatches: &[TotalMismatch]) -> ConsResult<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record([
        "period",
        "reference",
        "total_value",
        "component_sum",
        "failed_rescale",
    ])
    .context(CsvWriteSnafu {})?;
    for m in mismatches.iter() {
        wtr.write_record([
            m.period.to_string(),
            m.reference.to_string(),
            format_value(m.total_value),
            m.component_sum.to_string(),
            m.failed_rescale.to_string(),
        ])
        .context(CsvWriteSnafu {})?;
    }
    writer_to_string(wtr)
}
