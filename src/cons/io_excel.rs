// Reading the manual constructions from an Excel spreadsheet.

use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::cons::io_common::*;
use crate::cons::*;

static EMPTY_CELL: DataType = DataType::Empty;

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) => f.to_string(),
        _ => String::new(),
    }
}

fn read_key<T: TryFrom<u64>>(cell: &DataType) -> Option<T> {
    match cell {
        DataType::Int(i) if *i >= 0 => T::try_from(*i as u64).ok(),
        DataType::Float(f) if *f >= 0.0 && f.fract() == 0.0 => T::try_from(*f as u64).ok(),
        DataType::String(s) => parse_key(s),
        _ => None,
    }
}

fn read_value(cell: &DataType) -> Option<Option<f64>> {
    match cell {
        DataType::Empty => Some(None),
        DataType::Int(i) => Some(Some(*i as f64)),
        DataType::Float(f) => Some(Some(*f)),
        DataType::String(s) => parse_nullable_f64(s),
        _ => None,
    }
}

/// Reads the manual constructions from the first sheet of the workbook. The
/// first row is the header.
pub fn read_manual_constructions_excel(path: &str) -> ConsResult<Vec<ManualConstruction>> {
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let wrange = workbook
        .worksheet_range_at(0)
        .context(EmptyExcelSnafu { path })?
        .context(OpeningExcelSnafu { path })?;

    let mut iter = wrange.rows();
    let header: Vec<String> = iter
        .next()
        .context(EmptyExcelSnafu { path })?
        .iter()
        .map(cell_to_string)
        .collect();
    debug!("read_manual_constructions_excel: header: {:?}", header);
    let position = |column: &str| -> ConsResult<usize> {
        header
            .iter()
            .position(|h| h == column)
            .context(CsvMissingColumnSnafu { path, column })
    };
    let reference_idx = position("reference")?;
    let period_idx = position("period")?;
    let question_idx = position("questioncode")?;
    let value_idx = position("value")?;

    let mut res: Vec<ManualConstruction> = Vec::new();
    for (idx, row) in iter.enumerate() {
        // The header is the first line.
        let lineno = (idx + 2) as u64;
        if row.iter().all(|c| matches!(c, DataType::Empty)) {
            continue;
        }
        let cell = |i: usize| row.get(i).unwrap_or(&EMPTY_CELL);
        let wrong = |i: usize| ConsError::ExcelWrongCellType {
            path: path.to_string(),
            lineno,
            content: format!("{:?}", cell(i)),
        };
        let mc = ManualConstruction {
            reference: read_key(cell(reference_idx)).ok_or_else(|| wrong(reference_idx))?,
            period: read_key(cell(period_idx)).ok_or_else(|| wrong(period_idx))?,
            question_code: read_key(cell(question_idx)).ok_or_else(|| wrong(question_idx))?,
            value: read_value(cell(value_idx)).ok_or_else(|| wrong(value_idx))?,
        };
        debug!("read_manual_constructions_excel: {:?}", mc);
        res.push(mc);
    }
    Ok(res)
}
