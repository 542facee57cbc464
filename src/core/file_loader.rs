use crate::domain::model::{CellValue, TabularData};
use crate::utils::error::{EtlError, Result};
use calamine::{Data, Reader, Xlsx};
use std::collections::HashMap;
use std::io::Cursor;

/// Tokens read as a missing value in delimited files and spreadsheet text cells.
const NA_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const TRUE_VALUES: &[&str] = &["True", "TRUE", "true"];
const FALSE_VALUES: &[&str] = &["False", "FALSE", "false"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// 逗號分隔
    Csv,
    /// `.txt` uploads are tab separated
    Tsv,
    Xlsx,
}

impl FileFormat {
    pub fn from_filename(filename: &str) -> Result<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".csv") {
            Ok(FileFormat::Csv)
        } else if lower.ends_with(".txt") {
            Ok(FileFormat::Tsv)
        } else if lower.ends_with(".xlsx") {
            Ok(FileFormat::Xlsx)
        } else {
            Err(EtlError::UnsupportedFileType {
                filename: filename.to_string(),
            })
        }
    }
}

/// Decodes an uploaded file into a table, choosing the decoder from the
/// filename suffix.
pub fn parse_uploaded_file(filename: &str, bytes: &[u8]) -> Result<TabularData> {
    let format = FileFormat::from_filename(filename)?;
    tracing::debug!("📄 Parsing '{}' ({} bytes) as {:?}", filename, bytes.len(), format);

    let data = match format {
        FileFormat::Csv => parse_delimited(bytes, b',')?,
        FileFormat::Tsv => parse_delimited(bytes, b'\t')?,
        FileFormat::Xlsx => parse_xlsx(bytes)?,
    };

    tracing::debug!(
        "📄 Parsed '{}': {} columns, {} rows",
        filename,
        data.column_count(),
        data.row_count()
    );
    Ok(data)
}

fn parse_delimited(bytes: &[u8], delimiter: u8) -> Result<TabularData> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record?,
        None => return Ok(TabularData::default()),
    };
    let columns = normalize_headers(header.iter().map(str::to_string).collect());
    let width = columns.len();

    // 以欄為單位收集，之後逐欄推斷型別
    let mut raw_columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
    for record in records {
        let record = record?;
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(EtlError::parse(format!(
                "Expected {} fields in line {}, saw {}",
                width,
                line,
                record.len()
            )));
        }
        for (index, column) in raw_columns.iter_mut().enumerate() {
            column.push(record.get(index).map(str::to_string));
        }
    }

    let typed: Vec<Vec<CellValue>> = raw_columns.into_iter().map(infer_text_column).collect();
    Ok(TabularData::new(columns, transpose(typed)))
}

fn parse_xlsx(bytes: &[u8]) -> Result<TabularData> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => {
            tracing::debug!("Workbook has no sheets");
            return Ok(TabularData::default());
        }
    };

    // The range begins at the first used column; blank columns before it
    // still count as (unnamed, empty) columns.
    let leading = range.start().map_or(0, |(_, col)| col as usize);

    let mut rows = range.rows();
    let header = match rows.next() {
        Some(header) => header,
        None => return Ok(TabularData::default()),
    };
    let columns = normalize_headers(
        std::iter::repeat(String::new())
            .take(leading)
            .chain(header.iter().map(header_text))
            .collect(),
    );
    let width = columns.len();

    let mut body: Vec<&[Data]> = rows.collect();
    while body
        .last()
        .is_some_and(|row| row.iter().all(|cell| matches!(cell, Data::Empty)))
    {
        body.pop();
    }

    let mut typed: Vec<Vec<CellValue>> = vec![Vec::with_capacity(body.len()); width];
    for row in &body {
        for (index, column) in typed.iter_mut().enumerate() {
            let cell = index
                .checked_sub(leading)
                .and_then(|offset| row.get(offset))
                .map(spreadsheet_cell)
                .unwrap_or(CellValue::Null);
            column.push(cell);
        }
    }
    for column in &mut typed {
        unify_numeric_column(column);
    }

    Ok(TabularData::new(columns, transpose(typed)))
}

/// Blank names become `Unnamed: {position}` and repeated names get a `.N`
/// suffix, so every column name is unique.
pub fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(raw.len());

    for (position, name) in raw.into_iter().enumerate() {
        let mut name = if name.is_empty() {
            format!("Unnamed: {}", position)
        } else {
            name
        };

        let mut seen = counts.get(&name).copied().unwrap_or(0);
        while seen > 0 {
            counts.insert(name.clone(), seen + 1);
            name = format!("{}.{}", name, seen);
            seen = counts.get(&name).copied().unwrap_or(0);
        }
        counts.insert(name.clone(), seen + 1);
        names.push(name);
    }

    names
}

fn is_missing(value: &str) -> bool {
    NA_VALUES.contains(&value)
}

/// Integer if every present value is an integer, then float, then boolean,
/// otherwise the original text.
fn infer_text_column(cells: Vec<Option<String>>) -> Vec<CellValue> {
    let present: Vec<&str> = cells
        .iter()
        .flatten()
        .map(String::as_str)
        .filter(|value| !is_missing(value))
        .collect();

    let all_int = !present.is_empty() && present.iter().all(|v| v.trim().parse::<i64>().is_ok());
    let all_float =
        !present.is_empty() && present.iter().all(|v| v.trim().parse::<f64>().is_ok());
    let all_bool = !present.is_empty()
        && present
            .iter()
            .all(|v| TRUE_VALUES.contains(v) || FALSE_VALUES.contains(v));

    cells
        .into_iter()
        .map(|cell| match cell {
            None => CellValue::Null,
            Some(value) if is_missing(&value) => CellValue::Null,
            Some(value) if all_int => value
                .trim()
                .parse::<i64>()
                .map(CellValue::Int)
                .unwrap_or(CellValue::Null),
            Some(value) if all_float => value
                .trim()
                .parse::<f64>()
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null),
            Some(value) if all_bool => CellValue::Bool(TRUE_VALUES.contains(&value.as_str())),
            Some(value) => CellValue::Text(value),
        })
        .collect()
}

fn header_text(cell: &Data) -> String {
    match spreadsheet_cell(cell) {
        CellValue::Null => String::new(),
        CellValue::Bool(b) => (if b { "True" } else { "False" }).to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => f.to_string(),
        CellValue::Text(s) => s,
    }
}

fn spreadsheet_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::String(s) if is_missing(s) => CellValue::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => whole_float_to_int(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::Text(value.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => CellValue::Float(dt.as_f64()),
        },
    }
}

// Spreadsheets store every number as a float
fn whole_float_to_int(value: f64) -> CellValue {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        CellValue::Int(value as i64)
    } else {
        CellValue::Float(value)
    }
}

/// A purely numeric column holding any fractional value becomes all floats.
fn unify_numeric_column(column: &mut [CellValue]) {
    let mut has_float = false;
    for cell in column.iter() {
        match cell {
            CellValue::Null | CellValue::Int(_) => {}
            CellValue::Float(_) => has_float = true,
            _ => return,
        }
    }
    if !has_float {
        return;
    }
    for cell in column.iter_mut() {
        if let CellValue::Int(i) = cell {
            *cell = CellValue::Float(*i as f64);
        }
    }
}

fn transpose(columns: Vec<Vec<CellValue>>) -> Vec<Vec<CellValue>> {
    let row_count = columns.first().map(Vec::len).unwrap_or(0);
    let mut rows: Vec<Vec<CellValue>> = (0..row_count)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for column in columns {
        for (row, cell) in rows.iter_mut().zip(column) {
            row.push(cell);
        }
    }
    rows
}
