//! Typed tables built from extracted records, and their encodings.

use serde::Serialize;
use serde_json::Value;

use crate::error::{HarvestError, Result};

/// Sentinel the extraction prompts use for a missing field.
pub const MISSING: &str = "N/A";

/// Table name used in SQL output.
pub const SQL_TABLE: &str = "extracted_data";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ColumnValues {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    /// Cell as text; `None` for null.
    pub fn display(&self, row: usize) -> Option<String> {
        match self {
            ColumnValues::Integer(v) => v.get(row).copied().flatten().map(|n| n.to_string()),
            ColumnValues::Float(v) => v.get(row).copied().flatten().map(|n| n.to_string()),
            ColumnValues::Text(v) => v.get(row).cloned().flatten(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// Column-oriented table; columns keep first-seen key order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<Column>,
}

/// One cell before the column type is known.
struct RawCell {
    text: String,
    /// Exact value when the cell is a whole number.
    integer: Option<i64>,
    number: Option<f64>,
}

impl RawCell {
    fn parsed(text: String) -> Self {
        let trimmed = text.trim();
        let number = trimmed.parse::<f64>().ok().filter(|n| n.is_finite());
        Self {
            integer: trimmed.parse::<i64>().ok().or_else(|| number.and_then(whole)),
            number,
            text,
        }
    }
}

fn raw_cell(value: Option<&Value>) -> Option<RawCell> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().eq_ignore_ascii_case(MISSING) => None,
        Value::String(s) => Some(RawCell::parsed(s.clone())),
        Value::Number(n) => Some(RawCell::parsed(n.to_string())),
        other => Some(RawCell {
            text: other.to_string(),
            integer: None,
            number: None,
        }),
    }
}

/// Whole floats within the range where `f64` still counts in ones.
fn whole(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() <= EXACT_F64_INTEGER as f64).then_some(n as i64)
}

/// Largest magnitude below which every integer has an exact `f64`.
const EXACT_F64_INTEGER: i64 = 1 << 53;

impl Table {
    /// Build from a list of JSON objects. Anything else is unsupported.
    pub fn from_records(records: &[Value]) -> Result<Self> {
        let mut names: Vec<String> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let Value::Object(map) = record else {
                return Err(HarvestError::UnsupportedFormatRequest(format!(
                    "record {i} is not an object, cannot build a table"
                )));
            };
            for key in map.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let cells: Vec<Option<RawCell>> = records
                    .iter()
                    .map(|r| raw_cell(r.get(&name)))
                    .collect();
                Column {
                    values: infer_column(cells),
                    name,
                }
            })
            .collect();
        Ok(Self { columns })
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn row(&self, row: usize) -> Vec<Option<String>> {
        self.columns.iter().map(|c| c.values.display(row)).collect()
    }

    /// Comma-separated text with a header row; nulls are empty fields.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let encode = |e: csv::Error| HarvestError::UnsupportedFormatRequest(format!("csv: {e}"));
        writer.write_record(self.column_names()).map_err(encode)?;
        for row in 0..self.row_count() {
            writer
                .write_record(self.row(row).iter().map(|c| c.as_deref().unwrap_or("")))
                .map_err(encode)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| HarvestError::UnsupportedFormatRequest(format!("csv: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| HarvestError::UnsupportedFormatRequest(format!("csv: {e}")))
    }

    /// Single-sheet workbook: bold header row, typed cells.
    pub fn to_xlsx(&self) -> Result<Vec<u8>> {
        use rust_xlsxwriter::{Format, Workbook};

        let xlsx = |e: rust_xlsxwriter::XlsxError| {
            HarvestError::UnsupportedFormatRequest(format!("xlsx: {e}"))
        };
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Sheet1").map_err(xlsx)?;

        for (c, column) in self.columns.iter().enumerate() {
            let col = c as u16;
            sheet
                .write_string_with_format(0, col, &column.name, &header)
                .map_err(xlsx)?;
            for r in 0..column.values.len() {
                let row = r as u32 + 1;
                match &column.values {
                    // Spreadsheet numbers are doubles; wider integers go in as text.
                    ColumnValues::Integer(v) => match v[r] {
                        Some(n) if n.unsigned_abs() <= EXACT_F64_INTEGER as u64 => {
                            sheet.write_number(row, col, n as f64).map_err(xlsx)?;
                        }
                        Some(n) => {
                            sheet.write_string(row, col, n.to_string()).map_err(xlsx)?;
                        }
                        None => {}
                    },
                    ColumnValues::Float(v) => {
                        if let Some(n) = v[r] {
                            sheet.write_number(row, col, n).map_err(xlsx)?;
                        }
                    }
                    ColumnValues::Text(v) => {
                        if let Some(s) = &v[r] {
                            sheet.write_string(row, col, s).map_err(xlsx)?;
                        }
                    }
                }
            }
        }

        workbook.save_to_buffer().map_err(xlsx)
    }

    /// `CREATE TABLE` plus one `INSERT` per row.
    pub fn to_sql(&self) -> String {
        let idents: Vec<String> = self.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let mut out = format!(
            "CREATE TABLE {SQL_TABLE} (\n{}\n);\n",
            idents
                .iter()
                .map(|i| format!("    {i} TEXT"))
                .collect::<Vec<_>>()
                .join(",\n")
        );
        let column_list = idents.join(", ");
        for row in 0..self.row_count() {
            let values = self
                .row(row)
                .into_iter()
                .map(|cell| match cell {
                    Some(s) => format!("'{}'", s.replace('\'', "''")),
                    None => "NULL".to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "INSERT INTO {SQL_TABLE} ({column_list}) VALUES ({values});\n"
            ));
        }
        out
    }

    /// `<table>` with a `<th>` header row and escaped cells.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<table>\n  <tr>");
        for name in self.column_names() {
            out.push_str(&format!("<th>{}</th>", escape_html(name)));
        }
        out.push_str("</tr>\n");
        for row in 0..self.row_count() {
            out.push_str("  <tr>");
            for cell in self.row(row) {
                out.push_str(&format!(
                    "<td>{}</td>",
                    escape_html(cell.as_deref().unwrap_or(""))
                ));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</table>");
        out
    }
}

fn infer_column(cells: Vec<Option<RawCell>>) -> ColumnValues {
    let present: Vec<&RawCell> = cells.iter().flatten().collect();
    let numeric = !present.is_empty() && present.iter().all(|c| c.number.is_some());

    if numeric {
        if present.iter().all(|c| c.integer.is_some()) {
            return ColumnValues::Integer(
                cells
                    .iter()
                    .map(|c| c.as_ref().and_then(|c| c.integer))
                    .collect(),
            );
        }
        return ColumnValues::Float(
            cells
                .iter()
                .map(|c| c.as_ref().and_then(|c| c.number))
                .collect(),
        );
    }

    ColumnValues::Text(cells.into_iter().map(|c| c.map(|c| c.text)).collect())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
