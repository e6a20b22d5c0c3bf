// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Result serializer: turns the extraction payload into the encoding the
//! query asked for.
//!
//! Keywords are matched case-insensitively in this precedence: `json`,
//! `csv`, `excel`, `sql`, `html`. Without a keyword a list of objects
//! becomes a table and anything else stays JSON.

pub mod table;

use std::fmt;

use serde_json::Value;

use crate::error::HarvestError;
use crate::extract::merge::strip_code_fences;
pub use table::{Column, ColumnValues, Table};

/// Characters of the raw payload quoted when it cannot be parsed.
const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum FormattedResult {
    Json(String),
    /// Comma-separated text and the typed table behind it.
    Table(String, Table),
    /// XLSX workbook bytes and the typed table behind it.
    Binary(Vec<u8>, Table),
    Sql(String),
    Html(String),
    PlainText(String),
}

impl FormattedResult {
    pub fn kind(&self) -> &'static str {
        match self {
            FormattedResult::Json(_) => "json",
            FormattedResult::Table(..) => "csv",
            FormattedResult::Binary(..) => "excel",
            FormattedResult::Sql(_) => "sql",
            FormattedResult::Html(_) => "html",
            FormattedResult::PlainText(_) => "text",
        }
    }

    /// Conventional file extension for saving the result.
    pub fn file_extension(&self) -> &'static str {
        match self {
            FormattedResult::Json(_) => "json",
            FormattedResult::Table(..) => "csv",
            FormattedResult::Binary(..) => "xlsx",
            FormattedResult::Sql(_) => "sql",
            FormattedResult::Html(_) => "html",
            FormattedResult::PlainText(_) => "txt",
        }
    }

    /// Bytes as they would be written to a file.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FormattedResult::Binary(bytes, _) => bytes.clone(),
            FormattedResult::Json(s)
            | FormattedResult::Table(s, _)
            | FormattedResult::Sql(s)
            | FormattedResult::Html(s)
            | FormattedResult::PlainText(s) => s.as_bytes().to_vec(),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, FormattedResult::Binary(..))
    }
}

impl fmt::Display for FormattedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormattedResult::Json(s) => write!(f, "```json\n{s}\n```"),
            FormattedResult::Table(s, _) => write!(f, "```csv\n{}\n```", s.trim_end()),
            FormattedResult::Binary(bytes, table) => write!(
                f,
                "```text\nExcel workbook: {} row(s), {} column(s), {} bytes\n```",
                table.row_count(),
                table.columns.len(),
                bytes.len()
            ),
            FormattedResult::Sql(s) => write!(f, "```sql\n{}\n```", s.trim_end()),
            FormattedResult::Html(s) => write!(f, "```html\n{s}\n```"),
            FormattedResult::PlainText(s) => write!(f, "```text\n{s}\n```"),
        }
    }
}

/// Encoding requested by a keyword in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Excel,
    Sql,
    Html,
}

impl OutputFormat {
    const PRECEDENCE: [(&'static str, OutputFormat); 5] = [
        ("json", OutputFormat::Json),
        ("csv", OutputFormat::Csv),
        ("excel", OutputFormat::Excel),
        ("sql", OutputFormat::Sql),
        ("html", OutputFormat::Html),
    ];

    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.to_lowercase();
        Self::PRECEDENCE
            .iter()
            .find(|(keyword, _)| query.contains(keyword))
            .map(|(_, format)| *format)
    }

    fn label(self) -> &'static str {
        match self {
            OutputFormat::Json => "JSON",
            OutputFormat::Csv => "CSV",
            OutputFormat::Excel => "Excel",
            OutputFormat::Sql => "SQL",
            OutputFormat::Html => "HTML",
        }
    }
}

/// Serialize an extraction payload for `query`. Never fails: anything that
/// cannot be honoured comes back as [`FormattedResult::PlainText`].
pub fn format(extracted: &str, query: &str) -> FormattedResult {
    let payload = strip_code_fences(extracted);
    let data: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("extraction payload is not JSON: {e}");
            let preview: String = extracted.chars().take(PREVIEW_CHARS).collect();
            return FormattedResult::PlainText(format!(
                "Error: Invalid JSON data (parse error: {e}). Raw data: {preview}..."
            ));
        }
    };

    let requested = OutputFormat::from_query(query);

    if matches!(&data, Value::Array(items) if items.is_empty()) {
        let target = requested.unwrap_or(OutputFormat::Csv).label();
        return FormattedResult::PlainText(format!("No data to convert to {target}."));
    }

    let result = match requested {
        Some(OutputFormat::Json) => Ok(FormattedResult::Json(pretty(&data))),
        None if is_object_list(&data) => as_table(&data, OutputFormat::Csv),
        None => Ok(FormattedResult::Json(pretty(&data))),
        Some(other) => as_table(&data, other),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("{e}; falling back to plain text");
        FormattedResult::PlainText(plain_text(&data))
    })
}

fn pretty(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

fn is_object_list(data: &Value) -> bool {
    matches!(data, Value::Array(items) if items.iter().all(Value::is_object))
}

fn as_table(data: &Value, target: OutputFormat) -> Result<FormattedResult, HarvestError> {
    let records = match data {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => std::slice::from_ref(data),
        other => {
            return Err(HarvestError::UnsupportedFormatRequest(format!(
                "cannot render a {} as {}",
                if other.is_string() { "string" } else { "scalar" },
                target.label()
            )))
        }
    };
    let table = Table::from_records(records)?;
    Ok(match target {
        OutputFormat::Excel => FormattedResult::Binary(table.to_xlsx()?, table),
        OutputFormat::Sql => FormattedResult::Sql(table.to_sql()),
        OutputFormat::Html => FormattedResult::Html(table.to_html()),
        OutputFormat::Csv | OutputFormat::Json => FormattedResult::Table(table.to_csv()?, table),
    })
}

/// `key: value, ...` per record, or the bare value for scalars.
fn plain_text(data: &Value) -> String {
    fn scalar(v: &Value) -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
    fn record(v: &Value) -> String {
        match v {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", scalar(v)))
                .collect::<Vec<_>>()
                .join(", "),
            other => scalar(other),
        }
    }
    match data {
        Value::Array(items) => items.iter().map(record).collect::<Vec<_>>().join("\n"),
        other => record(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = r#"[{"name":"A","price":"10"},{"name":"B","price":"N/A"}]"#;

    #[test]
    fn test_keyword_precedence() {
        assert_eq!(OutputFormat::from_query("give me CSV"), Some(OutputFormat::Csv));
        assert_eq!(
            OutputFormat::from_query("csv or json please"),
            Some(OutputFormat::Json)
        );
        assert_eq!(
            OutputFormat::from_query("an Excel sheet, not html"),
            Some(OutputFormat::Excel)
        );
        assert_eq!(OutputFormat::from_query("list the prices"), None);
    }

    #[test]
    fn test_default_list_of_objects_is_table() {
        match format(RECORDS, "list products") {
            FormattedResult::Table(csv, table) => {
                assert_eq!(csv, "name,price\nA,10\nB,\n");
                assert_eq!(table.row_count(), 2);
            }
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn test_default_other_shapes_are_json() {
        assert_eq!(
            format(r#"{"title":"x"}"#, "what is the title"),
            FormattedResult::Json("{\n  \"title\": \"x\"\n}".into())
        );
    }

    #[test]
    fn test_json_keyword_keeps_key_order() {
        let FormattedResult::Json(text) = format(r#"[{"z":"1","a":"2"}]"#, "as JSON") else {
            panic!("expected json");
        };
        assert!(text.find("\"z\"").unwrap() < text.find("\"a\"").unwrap());
    }

    #[test]
    fn test_fenced_payload_is_unwrapped() {
        let fenced = format!("```json\n{RECORDS}\n```");
        assert_eq!(format(&fenced, "sql").kind(), "sql");
    }

    #[test]
    fn test_excel_html_sql() {
        assert!(format(RECORDS, "excel").is_binary());
        let FormattedResult::Html(html) = format(RECORDS, "html table") else {
            panic!("expected html");
        };
        assert!(html.contains("<th>name</th>"));
        let FormattedResult::Sql(sql) = format(RECORDS, "SQL inserts") else {
            panic!("expected sql");
        };
        assert_eq!(sql.matches("INSERT INTO").count(), 2);
    }

    #[test]
    fn test_malformed_payload() {
        let FormattedResult::PlainText(text) = format("Sorry, I cannot help.", "csv") else {
            panic!("expected plain text");
        };
        assert!(text.starts_with("Error: Invalid JSON data"));
        assert!(text.contains("Raw data: Sorry, I cannot help...."));
    }

    #[test]
    fn test_preview_is_bounded() {
        let long = "x".repeat(2_000);
        let FormattedResult::PlainText(text) = format(&long, "") else {
            panic!("expected plain text");
        };
        assert!(text.len() < 700);
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(
            format("[]", "csv"),
            FormattedResult::PlainText("No data to convert to CSV.".into())
        );
        assert_eq!(
            format("[]", "sql please"),
            FormattedResult::PlainText("No data to convert to SQL.".into())
        );
    }

    #[test]
    fn test_unsupported_shape_falls_back() {
        assert_eq!(
            format(r#"["a","b"]"#, "csv"),
            FormattedResult::PlainText("a\nb".into())
        );
        assert_eq!(
            format(r#"[{"k":"v"}, 3]"#, "html"),
            FormattedResult::PlainText("k: v\n3".into())
        );
    }

    #[test]
    fn test_display_is_fenced() {
        let shown = format(RECORDS, "list").to_string();
        assert!(shown.starts_with("```csv\n"));
        assert!(shown.ends_with("\n```"));
    }
}
