// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use time::Date;

use crate::{ColumnSpec, PropertyDescriptor, RowData, TableKind, format_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Export,
    Template,
}

impl ExportKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Template => "template",
        }
    }
}

/// `Customers_export_2026-03-01.csv`, `Employees_template_2026-03-01.csv`.
pub fn export_file_name(table: TableKind, kind: ExportKind, date: Date) -> String {
    format!(
        "{}_{}_{}.csv",
        table.entity_set(),
        kind.as_str(),
        format_date(date)
    )
}

/// `Projects_selection_2026-03-01.json`.
pub fn selection_file_name(table: TableKind, date: Date) -> String {
    format!("{}_selection_{}.json", table.entity_set(), format_date(date))
}

/// Rows as a pretty-printed JSON array of plain objects, in the given order.
pub fn build_selection_json(rows: &[RowData]) -> Result<String> {
    let values: Vec<_> = rows.iter().map(RowData::to_json).collect();
    let mut text = serde_json::to_string_pretty(&values).context("encode selection as json")?;
    text.push('\n');
    Ok(text)
}

/// One header line of column labels. No columns gives an empty string.
pub fn build_header_only_csv(columns: &[ColumnSpec]) -> Result<String> {
    build_csv(columns, &[])
}

/// Header line plus one line per row, values looked up by property key.
/// Fields holding a comma, quote or line break are quoted with inner quotes
/// doubled.
pub fn build_data_csv(columns: &[ColumnSpec], rows: &[RowData]) -> Result<String> {
    build_csv(columns, rows)
}

fn build_csv(columns: &[ColumnSpec], rows: &[RowData]) -> Result<String> {
    if columns.is_empty() {
        return Ok(String::new());
    }
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(columns.iter().map(|column| column.label.as_str()))
        .context("write csv header")?;
    for row in rows {
        writer
            .write_record(
                columns
                    .iter()
                    .map(|column| row.value(&column.property_key).display()),
            )
            .context("write csv row")?;
    }
    writer.flush().context("flush csv")?;

    let bytes = writer
        .into_inner()
        .map_err(|error| anyhow::anyhow!("finish csv: {}", error.error()))?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRow {
    pub line: u64,
    pub data: RowData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadParse {
    pub rows: Vec<UploadRow>,
    pub errors: Vec<UploadError>,
    pub ignored_columns: Vec<String>,
}

/// Reads a filled-in template or export. Headers match property keys or
/// labels, case-insensitively. Lines with any bad value are reported in
/// `errors` and left out of `rows`.
pub fn parse_upload_csv(properties: &[PropertyDescriptor], text: &str) -> Result<UploadParse> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers().context("read csv headers")?.clone();

    let mut parsed = UploadParse::default();
    let mut mapping = Vec::with_capacity(headers.len());
    for header in headers.iter() {
        let name = header.trim_matches('\u{feff}').trim();
        let property = properties.iter().find(|property| {
            property.is_column()
                && (property.name.eq_ignore_ascii_case(name)
                    || property.label.eq_ignore_ascii_case(name))
        });
        if property.is_none() && !name.is_empty() {
            parsed.ignored_columns.push(name.to_owned());
        }
        mapping.push(property);
    }

    for record in reader.records() {
        let record = record.context("read csv record")?;
        let line = record.position().map_or(0, |position| position.line());
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }

        let mut data = RowData::new();
        let mut problems = Vec::new();
        for (index, value) in record.iter().enumerate() {
            let Some(Some(property)) = mapping.get(index) else {
                continue;
            };
            match property.edm_type.parse_value(value) {
                Ok(parsed_value) => {
                    data.set(&property.name, parsed_value);
                }
                Err(error) => problems.push(format!("{}: {error}", property.label)),
            }
        }
        if problems.is_empty() {
            parsed.rows.push(UploadRow { line, data });
        } else {
            parsed.errors.push(UploadError {
                line,
                message: problems.join("; "),
            });
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::{
        ExportKind, build_data_csv, build_header_only_csv, build_selection_json, export_file_name,
        parse_upload_csv, selection_file_name,
    };
    use crate::{ColumnSpec, FieldValue, RowData, TableKind, default_properties};
    use anyhow::Result;
    use serde_json::json;
    use time::macros::{date, datetime};

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("sapcustId", "Sapcust Id"),
            ColumnSpec::new("name", "Name"),
            ColumnSpec::new("city", "City"),
        ]
    }

    #[test]
    fn header_only_lists_labels() -> Result<()> {
        assert_eq!(build_header_only_csv(&columns())?, "Sapcust Id,Name,City\n");
        assert_eq!(build_header_only_csv(&[])?, "");
        Ok(())
    }

    #[test]
    fn data_csv_quotes_only_when_needed() -> Result<()> {
        let rows = vec![
            RowData::new()
                .with("sapcustId", FieldValue::text("cust-0001"))
                .with("name", FieldValue::text("Acme, Inc."))
                .with("city", FieldValue::text("Springfield")),
            RowData::new()
                .with("sapcustId", FieldValue::text("cust-0002"))
                .with("name", FieldValue::text("The \"Best\" Co"))
                .with("city", FieldValue::Null),
        ];

        let csv = build_data_csv(&columns(), &rows)?;
        assert_eq!(
            csv,
            "Sapcust Id,Name,City\n\
             cust-0001,\"Acme, Inc.\",Springfield\n\
             cust-0002,\"The \"\"Best\"\" Co\",\n"
        );
        assert_eq!(build_data_csv(&columns(), &rows)?, csv);
        Ok(())
    }

    #[test]
    fn file_names_carry_table_kind_and_date() {
        assert_eq!(
            export_file_name(TableKind::SapIdStatuses, ExportKind::Template, date!(2026 - 03 - 01)),
            "SAPIdStatuses_template_2026-03-01.csv"
        );
        assert_eq!(
            export_file_name(TableKind::Customers, ExportKind::Export, date!(2026 - 12 - 31)),
            "Customers_export_2026-12-31.csv"
        );
    }

    #[test]
    fn upload_maps_labels_and_reports_bad_lines() -> Result<()> {
        let properties = default_properties(TableKind::Employees);
        let text = "\u{feff}Ohr Id,firstName,Last Name,Notes\n\
                    101,Ada,Lovelace,pioneer\n\
                    ,,,\n\
                    abc,Grace,Hopper,\n";

        let parsed = parse_upload_csv(&properties, text)?;
        assert_eq!(parsed.ignored_columns, vec!["Notes".to_owned()]);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].line, 2);
        assert_eq!(parsed.rows[0].data.value("ohrId"), &FieldValue::Integer(101));
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].line, 4);
        assert!(parsed.errors[0].message.starts_with("Ohr Id:"));
        Ok(())
    }

    #[test]
    fn selection_json_is_plain_objects() -> Result<()> {
        let rows = vec![
            RowData::new()
                .with("sapId", FieldValue::text("SAP000001"))
                .with("lastSeen", FieldValue::DateTime(datetime!(2026-02-01 08:30:00 UTC)))
                .with("currentProjectId", FieldValue::Null),
            RowData::new()
                .with("ohrId", FieldValue::Integer(700_002))
                .with("startDate", FieldValue::Date(date!(2025 - 11 - 03)))
                .with("$etag", FieldValue::text("W/\"1\"")),
        ];

        let text = build_selection_json(&rows)?;
        assert!(text.ends_with("]\n"));
        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(
            parsed,
            json!([
                {
                    "currentProjectId": null,
                    "lastSeen": "2026-02-01T08:30:00Z",
                    "sapId": "SAP000001"
                },
                {"ohrId": 700_002, "startDate": "2025-11-03"}
            ])
        );
        assert_eq!(
            selection_file_name(TableKind::SapIdStatuses, date!(2026 - 03 - 01)),
            "SAPIdStatuses_selection_2026-03-01.json"
        );
        Ok(())
    }
}
