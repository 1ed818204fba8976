// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use masterdata_app::{
    ColumnLayout, ConfirmPrompt, Dispatcher, EntityBinding, ExportKind, PropertySource, RowData,
    TableKind, build_data_csv, build_header_only_csv, export_file_name, parse_upload_csv,
};
use masterdata_db::Store;
use std::fs;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::{info, warn};

use crate::runtime::write_export_file;

/// One-shot commands that run without the terminal UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Export(TableKind),
    Template(TableKind),
    Import(TableKind, PathBuf),
    NextCustomerId,
}

pub fn parse_table(raw: &str) -> Result<TableKind> {
    TableKind::parse(raw).ok_or_else(|| {
        let known = TableKind::ALL
            .iter()
            .map(|table| table.entity_set())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::anyhow!("unknown table {raw:?}; use one of: {known}")
    })
}

pub struct CommandContext<'a> {
    pub store: &'a Store,
    pub export_dir: &'a Path,
    pub today: Date,
}

/// Runs `command` and returns the line to print.
pub fn run_command<B>(command: &Command, binding: &mut B, context: &CommandContext<'_>) -> Result<String>
where
    B: EntityBinding + PropertySource,
{
    match command {
        Command::Export(table) => export(*table, ExportKind::Export, binding, context),
        Command::Template(table) => export(*table, ExportKind::Template, binding, context),
        Command::Import(table, path) => import(*table, path, binding),
        Command::NextCustomerId => binding.next_customer_id(),
    }
}

fn column_layout<B: PropertySource>(
    table: TableKind,
    binding: &mut B,
    store: &Store,
) -> Result<ColumnLayout> {
    let properties = binding.fetch_properties(table)?;
    Ok(match store.get_column_layout(table)? {
        Some(keys) => ColumnLayout::from_keys(table, &keys, &properties),
        None => ColumnLayout::from_properties(table, &properties),
    })
}

fn export<B>(
    table: TableKind,
    kind: ExportKind,
    binding: &mut B,
    context: &CommandContext<'_>,
) -> Result<String>
where
    B: EntityBinding + PropertySource,
{
    let layout = column_layout(table, binding, context.store)?;
    let contents = match kind {
        ExportKind::Template => build_header_only_csv(layout.columns())?,
        ExportKind::Export => {
            let rows: Vec<RowData> = binding
                .rows(table)
                .iter()
                .filter_map(|row| binding.object(row))
                .collect();
            build_data_csv(layout.columns(), &rows)?
        }
    };
    let file_name = export_file_name(table, kind, context.today);
    let path = write_export_file(context.export_dir, &file_name, &contents)?;
    Ok(path.display().to_string())
}

fn import<B>(table: TableKind, path: &Path, binding: &mut B) -> Result<String>
where
    B: EntityBinding + PropertySource,
{
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let properties = binding.fetch_properties(table)?;
    let parsed = parse_upload_csv(&properties, &text)
        .with_context(|| format!("parse {}", path.display()))?;

    if !parsed.errors.is_empty() {
        let lines = parsed
            .errors
            .iter()
            .map(|error| format!("line {}: {}", error.line, error.message))
            .collect::<Vec<_>>()
            .join("\n");
        bail!(
            "{} has {} bad lines -- fix them and import again\n{lines}",
            path.display(),
            parsed.errors.len()
        );
    }
    if parsed.rows.is_empty() {
        bail!("{} has no data rows", path.display());
    }
    for column in &parsed.ignored_columns {
        warn!(%table, column = %column, "ignoring unknown column");
    }

    let mut dispatcher = Dispatcher::new();
    dispatcher.set_properties(table, properties);
    for upload in &parsed.rows {
        let row = dispatcher.add(table, binding)?;
        for (field, value) in upload.data.iter() {
            // Blank cells keep the new row's defaults, including a suggested key.
            if value.is_blank() {
                continue;
            }
            dispatcher.edit_field(table, &row, field, value.clone())?;
        }
    }

    let report = match dispatcher.save(table, binding) {
        Ok(report) => report,
        Err(error) => {
            dispatcher.cancel(table, binding, &mut |_: &ConfirmPrompt| true)?;
            return Err(error).with_context(|| format!("import {}", path.display()));
        }
    };
    info!(%table, rows = report.committed.len(), "imported");

    let mut message = format!(
        "imported {} rows into {}",
        report.committed.len(),
        table.entity_set()
    );
    if !parsed.ignored_columns.is_empty() {
        message.push_str(&format!(
            " (ignored columns: {})",
            parsed.ignored_columns.join(", ")
        ));
    }
    Ok(message)
}
