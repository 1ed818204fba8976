// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod binding;

pub use binding::StoreBinding;

use anyhow::{Context, Result, anyhow, bail};
use masterdata_app::{
    BatchOp, EdmType, FieldValue, PropertyDescriptor, RowData, TableKind, default_properties,
    format_date, format_datetime, next_customer_id,
};
use rusqlite::types::{Type, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

pub const APP_NAME: &str = "masterdata";

const LAYOUT_SETTING_PREFIX: &str = "layout.";

struct RequiredIndex {
    name: &'static str,
    create_sql: &'static str,
}

const REQUIRED_INDEXES: &[RequiredIndex] = &[
    RequiredIndex {
        name: "idx_opportunities_customer",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_opportunities_customer ON opportunities (customerId)",
    },
    RequiredIndex {
        name: "idx_projects_opp",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_projects_opp ON projects (oppId)",
    },
    RequiredIndex {
        name: "idx_employees_sap",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_employees_sap ON employees (sapId)",
    },
];

/// SQLite table backing each entity set.
pub const fn sql_table(table: TableKind) -> &'static str {
    match table {
        TableKind::Customers => "customers",
        TableKind::Opportunities => "opportunities",
        TableKind::Projects => "projects",
        TableKind::SapIdStatuses => "sap_id_statuses",
        TableKind::Employees => "employees",
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }
        ensure_required_indexes(&self.conn)
    }

    pub fn list_rows(&self, table: TableKind) -> Result<Vec<RowData>> {
        let properties = default_properties(table);
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} ASC",
            column_list(&properties),
            sql_table(table),
            table.key_property()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("prepare {table} query"))?;
        let rows = stmt
            .query_map([], |row| read_row(row, &properties))
            .with_context(|| format!("query {table}"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("collect {table}"))
    }

    pub fn get_row(&self, table: TableKind, key: &FieldValue) -> Result<Option<RowData>> {
        let properties = default_properties(table);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            column_list(&properties),
            sql_table(table),
            table.key_property()
        );
        self.conn
            .query_row(&sql, params![to_sql_value(key)], |row| {
                read_row(row, &properties)
            })
            .optional()
            .with_context(|| format!("load {table} row {}", key.display()))
    }

    pub fn row_count(&self, table: TableKind) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", sql_table(table)),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("count {table}"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Inserts one row and returns its key. A customer without a key gets
    /// the next customer id.
    pub fn insert_row(&self, table: TableKind, data: &RowData) -> Result<FieldValue> {
        let properties = default_properties(table);
        let key_field = table.key_property();
        let mut data = data.clone();
        if data.value(key_field).is_blank() {
            if table != TableKind::Customers {
                bail!("{key_field} is required -- fill it in and save again");
            }
            data.set(key_field, FieldValue::Text(self.next_customer_id()?));
        }

        let now = now_rfc3339()?;
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for property in &properties {
            if let Some(value) = data.get(&property.name) {
                columns.push(property.name.as_str());
                values.push(to_sql_value(value));
            }
        }
        columns.extend(["created_at", "updated_at"]);
        values.extend([Value::Text(now.clone()), Value::Text(now)]);

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            sql_table(table),
            columns.join(", ")
        );
        self.conn
            .execute(&sql, params_from_iter(values))
            .with_context(|| format!("insert {table} row {}", data.value(key_field).display()))?;
        Ok(data.value(key_field).clone())
    }

    pub fn update_row(&self, table: TableKind, key: &FieldValue, changes: &RowData) -> Result<()> {
        let properties = default_properties(table);
        let key_field = table.key_property();
        if changes
            .get(key_field)
            .is_some_and(|value| value != key)
        {
            bail!("{key_field} cannot change once saved -- add a new row instead");
        }

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for property in properties.iter().filter(|property| !property.key) {
            if let Some(value) = changes.get(&property.name) {
                assignments.push(format!("{} = ?", property.name));
                values.push(to_sql_value(value));
            }
        }
        if assignments.is_empty() {
            return Ok(());
        }
        assignments.push("updated_at = ?".to_owned());
        values.push(Value::Text(now_rfc3339()?));
        values.push(to_sql_value(key));

        let sql = format!(
            "UPDATE {} SET {} WHERE {key_field} = ?",
            sql_table(table),
            assignments.join(", ")
        );
        let updated = self
            .conn
            .execute(&sql, params_from_iter(values))
            .with_context(|| format!("update {table} row {}", key.display()))?;
        if updated == 0 {
            bail!("{table} row {} no longer exists", key.display());
        }
        Ok(())
    }

    pub fn delete_row(&self, table: TableKind, key: &FieldValue) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            sql_table(table),
            table.key_property()
        );
        let deleted = self
            .conn
            .execute(&sql, params![to_sql_value(key)])
            .with_context(|| format!("delete {table} row {}", key.display()))?;
        if deleted == 0 {
            bail!("{table} row {} no longer exists", key.display());
        }
        Ok(())
    }

    /// Runs every op in one transaction. Each op gets its own savepoint, so
    /// a failing row is rolled back and reported without touching the rest.
    pub fn apply_batch(&self, table: TableKind, ops: &[BatchOp]) -> Result<Vec<Result<(), String>>> {
        let mut tx = self
            .conn
            .unchecked_transaction()
            .with_context(|| format!("begin {table} batch"))?;
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let savepoint = tx.savepoint().context("open savepoint")?;
            match self.apply_op(table, op) {
                Ok(()) => {
                    savepoint.commit().context("release savepoint")?;
                    results.push(Ok(()));
                }
                Err(error) => {
                    drop(savepoint);
                    let message = format!("{error:#}");
                    debug!(%table, row = %op.row(), %message, "batch op failed");
                    results.push(Err(message));
                }
            }
        }
        tx.commit().with_context(|| format!("commit {table} batch"))?;
        Ok(results)
    }

    fn apply_op(&self, table: TableKind, op: &BatchOp) -> Result<()> {
        match op {
            BatchOp::Create { data, .. } => self.insert_row(table, data).map(|_| ()),
            BatchOp::Update { key, changes, .. } => self.update_row(table, key, changes),
            BatchOp::Delete { key, .. } => self.delete_row(table, key),
        }
    }

    pub fn next_customer_id(&self) -> Result<String> {
        let mut stmt = self
            .conn
            .prepare("SELECT sapcustId FROM customers")
            .context("prepare customer id query")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query customer ids")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("collect customer ids")?;
        Ok(next_customer_id(ids.iter().map(String::as_str)))
    }

    /// Inserts rows whose key is not taken yet. Returns how many were added.
    pub fn seed_rows(&self, dataset: &BTreeMap<TableKind, Vec<RowData>>) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin seed transaction")?;
        let mut added = 0;
        for (table, rows) in dataset {
            for row in rows {
                let key = row.value(table.key_property());
                if self.get_row(*table, key)?.is_some() {
                    continue;
                }
                self.insert_row(*table, row)?;
                added += 1;
            }
        }
        tx.commit().context("commit seed rows")?;
        info!(added, "seeded demo rows");
        Ok(added)
    }

    pub fn get_column_layout(&self, table: TableKind) -> Result<Option<Vec<String>>> {
        let key = layout_setting_key(table);
        let raw = self.get_setting_raw(&key)?;
        raw.map(|value| {
            serde_json::from_str::<Vec<String>>(&value).with_context(|| {
                format!("setting `{key}` is not a JSON list of columns; reset the layout to fix it")
            })
        })
        .transpose()
    }

    pub fn put_column_layout(&self, table: TableKind, keys: &[String]) -> Result<()> {
        let value = serde_json::to_string(keys).context("encode column layout")?;
        self.put_setting_raw(&layout_setting_key(table), &value)
    }

    pub fn clear_column_layout(&self, table: TableKind) -> Result<()> {
        let key = layout_setting_key(table);
        self.conn
            .execute("DELETE FROM settings WHERE key = ?", params![key])
            .with_context(|| format!("clear setting {key}"))?;
        Ok(())
    }

    fn get_setting_raw(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("read setting {key}"))
    }

    fn put_setting_raw(&self, key: &str, value: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO settings (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                ",
                params![key, value, now],
            )
            .with_context(|| format!("upsert setting {key}"))?;
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("MASTERDATA_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set MASTERDATA_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("masterdata.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn layout_setting_key(table: TableKind) -> String {
    format!("{LAYOUT_SETTING_PREFIX}{}", table.entity_set())
}

fn column_list(properties: &[PropertyDescriptor]) -> String {
    properties
        .iter()
        .map(|property| property.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_row(row: &rusqlite::Row<'_>, properties: &[PropertyDescriptor]) -> rusqlite::Result<RowData> {
    let mut data = RowData::new();
    for (index, property) in properties.iter().enumerate() {
        let value = from_sql_value(row.get_ref(index)?, property.edm_type)
            .with_context(|| format!("read column {}", property.name))
            .map_err(|error| from_sql_error(index, error))?;
        data.set(&property.name, value);
    }
    Ok(data)
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Integer(number) => Value::Integer(*number),
        FieldValue::Decimal(number) => Value::Real(*number),
        FieldValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        FieldValue::Date(date) => Value::Text(format_date(*date)),
        FieldValue::DateTime(value) => Value::Text(format_datetime(*value)),
    }
}

fn from_sql_value(value: ValueRef<'_>, edm_type: EdmType) -> Result<FieldValue> {
    let converted = match (value, edm_type) {
        (ValueRef::Null, _) => FieldValue::Null,
        (ValueRef::Integer(number), EdmType::Boolean) => FieldValue::Bool(number != 0),
        (ValueRef::Integer(number), EdmType::Decimal | EdmType::Double) => {
            FieldValue::Decimal(number as f64)
        }
        (ValueRef::Integer(number), EdmType::String | EdmType::Guid) => {
            FieldValue::Text(number.to_string())
        }
        (ValueRef::Integer(number), _) => FieldValue::Integer(number),
        (ValueRef::Real(number), _) => FieldValue::Decimal(number),
        (ValueRef::Text(bytes), edm_type) => {
            let text = std::str::from_utf8(bytes).context("column is not utf-8")?;
            edm_type.parse_value(text)?
        }
        (ValueRef::Blob(_), _) => bail!("unexpected blob value"),
    };
    Ok(converted)
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    let mut required: Vec<(&str, Vec<String>)> = TableKind::ALL
        .into_iter()
        .map(|table| {
            let mut columns: Vec<String> = default_properties(table)
                .into_iter()
                .map(|property| property.name)
                .collect();
            columns.extend(["created_at".to_owned(), "updated_at".to_owned()]);
            (sql_table(table), columns)
        })
        .collect();
    required.push((
        "settings",
        vec!["key".to_owned(), "value".to_owned(), "updated_at".to_owned()],
    ));

    for (table, required_columns) in required {
        if !table_exists(conn, table)? {
            bail!(
                "database is missing required table `{table}`; use a masterdata-compatible database or migrate first"
            );
        }

        let columns = table_columns(conn, table)?;
        let missing: Vec<&str> = required_columns
            .iter()
            .map(String::as_str)
            .filter(|column| !columns.contains(*column))
            .collect();

        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; run migration before launching",
                missing.join(", ")
            );
        }
    }

    Ok(())
}

fn ensure_required_indexes(conn: &Connection) -> Result<()> {
    for index in REQUIRED_INDEXES {
        conn.execute_batch(index.create_sql)
            .with_context(|| format!("ensure required index `{}`", index.name))?;
    }

    let existing_indexes = index_names(conn)?;
    let missing = REQUIRED_INDEXES
        .iter()
        .filter(|index| !existing_indexes.contains(index.name))
        .map(|index| index.name)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "database is missing required indexes: {}; run migration before launching",
            missing.join(", ")
        );
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "
            SELECT EXISTS(
              SELECT 1
              FROM sqlite_master
              WHERE type = 'table' AND name = ?
            )
            ",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("check table existence for {table}"))?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

fn index_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'index'
              AND name NOT LIKE 'sqlite_%'
            ",
        )
        .context("prepare index names query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query index names")?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("collect index names")
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}

fn from_sql_error(index: usize, error: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, error.into())
}
