// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Customers,
    Opportunities,
    Projects,
    SapIdStatuses,
    Employees,
}

impl TableKind {
    pub const ALL: [Self; 5] = [
        Self::Customers,
        Self::Opportunities,
        Self::Projects,
        Self::SapIdStatuses,
        Self::Employees,
    ];

    /// Entity set name on the service and the table name in exported files.
    pub const fn entity_set(self) -> &'static str {
        match self {
            Self::Customers => "Customers",
            Self::Opportunities => "Opportunities",
            Self::Projects => "Projects",
            Self::SapIdStatuses => "SAPIdStatuses",
            Self::Employees => "Employees",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Opportunities => "opportunities",
            Self::Projects => "projects",
            Self::SapIdStatuses => "sap ids",
            Self::Employees => "employees",
        }
    }

    pub const fn key_property(self) -> &'static str {
        match self {
            Self::Customers => "sapcustId",
            Self::Opportunities => "oppId",
            Self::Projects => "projectId",
            Self::SapIdStatuses => "sapId",
            Self::Employees => "ohrId",
        }
    }

    /// Accepts the entity set name, the label, or the label without spaces.
    pub fn parse(value: &str) -> Option<Self> {
        let needle = value.trim();
        Self::ALL.into_iter().find(|kind| {
            kind.entity_set().eq_ignore_ascii_case(needle)
                || kind.label().eq_ignore_ascii_case(needle)
                || kind.label().replace(' ', "").eq_ignore_ascii_case(needle)
        })
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_set())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdmType {
    String,
    Guid,
    Int16,
    Int32,
    Int64,
    Decimal,
    Double,
    Boolean,
    Date,
    DateTimeOffset,
}

impl EdmType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "Edm.String",
            Self::Guid => "Edm.Guid",
            Self::Int16 => "Edm.Int16",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Decimal => "Edm.Decimal",
            Self::Double => "Edm.Double",
            Self::Boolean => "Edm.Boolean",
            Self::Date => "Edm.Date",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
        }
    }

    /// Unknown type names fall back to `Edm.String`.
    pub fn parse(value: &str) -> Self {
        match value {
            "Edm.Guid" => Self::Guid,
            "Edm.Int16" | "Edm.Byte" | "Edm.SByte" => Self::Int16,
            "Edm.Int32" => Self::Int32,
            "Edm.Int64" => Self::Int64,
            "Edm.Decimal" => Self::Decimal,
            "Edm.Double" | "Edm.Single" => Self::Double,
            "Edm.Boolean" => Self::Boolean,
            "Edm.Date" => Self::Date,
            "Edm.DateTimeOffset" => Self::DateTimeOffset,
            _ => Self::String,
        }
    }

    pub const fn filter_kind(self) -> FilterKind {
        match self {
            Self::Int16 | Self::Int32 | Self::Int64 | Self::Decimal => FilterKind::Integer,
            Self::Boolean => FilterKind::Boolean,
            Self::Date | Self::DateTimeOffset => FilterKind::Date,
            Self::String | Self::Guid | Self::Double => FilterKind::Text,
        }
    }

    pub fn parse_value(self, raw: &str) -> Result<FieldValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(FieldValue::Null);
        }
        match self {
            Self::String | Self::Guid => Ok(FieldValue::Text(raw.to_owned())),
            Self::Int16 | Self::Int32 | Self::Int64 => trimmed
                .parse::<i64>()
                .map(FieldValue::Integer)
                .with_context(|| format!("expected a whole number, got {trimmed:?}")),
            Self::Decimal | Self::Double => trimmed
                .parse::<f64>()
                .map(FieldValue::Decimal)
                .with_context(|| format!("expected a number, got {trimmed:?}")),
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(FieldValue::Bool(true)),
                "false" | "no" | "n" | "0" => Ok(FieldValue::Bool(false)),
                _ => bail!("expected true or false, got {trimmed:?}"),
            },
            Self::Date => parse_date(trimmed).map(FieldValue::Date),
            Self::DateTimeOffset => parse_datetime(trimmed).map(FieldValue::DateTime),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Text,
    Integer,
    Boolean,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Bool(bool),
    Date(Date),
    DateTime(OffsetDateTime),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(text) => text.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Decimal(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Date(date) => format_date(*date),
            Self::DateTime(value) => format_datetime(*value),
        }
    }

    /// Plain JSON: dates as ISO strings, no type tags.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Text(text) => Value::String(text.clone()),
            Self::Integer(number) => json!(number),
            Self::Decimal(number) => json!(number),
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Date(date) => Value::String(format_date(*date)),
            Self::DateTime(value) => Value::String(format_datetime(*value)),
        }
    }
}

static NULL_VALUE: FieldValue = FieldValue::Null;

/// Field values of one row, keyed by property name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowData(BTreeMap<String, FieldValue>);

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every property present and null.
    pub fn blank(properties: &[PropertyDescriptor]) -> Self {
        properties
            .iter()
            .map(|property| (property.name.clone(), FieldValue::Null))
            .collect()
    }

    pub fn with(mut self, field: &str, value: FieldValue) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn value(&self, field: &str) -> &FieldValue {
        self.0.get(field).unwrap_or(&NULL_VALUE)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(field.to_owned(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.0.remove(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One JSON object of every field; `$` bookkeeping fields are left out.
    pub fn to_json(&self) -> Value {
        let fields: Map<String, Value> = self
            .iter()
            .filter(|(name, _)| !name.starts_with('$'))
            .map(|(name, value)| (name.to_owned(), value.to_json()))
            .collect();
        Value::Object(fields)
    }

    /// Overlays `changes` on top of this row.
    pub fn merge(&mut self, changes: &RowData) {
        for (field, value) in changes.iter() {
            self.set(field, value.clone());
        }
    }
}

impl FromIterator<(String, FieldValue)> for RowData {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub label: String,
    pub edm_type: EdmType,
    pub key: bool,
    pub nullable: bool,
    pub sortable: bool,
    pub filterable: bool,
    pub groupable: bool,
}

impl PropertyDescriptor {
    pub fn new(name: &str, edm_type: EdmType) -> Self {
        Self {
            name: name.to_owned(),
            label: label_for_property(name),
            edm_type,
            key: false,
            nullable: true,
            sortable: true,
            filterable: true,
            groupable: true,
        }
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self.nullable = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Names starting with `$` are service annotations, never columns.
    pub fn is_column(&self) -> bool {
        !self.name.starts_with('$')
    }
}

/// `sapcustId` becomes `Sapcust Id`: a space before each uppercase letter,
/// first letter capitalized.
pub fn label_for_property(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            spaced.push(' ');
        }
        spaced.push(ch);
    }
    let trimmed = spaced.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Built-in property list per table, used when service metadata is not
/// available.
pub fn default_properties(table: TableKind) -> Vec<PropertyDescriptor> {
    use self::EdmType::{Date as EdmDate, DateTimeOffset, Decimal, Int32, String as Text};

    let prop = PropertyDescriptor::new;
    match table {
        TableKind::Customers => vec![
            prop("sapcustId", Text).key(),
            prop("sfdccustomerId", Int32),
            prop("name", Text).required(),
            prop("city", Text),
            prop("country", Text),
            prop("status", Text),
            prop("verticalId", Int32),
        ],
        TableKind::Opportunities => vec![
            prop("oppId", Text).key(),
            prop("customerId", Int32),
            prop("oppNumber", Text),
            prop("name", Text).required(),
            prop("stage", Text),
            prop("probability", Decimal),
            prop("expectedStart", EdmDate),
            prop("expectedEnd", EdmDate),
        ],
        TableKind::Projects => vec![
            prop("projectId", Text).key(),
            prop("oppId", Text),
            prop("name", Text).required(),
            prop("status", Text),
            prop("createdBy", Text),
            prop("techStack", Text),
        ],
        TableKind::SapIdStatuses => vec![
            prop("sapId", Text).key(),
            prop("currentProjectId", Text),
            prop("lastSeen", DateTimeOffset),
        ],
        TableKind::Employees => vec![
            prop("ohrId", Int32).key(),
            prop("sapId", Text),
            prop("firstName", Text).required(),
            prop("lastName", Text).required(),
            prop("email", Text),
            prop("costCenter", Text),
            prop("skillSet", Text),
            prop("status", Text),
            prop("manager", Text),
        ],
    }
}

/// Labels of non-nullable properties that are blank in `row`.
pub fn missing_required_fields(row: &RowData, properties: &[PropertyDescriptor]) -> Vec<String> {
    properties
        .iter()
        .filter(|property| property.is_column() && !property.nullable)
        .filter(|property| row.value(&property.name).is_blank())
        .map(|property| property.label.clone())
        .collect()
}

pub fn format_date(date: Date) -> String {
    let format = format_description!("[year]-[month]-[day]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}

pub fn format_datetime(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

pub fn parse_date(value: &str) -> Result<Date> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(value, &format)
        .with_context(|| format!("expected a date like 2026-01-31, got {value:?}"))
}

/// RFC 3339 timestamps, or a bare date taken as midnight UTC.
pub fn parse_datetime(value: &str) -> Result<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed);
    }
    parse_date(value)
        .map(|date| date.with_time(Time::MIDNIGHT).assume_utc())
        .map_err(|_| anyhow!("expected an RFC 3339 timestamp, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::{
        EdmType, FieldValue, FilterKind, RowData, TableKind, default_properties,
        label_for_property, missing_required_fields,
    };
    use anyhow::Result;
    use time::macros::{date, datetime};

    #[test]
    fn labels_split_on_uppercase() {
        assert_eq!(label_for_property("sapcustId"), "Sapcust Id");
        assert_eq!(label_for_property("firstName"), "First Name");
        assert_eq!(label_for_property("ID"), "I D");
        assert_eq!(label_for_property("name"), "Name");
        assert_eq!(label_for_property(""), "");
    }

    #[test]
    fn table_kind_parses_names_and_labels() {
        for kind in TableKind::ALL {
            assert_eq!(TableKind::parse(kind.entity_set()), Some(kind));
            assert_eq!(TableKind::parse(kind.label()), Some(kind));
        }
        assert_eq!(TableKind::parse("sapids"), Some(TableKind::SapIdStatuses));
        assert_eq!(TableKind::parse("vendors"), None);
    }

    #[test]
    fn filter_kinds_follow_edm_type() {
        assert_eq!(EdmType::Int64.filter_kind(), FilterKind::Integer);
        assert_eq!(EdmType::Decimal.filter_kind(), FilterKind::Integer);
        assert_eq!(EdmType::Boolean.filter_kind(), FilterKind::Boolean);
        assert_eq!(EdmType::DateTimeOffset.filter_kind(), FilterKind::Date);
        assert_eq!(EdmType::Guid.filter_kind(), FilterKind::Text);
        assert_eq!(EdmType::parse("Edm.Whatever"), EdmType::String);
    }

    #[test]
    fn parse_value_by_type() -> Result<()> {
        assert_eq!(EdmType::Int32.parse_value(" 42 ")?, FieldValue::Integer(42));
        assert_eq!(EdmType::String.parse_value("")?, FieldValue::Null);
        assert_eq!(EdmType::Boolean.parse_value("Yes")?, FieldValue::Bool(true));
        assert_eq!(
            EdmType::Date.parse_value("2026-03-01")?,
            FieldValue::Date(date!(2026 - 03 - 01))
        );
        assert_eq!(
            EdmType::DateTimeOffset.parse_value("2026-03-01")?,
            FieldValue::DateTime(datetime!(2026-03-01 0:00 UTC))
        );
        let error = EdmType::Int32
            .parse_value("twelve")
            .expect_err("text should not parse as an integer");
        assert!(error.to_string().contains("whole number"));
        Ok(())
    }

    #[test]
    fn required_fields_are_reported_by_label() {
        let properties = default_properties(TableKind::Employees);
        let row = RowData::blank(&properties)
            .with("ohrId", FieldValue::Integer(7))
            .with("firstName", FieldValue::text("  "));
        assert_eq!(
            missing_required_fields(&row, &properties),
            vec!["First Name".to_owned(), "Last Name".to_owned()]
        );
    }

    #[test]
    fn catalog_marks_one_key_per_table() {
        for kind in TableKind::ALL {
            let keys: Vec<_> = default_properties(kind)
                .into_iter()
                .filter(|property| property.key)
                .map(|property| property.name)
                .collect();
            assert_eq!(keys, vec![kind.key_property().to_owned()]);
        }
    }
}
