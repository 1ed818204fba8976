// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use time::Date;

use crate::{FieldValue, FilterKind, PropertyDescriptor, TableKind, default_properties};

/// Supplies the entity properties of a table.
pub trait PropertySource {
    fn fetch_properties(&mut self, table: TableKind) -> Result<Vec<PropertyDescriptor>>;
}

/// The built-in entity catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogProperties;

impl PropertySource for CatalogProperties {
    fn fetch_properties(&mut self, table: TableKind) -> Result<Vec<PropertyDescriptor>> {
        Ok(default_properties(table))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub property_key: String,
    pub label: String,
}

impl ColumnSpec {
    pub fn new(property_key: &str, label: &str) -> Self {
        Self {
            property_key: property_key.to_owned(),
            label: label.to_owned(),
        }
    }

    fn from_property(property: &PropertyDescriptor) -> Self {
        Self::new(&property.name, &property.label)
    }
}

/// Visible columns of one table, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    table: TableKind,
    columns: Vec<ColumnSpec>,
}

impl ColumnLayout {
    /// Every property that can be a column, in property order.
    pub fn from_properties(table: TableKind, properties: &[PropertyDescriptor]) -> Self {
        Self {
            table,
            columns: properties
                .iter()
                .filter(|property| property.is_column())
                .map(ColumnSpec::from_property)
                .collect(),
        }
    }

    /// Restores a saved layout. Keys that no longer name a property are
    /// dropped; an empty result falls back to every property.
    pub fn from_keys(table: TableKind, keys: &[String], properties: &[PropertyDescriptor]) -> Self {
        let columns: Vec<_> = keys
            .iter()
            .filter_map(|key| {
                properties
                    .iter()
                    .find(|property| property.is_column() && &property.name == key)
            })
            .map(ColumnSpec::from_property)
            .collect();
        if columns.is_empty() {
            return Self::from_properties(table, properties);
        }
        Self { table, columns }
    }

    pub fn table(&self) -> TableKind {
        self.table
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.property_key.clone())
            .collect()
    }

    pub fn contains(&self, property_key: &str) -> bool {
        self.columns
            .iter()
            .any(|column| column.property_key == property_key)
    }

    pub fn add_item(
        &mut self,
        property_key: &str,
        properties: &[PropertyDescriptor],
    ) -> Result<&ColumnSpec> {
        let Some(property) = properties
            .iter()
            .find(|property| property.is_column() && property.name == property_key)
        else {
            bail!("{} has no property {property_key:?}", self.table);
        };
        if let Some(index) = self.position(property_key) {
            return Ok(&self.columns[index]);
        }
        self.columns.push(ColumnSpec::from_property(property));
        let last = self.columns.len() - 1;
        Ok(&self.columns[last])
    }

    /// At least one column always stays visible.
    pub fn remove_item(&mut self, property_key: &str) -> Result<ColumnSpec> {
        let Some(index) = self.position(property_key) else {
            bail!("column {property_key:?} is not shown");
        };
        if self.columns.len() == 1 {
            bail!("cannot hide the last visible column");
        }
        Ok(self.columns.remove(index))
    }

    /// Moves a column by `delta` places, clamped to the ends.
    pub fn move_item(&mut self, property_key: &str, delta: isize) -> Result<usize> {
        let Some(index) = self.position(property_key) else {
            bail!("column {property_key:?} is not shown");
        };
        let last = self.columns.len() as isize - 1;
        let target = (index as isize + delta).clamp(0, last) as usize;
        let column = self.columns.remove(index);
        self.columns.insert(target, column);
        Ok(target)
    }

    fn position(&self, property_key: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.property_key == property_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterField {
    pub property_key: String,
    pub label: String,
    pub kind: FilterKind,
}

pub fn filter_field(properties: &[PropertyDescriptor], property_key: &str) -> Option<FilterField> {
    properties
        .iter()
        .find(|property| property.filterable && property.name == property_key)
        .map(|property| FilterField {
            property_key: property.name.clone(),
            label: property.label.clone(),
            kind: property.edm_type.filter_kind(),
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Contains(String),
    Equals(i64),
    Is(bool),
    On(Date),
}

impl FilterCondition {
    pub fn parse(field: &FilterField, raw: &str) -> Result<Self> {
        let condition = match field.kind {
            FilterKind::Text => Self::Contains(raw.trim().to_lowercase()),
            FilterKind::Integer => match crate::EdmType::Int64.parse_value(raw)? {
                FieldValue::Integer(value) => Self::Equals(value),
                _ => bail!("{} filter needs a number", field.label),
            },
            FilterKind::Boolean => match crate::EdmType::Boolean.parse_value(raw)? {
                FieldValue::Bool(value) => Self::Is(value),
                _ => bail!("{} filter needs true or false", field.label),
            },
            FilterKind::Date => match crate::EdmType::Date.parse_value(raw)? {
                FieldValue::Date(value) => Self::On(value),
                _ => bail!("{} filter needs a date", field.label),
            },
        };
        Ok(condition)
    }

    pub fn matches(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Self::Contains(needle), value) => value.display().to_lowercase().contains(needle),
            (Self::Equals(expected), FieldValue::Integer(actual)) => expected == actual,
            (Self::Equals(expected), FieldValue::Decimal(actual)) => actual.trunc() as i64 == *expected,
            (Self::Is(expected), FieldValue::Bool(actual)) => expected == actual,
            (Self::On(expected), FieldValue::Date(actual)) => expected == actual,
            (Self::On(expected), FieldValue::DateTime(actual)) => actual.date() == *expected,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnLayout, FilterCondition, filter_field};
    use crate::{FieldValue, TableKind, default_properties};
    use anyhow::Result;
    use time::macros::{date, datetime};

    #[test]
    fn layout_skips_annotation_properties() {
        let mut properties = default_properties(TableKind::SapIdStatuses);
        properties.push(crate::PropertyDescriptor::new("$etag", crate::EdmType::String));

        let layout = ColumnLayout::from_properties(TableKind::SapIdStatuses, &properties);
        assert_eq!(layout.keys(), vec!["sapId", "currentProjectId", "lastSeen"]);
    }

    #[test]
    fn add_remove_and_move_columns() -> Result<()> {
        let properties = default_properties(TableKind::Projects);
        let mut layout = ColumnLayout::from_keys(
            TableKind::Projects,
            &["name".to_owned(), "gone".to_owned()],
            &properties,
        );
        assert_eq!(layout.keys(), vec!["name"]);

        layout.add_item("status", &properties)?;
        layout.add_item("status", &properties)?;
        assert_eq!(layout.keys(), vec!["name", "status"]);
        assert_eq!(layout.move_item("status", -5)?, 0);
        assert_eq!(layout.keys(), vec!["status", "name"]);

        layout.remove_item("status")?;
        let error = layout
            .remove_item("name")
            .expect_err("last column must stay visible");
        assert!(error.to_string().contains("last visible column"));
        assert!(layout.add_item("budget", &properties).is_err());
        Ok(())
    }

    #[test]
    fn filters_follow_property_kind() -> Result<()> {
        let properties = default_properties(TableKind::SapIdStatuses);
        let last_seen = filter_field(&properties, "lastSeen").expect("lastSeen is filterable");
        let on = FilterCondition::parse(&last_seen, "2026-02-01")?;
        assert!(on.matches(&FieldValue::DateTime(datetime!(2026-02-01 17:30 UTC))));
        assert!(!on.matches(&FieldValue::Date(date!(2026 - 02 - 02))));

        let sap_id = filter_field(&properties, "sapId").expect("sapId is filterable");
        let contains = FilterCondition::parse(&sap_id, "AB")?;
        assert!(contains.matches(&FieldValue::text("sap-ab-01")));
        assert!(!contains.matches(&FieldValue::Null));
        Ok(())
    }
}
