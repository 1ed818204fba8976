// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{FieldValue, TableKind};

pub const CUSTOMER_ID_PREFIX: &str = "cust-";

/// Stable path of one row context, e.g. `/Customers('cust-0001')`.
///
/// Rows that exist only on the client carry a `$uid` segment instead of a
/// key. A `RowId` is only meaningful while its backing context is alive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(String);

impl RowId {
    pub fn for_key(table: TableKind, key: &FieldValue) -> Self {
        Self(format!(
            "/{}({})",
            table.entity_set(),
            format_key_literal(key)
        ))
    }

    pub fn transient(table: TableKind, uid: u64) -> Self {
        Self(format!("/{}($uid={uid})", table.entity_set()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_transient(&self) -> bool {
        self.0.contains("($uid=")
    }

    pub fn table(&self) -> Option<TableKind> {
        let rest = self.0.strip_prefix('/')?;
        let set = rest.split('(').next()?;
        TableKind::parse(set)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Key predicate body as it appears inside `(...)` of an entity path.
/// Text keys are quoted with doubled single quotes; GUID-shaped text,
/// integers and decimals go bare.
pub fn format_key_literal(key: &FieldValue) -> String {
    match key {
        FieldValue::Text(text) if is_guid(text) => text.clone(),
        FieldValue::Text(text) => format!("'{}'", text.replace('\'', "''")),
        FieldValue::Integer(value) => value.to_string(),
        FieldValue::Decimal(value) => value.to_string(),
        FieldValue::Bool(value) => value.to_string(),
        FieldValue::Date(_) | FieldValue::DateTime(_) => key.display(),
        FieldValue::Null => "null".to_owned(),
    }
}

pub fn is_guid(value: &str) -> bool {
    value.len() == 36 && value.chars().all(|ch| ch.is_ascii_hexdigit() || ch == '-')
}

/// One past the largest trailing-digit suffix among `existing`, zero padded
/// to four digits. Ids without trailing digits are ignored.
pub fn next_customer_id<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter_map(customer_id_number)
        .max()
        .unwrap_or(0);
    format!("{CUSTOMER_ID_PREFIX}{:04}", max.saturating_add(1))
}

/// Trailing-digit suffix of a customer id, if any.
pub fn customer_id_number(id: &str) -> Option<u64> {
    let digits_start = id
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .last()
        .map(|(index, _)| index)?;
    id[digits_start..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{RowId, format_key_literal, next_customer_id};
    use crate::{FieldValue, TableKind};

    #[test]
    fn next_customer_id_uses_max_suffix() {
        let next = next_customer_id(["cust-0001", "cust-0007", "cust-0003"]);
        assert_eq!(next, "cust-0008");
    }

    #[test]
    fn next_customer_id_starts_at_one() {
        assert_eq!(next_customer_id(Vec::<&str>::new()), "cust-0001");
        assert_eq!(next_customer_id(["legacy", "cust-"]), "cust-0001");
    }

    #[test]
    fn next_customer_id_grows_past_padding() {
        assert_eq!(next_customer_id(["cust-9999"]), "cust-10000");
        assert_eq!(next_customer_id(["A17", "cust-0002"]), "cust-0018");
    }

    #[test]
    fn key_literals_follow_entity_path_rules() {
        assert_eq!(
            format_key_literal(&FieldValue::Text("O'Brien".to_owned())),
            "'O''Brien'"
        );
        assert_eq!(format_key_literal(&FieldValue::Integer(42)), "42");
        let guid = "0f8fad5b-d9cb-469f-a165-70867728950e";
        assert_eq!(format_key_literal(&FieldValue::Text(guid.to_owned())), guid);
    }

    #[test]
    fn row_ids_know_their_table() {
        let persisted = RowId::for_key(
            TableKind::Customers,
            &FieldValue::Text("cust-0001".to_owned()),
        );
        assert_eq!(persisted.as_str(), "/Customers('cust-0001')");
        assert_eq!(persisted.table(), Some(TableKind::Customers));
        assert!(!persisted.is_transient());

        let transient = RowId::transient(TableKind::SapIdStatuses, 3);
        assert_eq!(transient.as_str(), "/SAPIdStatuses($uid=3)");
        assert_eq!(transient.table(), Some(TableKind::SapIdStatuses));
        assert!(transient.is_transient());
    }
}
