// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;

use crate::{FieldValue, RowData, RowId, TableKind};

/// Row contexts and pending changes for the five entity collections.
///
/// Mutations are buffered per table until `submit_batch` sends that table's
/// group. Each table is its own group, so submitting or resetting one table
/// never touches another.
pub trait EntityBinding {
    /// Live row contexts in display order, client-created rows first.
    fn rows(&self, table: TableKind) -> Vec<RowId>;

    /// Current values including pending changes, or `None` once the
    /// context is gone.
    fn object(&self, row: &RowId) -> Option<RowData>;

    /// Adds a transient row that exists only locally until submitted.
    fn create(&mut self, table: TableKind, data: RowData) -> Result<RowId>;

    fn set_property(&mut self, row: &RowId, field: &str, value: FieldValue) -> Result<()>;

    /// Marks a persisted row for deletion. Transient rows are dropped
    /// locally without a request.
    fn delete(&mut self, row: &RowId) -> Result<()>;

    /// Sends every pending change of `table` as one batch. `Err` means the
    /// batch itself failed; per-row failures come back as rejections.
    fn submit_batch(&mut self, table: TableKind) -> Result<BatchOutcome>;

    /// Drops every pending change of `table`.
    fn reset_changes(&mut self, table: TableKind);

    /// Drops the pending update of one persisted row so it reads as last
    /// persisted. Nothing else in the table is touched.
    fn reset_row(&mut self, row: &RowId) -> Result<()>;

    /// Reloads `table` from the backend, keeping pending work.
    fn refresh(&mut self, table: TableKind) -> Result<()>;

    fn has_pending_changes(&self, table: TableKind) -> bool;

    fn next_customer_id(&mut self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Create {
        row: RowId,
        data: RowData,
    },
    Update {
        row: RowId,
        key: FieldValue,
        changes: RowData,
    },
    Delete {
        row: RowId,
        key: FieldValue,
    },
}

impl BatchOp {
    pub fn row(&self) -> &RowId {
        match self {
            Self::Create { row, .. } | Self::Update { row, .. } | Self::Delete { row, .. } => row,
        }
    }

    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRejection {
    pub row: RowId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: Vec<RowId>,
    pub rejected: Vec<BatchRejection>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// First rejection message plus a count of the rest.
    pub fn rejection_summary(&self) -> Option<String> {
        let first = self.rejected.first()?;
        let rest = self.rejected.len() - 1;
        Some(if rest == 0 {
            format!("{}: {}", first.row, first.message)
        } else {
            format!("{}: {} (and {rest} more)", first.row, first.message)
        })
    }
}
