// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, warn};

use crate::{CommandError, EntityBinding, FieldValue, RowData, RowId, TableKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditMode {
    #[default]
    None,
    SingleEdit,
    MultiEdit,
    Add,
    AddMulti,
}

impl EditMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SingleEdit => "single-edit",
            Self::MultiEdit => "multi-edit",
            Self::Add => "add",
            Self::AddMulti => "add-multi",
        }
    }

    pub const fn is_adding(self) -> bool {
        matches!(self, Self::Add | Self::AddMulti)
    }

    pub const fn is_editing(self) -> bool {
        matches!(self, Self::SingleEdit | Self::MultiEdit)
    }
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rows under local edit for one table and their pre-edit values.
///
/// `editing` is empty exactly when `mode` is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditSession {
    pub mode: EditMode,
    pub editing: Vec<RowId>,
    pub snapshots: BTreeMap<RowId, RowData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditReport {
    pub rows: Vec<RowId>,
    pub missing: Vec<RowId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    pub discarded: Vec<RowId>,
    pub restored: Vec<RowId>,
    pub missing: Vec<RowId>,
}

#[derive(Debug)]
pub struct RowEditTracker {
    table: TableKind,
    session: EditSession,
    drafts: BTreeMap<RowId, RowData>,
    created: BTreeSet<RowId>,
}

impl RowEditTracker {
    pub fn new(table: TableKind) -> Self {
        Self {
            table,
            session: EditSession::default(),
            drafts: BTreeMap::new(),
            created: BTreeSet::new(),
        }
    }

    pub fn table(&self) -> TableKind {
        self.table
    }

    pub fn mode(&self) -> EditMode {
        self.session.mode
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn editing_rows(&self) -> &[RowId] {
        &self.session.editing
    }

    pub fn is_idle(&self) -> bool {
        self.session.editing.is_empty()
    }

    pub fn is_row_editable(&self, row: &RowId) -> bool {
        self.session.editing.contains(row)
    }

    pub fn has_drafts(&self) -> bool {
        !self.drafts.is_empty()
    }

    /// Snapshots every resolvable row and enters single or multi edit.
    /// Rows whose context is gone are skipped and reported.
    pub fn begin_edit(
        &mut self,
        binding: &dyn EntityBinding,
        rows: &[RowId],
    ) -> Result<EditReport, CommandError> {
        if rows.is_empty() {
            return Err(CommandError::NoSelection { table: self.table });
        }
        if !self.is_idle() {
            return Err(CommandError::InvalidMode {
                table: self.table,
                action: "edit",
                mode: self.session.mode,
            });
        }

        let mut report = EditReport::default();
        for row in rows {
            if report.rows.contains(row) {
                continue;
            }
            match binding.object(row) {
                Some(values) => {
                    self.session.snapshots.insert(row.clone(), values);
                    report.rows.push(row.clone());
                }
                None => {
                    warn!(table = %self.table, %row, "context not found, skipping row");
                    report.missing.push(row.clone());
                }
            }
        }
        if report.rows.is_empty() {
            return Err(CommandError::NoSelection { table: self.table });
        }

        self.session.mode = if report.rows.len() == 1 {
            EditMode::SingleEdit
        } else {
            EditMode::MultiEdit
        };
        self.session.editing = report.rows.clone();
        debug!(table = %self.table, mode = %self.session.mode, rows = report.rows.len(), "edit started");
        Ok(report)
    }

    /// Asks the binding for a transient row and tracks it.
    pub fn begin_add(
        &mut self,
        binding: &mut dyn EntityBinding,
        template: RowData,
    ) -> Result<RowId, CommandError> {
        if self.session.mode.is_editing() {
            return Err(CommandError::InvalidMode {
                table: self.table,
                action: "add",
                mode: self.session.mode,
            });
        }
        let row = binding.create(self.table, template)?;
        self.session.mode = if self.is_idle() {
            EditMode::Add
        } else {
            EditMode::AddMulti
        };
        self.session.editing.insert(0, row.clone());
        self.created.insert(row.clone());
        debug!(table = %self.table, %row, mode = %self.session.mode, "row added");
        Ok(row)
    }

    /// Records a field edit locally; `flush` pushes it to the binding.
    pub fn edit_field(
        &mut self,
        row: &RowId,
        field: &str,
        value: FieldValue,
    ) -> Result<(), CommandError> {
        if !self.is_row_editable(row) {
            return Err(CommandError::NotEditing { row: row.clone() });
        }
        self.drafts.entry(row.clone()).or_default().set(field, value);
        Ok(())
    }

    /// Binding values with unflushed drafts laid over them.
    pub fn current_value(&self, binding: &dyn EntityBinding, row: &RowId) -> Option<RowData> {
        let mut values = binding.object(row)?;
        if let Some(draft) = self.drafts.get(row) {
            values.merge(draft);
        }
        Some(values)
    }

    /// Pushes drafts through `set_property`. Returns rows whose context was
    /// gone; their drafts are dropped.
    pub fn flush(&mut self, binding: &mut dyn EntityBinding) -> Result<Vec<RowId>, CommandError> {
        let mut missing = Vec::new();
        while let Some((row, draft)) = self.drafts.pop_first() {
            if binding.object(&row).is_none() {
                warn!(table = %self.table, %row, "context not found, dropping edits");
                missing.push(row);
                continue;
            }
            for (field, value) in draft.iter() {
                if let Err(error) = binding.set_property(&row, field, value.clone()) {
                    self.drafts.insert(row, draft.clone());
                    return Err(error.into());
                }
            }
        }
        Ok(missing)
    }

    /// Ends the session after a successful submit. Drafts recorded after
    /// the last flush were never sent and are dropped, not pushed.
    pub fn commit(&mut self) -> Vec<RowId> {
        if self.has_drafts() {
            warn!(table = %self.table, rows = self.drafts.len(), "dropping edits made after submit");
        }
        let committed = std::mem::take(&mut self.session.editing);
        self.reset();
        debug!(table = %self.table, rows = committed.len(), "edit committed");
        committed
    }

    /// Folds the accepted part of a partly rejected submit into the
    /// session. Persisted rows take their new values as snapshot; added
    /// rows the backend accepted are no longer transient and leave the
    /// session.
    pub fn settle_applied(&mut self, binding: &dyn EntityBinding, applied: &[RowId]) {
        for row in applied {
            if self.created.remove(row) {
                self.session.editing.retain(|id| id != row);
                continue;
            }
            if !self.session.editing.contains(row) {
                continue;
            }
            match binding.object(row) {
                Some(values) => {
                    self.session.snapshots.insert(row.clone(), values);
                }
                None => {
                    self.session.snapshots.remove(row);
                }
            }
        }
        if self.session.editing.is_empty() {
            self.reset();
        } else if self.session.mode == EditMode::AddMulti && self.session.editing.len() == 1 {
            self.session.mode = EditMode::Add;
        }
        debug!(table = %self.table, applied = applied.len(), "partial submit settled");
    }

    /// Drops transient rows locally and returns every other row to its
    /// last persisted values. Only this session's rows are touched.
    pub fn cancel(&mut self, binding: &mut dyn EntityBinding) -> CancelReport {
        let mut report = CancelReport::default();
        let editing = std::mem::take(&mut self.session.editing);
        for row in editing {
            if self.created.contains(&row) {
                match binding.delete(&row) {
                    Ok(()) => report.discarded.push(row),
                    Err(error) => {
                        warn!(table = %self.table, %row, error = %error, "discarding added row failed");
                        report.missing.push(row);
                    }
                }
                continue;
            }
            if binding.object(&row).is_none() {
                warn!(table = %self.table, %row, "context not found, nothing to restore");
                report.missing.push(row);
                continue;
            }
            if let Err(error) = binding.reset_row(&row) {
                warn!(table = %self.table, %row, error = %format!("{error:#}"), "restore failed");
                report.missing.push(row);
                continue;
            }
            if binding.object(&row).as_ref() != self.session.snapshots.get(&row) {
                debug!(table = %self.table, %row, "row differs from its edit snapshot after restore");
            }
            report.restored.push(row);
        }
        self.reset();
        debug!(
            table = %self.table,
            discarded = report.discarded.len(),
            restored = report.restored.len(),
            "edit cancelled"
        );
        report
    }

    fn reset(&mut self) {
        self.session = EditSession::default();
        self.drafts.clear();
        self.created.clear();
    }
}
