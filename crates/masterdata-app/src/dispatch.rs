// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    BatchOutcome, BatchRejection, CancelReport, EditMode, EditReport, EntityBinding, FieldValue,
    PropertyDescriptor, RowData, RowEditTracker, RowId, TableKind, customer_id_number,
    default_properties, missing_required_fields, next_customer_id,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableAction {
    Add,
    Edit,
    Delete,
    Save,
    Cancel,
}

impl TableAction {
    pub const ALL: [Self; 5] = [Self::Add, Self::Edit, Self::Delete, Self::Save, Self::Cancel];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Save => "save",
            Self::Cancel => "cancel",
        }
    }

    /// Control identifier for this action on `table`, e.g. `btnSave_Customers`.
    pub fn control_id(self, table: TableKind) -> String {
        let name = match self {
            Self::Add => "Add",
            Self::Edit => "Edit",
            Self::Delete => "Delete",
            Self::Save => "Save",
            Self::Cancel => "Cancel",
        };
        format!("btn{name}_{}", table.entity_set())
    }
}

impl fmt::Display for TableAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowProblem {
    pub row: RowId,
    pub missing: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("select one or more {table} rows first")]
    NoSelection { table: TableKind },
    #[error("{table} is busy submitting changes -- wait for it to finish")]
    Busy { table: TableKind },
    #[error("cannot {action} {table} while in {mode} mode -- save or cancel first")]
    InvalidMode {
        table: TableKind,
        action: &'static str,
        mode: EditMode,
    },
    #[error("row {row} is not being edited -- press edit first")]
    NotEditing { row: RowId },
    #[error("no pending {table} edits to {action}")]
    NothingPending {
        table: TableKind,
        action: &'static str,
    },
    #[error("{action} on {table} declined")]
    Declined {
        table: TableKind,
        action: TableAction,
    },
    #[error("{table} rows are missing required fields: {}", describe_problems(.problems))]
    Validation {
        table: TableKind,
        problems: Vec<RowProblem>,
    },
    #[error("saving {table} failed: {message}")]
    BatchSubmitFailure { table: TableKind, message: String },
    #[error("deleting {table} rows failed: {message}")]
    DeleteFailed { table: TableKind, message: String },
    #[error("no {action} in flight for {table}")]
    NotInFlight {
        table: TableKind,
        action: TableAction,
    },
    #[error("unknown control {0:?}")]
    UnknownControl(String),
    #[error(transparent)]
    Binding(#[from] anyhow::Error),
}

fn describe_problems(problems: &[RowProblem]) -> String {
    problems
        .iter()
        .map(|problem| format!("{} ({})", problem.row, problem.missing.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Enablement of the five per-table controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableButtons {
    pub add: bool,
    pub edit: bool,
    pub delete: bool,
    pub save: bool,
    pub cancel: bool,
}

impl TableButtons {
    pub const fn baseline(has_selection: bool) -> Self {
        Self {
            add: true,
            edit: has_selection,
            delete: has_selection,
            save: false,
            cancel: false,
        }
    }

    pub const fn is_enabled(&self, action: TableAction) -> bool {
        match action {
            TableAction::Add => self.add,
            TableAction::Edit => self.edit,
            TableAction::Delete => self.delete,
            TableAction::Save => self.save,
            TableAction::Cancel => self.cancel,
        }
    }

    fn for_state(mode: EditMode, has_selection: bool, busy: bool) -> Self {
        if busy {
            return Self {
                add: false,
                edit: false,
                delete: false,
                save: false,
                cancel: false,
            };
        }
        match mode {
            EditMode::None => Self::baseline(has_selection),
            EditMode::Add | EditMode::AddMulti => Self {
                add: true,
                edit: false,
                delete: false,
                save: true,
                cancel: true,
            },
            EditMode::SingleEdit | EditMode::MultiEdit => Self {
                add: false,
                edit: false,
                delete: false,
                save: true,
                cancel: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub table: TableKind,
    pub action: TableAction,
    pub rows: usize,
}

impl ConfirmPrompt {
    pub fn message(&self) -> String {
        let noun = if self.rows == 1 { "row" } else { "rows" };
        match self.action {
            TableAction::Delete => format!("delete {} {} {noun}?", self.rows, self.table),
            TableAction::Cancel => {
                format!("discard changes to {} {} {noun}?", self.rows, self.table)
            }
            action => format!("{action} {} {} {noun}?", self.rows, self.table),
        }
    }
}

pub trait Confirm {
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&ConfirmPrompt) -> bool,
{
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        self(prompt)
    }
}

/// Edit state, selection and control enablement for one table.
#[derive(Debug)]
pub struct TableController {
    table: TableKind,
    tracker: RowEditTracker,
    buttons: TableButtons,
    selection: Vec<RowId>,
    properties: Vec<PropertyDescriptor>,
    in_flight: Option<TableAction>,
}

impl TableController {
    fn new(table: TableKind) -> Self {
        Self {
            table,
            tracker: RowEditTracker::new(table),
            buttons: TableButtons::baseline(false),
            selection: Vec::new(),
            properties: default_properties(table),
            in_flight: None,
        }
    }

    pub fn table(&self) -> TableKind {
        self.table
    }

    pub fn tracker(&self) -> &RowEditTracker {
        &self.tracker
    }

    pub fn buttons(&self) -> TableButtons {
        self.buttons
    }

    pub fn selection(&self) -> &[RowId] {
        &self.selection
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn in_flight(&self) -> Option<TableAction> {
        self.in_flight
    }

    fn ensure_idle_submit(&self) -> Result<(), CommandError> {
        if self.in_flight.is_some() {
            return Err(CommandError::Busy { table: self.table });
        }
        Ok(())
    }

    fn refresh_buttons(&mut self) {
        self.buttons = TableButtons::for_state(
            self.tracker.mode(),
            !self.selection.is_empty(),
            self.in_flight.is_some(),
        );
    }
}

/// Submit started by `start_save` or `start_delete`, waiting for the batch
/// result.
#[derive(Debug)]
#[must_use]
pub struct PendingSubmit {
    table: TableKind,
    action: TableAction,
    rows: Vec<RowId>,
    missing: Vec<RowId>,
}

impl PendingSubmit {
    pub fn table(&self) -> TableKind {
        self.table
    }

    pub fn action(&self) -> TableAction {
        self.action
    }

    pub fn rows(&self) -> &[RowId] {
        &self.rows
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub committed: Vec<RowId>,
    pub applied: Vec<RowId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub requested: Vec<RowId>,
    pub deleted: Vec<RowId>,
    pub rejected: Vec<BatchRejection>,
    pub missing: Vec<RowId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Added(RowId),
    Editing(EditReport),
    Deleted(DeleteReport),
    Saved(SaveReport),
    Cancelled(CancelReport),
}

impl ActionOutcome {
    pub fn status(&self, table: TableKind) -> String {
        match self {
            Self::Added(_) => format!("{} row added", table.label()),
            Self::Editing(report) if report.missing.is_empty() => {
                format!("editing {} {} rows", report.rows.len(), table.label())
            }
            Self::Editing(report) => format!(
                "editing {} {} rows, {} no longer exist",
                report.rows.len(),
                table.label(),
                report.missing.len()
            ),
            Self::Deleted(report) if report.rejected.is_empty() => {
                format!("deleted {} {} rows", report.deleted.len(), table.label())
            }
            Self::Deleted(report) => format!(
                "deleted {} {} rows, {} rejected",
                report.deleted.len(),
                table.label(),
                report.rejected.len()
            ),
            Self::Saved(report) => {
                format!("saved {} {} rows", report.committed.len(), table.label())
            }
            Self::Cancelled(report) => format!(
                "discarded changes to {} {} rows",
                report.discarded.len() + report.restored.len(),
                table.label()
            ),
        }
    }
}

/// Routes table actions to the controller registered for each table.
#[derive(Debug)]
pub struct Dispatcher {
    controllers: Vec<TableController>,
    controls: BTreeMap<String, (TableKind, TableAction)>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let controllers = TableKind::ALL.into_iter().map(TableController::new).collect();
        let controls = TableKind::ALL
            .into_iter()
            .flat_map(|table| {
                TableAction::ALL
                    .into_iter()
                    .map(move |action| (action.control_id(table), (table, action)))
            })
            .collect();
        Self {
            controllers,
            controls,
        }
    }

    pub fn controller(&self, table: TableKind) -> &TableController {
        &self.controllers[slot(table)]
    }

    fn controller_mut(&mut self, table: TableKind) -> &mut TableController {
        &mut self.controllers[slot(table)]
    }

    pub fn resolve(&self, control_id: &str) -> Option<(TableKind, TableAction)> {
        self.controls.get(control_id).copied()
    }

    pub fn has_open_sessions(&self) -> bool {
        self.controllers
            .iter()
            .any(|controller| !controller.tracker.is_idle() || controller.in_flight.is_some())
    }

    pub fn set_properties(&mut self, table: TableKind, properties: Vec<PropertyDescriptor>) {
        self.controller_mut(table).properties = properties;
    }

    pub fn select(&mut self, table: TableKind, rows: Vec<RowId>) {
        let controller = self.controller_mut(table);
        controller.selection = rows;
        controller.refresh_buttons();
    }

    pub fn is_row_editable(&self, table: TableKind, row: &RowId) -> bool {
        self.controller(table).tracker.is_row_editable(row)
    }

    pub fn current_value(
        &self,
        table: TableKind,
        binding: &dyn EntityBinding,
        row: &RowId,
    ) -> Option<RowData> {
        self.controller(table).tracker.current_value(binding, row)
    }

    pub fn edit_field(
        &mut self,
        table: TableKind,
        row: &RowId,
        field: &str,
        value: FieldValue,
    ) -> Result<(), CommandError> {
        let controller = self.controller_mut(table);
        controller.ensure_idle_submit()?;
        controller.tracker.edit_field(row, field, value)
    }

    pub fn trigger(
        &mut self,
        control_id: &str,
        binding: &mut dyn EntityBinding,
        confirm: &mut dyn Confirm,
    ) -> Result<ActionOutcome, CommandError> {
        let (table, action) = self
            .resolve(control_id)
            .ok_or_else(|| CommandError::UnknownControl(control_id.to_owned()))?;
        self.dispatch(table, action, binding, confirm)
    }

    pub fn dispatch(
        &mut self,
        table: TableKind,
        action: TableAction,
        binding: &mut dyn EntityBinding,
        confirm: &mut dyn Confirm,
    ) -> Result<ActionOutcome, CommandError> {
        info!(%table, %action, "table action");
        match action {
            TableAction::Add => self.add(table, binding).map(ActionOutcome::Added),
            TableAction::Edit => self.edit(table, binding).map(ActionOutcome::Editing),
            TableAction::Delete => self
                .delete(table, binding, confirm)
                .map(ActionOutcome::Deleted),
            TableAction::Save => self.save(table, binding).map(ActionOutcome::Saved),
            TableAction::Cancel => self
                .cancel(table, binding, confirm)
                .map(ActionOutcome::Cancelled),
        }
    }

    /// New customers get their key from the next-id action; the other
    /// tables start blank.
    pub fn add(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
    ) -> Result<RowId, CommandError> {
        self.controller(table).ensure_idle_submit()?;
        let mut template = RowData::blank(self.controller(table).properties());
        if table == TableKind::Customers {
            match self.suggest_customer_id(binding) {
                Ok(id) => {
                    template.set(table.key_property(), FieldValue::Text(id));
                }
                Err(error) => warn!(error = %format!("{error:#}"), "next customer id unavailable"),
            }
        }

        let controller = self.controller_mut(table);
        let row = controller.tracker.begin_add(binding, template)?;
        controller.refresh_buttons();
        Ok(row)
    }

    fn suggest_customer_id(&self, binding: &mut dyn EntityBinding) -> Result<String> {
        let suggested = binding.next_customer_id()?;
        let view: &dyn EntityBinding = binding;
        let tracker = &self.controller(TableKind::Customers).tracker;
        let pending: Vec<String> = tracker
            .editing_rows()
            .iter()
            .filter_map(|row| tracker.current_value(view, row))
            .filter_map(|data| {
                data.value(TableKind::Customers.key_property())
                    .as_text()
                    .map(str::to_owned)
            })
            .collect();
        if pending.is_empty() {
            return Ok(suggested);
        }
        let local = next_customer_id(pending.iter().map(String::as_str));
        if customer_id_number(&local) > customer_id_number(&suggested) {
            Ok(local)
        } else {
            Ok(suggested)
        }
    }

    pub fn edit(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
    ) -> Result<EditReport, CommandError> {
        let controller = self.controller_mut(table);
        controller.ensure_idle_submit()?;
        let mode = controller.tracker.mode();
        if mode != EditMode::None {
            return Err(CommandError::InvalidMode {
                table,
                action: "edit",
                mode,
            });
        }
        let selection = controller.selection.clone();
        let report = controller.tracker.begin_edit(binding, &selection)?;
        controller.refresh_buttons();
        Ok(report)
    }

    pub fn save(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
    ) -> Result<SaveReport, CommandError> {
        let pending = self.start_save(table, binding)?;
        let result = binding.submit_batch(table);
        self.finish_save(pending, binding, result)
    }

    /// Validates and flushes the session, then marks the table busy until
    /// `finish_save` receives the batch result.
    pub fn start_save(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
    ) -> Result<PendingSubmit, CommandError> {
        let controller = self.controller_mut(table);
        controller.ensure_idle_submit()?;
        if controller.tracker.is_idle() {
            return Err(CommandError::NothingPending {
                table,
                action: "save",
            });
        }

        let mut problems = Vec::new();
        let mut missing = Vec::new();
        for row in controller.tracker.editing_rows() {
            let Some(values) = controller.tracker.current_value(binding, row) else {
                warn!(%table, %row, "context not found, skipping validation");
                missing.push(row.clone());
                continue;
            };
            let fields = missing_required_fields(&values, &controller.properties);
            if !fields.is_empty() {
                problems.push(RowProblem {
                    row: row.clone(),
                    missing: fields,
                });
            }
        }
        if !problems.is_empty() {
            return Err(CommandError::Validation { table, problems });
        }

        missing.extend(controller.tracker.flush(binding)?);
        controller.in_flight = Some(TableAction::Save);
        controller.refresh_buttons();
        Ok(PendingSubmit {
            table,
            action: TableAction::Save,
            rows: controller.tracker.editing_rows().to_vec(),
            missing,
        })
    }

    /// Commits the session on a clean batch. Any failure, including a
    /// single rejected row, keeps the session so the user can fix and retry;
    /// rows the backend did accept become the new cancel point.
    pub fn finish_save(
        &mut self,
        pending: PendingSubmit,
        binding: &mut dyn EntityBinding,
        result: Result<BatchOutcome>,
    ) -> Result<SaveReport, CommandError> {
        let table = pending.table;
        let controller = self.controller_mut(table);
        if pending.action != TableAction::Save || controller.in_flight != Some(TableAction::Save) {
            return Err(CommandError::NotInFlight {
                table,
                action: TableAction::Save,
            });
        }
        controller.in_flight = None;

        let outcome = match result {
            Ok(outcome) if outcome.is_clean() => outcome,
            Ok(outcome) => {
                controller.tracker.settle_applied(&*binding, &outcome.applied);
                controller.refresh_buttons();
                let message = outcome.rejection_summary().unwrap_or_default();
                warn!(%table, rejected = outcome.rejected.len(), "save rejected");
                return Err(CommandError::BatchSubmitFailure { table, message });
            }
            Err(error) => {
                controller.refresh_buttons();
                warn!(%table, error = %format!("{error:#}"), "save failed");
                return Err(CommandError::BatchSubmitFailure {
                    table,
                    message: format!("{error:#}"),
                });
            }
        };

        let committed = controller.tracker.commit();
        controller.selection.clear();
        controller.refresh_buttons();
        if let Err(error) = binding.refresh(table) {
            warn!(%table, error = %format!("{error:#}"), "reload after save failed");
        }
        info!(%table, rows = committed.len(), skipped = pending.missing.len(), "saved");
        Ok(SaveReport {
            committed,
            applied: outcome.applied,
        })
    }

    pub fn delete(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
        confirm: &mut dyn Confirm,
    ) -> Result<DeleteReport, CommandError> {
        let pending = self.start_delete(table, binding, confirm)?;
        let result = binding.submit_batch(table);
        self.finish_delete(pending, binding, result)
    }

    /// Confirms, then queues a delete for each selected row.
    pub fn start_delete(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
        confirm: &mut dyn Confirm,
    ) -> Result<PendingSubmit, CommandError> {
        let controller = self.controller_mut(table);
        controller.ensure_idle_submit()?;
        let mode = controller.tracker.mode();
        if mode != EditMode::None {
            return Err(CommandError::InvalidMode {
                table,
                action: "delete",
                mode,
            });
        }
        if controller.selection.is_empty() {
            return Err(CommandError::NoSelection { table });
        }
        let prompt = ConfirmPrompt {
            table,
            action: TableAction::Delete,
            rows: controller.selection.len(),
        };
        if !confirm.confirm(&prompt) {
            return Err(CommandError::Declined {
                table,
                action: TableAction::Delete,
            });
        }

        let mut rows = Vec::new();
        let mut missing = Vec::new();
        for row in &controller.selection {
            if binding.object(row).is_none() {
                warn!(%table, %row, "context not found, skipping delete");
                missing.push(row.clone());
                continue;
            }
            match binding.delete(row) {
                Ok(()) => rows.push(row.clone()),
                Err(error) => {
                    warn!(%table, %row, error = %format!("{error:#}"), "delete not queued");
                    missing.push(row.clone());
                }
            }
        }
        controller.in_flight = Some(TableAction::Delete);
        controller.refresh_buttons();
        Ok(PendingSubmit {
            table,
            action: TableAction::Delete,
            rows,
            missing,
        })
    }

    /// Row-level rejections are tolerated; a failed batch resets the
    /// table's pending deletes. The table is reloaded either way.
    pub fn finish_delete(
        &mut self,
        pending: PendingSubmit,
        binding: &mut dyn EntityBinding,
        result: Result<BatchOutcome>,
    ) -> Result<DeleteReport, CommandError> {
        let table = pending.table;
        let controller = self.controller_mut(table);
        if pending.action != TableAction::Delete
            || controller.in_flight != Some(TableAction::Delete)
        {
            return Err(CommandError::NotInFlight {
                table,
                action: TableAction::Delete,
            });
        }
        controller.in_flight = None;
        controller.selection.clear();
        controller.refresh_buttons();
        binding.reset_changes(table);
        if let Err(error) = binding.refresh(table) {
            warn!(%table, error = %format!("{error:#}"), "reload after delete failed");
        }

        let outcome = result.map_err(|error| {
            warn!(%table, error = %format!("{error:#}"), "delete batch failed");
            CommandError::DeleteFailed {
                table,
                message: format!("{error:#}"),
            }
        })?;
        for rejection in &outcome.rejected {
            warn!(%table, row = %rejection.row, message = %rejection.message, "delete rejected");
        }
        info!(%table, deleted = outcome.applied.len(), "deleted");
        Ok(DeleteReport {
            requested: pending.rows,
            deleted: outcome.applied,
            rejected: outcome.rejected,
            missing: pending.missing,
        })
    }

    /// Rolls back only this table's session after confirmation.
    pub fn cancel(
        &mut self,
        table: TableKind,
        binding: &mut dyn EntityBinding,
        confirm: &mut dyn Confirm,
    ) -> Result<CancelReport, CommandError> {
        let controller = self.controller_mut(table);
        controller.ensure_idle_submit()?;
        if controller.tracker.is_idle() {
            return Err(CommandError::NothingPending {
                table,
                action: "cancel",
            });
        }
        let prompt = ConfirmPrompt {
            table,
            action: TableAction::Cancel,
            rows: controller.tracker.editing_rows().len(),
        };
        if !confirm.confirm(&prompt) {
            return Err(CommandError::Declined {
                table,
                action: TableAction::Cancel,
            });
        }
        let report = controller.tracker.cancel(binding);
        controller.selection.clear();
        controller.refresh_buttons();
        Ok(report)
    }
}

const fn slot(table: TableKind) -> usize {
    match table {
        TableKind::Customers => 0,
        TableKind::Opportunities => 1,
        TableKind::Projects => 2,
        TableKind::SapIdStatuses => 3,
        TableKind::Employees => 4,
    }
}
