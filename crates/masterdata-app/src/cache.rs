// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use tracing::warn;

use crate::{BatchOp, BatchOutcome, BatchRejection, FieldValue, RowData, RowId, TableKind};

/// Client-side copy of one entity collection plus its pending changes.
///
/// Backends keep one cache per table and only implement transport: load the
/// rows, turn `pending_ops` into requests, and hand the per-op results back
/// to `settle`.
#[derive(Debug, Clone)]
pub struct EntityCache {
    table: TableKind,
    order: Vec<RowId>,
    server: BTreeMap<RowId, RowData>,
    updates: BTreeMap<RowId, RowData>,
    deletes: Vec<RowId>,
    created_order: Vec<RowId>,
    created: BTreeMap<RowId, RowData>,
    next_uid: u64,
}

impl EntityCache {
    pub fn new(table: TableKind) -> Self {
        Self {
            table,
            order: Vec::new(),
            server: BTreeMap::new(),
            updates: BTreeMap::new(),
            deletes: Vec::new(),
            created_order: Vec::new(),
            created: BTreeMap::new(),
            next_uid: 1,
        }
    }

    pub fn table(&self) -> TableKind {
        self.table
    }

    /// Replaces the persisted rows. Pending updates and deletes survive for
    /// rows that still exist; transient rows are untouched.
    pub fn load(&mut self, rows: Vec<RowData>) {
        let key_field = self.table.key_property();
        self.order.clear();
        self.server.clear();
        for row in rows {
            let key = row.value(key_field);
            if key.is_blank() {
                warn!(table = %self.table, "skipping row without key");
                continue;
            }
            let id = RowId::for_key(self.table, key);
            self.order.push(id.clone());
            self.server.insert(id, row);
        }
        let server = &self.server;
        self.updates.retain(|id, _| server.contains_key(id));
        self.deletes.retain(|id| server.contains_key(id));
    }

    pub fn rows(&self) -> Vec<RowId> {
        self.created_order
            .iter()
            .chain(self.order.iter().filter(|id| !self.deletes.contains(id)))
            .cloned()
            .collect()
    }

    pub fn object(&self, row: &RowId) -> Option<RowData> {
        if let Some(data) = self.created.get(row) {
            return Some(data.clone());
        }
        if self.deletes.contains(row) {
            return None;
        }
        let mut data = self.server.get(row)?.clone();
        if let Some(changes) = self.updates.get(row) {
            data.merge(changes);
        }
        Some(data)
    }

    pub fn persisted(&self, row: &RowId) -> Option<&RowData> {
        self.server.get(row)
    }

    pub fn persisted_rows(&self) -> impl Iterator<Item = &RowData> {
        self.order.iter().filter_map(|id| self.server.get(id))
    }

    pub fn is_transient(&self, row: &RowId) -> bool {
        self.created.contains_key(row)
    }

    pub fn create(&mut self, data: RowData) -> RowId {
        let id = RowId::transient(self.table, self.next_uid);
        self.next_uid += 1;
        self.created_order.insert(0, id.clone());
        self.created.insert(id.clone(), data);
        id
    }

    /// Setting a field back to its persisted value cancels the pending
    /// update for that field.
    pub fn set_property(&mut self, row: &RowId, field: &str, value: FieldValue) -> Result<()> {
        if let Some(data) = self.created.get_mut(row) {
            data.set(field, value);
            return Ok(());
        }
        let Some(persisted) = self.server.get(row) else {
            bail!("row {row} is no longer loaded -- refresh {} and retry", self.table);
        };
        if self.deletes.contains(row) {
            bail!("row {row} is marked for deletion");
        }
        if persisted.value(field) == &value {
            if let Some(changes) = self.updates.get_mut(row) {
                changes.remove(field);
                if changes.is_empty() {
                    self.updates.remove(row);
                }
            }
        } else {
            self.updates
                .entry(row.clone())
                .or_default()
                .set(field, value);
        }
        Ok(())
    }

    pub fn delete(&mut self, row: &RowId) -> Result<()> {
        if self.created.remove(row).is_some() {
            self.created_order.retain(|id| id != row);
            return Ok(());
        }
        if !self.server.contains_key(row) {
            bail!("row {row} is no longer loaded -- refresh {} and retry", self.table);
        }
        self.updates.remove(row);
        if !self.deletes.contains(row) {
            self.deletes.push(row.clone());
        }
        Ok(())
    }

    /// Drops the pending update of one persisted row, leaving the row at
    /// its last persisted values. Queued deletes and other rows keep their
    /// pending work.
    pub fn reset_row(&mut self, row: &RowId) -> Result<()> {
        if !self.server.contains_key(row) {
            bail!("row {row} is no longer loaded -- refresh {} and retry", self.table);
        }
        self.updates.remove(row);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.created.is_empty() || !self.updates.is_empty() || !self.deletes.is_empty()
    }

    /// Creates oldest first, then updates, then deletes.
    pub fn pending_ops(&self) -> Vec<BatchOp> {
        let key_field = self.table.key_property();
        let mut ops = Vec::new();
        for id in self.created_order.iter().rev() {
            if let Some(data) = self.created.get(id) {
                ops.push(BatchOp::Create {
                    row: id.clone(),
                    data: data.clone(),
                });
            }
        }
        for (id, changes) in &self.updates {
            if let Some(persisted) = self.server.get(id) {
                ops.push(BatchOp::Update {
                    row: id.clone(),
                    key: persisted.value(key_field).clone(),
                    changes: changes.clone(),
                });
            }
        }
        for id in &self.deletes {
            if let Some(persisted) = self.server.get(id) {
                ops.push(BatchOp::Delete {
                    row: id.clone(),
                    key: persisted.value(key_field).clone(),
                });
            }
        }
        ops
    }

    /// Applies per-op results from a submitted batch. Failed ops stay
    /// pending so a retry resubmits them.
    pub fn settle(&mut self, ops: &[BatchOp], results: Vec<Result<(), String>>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (op, result) in ops.iter().zip(results) {
            match result {
                Ok(()) => {
                    self.apply(op);
                    outcome.applied.push(op.row().clone());
                }
                Err(message) => {
                    warn!(
                        table = %self.table,
                        row = %op.row(),
                        op = op.verb(),
                        %message,
                        "batch operation rejected"
                    );
                    outcome.rejected.push(BatchRejection {
                        row: op.row().clone(),
                        message,
                    });
                }
            }
        }
        outcome
    }

    pub fn reset(&mut self) {
        self.updates.clear();
        self.deletes.clear();
        self.created.clear();
        self.created_order.clear();
    }

    fn apply(&mut self, op: &BatchOp) {
        match op {
            BatchOp::Create { row, data } => {
                self.created.remove(row);
                self.created_order.retain(|id| id != row);
                let key = data.value(self.table.key_property());
                if !key.is_blank() {
                    let id = RowId::for_key(self.table, key);
                    self.order.push(id.clone());
                    self.server.insert(id, data.clone());
                }
            }
            BatchOp::Update { row, changes, .. } => {
                if let Some(persisted) = self.server.get_mut(row) {
                    persisted.merge(changes);
                }
                self.updates.remove(row);
            }
            BatchOp::Delete { row, .. } => {
                self.server.remove(row);
                self.order.retain(|id| id != row);
                self.deletes.retain(|id| id != row);
            }
        }
    }
}
