// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use masterdata_app::{
    BatchOp, BatchOutcome, EntityBinding, EntityCache, FieldValue, RowData, RowId, TableKind,
    next_customer_id,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub table: TableKind,
    pub verb: &'static str,
    pub row: RowId,
}

/// In-memory backend with a request log and failure injection.
#[derive(Debug)]
pub struct MemoryBinding {
    caches: BTreeMap<TableKind, EntityCache>,
    server: BTreeMap<TableKind, Vec<RowData>>,
    requests: Vec<SentRequest>,
    batches: usize,
    fail_next_batch: Option<String>,
    rejections: BTreeMap<RowId, String>,
    next_id_error: Option<String>,
}

impl Default for MemoryBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBinding {
    pub fn new() -> Self {
        Self {
            caches: TableKind::ALL
                .into_iter()
                .map(|table| (table, EntityCache::new(table)))
                .collect(),
            server: TableKind::ALL
                .into_iter()
                .map(|table| (table, Vec::new()))
                .collect(),
            requests: Vec::new(),
            batches: 0,
            fail_next_batch: None,
            rejections: BTreeMap::new(),
            next_id_error: None,
        }
    }

    pub fn with_rows(mut self, table: TableKind, rows: Vec<RowData>) -> Self {
        self.server.insert(table, rows);
        self.reload(table);
        self
    }

    pub fn demo(seed: u64) -> Self {
        crate::demo_dataset(seed)
            .into_iter()
            .fold(Self::new(), |binding, (table, rows)| binding.with_rows(table, rows))
    }

    /// The next submitted batch fails as a whole with `message`.
    pub fn fail_next_batch(&mut self, message: &str) {
        self.fail_next_batch = Some(message.to_owned());
    }

    /// Every op on `row` is rejected until `clear_rejections`.
    pub fn reject_row(&mut self, row: &RowId, message: &str) {
        self.rejections.insert(row.clone(), message.to_owned());
    }

    pub fn clear_rejections(&mut self) {
        self.rejections.clear();
    }

    pub fn fail_next_customer_id(&mut self, message: &str) {
        self.next_id_error = Some(message.to_owned());
    }

    pub fn requests(&self) -> &[SentRequest] {
        &self.requests
    }

    pub fn batch_count(&self) -> usize {
        self.batches
    }

    pub fn server_rows(&self, table: TableKind) -> &[RowData] {
        self.server.get(&table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn row_id(&self, table: TableKind, index: usize) -> Option<RowId> {
        self.cache(table).and_then(|cache| cache.rows().get(index).cloned())
    }

    fn cache(&self, table: TableKind) -> Option<&EntityCache> {
        self.caches.get(&table)
    }

    fn cache_mut(&mut self, table: TableKind) -> Result<&mut EntityCache> {
        self.caches
            .get_mut(&table)
            .ok_or_else(|| anyhow!("no cache for {table}"))
    }

    fn cache_for_row(&self, row: &RowId) -> Option<&EntityCache> {
        row.table().and_then(|table| self.cache(table))
    }

    fn reload(&mut self, table: TableKind) {
        let rows = self.server.get(&table).cloned().unwrap_or_default();
        if let Some(cache) = self.caches.get_mut(&table) {
            cache.load(rows);
        }
    }

    fn apply_on_server(&mut self, table: TableKind, op: &BatchOp) -> Result<(), String> {
        if let Some(message) = self.rejections.get(op.row()) {
            return Err(message.clone());
        }
        let key_field = table.key_property();
        let rows = self.server.entry(table).or_default();
        let position = |rows: &[RowData], key: &FieldValue| {
            rows.iter().position(|row| row.value(key_field) == key)
        };
        match op {
            BatchOp::Create { data, .. } => {
                let key = data.value(key_field);
                if key.is_blank() {
                    return Err(format!("{key_field} is required"));
                }
                if position(rows, key).is_some() {
                    return Err(format!("{} already exists", key.display()));
                }
                rows.push(data.clone());
            }
            BatchOp::Update { key, changes, .. } => {
                let Some(index) = position(rows, key) else {
                    return Err(format!("{} not found", key.display()));
                };
                rows[index].merge(changes);
            }
            BatchOp::Delete { key, .. } => {
                let Some(index) = position(rows, key) else {
                    return Err(format!("{} not found", key.display()));
                };
                rows.remove(index);
            }
        }
        Ok(())
    }
}

impl EntityBinding for MemoryBinding {
    fn rows(&self, table: TableKind) -> Vec<RowId> {
        self.cache(table).map(EntityCache::rows).unwrap_or_default()
    }

    fn object(&self, row: &RowId) -> Option<RowData> {
        self.cache_for_row(row)?.object(row)
    }

    fn create(&mut self, table: TableKind, data: RowData) -> Result<RowId> {
        Ok(self.cache_mut(table)?.create(data))
    }

    fn set_property(&mut self, row: &RowId, field: &str, value: FieldValue) -> Result<()> {
        let Some(table) = row.table() else {
            bail!("row {row} does not name a table");
        };
        self.cache_mut(table)?.set_property(row, field, value)
    }

    fn delete(&mut self, row: &RowId) -> Result<()> {
        let Some(table) = row.table() else {
            bail!("row {row} does not name a table");
        };
        self.cache_mut(table)?.delete(row)
    }

    fn submit_batch(&mut self, table: TableKind) -> Result<BatchOutcome> {
        let ops = self.cache_mut(table)?.pending_ops();
        self.batches += 1;
        self.requests.extend(ops.iter().map(|op| SentRequest {
            table,
            verb: op.verb(),
            row: op.row().clone(),
        }));
        if let Some(message) = self.fail_next_batch.take() {
            bail!("{message}");
        }
        let results = ops
            .iter()
            .map(|op| self.apply_on_server(table, op))
            .collect();
        Ok(self.cache_mut(table)?.settle(&ops, results))
    }

    fn reset_changes(&mut self, table: TableKind) {
        if let Some(cache) = self.caches.get_mut(&table) {
            cache.reset();
        }
    }

    fn reset_row(&mut self, row: &RowId) -> Result<()> {
        let Some(table) = row.table() else {
            bail!("row {row} does not name a table");
        };
        self.cache_mut(table)?.reset_row(row)
    }

    fn refresh(&mut self, table: TableKind) -> Result<()> {
        self.reload(table);
        Ok(())
    }

    fn has_pending_changes(&self, table: TableKind) -> bool {
        self.cache(table).is_some_and(EntityCache::has_pending)
    }

    fn next_customer_id(&mut self) -> Result<String> {
        if let Some(message) = self.next_id_error.take() {
            bail!("{message}");
        }
        Ok(next_customer_id(
            self.server_rows(TableKind::Customers)
                .iter()
                .filter_map(|row| row.value(TableKind::Customers.key_property()).as_text()),
        ))
    }
}
