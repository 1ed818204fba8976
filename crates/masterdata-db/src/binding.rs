// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use masterdata_app::{
    BatchOutcome, CatalogProperties, EntityBinding, EntityCache, FieldValue, PropertyDescriptor,
    PropertySource, RowData, RowId, TableKind,
};
use tracing::{info, warn};

use crate::Store;

/// Binds the row edit workflow to a local SQLite store. Each table is
/// loaded when the binding is created and again on every refresh.
pub struct StoreBinding<'a> {
    store: &'a Store,
    caches: BTreeMap<TableKind, EntityCache>,
}

impl<'a> StoreBinding<'a> {
    pub fn new(store: &'a Store) -> Result<Self> {
        let mut binding = Self {
            store,
            caches: BTreeMap::new(),
        };
        for table in TableKind::ALL {
            binding.load(table)?;
        }
        Ok(binding)
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    fn load(&mut self, table: TableKind) -> Result<()> {
        let rows = self
            .store
            .list_rows(table)
            .with_context(|| format!("load {table}"))?;
        self.caches
            .entry(table)
            .or_insert_with(|| EntityCache::new(table))
            .load(rows);
        Ok(())
    }

    fn cache(&self, table: TableKind) -> Option<&EntityCache> {
        self.caches.get(&table)
    }

    fn cache_mut(&mut self, table: TableKind) -> Result<&mut EntityCache> {
        self.caches
            .get_mut(&table)
            .ok_or_else(|| anyhow!("{table} is not loaded"))
    }

    fn table_of(row: &RowId) -> Result<TableKind> {
        row.table()
            .ok_or_else(|| anyhow!("row {row} does not name a table"))
    }
}

/// The schema is created from the built-in catalog, so that is what the
/// store serves.
impl PropertySource for StoreBinding<'_> {
    fn fetch_properties(&mut self, table: TableKind) -> Result<Vec<PropertyDescriptor>> {
        CatalogProperties.fetch_properties(table)
    }
}

impl EntityBinding for StoreBinding<'_> {
    fn rows(&self, table: TableKind) -> Vec<RowId> {
        self.cache(table).map(EntityCache::rows).unwrap_or_default()
    }

    fn object(&self, row: &RowId) -> Option<RowData> {
        let table = row.table()?;
        self.cache(table)?.object(row)
    }

    fn create(&mut self, table: TableKind, data: RowData) -> Result<RowId> {
        Ok(self.cache_mut(table)?.create(data))
    }

    fn set_property(&mut self, row: &RowId, field: &str, value: FieldValue) -> Result<()> {
        let table = Self::table_of(row)?;
        self.cache_mut(table)?.set_property(row, field, value)
    }

    fn delete(&mut self, row: &RowId) -> Result<()> {
        let table = Self::table_of(row)?;
        self.cache_mut(table)?.delete(row)
    }

    fn submit_batch(&mut self, table: TableKind) -> Result<BatchOutcome> {
        let ops = self.cache_mut(table)?.pending_ops();
        if ops.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let results = self.store.apply_batch(table, &ops)?;
        let outcome = self.cache_mut(table)?.settle(&ops, results);
        if !outcome.is_clean() {
            warn!(%table, rejected = outcome.rejected.len(), "store rejected rows");
        }
        info!(%table, applied = outcome.applied.len(), "applied batch");
        Ok(outcome)
    }

    fn reset_changes(&mut self, table: TableKind) {
        if let Some(cache) = self.caches.get_mut(&table) {
            cache.reset();
        }
    }

    fn reset_row(&mut self, row: &RowId) -> Result<()> {
        let table = Self::table_of(row)?;
        self.cache_mut(table)?.reset_row(row)
    }

    /// Reloads persisted rows; pending edits on rows that still exist survive.
    fn refresh(&mut self, table: TableKind) -> Result<()> {
        self.load(table)
    }

    fn has_pending_changes(&self, table: TableKind) -> bool {
        self.cache(table).is_some_and(EntityCache::has_pending)
    }

    fn next_customer_id(&mut self) -> Result<String> {
        self.store.next_customer_id()
    }
}
