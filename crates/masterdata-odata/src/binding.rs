// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use masterdata_app::{
    BatchOutcome, EntityBinding, EntityCache, FieldValue, PropertyDescriptor, PropertySource,
    RowData, RowId, TableKind, default_properties,
};
use tracing::{info, warn};

use crate::Client;

/// Entity binding over a remote OData service. Edits stay in the local cache
/// until `submit_batch` sends them as one `$batch` request per table.
pub struct ODataBinding {
    client: Client,
    caches: BTreeMap<TableKind, EntityCache>,
    properties: BTreeMap<TableKind, Vec<PropertyDescriptor>>,
}

impl ODataBinding {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            caches: TableKind::ALL
                .into_iter()
                .map(|table| (table, EntityCache::new(table)))
                .collect(),
            properties: BTreeMap::new(),
        }
    }

    /// Creates the binding and loads every table.
    pub fn connect(client: Client) -> Result<Self> {
        let mut binding = Self::new(client);
        for table in TableKind::ALL {
            binding.load(table)?;
        }
        Ok(binding)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Service metadata when reachable, the built-in catalog otherwise.
    pub fn properties(&mut self, table: TableKind) -> Vec<PropertyDescriptor> {
        if let Some(properties) = self.properties.get(&table) {
            return properties.clone();
        }
        let properties = match self.client.fetch_properties(table) {
            Ok(properties) => properties,
            Err(error) => {
                warn!(%table, error = %format!("{error:#}"), "metadata unavailable, using catalog");
                default_properties(table)
            }
        };
        self.properties.insert(table, properties.clone());
        properties
    }

    fn load(&mut self, table: TableKind) -> Result<()> {
        let properties = self.properties(table);
        let rows = self.client.list(table, &properties)?;
        info!(%table, rows = rows.len(), "loaded");
        self.cache_mut(table)?.load(rows);
        Ok(())
    }

    fn cache(&self, table: TableKind) -> Option<&EntityCache> {
        self.caches.get(&table)
    }

    fn cache_mut(&mut self, table: TableKind) -> Result<&mut EntityCache> {
        self.caches
            .get_mut(&table)
            .ok_or_else(|| anyhow!("no cache for {table}"))
    }

    fn table_of(row: &RowId) -> Result<TableKind> {
        row.table()
            .ok_or_else(|| anyhow!("row {row} does not name a table"))
    }
}

impl PropertySource for ODataBinding {
    fn fetch_properties(&mut self, table: TableKind) -> Result<Vec<PropertyDescriptor>> {
        Ok(self.properties(table))
    }
}

impl EntityBinding for ODataBinding {
    fn rows(&self, table: TableKind) -> Vec<RowId> {
        self.cache(table).map(EntityCache::rows).unwrap_or_default()
    }

    fn object(&self, row: &RowId) -> Option<RowData> {
        self.cache(row.table()?)?.object(row)
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
        let results = self
            .client
            .submit_batch(table, &ops)
            .with_context(|| format!("submit {table} batch"))?;
        let outcome = self.cache_mut(table)?.settle(&ops, results);
        for rejection in &outcome.rejected {
            warn!(%table, row = %rejection.row, message = %rejection.message, "service rejected row");
        }
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

    fn refresh(&mut self, table: TableKind) -> Result<()> {
        self.load(table)
    }

    fn has_pending_changes(&self, table: TableKind) -> bool {
        self.cache(table).is_some_and(EntityCache::has_pending)
    }

    fn next_customer_id(&mut self) -> Result<String> {
        self.client.next_customer_id()
    }
}
