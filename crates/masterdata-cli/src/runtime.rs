// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use masterdata_app::{EntityBinding, PropertyDescriptor, PropertySource, TableKind};
use masterdata_db::Store;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Terminal runtime over any binding. Column layouts always live in the
/// local store, whichever backend serves the rows.
pub struct DbRuntime<'a, B> {
    store: &'a Store,
    binding: B,
    export_dir: PathBuf,
}

impl<'a, B> DbRuntime<'a, B>
where
    B: EntityBinding + PropertySource,
{
    pub fn new(store: &'a Store, binding: B, export_dir: PathBuf) -> Self {
        Self {
            store,
            binding,
            export_dir,
        }
    }
}

impl<B> masterdata_tui::AppRuntime for DbRuntime<'_, B>
where
    B: EntityBinding + PropertySource,
{
    fn binding(&mut self) -> &mut dyn EntityBinding {
        &mut self.binding
    }

    fn load_properties(&mut self, table: TableKind) -> Result<Vec<PropertyDescriptor>> {
        self.binding.fetch_properties(table)
    }

    fn load_column_layout(&mut self, table: TableKind) -> Result<Option<Vec<String>>> {
        self.store.get_column_layout(table)
    }

    fn save_column_layout(&mut self, table: TableKind, keys: Option<&[String]>) -> Result<()> {
        match keys {
            Some(keys) => self.store.put_column_layout(table, keys),
            None => self.store.clear_column_layout(table),
        }
    }

    fn write_export(&mut self, file_name: &str, contents: &str) -> Result<PathBuf> {
        write_export_file(&self.export_dir, file_name, contents)
    }
}

pub fn write_export_file(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create export directory {}", dir.display()))?;
    let path = dir.join(file_name);
    fs::write(&path, contents).with_context(|| {
        format!(
            "write {} -- check that [export] dir is writable",
            path.display()
        )
    })?;
    info!(path = %path.display(), bytes = contents.len(), "csv written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::DbRuntime;
    use anyhow::Result;
    use masterdata_app::{EntityBinding, TableKind, default_properties};
    use masterdata_db::{Store, StoreBinding};
    use masterdata_testkit::demo_dataset;
    use masterdata_tui::AppRuntime;

    fn seeded_store() -> Result<Store> {
        let store = Store::open_memory()?;
        store.bootstrap()?;
        store.seed_rows(&demo_dataset(11))?;
        Ok(store)
    }

    #[test]
    fn column_layout_persists_in_the_store() -> Result<()> {
        let store = seeded_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = DbRuntime::new(
            &store,
            StoreBinding::new(&store)?,
            temp.path().to_path_buf(),
        );

        assert_eq!(runtime.load_column_layout(TableKind::Projects)?, None);
        let keys = vec!["name".to_owned(), "status".to_owned()];
        runtime.save_column_layout(TableKind::Projects, Some(keys.as_slice()))?;
        assert_eq!(store.get_column_layout(TableKind::Projects)?, Some(keys));

        runtime.save_column_layout(TableKind::Projects, None)?;
        assert_eq!(runtime.load_column_layout(TableKind::Projects)?, None);
        Ok(())
    }

    #[test]
    fn exports_are_written_under_the_export_dir() -> Result<()> {
        let store = seeded_store()?;
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("nested").join("csv");
        let mut runtime = DbRuntime::new(&store, StoreBinding::new(&store)?, dir.clone());

        let path = runtime.write_export("Employees_template_2026-03-01.csv", "OHR ID\n")?;
        assert_eq!(path, dir.join("Employees_template_2026-03-01.csv"));
        assert_eq!(std::fs::read_to_string(path)?, "OHR ID\n");
        Ok(())
    }

    #[test]
    fn store_runtime_serves_catalog_properties_and_rows() -> Result<()> {
        let store = seeded_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = DbRuntime::new(
            &store,
            StoreBinding::new(&store)?,
            temp.path().to_path_buf(),
        );

        assert_eq!(
            runtime.load_properties(TableKind::Employees)?,
            default_properties(TableKind::Employees)
        );
        assert_eq!(runtime.binding().rows(TableKind::Employees).len(), 10);
        Ok(())
    }
}
