// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::env;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MASTERDATA_LOG";

pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("parse log filter {directives:?}"))
}

/// `MASTERDATA_LOG` wins over the configured level.
pub fn resolve_filter(configured: &str) -> Result<EnvFilter> {
    match env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            parse_filter(&directives).with_context(|| format!("{LOG_ENV} is not a valid filter"))
        }
        _ => parse_filter(configured),
    }
}

/// Sends events to `path`. The terminal belongs to the UI, so nothing is
/// written to stdout or stderr.
pub fn init_file_logging(path: &Path, configured_level: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| {
            format!(
                "open log file {} -- set [log] file to a writable path",
                path.display()
            )
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(configured_level)?)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|error| anyhow::anyhow!("install log subscriber: {error}"))
}

#[cfg(test)]
mod tests {
    use super::{parse_filter, resolve_filter};

    #[test]
    fn filters_accept_levels_and_directives() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("masterdata_odata=debug,warn").is_ok());
        assert!(parse_filter("=!=").is_err());
    }

    #[test]
    fn configured_level_is_used_without_env() {
        // The env var is never set by this test suite.
        assert!(resolve_filter("debug").is_ok());
    }
}
