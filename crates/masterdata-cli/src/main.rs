// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod commands;
mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result, anyhow};
use commands::{Command, CommandContext, parse_table, run_command};
use config::{Backend, Config};
use masterdata_app::{AppState, EntityBinding, PropertySource};
use masterdata_db::{Store, StoreBinding};
use masterdata_odata::{Client, ODataBinding};
use runtime::DbRuntime;
use std::env;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::info;

const DEMO_SEED: u64 = 42;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `masterdata --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;

    let db_path = if options.demo {
        PathBuf::from(":memory:")
    } else {
        config.db_path()?
    };
    if options.print_db_path {
        println!("{}", db_path.display());
        return Ok(());
    }

    logging::init_file_logging(&config.log_file()?, config.log_level())?;

    let store = Store::open(&db_path).with_context(|| {
        format!(
            "open database {} -- if this path is wrong, set [storage].db_path or MASTERDATA_DB_PATH",
            db_path.display()
        )
    })?;
    store.bootstrap()?;
    if options.demo {
        store.seed_rows(&masterdata_testkit::demo_dataset(DEMO_SEED))?;
    }

    let backend = if options.demo {
        Backend::Sqlite
    } else {
        config.backend()
    };
    info!(%backend, db = %db_path.display(), "starting");
    match backend {
        Backend::Sqlite => {
            let binding = StoreBinding::new(&store)?;
            run_with_binding(&options, &config, &store, binding)
        }
        Backend::OData => {
            let base_url = config
                .service_base_url()
                .ok_or_else(|| anyhow!("service.base_url is not set"))?;
            let mut client =
                Client::new(base_url, config.service_timeout()?).with_context(|| {
                    format!(
                        "invalid [service] config in {}; fix base_url/timeout values",
                        options.config_path.display()
                    )
                })?;
            if let Some(user) = config.service_user() {
                client = client.with_user(user);
            }
            client.ping()?;
            let binding = ODataBinding::connect(client)?;
            run_with_binding(&options, &config, &store, binding)
        }
    }
}

fn run_with_binding<B>(
    options: &CliOptions,
    config: &Config,
    store: &Store,
    mut binding: B,
) -> Result<()>
where
    B: EntityBinding + PropertySource,
{
    if options.check_only {
        return Ok(());
    }

    let export_dir = config.export_dir();
    if let Some(command) = &options.command {
        let context = CommandContext {
            store,
            export_dir: &export_dir,
            today: OffsetDateTime::now_utc().date(),
        };
        println!("{}", run_command(command, &mut binding, &context)?);
        return Ok(());
    }

    let mut state = AppState::default();
    let mut runtime = DbRuntime::new(store, binding, export_dir);
    masterdata_tui::run_app(&mut state, &mut runtime)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    print_db_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
    command: Option<Command>,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        print_db_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
        command: None,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str, what: &str| {
            iter.next()
                .map(|value| value.as_ref().to_owned())
                .ok_or_else(|| anyhow!("{flag} requires {what}"))
        };
        let command = match arg.as_ref() {
            "--config" => {
                options.config_path = PathBuf::from(value_for("--config", "a file path")?);
                None
            }
            "--print-config-path" => {
                options.print_config_path = true;
                None
            }
            "--print-path" => {
                options.print_db_path = true;
                None
            }
            "--print-example-config" => {
                options.print_example = true;
                None
            }
            "--demo" => {
                options.demo = true;
                None
            }
            "--check" => {
                options.check_only = true;
                None
            }
            "--help" | "-h" => {
                options.show_help = true;
                None
            }
            "--export" => Some(Command::Export(parse_table(&value_for(
                "--export",
                "a table name",
            )?)?)),
            "--template" => Some(Command::Template(parse_table(&value_for(
                "--template",
                "a table name",
            )?)?)),
            "--import" => {
                let table = parse_table(&value_for("--import", "a table name and a file")?)?;
                let file = value_for("--import", "a table name and a file")?;
                Some(Command::Import(table, PathBuf::from(file)))
            }
            "--next-customer-id" => Some(Command::NextCustomerId),
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        };
        if let Some(command) = command {
            if options.command.is_some() {
                return Err(anyhow!(
                    "only one of --export, --template, --import, --next-customer-id can be given"
                ));
            }
            options.command = Some(command);
        }
    }

    Ok(options)
}

fn print_help() {
    println!("masterdata");
    println!("  --config <path>            Use a specific config path");
    println!("  --print-config-path        Print resolved config path");
    println!("  --print-path               Print resolved database path");
    println!("  --print-example-config     Print a config template");
    println!("  --demo                     Launch with seeded demo data (in-memory)");
    println!("  --check                    Validate config, database and service");
    println!("  --export <table>           Write <Table>_export_<date>.csv and exit");
    println!("  --template <table>         Write <Table>_template_<date>.csv and exit");
    println!("  --import <table> <file>    Add the rows of a CSV file and save them");
    println!("  --next-customer-id         Print the next free customer id");
    println!("  --help                     Show this help");
}
