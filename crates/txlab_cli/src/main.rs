//! Walkthrough runner.
//!
//! # Responsibility
//! - Parse the walkthrough name and startup flags.
//! - Initialize logging, open the database and print the final user rows
//!   as JSON lines on stdout.
//!
//! Exit codes: 0 success, 1 unrecoverable failure, 2 usage error.

use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;
use txlab_core::{
    init_logging, run_crud_walkthrough, run_savepoint_walkthrough, DataSource, LogConfig,
    NestedFailurePolicy, TransactionManager, User,
};

fn parse_data_source(value: &str) -> Result<DataSource, String> {
    Ok(DataSource::from_locator(value))
}

fn parse_nested_failure(value: &str) -> Result<NestedFailurePolicy, String> {
    value
        .parse::<NestedFailurePolicy>()
        .map_err(|err| format!("{err}"))
}

#[derive(Parser, Debug)]
#[command(
    name = "txlab_cli",
    about = "Runs the user CRUD and savepoint walkthroughs against SQLite"
)]
struct CliArgs {
    #[command(subcommand)]
    walkthrough: Walkthrough,
    /// Database file, or `:memory:` for a private in-memory database.
    #[arg(
        long,
        global = true,
        value_name = "PATH|:memory:",
        default_value = txlab_core::config::DEFAULT_DB_FILE,
        value_parser = parse_data_source
    )]
    db: DataSource,
    /// One of trace|debug|info|warn|error.
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    log_level: Option<String>,
    /// Absolute directory for rolling log files; stderr when omitted.
    #[arg(long = "log-dir", global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// What an implicit nested failure does to the outer transaction.
    #[arg(
        long = "nested-failure",
        global = true,
        value_name = "contain|propagate",
        default_value = "contain",
        value_parser = parse_nested_failure
    )]
    nested_failure: NestedFailurePolicy,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Walkthrough {
    /// Reset the schema and exercise every CRUD path.
    Crud,
    /// Run the explicit and implicit savepoint examples.
    Savepoints,
}

impl CliArgs {
    fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::default();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        config.log_dir = self.log_dir.clone();
        config
    }
}

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 2 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    if let Err(message) = init_logging(&args.log_config()) {
        eprintln!("logging setup failed: {message}");
        return ExitCode::from(2);
    }

    match run(&args) {
        Ok(users) => {
            for user in &users {
                match serde_json::to_string(user) {
                    Ok(line) => println!("{line}"),
                    Err(err) => error!("event=print_user module=cli status=error error={err}"),
                }
            }
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!("event=cli_run module=cli status=error error={message}");
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> Result<Vec<User>, String> {
    let mut manager = TransactionManager::open(&args.db)
        .map_err(|err| err.to_string())?
        .with_policy(args.nested_failure);

    let users = match args.walkthrough {
        Walkthrough::Crud => {
            let conn = manager.connection_mut().map_err(|err| err.to_string())?;
            let report = run_crud_walkthrough(conn).map_err(|err| err.to_string())?;
            for failure in &report.failures {
                eprintln!("step {} failed: {}", failure.step, failure.message);
            }
            report.final_users
        }
        Walkthrough::Savepoints => {
            let report = run_savepoint_walkthrough(&manager).map_err(|err| err.to_string())?;
            for (label, outcome) in [("explicit", &report.explicit), ("implicit", &report.implicit)]
            {
                if let Some(message) = outcome.nested_error.as_deref() {
                    eprintln!("{label}: nested update rolled back ({message})");
                }
            }
            report.final_users
        }
    };

    manager.close().map_err(|err| err.to_string())?;
    Ok(users)
}
