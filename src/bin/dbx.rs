use dbx::compiler::is_select;
use dbx::config::{self, Config};
use dbx::{Db, DbxError};
use std::process::ExitCode;
use tracing::{error, info};

const USAGE: &str = "Usage: dbx [--json] [--read-only] <database-or-config.toml> <query>";

struct Args {
    json: bool,
    read_only: bool,
    target: String,
    query: String,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut json = false;
    let mut read_only = false;
    let mut positional = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--json" => json = true,
            "--read-only" => read_only = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("Unknown option '{}'\n{}", flag, USAGE)),
            _ => positional.push(arg),
        }
    }

    match <[String; 2]>::try_from(positional) {
        Ok([target, query]) => Ok(Args {
            json,
            read_only,
            target,
            query,
        }),
        Err(_) => Err(USAGE.to_string()),
    }
}

fn load(target: &str) -> Result<Config, DbxError> {
    if target.ends_with(".toml") {
        config::load_config(target)
    } else {
        Ok(Config::for_dsn(target))
    }
}

fn run(args: &Args, config: &Config) -> Result<(), DbxError> {
    let db = Db::from_config(&config.database)?;
    let db = if args.read_only { db.with_read_only(true) } else { db };

    let stmt = db.parse(&args.query)?;
    if is_select(&stmt) {
        let table = db.query_statement(&stmt, &[])?;
        if args.json {
            println!("{}", table.to_json()?);
        } else {
            print!("{}", table);
            println!("({} rows)", table.len());
        }
    } else {
        let result = db.exec_statement(&stmt, &[])?;
        if args.json {
            println!("{}", serde_json::json!({ "rows_affected": result.rows_affected }));
        } else {
            println!("{} rows affected", result.rows_affected);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    let config = match load(&args.target) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = config.logging.max_level().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!(dsn = %config.database.dsn, "Starting dbx...");

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
