//! StrataDB REPL
//!
//! Reads one statement per line from stdin, feeds it through `sql::parse`,
//! and submits the resulting operation to the transaction manager — inside
//! the session's open transaction if `BEGIN` was seen, otherwise
//! auto-commit. Exits on the literal (case-insensitive) word `exit`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use log::info;

use stratadb::operation::{OpResult, Operation};
use stratadb::{open, Config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    config.data_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("stratadb - single-node relational data engine");
                println!();
                println!("Usage: stratadb [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --data-dir DIR    Data directory (default: ./db)");
                println!("  -h, --help            Show this help");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!("starting stratadb, data_dir={:?}", config.data_dir);
    let manager = open(config)?;

    let stdin = io::stdin();
    let mut session_txn: Option<String> = None;

    print!("stratadb> ");
    io::stdout().flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            break;
        }

        match stratadb::sql::parse(trimmed) {
            Ok(Operation::Unknown) => {}
            Ok(Operation::Transaction) => {
                session_txn = Some(manager.begin());
                println!("OK (transaction started)");
            }
            Ok(Operation::Commit) => match session_txn.take() {
                Some(id) => match manager.commit(&id) {
                    Ok(()) => println!("OK (committed)"),
                    Err(e) => println!("ERROR: {}", e),
                },
                None => println!("ERROR: no transaction is active"),
            },
            Ok(Operation::Rollback) => match session_txn.take() {
                Some(id) => match manager.rollback(&id) {
                    Ok(()) => println!("OK (rolled back)"),
                    Err(e) => println!("ERROR: {}", e),
                },
                None => println!("ERROR: no transaction is active"),
            },
            Ok(op) => {
                let result = match &session_txn {
                    Some(id) => manager.execute(id, op),
                    None => manager.execute_auto_commit(op),
                };
                print_result(result);
            }
            Err(e) => println!("ERROR: {}", e),
        }

        print!("stratadb> ");
        io::stdout().flush()?;
    }

    Ok(())
}

fn print_result(result: OpResult) {
    if let Some(e) = result.error {
        println!("ERROR: {}", e);
        return;
    }
    if let Some(rows) = result.rows {
        if let Some(fields) = &result.fields {
            println!("{}", fields.join(" | "));
        }
        for row in &rows {
            let rendered: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
            println!("{}", rendered.join(" | "));
        }
        println!("({} row(s))", rows.len());
        return;
    }
    if let Some(count) = result.affected_count {
        println!("OK ({} row(s) affected)", count);
        return;
    }
    if let Some(metadata) = result.metadata {
        println!("OK (table '{}')", metadata.name);
        return;
    }
    if let Some(indexes) = result.index_metadata {
        for index in indexes {
            println!("{} ON ({})", index.name, index.columns.join(", "));
        }
        return;
    }
    println!("OK");
}
