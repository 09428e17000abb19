//! jotdb CLI — debug operations for jotdb files.
//!
//! - `jotdb dump FILE` — print the raw flat keys of the underlying store
//! - `jotdb get FILE KEY` — print one top-level entry as JSON
//! - `jotdb set FILE KEY JSON` — write one top-level entry and commit

use std::process;

use clap::{Arg, Command};
use jotdb_db::{Db, FileStore, FlatStore, Value};

fn build_cli() -> Command {
    Command::new("jotdb")
        .about("Debug operations for jotdb files")
        .subcommand_required(true)
        .subcommand(
            Command::new("dump")
                .about("Dump the keys of the underlying flat store")
                .arg(Arg::new("file").required(true)),
        )
        .subcommand(
            Command::new("get")
                .about("Print a top-level entry as JSON")
                .arg(Arg::new("file").required(true))
                .arg(Arg::new("key").required(true)),
        )
        .subcommand(
            Command::new("set")
                .about("Write a top-level entry from a JSON argument and commit")
                .arg(Arg::new("file").required(true))
                .arg(Arg::new("key").required(true))
                .arg(Arg::new("value").required(true)),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .init();

    let matches = build_cli().get_matches();
    let result = match matches.subcommand() {
        Some(("dump", sub)) => dump(arg(sub, "file")),
        Some(("get", sub)) => get(arg(sub, "file"), arg(sub, "key")),
        Some(("set", sub)) => set(arg(sub, "file"), arg(sub, "key"), arg(sub, "value")),
        _ => unreachable!("subcommand_required"),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn arg<'a>(matches: &'a clap::ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn dump(file: &str) -> jotdb_db::Result<()> {
    let store = FileStore::open(file)?;
    for key in store.keys()? {
        match store.get(&key)? {
            Some(scalar) => println!("{:?}\t{}", key, scalar),
            None => println!("{:?}", key),
        }
    }
    Ok(())
}

fn get(file: &str, key: &str) -> jotdb_db::Result<()> {
    let db = Db::open(file);
    let value = db.get(key)?.to_value()?;
    let json: serde_json::Value = value.into();
    println!("{}", json);
    db.close()
}

fn set(file: &str, key: &str, raw: &str) -> jotdb_db::Result<()> {
    let json: serde_json::Value = serde_json::from_str(raw)?;
    let db = Db::open(file);
    db.set(key, Value::from(json))?;
    db.commit()?;
    db.close()
}
