use anyhow::Result;
use std::path::Path;
use std::process;

use platter_core::migrate::{CURRENT_SCHEMA_VERSION, Migrator};

pub(crate) fn cmd_db_setup(db_path: &Path, json: bool) -> Result<()> {
    let migrator = Migrator::new(db_path);
    match migrator.ensure_schema() {
        Ok(version) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "version": version, "path": db_path.display().to_string() })
                );
            } else {
                println!(
                    "Database ready at {} (schema v{version})",
                    db_path.display()
                );
            }
            Ok(())
        }
        Err(e) => {
            if json {
                println!("{}", super::helpers::json_error(&format!("{e:#}")));
            } else {
                eprintln!("Database setup failed: {e}");
                if let Some(source) = std::error::Error::source(&e) {
                    eprintln!("  caused by: {source}");
                }
            }
            process::exit(1);
        }
    }
}

pub(crate) fn cmd_db_version(db_path: &Path, json: bool) -> Result<()> {
    let migrator = Migrator::new(db_path);
    let version = migrator.schema_version();
    let compatible = migrator.is_compatible();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "version": version,
                "target": CURRENT_SCHEMA_VERSION,
                "compatible": compatible,
            })
        );
    } else {
        println!("Schema version: {version} (this build: {CURRENT_SCHEMA_VERSION})");
        if !compatible {
            println!("Warning: the database was written by a newer version of platter");
        } else if version < CURRENT_SCHEMA_VERSION {
            println!("Run `platter db setup` to migrate");
        }
    }
    Ok(())
}
