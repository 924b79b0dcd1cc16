//! deriva database tools.
//!
//! Provides the `deriva` binary with subcommands for working with deriva
//! SQLite databases. `setup` creates or migrates a database and installs
//! the built-in record types (application entities are installed by the
//! application's own controller at setup). `inspect` prints stored record
//! counts per type.

use std::process;

use clap::{Parser, Subcommand};

use deriva_core::schema::{INTERACTION_RECORD, TASK_RECORD};
use deriva_storage::{RecordStore, SqliteStore};

/// deriva database setup and inspection tools.
#[derive(Parser)]
#[command(name = "deriva", about = "deriva database setup and inspection tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create or migrate a database and install built-in record types.
    Setup {
        /// Path to the database file.
        #[arg(short, long)]
        db: String,
    },
    /// Print record counts per installed record type.
    Inspect {
        /// Path to the database file.
        #[arg(short, long)]
        db: String,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Setup { db } => run_setup(&db),
        Commands::Inspect { db } => run_inspect(&db),
    };
    process::exit(exit_code);
}

/// Execute the setup subcommand.
///
/// Returns exit code: 0 = success, 1 = install error, 2 = open error.
fn run_setup(db_path: &str) -> i32 {
    let mut store = match SqliteStore::new(db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path, e);
            return 2;
        }
    };

    for name in [INTERACTION_RECORD, TASK_RECORD] {
        if let Err(e) = store.install_record_type(name) {
            eprintln!("Error: failed to install '{}': {}", name, e);
            return 1;
        }
    }

    println!("database ready: {}", db_path);
    0
}

/// Execute the inspect subcommand.
///
/// Returns exit code: 0 = success, 2 = open/read error.
fn run_inspect(db_path: &str) -> i32 {
    let store = match SqliteStore::new(db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path, e);
            return 2;
        }
    };

    let counts = match store.record_counts() {
        Ok(counts) => counts,
        Err(e) => {
            eprintln!("Error: failed to read record counts: {}", e);
            return 2;
        }
    };

    if counts.is_empty() {
        println!("no record types installed");
        return 0;
    }
    for (name, count) in counts {
        println!("{:<32} {}", name, count);
    }
    0
}
