//! callerid: developer CLI for the caller-ID core.
//!
//! Exercises the library without a phone attached.
//!
//! ## Subcommands
//!
//! - `normalize`: Print the canonical form of phone numbers
//! - `save`: Validate a phone-book payload and store it
//! - `sync`: Publish the stored phone book to a printing directory sink
//! - `status`: Show the configuration and last directory publication
//! - `simulate`: Replay telephony events through the live engine

mod console;
mod logging;
mod simulate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use fs_err as fs;

use callerid_core::{
    load_config_with_storage, load_payload, load_status, normalize, publish, record_report,
    save_payload_json, synchronize, RequestMode, StorageConfig,
};

use crate::console::PrintingSink;

#[derive(Parser)]
#[command(name = "callerid")]
#[command(about = "Phone-book caller identification toolkit")]
#[command(version)]
struct Cli {
    /// Storage root (default: ~/.callerid)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Incremental,
    Full,
}

impl From<Mode> for RequestMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Incremental => RequestMode::Incremental,
            Mode::Full => RequestMode::Full,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical form of each number (or "-" if unusable)
    Normalize {
        #[arg(value_name = "NUMBER", required = true)]
        numbers: Vec<String>,

        /// Country code for domestic numbers (default: from config)
        #[arg(long)]
        country_code: Option<String>,
    },

    /// Validate a phone-book JSON payload and store it
    Save {
        /// Payload file, or "-" for stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Publish the stored phone book to a directory sink printing to stdout
    Sync {
        #[arg(long, value_enum, default_value = "incremental")]
        mode: Mode,

        /// Numbers the sink should refuse
        #[arg(long, value_name = "NUMBER")]
        reject: Vec<u64>,
    },

    /// Show configuration and the last directory publication
    Status,

    /// Replay telephony events through the live engine with a console overlay
    Simulate {
        /// Event script (default: a ring answered after a late number)
        #[arg(value_name = "SCRIPT")]
        script: Option<PathBuf>,

        /// Lookup requests answered "not ready" before the engine warms up
        #[arg(long, default_value_t = 0)]
        warmup: u32,

        /// Pretend the overlay permission is not granted
        #[arg(long)]
        deny_overlay: bool,

        /// Time to keep running after the last event
        #[arg(long, default_value_t = 1500)]
        linger_ms: u64,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let storage = match cli.root {
        Some(root) => StorageConfig::with_root(root),
        None => StorageConfig::default(),
    };

    let result = match cli.command {
        Commands::Normalize {
            numbers,
            country_code,
        } => {
            run_normalize(&storage, &numbers, country_code);
            Ok(())
        }
        Commands::Save { file } => run_save(&storage, &file),
        Commands::Sync { mode, reject } => run_sync(&storage, mode.into(), reject),
        Commands::Status => run_status(&storage),
        Commands::Simulate {
            script,
            warmup,
            deny_overlay,
            linger_ms,
        } => run_simulate(storage, script, warmup, deny_overlay, linger_ms),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "callerid failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run_normalize(storage: &StorageConfig, numbers: &[String], country_code: Option<String>) {
    let country_code =
        country_code.unwrap_or_else(|| load_config_with_storage(storage).default_country_code);
    for raw in numbers {
        match normalize(raw, &country_code) {
            Some(number) => println!("{}\t{}", raw, number),
            None => println!("{}\t-", raw),
        }
    }
}

fn read_input(file: &Path) -> Result<String, String> {
    if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|err| format!("Failed to read stdin: {}", err))
    } else {
        fs::read_to_string(file).map_err(|err| err.to_string())
    }
}

fn run_save(storage: &StorageConfig, file: &Path) -> Result<(), String> {
    let json = read_input(file)?;
    let payload = save_payload_json(storage, &json).map_err(String::from)?;
    println!(
        "saved {} entries to {}",
        payload.entries.len(),
        storage.phone_book_file().display()
    );
    Ok(())
}

fn run_sync(storage: &StorageConfig, mode: RequestMode, reject: Vec<u64>) -> Result<(), String> {
    let config = load_config_with_storage(storage);
    let payload = load_payload(storage);
    let snapshot = synchronize(&payload.entries, &config.default_country_code);
    let dropped = payload.entries.len().saturating_sub(snapshot.len());
    if dropped > 0 {
        println!("({} entries dropped or merged)", dropped);
    }

    let sink = PrintingSink { reject };
    let report = publish(&snapshot, &sink, mode);
    record_report(storage, &report).map_err(String::from)?;

    if report.is_partial_failure() {
        return Err(format!("{} entries rejected", report.rejected));
    }
    Ok(())
}

fn run_status(storage: &StorageConfig) -> Result<(), String> {
    let report = serde_json::json!({
        "root": storage.root().display().to_string(),
        "config": load_config_with_storage(storage),
        "phone_book_entries": load_payload(storage).entries.len(),
        "directory": load_status(storage),
    });
    let text = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
    println!("{}", text);
    Ok(())
}

fn run_simulate(
    storage: StorageConfig,
    script: Option<PathBuf>,
    warmup: u32,
    deny_overlay: bool,
    linger_ms: u64,
) -> Result<(), String> {
    let text = match script {
        Some(path) => read_input(&path)?,
        None => simulate::DEFAULT_SCRIPT.to_string(),
    };
    let steps = simulate::parse_script(&text)?;
    simulate::run(
        storage,
        &steps,
        simulate::Options {
            permitted: !deny_overlay,
            warmup,
            linger: Duration::from_millis(linger_ms),
        },
    )
}
