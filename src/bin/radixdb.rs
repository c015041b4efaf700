//! Command-line access to a radixdb data directory.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use radixdb::{Config, Db, RadixError};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "radixdb",
    version,
    about = "Inspect and edit a radixdb database",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        help = "Keys and values on the command line and in output are hex"
    )]
    hex: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, env = "RADIXDB_DIR", help = "Data directory")]
    dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override cache size (pages)")]
    cache_pages: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY.
    Get { key: String },
    /// Store VALUE under KEY.
    Set { key: String, value: String },
    /// Remove KEY.
    Del { key: String },
    /// List keys in order.
    Scan {
        #[arg(long, default_value = "", help = "Only keys starting with this")]
        prefix: String,
        #[arg(long, help = "Descending order")]
        reverse: bool,
        #[arg(long, help = "Stop after this many entries")]
        limit: Option<usize>,
    },
    /// Print engine counters.
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct Entry {
    key: String,
    value: String,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_config(open: &OpenArgs) -> Result<Config, Box<dyn Error>> {
    let mut config = match &open.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &open.dir {
        config.dir = dir.clone();
    }
    if let Some(pages) = open.cache_pages {
        config.cache_pages = pages;
    }
    Ok(config)
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let db = Db::open(build_config(&cli.open)?)?;
    let codec = Codec { hex: cli.hex };

    match &cli.command {
        Command::Get { key } => match db.get(&codec.decode(key)?) {
            Ok(value) => println!("{}", codec.encode(&value)),
            Err(RadixError::NotExist) => {
                db.close()?;
                eprintln!("not found");
                std::process::exit(2);
            }
            Err(err) => return Err(err.into()),
        },
        Command::Set { key, value } => db.set(&codec.decode(key)?, &codec.decode(value)?)?,
        Command::Del { key } => db.del(&codec.decode(key)?)?,
        Command::Scan {
            prefix,
            reverse,
            limit,
        } => {
            let prefix = codec.decode(prefix)?;
            let txn = db.begin(true)?;
            let iter = if *reverse {
                txn.backward(&prefix)?
            } else {
                txn.forward(&prefix)?
            };
            let mut entries = Vec::new();
            for item in iter.take(limit.unwrap_or(usize::MAX)) {
                let (key, value) = item?;
                entries.push(Entry {
                    key: codec.encode(&key),
                    value: codec.encode(&value),
                });
            }
            txn.rollback()?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Text => {
                    for entry in &entries {
                        println!("{}\t{}", entry.key, entry.value);
                    }
                }
            }
        }
        Command::Stats => {
            let stats = db.stats()?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Text => {
                    println!("Index:");
                    println!(
                        "  blocks={} resident_pages={} resident_locks={}",
                        stats.blocks, stats.resident_pages, stats.resident_locks
                    );
                    println!("Values:");
                    println!("  bytes={} files={}", stats.blob_bytes, stats.blob_files);
                    println!("WAL:");
                    println!("  files={}", stats.wal_files);
                }
            }
        }
    }
    db.close()?;
    Ok(())
}

struct Codec {
    hex: bool,
}

impl Codec {
    fn decode(&self, text: &str) -> Result<Vec<u8>, Box<dyn Error>> {
        if self.hex {
            Ok(hex::decode(text)?)
        } else {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn encode(&self, bytes: &[u8]) -> String {
        if self.hex {
            hex::encode(bytes)
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
