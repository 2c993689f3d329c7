//! gencache Admin Binary
//!
//! Opens a data directory, runs one command against it and closes it.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gencache::{clock, Config, Storage};
use tracing_subscriber::{fmt, EnvFilter};

/// gencache admin tool
#[derive(Parser, Debug)]
#[command(name = "gencache")]
#[command(about = "Inspect and edit a gencache data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./gencache_data")]
    data_dir: PathBuf,

    /// Maximum object age in hours
    #[arg(long, default_value = "12")]
    max_age_hours: u64,

    /// Number of generations to keep
    #[arg(long, default_value = "3")]
    max_instances: usize,

    /// Write record checksums in new generations
    #[arg(long)]
    checksums: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print per-generation and total statistics
    Stats {
        /// Include queue depth, purge counts and state
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the object stored under a key
    Get {
        key: String,
    },

    /// Store an object
    Put {
        key: String,

        value: String,

        /// Time to live in seconds
        #[arg(long, default_value = "3600")]
        ttl_secs: i64,

        /// Group tag (repeatable)
        #[arg(short, long = "group")]
        groups: Vec<i64>,
    },

    /// Remove a key
    Remove {
        key: String,
    },

    /// List the keys of a group
    ListGroup {
        group: i64,
    },

    /// Remove every key of a group
    RemoveGroup {
        group: i64,
    },

    /// List live keys fully matching a regular expression
    Find {
        pattern: String,
    },

    /// Write a tab-delimited report of every key
    DumpKeys {
        output: PathBuf,
    },

    /// Start a new generation now
    Rotate,

    /// Drop expired keys from the in-memory indexes
    Purge,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gencache=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("gencache v{}", gencache::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .max_age(Duration::from_secs(args.max_age_hours * 60 * 60))
        .max_instances(args.max_instances)
        .use_checksums(args.checksums)
        .build();

    let storage = match Storage::open(config) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&storage, args.command);
    let closed = storage.close();

    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(storage: &Storage, command: Commands) -> gencache::Result<()> {
    match command {
        Commands::Stats { verbose } => {
            for line in storage.dump_stats(verbose) {
                println!("{}", line);
            }
        }
        Commands::Get { key } => match storage.get(&key)? {
            Some(object) => {
                println!("{}", String::from_utf8_lossy(&object.data));
                println!("(expires {})", clock::format_millis(object.ttl));
            }
            None => println!("(not found)"),
        },
        Commands::Put {
            key,
            value,
            ttl_secs,
            groups,
        } => {
            let ttl = clock::now_millis().saturating_add(ttl_secs.saturating_mul(1000));
            storage.put(&key, value.into_bytes(), ttl, &groups)?;
            println!("OK");
        }
        Commands::Remove { key } => {
            storage.remove(&key)?;
            println!("OK");
        }
        Commands::ListGroup { group } => {
            for key in storage.list_group(group) {
                println!("{}", key);
            }
        }
        Commands::RemoveGroup { group } => {
            let removed = storage.remove_group(group)?;
            println!("removed {} keys", removed.len());
        }
        Commands::Find { pattern } => {
            for key in storage.regex_find_keys(&pattern)? {
                println!("{}", key);
            }
        }
        Commands::DumpKeys { output } => {
            storage.write_key_data(&output)?;
            println!("wrote {}", output.display());
        }
        Commands::Rotate => {
            storage.rotate()?;
            println!("{} generations", storage.generation_count());
        }
        Commands::Purge => {
            println!("purged {} keys", storage.purge_expired());
        }
    }
    Ok(())
}
