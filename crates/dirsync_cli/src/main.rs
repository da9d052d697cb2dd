//! dirsync CLI
//!
//! Runs the sync server and inspects journaled directories.
//!
//! # Commands
//!
//! - `serve` - Serve a root of directories over TCP
//! - `inspect` - Display directory statistics and segments
//! - `dump` - Print patches for debugging
//! - `verify` - Check segment files without modifying them

mod commands;

use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// dirsync server and journal tools.
#[derive(Parser)]
#[command(name = "dirsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a root of directories over TCP
    Serve {
        /// Directory holding one subdirectory per served directory
        #[arg(short, long)]
        root: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        bind: SocketAddr,

        /// Patches per segment before rotating
        #[arg(long, default_value = "2000")]
        max_segment_patches: u64,

        /// Maximum concurrent connections
        #[arg(long, default_value = "1000")]
        max_connections: usize,

        /// Skip fsync after each append
        #[arg(long)]
        no_sync: bool,

        /// Only peers from these addresses may subscribe or write
        #[arg(long = "allow", value_name = "IP")]
        allow: Vec<IpAddr>,
    },

    /// Display directory statistics and segments
    Inspect {
        /// Path to the directory
        dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print patches for debugging
    Dump {
        /// Path to the directory
        dir: PathBuf,

        /// First version to print
        #[arg(long, default_value = "1")]
        from: u64,

        /// Maximum number of patches to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check segment files without modifying them
    Verify {
        /// Path to the directory
        dir: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            root,
            bind,
            max_segment_patches,
            max_connections,
            no_sync,
            allow,
        } => {
            let options = commands::serve::ServeOptions {
                root,
                bind,
                max_segment_patches,
                max_connections,
                sync: !no_sync,
                allow,
            };
            commands::serve::run(options)?;
        }
        Commands::Inspect { dir, format } => {
            commands::inspect::run(&dir, &format)?;
        }
        Commands::Dump {
            dir,
            from,
            limit,
            format,
        } => {
            commands::dump::run(&dir, from, limit, &format)?;
        }
        Commands::Verify { dir } => {
            commands::verify::run(&dir)?;
        }
        Commands::Version => {
            println!("dirsync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
