//! nsfd binary.
//!
//! Builds a namespace from a RON config, binding an in-memory peer at every
//! configured mount, then runs one command against it.
//!
//! Usage:
//!   # Resolve a path and show what it reached
//!   nsfd --config ns.ron resolve /svc/logger
//!
//!   # List a directory, local or remote
//!   nsfd --config ns.ron ls /data
//!
//!   # Print every mount
//!   nsfd --config ns.ron export

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use nsfd_kernel::{DirCursor, IoContext, NamespaceConfig, OpenFlags};

/// Read chunk size for `cat`.
const READ_CHUNK: usize = 8192;

/// Inspect a process-local namespace.
#[derive(Parser, Debug)]
#[command(name = "nsfd")]
#[command(about = "Resolve paths through a process-local namespace")]
struct Args {
    /// Namespace config (RON). An empty namespace if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tracing directive used when RUST_LOG is unset
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a path and print the kind of object reached
    Resolve { path: String },
    /// List a directory
    Ls { path: String },
    /// Print a file's contents
    Cat { path: String },
    /// Print every mount with its peer
    Export,
    /// Exit 0 if the path is exactly a mount point
    Bound { path: String },
    /// Print the lexically cleaned form of a path
    Clean { path: String },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match NamespaceConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("nsfd: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => NamespaceConfig::default(),
    };

    let filter = args
        .log
        .clone()
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| "warn".to_string());
    nsfd_telemetry::init_tracing(&filter);

    match run(&config, args.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("nsfd: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &NamespaceConfig, command: Command) -> Result<ExitCode> {
    if let Command::Clean { path } = &command {
        let cleaned = nsfd_kernel::clean(path)?;
        println!("{}{}", cleaned.path, if cleaned.is_dir { " (dir)" } else { "" });
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = config.build().context("building namespace")?;
    match command {
        Command::Resolve { path } => cmd_resolve(&ctx, &path),
        Command::Ls { path } => cmd_ls(&ctx, &path),
        Command::Cat { path } => cmd_cat(&ctx, &path),
        Command::Export => cmd_export(&ctx),
        Command::Bound { path } => Ok(if ctx.namespace().is_bound(&path) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
        Command::Clean { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn cmd_resolve(ctx: &IoContext, path: &str) -> Result<ExitCode> {
    let obj = ctx
        .connect(path, OpenFlags::read())
        .with_context(|| format!("resolving {path}"))?;
    match obj.attr() {
        Ok(attr) => println!("{path}: {} size={} perm={:o}", attr.kind, attr.size, attr.perm),
        Err(_) => println!("{path}: {}", obj.kind()),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_ls(ctx: &IoContext, path: &str) -> Result<ExitCode> {
    let fd = ctx
        .open(path, OpenFlags::directory())
        .with_context(|| format!("opening {path}"))?;
    let mut cursor = DirCursor::new();
    while let Some(entry) = ctx.readdir(fd, &mut cursor)? {
        println!("{:<10} {}", entry.kind, entry.name);
    }
    ctx.close(fd)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_cat(ctx: &IoContext, path: &str) -> Result<ExitCode> {
    let fd = ctx
        .open(path, OpenFlags::read())
        .with_context(|| format!("opening {path}"))?;
    let obj = ctx
        .fds()
        .lookup(fd)
        .with_context(|| format!("descriptor {fd} vanished"))?;

    let mut stdout = std::io::stdout().lock();
    let mut offset = 0u64;
    loop {
        let chunk = obj.read(offset, READ_CHUNK)?;
        if chunk.is_empty() {
            break;
        }
        stdout.write_all(&chunk)?;
        offset += chunk.len() as u64;
    }
    ctx.close(fd)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_export(ctx: &IoContext) -> Result<ExitCode> {
    let flat = ctx.namespace().export()?;
    let mut entries: Vec<_> = flat.iter().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    for entry in entries {
        let info = entry.peer.describe();
        println!("{:<24} {} ({})", entry.path, info.name, info.kind);
    }
    Ok(ExitCode::SUCCESS)
}
