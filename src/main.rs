//! CLI front-end: parses arguments into an `Options` record, initializes logging,
//! and dispatches into the session orchestrator.
//!
//! Grounded on the `clap::Parser` derive layout in the original `main.rs`, extended with the
//! three verbs a mirroring client needs (`clone` / `pull` / `verify`) in place of the original
//! general-purpose `init`/`cat-file`/`hash-object` plumbing set.

mod config;
mod error;
mod hash;
mod manifest;
mod pack;
mod protocol;
mod session;
mod store;
mod transport;
mod tree;
mod worktree;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::config::Options;
use crate::error::Error;
use crate::transport::client::ReqwestTransport;

#[derive(Parser)]
#[command(version, about = "Shallow mirror of a protocol-v2 smart-HTTP repository", long_about = None)]
struct Cli {
    /// Optional TOML file supplying default option values (CLI flags override it).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase diagnostic verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Perform a full shallow clone of a branch tip into a fresh working directory.
    Clone {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        repository_path: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        target_directory: Option<PathBuf>,
        #[arg(long)]
        work_directory: Option<PathBuf>,
        /// Manual override for the discovered branch tip (skips the discovery round-trip).
        #[arg(long)]
        want: Option<String>,
        #[arg(long)]
        keep_pack: Option<PathBuf>,
        #[arg(long)]
        use_pack: Option<PathBuf>,
    },

    /// Bring an existing working directory up to date with the remote branch tip.
    Pull {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        repository_path: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        target_directory: Option<PathBuf>,
        #[arg(long)]
        work_directory: Option<PathBuf>,
        /// Force a full fetch regardless of the persisted manifest.
        #[arg(short = 'c', long)]
        clone: bool,
        /// Manual override for the prior tip normally read from the manifest.
        #[arg(long)]
        have: Option<String>,
        /// Manual override for the discovered new branch tip (skips the discovery round-trip).
        #[arg(long)]
        want: Option<String>,
        #[arg(long)]
        keep_pack: Option<PathBuf>,
        #[arg(long)]
        use_pack: Option<PathBuf>,
    },

    /// Check a working directory against its manifest without any network activity.
    Verify {
        #[arg(long)]
        target_directory: Option<PathBuf>,
        #[arg(long)]
        work_directory: Option<PathBuf>,
    },
}

fn level_filter(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let file_defaults = config::load_file(cli.config.as_deref())?;
    let verbose = cli.verbose;

    match cli.command {
        Command::Clone {
            host,
            port,
            repository_path,
            branch,
            target_directory,
            work_directory,
            want,
            keep_pack,
            use_pack,
        } => {
            let opts = file_defaults.merged_with(Options {
                host,
                port,
                repository_path,
                branch,
                target_directory,
                work_directory,
                want,
                keep_pack,
                use_pack,
                clone: true,
                ..Options::default()
            });
            init_logger(verbose, opts.verbosity);
            let transport = ReqwestTransport::new();
            session::run_clone(&opts, &transport)
        }
        Command::Pull {
            host,
            port,
            repository_path,
            branch,
            target_directory,
            work_directory,
            clone,
            have,
            want,
            keep_pack,
            use_pack,
        } => {
            let opts = file_defaults.merged_with(Options {
                host,
                port,
                repository_path,
                branch,
                target_directory,
                work_directory,
                keep_pack,
                use_pack,
                clone,
                have,
                want,
                ..Options::default()
            });
            init_logger(verbose, opts.verbosity);
            let transport = ReqwestTransport::new();
            session::run_pull(&opts, &transport)
        }
        Command::Verify {
            target_directory,
            work_directory,
        } => {
            let opts = file_defaults.merged_with(Options {
                target_directory,
                work_directory,
                ..Options::default()
            });
            init_logger(verbose, opts.verbosity);
            session::run_verify(&opts)
        }
    }
}

fn init_logger(cli_verbosity: u8, file_verbosity: u8) {
    env_logger::Builder::new()
        .filter_level(level_filter(cli_verbosity.max(file_verbosity)))
        .init();
}

fn main() -> ExitCode {
    if let Err(err) = run() {
        print_error_chain(&err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_error_chain(err: &dyn std::error::Error) {
    eprintln!("error: {err}");
    let mut cause = err.source();
    while let Some(e) = cause {
        eprintln!("  caused by: {e}");
        cause = e.source();
    }
}
