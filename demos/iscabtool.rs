use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use iscab::{
    CancellationToken, ExtractOptions, FileDescriptor, InflateMode, VolumeSet,
};
use tracing_subscriber::EnvFilter;

// ========================================================================= //

#[derive(Parser)]
#[command(name = "iscabtool")]
#[command(about = "Lists and extracts InstallShield cabinet sets", long_about = None)]
struct Cli {
    /// Report per-file problems and volume hand-offs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists the files in the set
    Ls {
        /// Lists in long format
        #[arg(short)]
        long: bool,
        /// Any volume of the set (data1.hdr, data1.cab, ...)
        cab: PathBuf,
    },
    /// Lists components and file groups
    Groups { cab: PathBuf },
    /// Extracts files
    X {
        /// Output directory
        #[arg(short = 'd', default_value = ".")]
        output: PathBuf,
        /// Only extract this file group
        #[arg(short = 'g')]
        group: Option<String>,
        /// Drop directory names
        #[arg(short = 'j')]
        junk_paths: bool,
        /// Lowercase output paths
        #[arg(short = 'L')]
        lowercase: bool,
        /// Inflate chunks the way the legacy encoder expects
        #[arg(short = 'O')]
        legacy: bool,
        cab: PathBuf,
    },
    /// Extracts every file to nowhere and reports failures
    T {
        /// Inflate chunks the way the legacy encoder expects
        #[arg(short = 'O')]
        legacy: bool,
        cab: PathBuf,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("installing Ctrl-C handler")?;

    let mut options = ExtractOptions::new();
    options.set_verbose(cli.verbose);
    options.set_cancel_token(cancel);

    match cli.command {
        Command::Ls { long, cab } => {
            let set = open_set(&cab)?;
            for index in 0..set.file_count() {
                if let Some(fd) = set.file_descriptor(index) {
                    if set.file_is_valid(index) {
                        list_file(&set, index, fd, long);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Groups { cab } => {
            let set = open_set(&cab)?;
            for component in set.components() {
                println!("Component: {}", component.name());
                for name in component.file_group_names() {
                    println!("  {}", name);
                }
            }
            for group in set.file_groups() {
                println!(
                    "File group: {} (files {}-{})",
                    group.name(),
                    group.first_file(),
                    group.last_file()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::X { output, group, junk_paths, lowercase, legacy, cab } => {
            let set = open_set(&cab)?;
            options.set_file_group(group);
            options.set_junk_paths(junk_paths);
            options.set_lowercase(lowercase);
            options.set_inflate_mode(inflate_mode(legacy));
            let report = set.extract_all(&output, &options)?;
            for outcome in report.outcomes() {
                match outcome.result() {
                    Ok(_) => println!("  extracting: {}", outcome.path().display()),
                    Err(error) => println!(
                        "  FAILED:     {} ({})",
                        outcome.path().display(),
                        error
                    ),
                }
            }
            println!(" --------  -------");
            println!(
                "          {} files, {} failed",
                report.outcomes().len(),
                report.failures().count()
            );
            Ok(exit_code(report.success()))
        }
        Command::T { legacy, cab } => {
            let set = open_set(&cab)?;
            options.set_inflate_mode(inflate_mode(legacy));
            let mut failures = 0;
            for index in 0..set.file_count() {
                if !set.file_is_valid(index) {
                    continue;
                }
                let name = set.file_name(index).unwrap_or_default();
                match set.extract_file(index, &mut io::sink(), &options) {
                    Ok(_) => println!("  testing: {}", name),
                    Err(iscab::ExtractError::Cancelled) => {
                        bail!("cancelled")
                    }
                    Err(error) => {
                        failures += 1;
                        println!("  FAILED:  {} ({})", name, error);
                    }
                }
            }
            Ok(exit_code(failures == 0))
        }
    }
}

// ========================================================================= //

fn open_set(path: &Path) -> anyhow::Result<VolumeSet> {
    VolumeSet::open(path)
        .with_context(|| format!("opening cabinet set {}", path.display()))
}

fn inflate_mode(legacy: bool) -> InflateMode {
    if legacy {
        InflateMode::StepWise
    } else {
        InflateMode::SingleCall
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn list_file(set: &VolumeSet, index: usize, fd: &FileDescriptor, long: bool) {
    let directory = set.file_directory(index).unwrap_or_default();
    let path = if directory.is_empty() {
        fd.name().to_string()
    } else {
        format!("{}\\{}", directory, fd.name())
    };
    if !long {
        println!("{}", path);
        return;
    }
    let flags = format!(
        "{}{}{}{}{}",
        if fd.is_compressed() { 'C' } else { '-' },
        if fd.is_obfuscated() { 'O' } else { '-' },
        if fd.is_split() { 'S' } else { '-' },
        if fd.links_previous() { 'L' } else { '-' },
        if fd.links_next() { 'N' } else { '-' },
    );
    println!(
        "{:>5} {} {:>10} {:>10} v{:<3} {}",
        index,
        flags,
        fd.expanded_size(),
        fd.compressed_size(),
        fd.volume(),
        path
    );
}

// ========================================================================= //
