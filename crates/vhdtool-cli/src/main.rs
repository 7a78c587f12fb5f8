//! vhdtool CLI - Convert, inspect and maintain VHD disk images.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use vhdtool_core::engine::libvhd::{LibvhdConfig, LibvhdEngine};
use vhdtool_core::{
    container_to_raw, inspect_with, ops, raw_to_container, CheckOptions, CoalesceTarget,
    ContainerInfo, ConversionPhase, ConversionProgress, ConversionSummary, ConvertOptions,
    CreateFlags, DiskType, OpenFlags, ProgressCallback, DEFAULT_CHUNK_SECTORS,
};

/// Convert between raw disk images and VHD containers, and inspect or
/// maintain VHD files through libvhd.
#[derive(Parser)]
#[command(name = "vhdtool")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to libvhd.so. Defaults to the dynamic linker's search path.
    #[arg(long, global = true, env = "VHDTOOL_LIBVHD")]
    libvhd: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Suppress progress output and all logging below errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the footer and header of a VHD file.
    Inspect {
        /// Path to the VHD file.
        file: PathBuf,

        /// Open flags as a comma separated list (rdonly, rdwr, fast, strict,
        /// ignore_disabled).
        #[arg(long, default_value = "rdonly,fast")]
        flags: OpenFlags,
    },

    /// Check a VHD file for consistency.
    Check {
        /// Path to the VHD file.
        file: PathBuf,

        /// Tolerate a missing or damaged primary footer.
        #[arg(short = 'i', long)]
        ignore_missing_primary_footer: bool,

        /// Do not compare the parent's unique id.
        #[arg(short = 'I', long)]
        ignore_parent_uuid: bool,

        /// Do not compare parent timestamps.
        #[arg(short = 't', long)]
        ignore_timestamps: bool,

        /// Check every ancestor in the chain.
        #[arg(short = 'p', long)]
        check_parents: bool,

        /// Check block bitmaps against the allocation table.
        #[arg(short = 'b', long)]
        check_data: bool,

        /// Print allocation statistics.
        #[arg(short = 's', long)]
        stats: bool,

        /// Skip the allocation table overlap scan.
        #[arg(short = 'B', long)]
        skip_bat_overlap_check: bool,
    },

    /// Merge a differencing VHD into an output file, an ancestor or its parent.
    Coalesce {
        /// Path to the VHD file.
        file: PathBuf,

        /// Write the merged chain to this new file.
        output: Option<PathBuf>,

        /// Merge everything down to this ancestor.
        #[arg(long)]
        ancestor: Option<PathBuf>,

        /// Merge into the parent, then reparent onto this file.
        #[arg(long)]
        step_parent: Option<PathBuf>,

        /// Leave all-zero blocks unallocated in the target.
        #[arg(long)]
        sparse: bool,
    },

    /// Create an empty VHD file.
    Create {
        /// Path of the new VHD file.
        file: PathBuf,

        /// Virtual size in bytes, or with a K, M, G or T suffix.
        #[arg(value_parser = parse_size)]
        size: u64,

        /// Disk type (fixed, dynamic, differencing).
        #[arg(short = 't', long = "type", default_value = "dynamic")]
        disk_type: DiskType,
    },

    /// Convert a raw disk image to a VHD file.
    FromRaw {
        /// Source raw image.
        source: PathBuf,

        /// Destination VHD file.
        dest: PathBuf,

        /// Disk type (fixed, dynamic, differencing).
        #[arg(short = 't', long = "type", default_value = "dynamic")]
        disk_type: DiskType,

        /// Only write sectors that are not all zero.
        #[arg(long)]
        sparse: bool,

        /// Sectors moved per engine call.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SECTORS)]
        chunk_sectors: u32,
    },

    /// Convert a VHD file to a raw disk image.
    ToRaw {
        /// Source VHD file.
        source: PathBuf,

        /// Destination raw image.
        dest: PathBuf,

        /// Sectors moved per engine call.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SECTORS)]
        chunk_sectors: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = LibvhdConfig {
        library_path: cli.libvhd.clone(),
    };
    let engine = LibvhdEngine::load(&config).context("Failed to load libvhd")?;
    tracing::debug!(library = ?config.library_path, "engine ready");

    match cli.command {
        Commands::Inspect { file, flags } => {
            let info = inspect_with(&engine, &file, flags)?;
            show_info(&info);
        }
        Commands::Check {
            file,
            ignore_missing_primary_footer,
            ignore_parent_uuid,
            ignore_timestamps,
            check_parents,
            check_data,
            stats,
            skip_bat_overlap_check,
        } => {
            let options = CheckOptions {
                ignore_missing_primary_footer,
                ignore_parent_uuid,
                ignore_timestamps,
                check_parents,
                check_data,
                stats,
                skip_bat_overlap_check,
            };
            ops::check(&engine, &file, &options)?;
            if !cli.quiet {
                println!("{} is valid", file.display());
            }
        }
        Commands::Coalesce {
            file,
            output,
            ancestor,
            step_parent,
            sparse,
        } => {
            let target = CoalesceTarget::from_options(output, ancestor, step_parent)?;
            ops::coalesce(&engine, &file, &target, sparse)?;
            if !cli.quiet {
                println!(
                    "Coalesced {} into {}",
                    file.display(),
                    target.path().display()
                );
            }
        }
        Commands::Create {
            file,
            size,
            disk_type,
        } => {
            ops::create(&engine, &file, size, disk_type, CreateFlags::empty())?;
            if !cli.quiet {
                println!(
                    "Created {} ({}, {})",
                    file.display(),
                    disk_type,
                    format_bytes(size)
                );
            }
        }
        Commands::FromRaw {
            source,
            dest,
            disk_type,
            sparse,
            chunk_sectors,
        } => {
            let options = ConvertOptions {
                disk_type,
                sparse,
                chunk_sectors,
                ..ConvertOptions::default()
            };
            let total = std::fs::metadata(&source)
                .with_context(|| format!("Cannot stat {}", source.display()))?
                .len();
            let (bar, callback) = progress(total, cli.quiet)?;
            let summary = raw_to_container(&engine, &source, &dest, &options, callback)?;
            finish(bar, &summary, &dest, cli.quiet);
        }
        Commands::ToRaw {
            source,
            dest,
            chunk_sectors,
        } => {
            let options = ConvertOptions {
                chunk_sectors,
                ..ConvertOptions::default()
            };
            // The bar length is set from the first progress report, once the
            // container's size is known.
            let (bar, callback) = progress(0, cli.quiet)?;
            let summary = container_to_raw(&engine, &source, &dest, &options, callback)?;
            finish(bar, &summary, &dest, cli.quiet);
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Builds the progress bar and the callback that drives it.
fn progress(total_bytes: u64, quiet: bool) -> Result<(Option<ProgressBar>, Option<ProgressCallback>)> {
    if quiet {
        return Ok((None, None));
    }

    let pb = ProgressBar::new(total_bytes);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")?
        .progress_chars("#>-");
    pb.set_style(style);

    let handle = pb.clone();
    let callback: ProgressCallback = Box::new(move |progress: ConversionProgress| {
        if handle.length() != Some(progress.bytes_total()) {
            handle.set_length(progress.bytes_total());
        }
        handle.set_position(progress.bytes_processed());

        let phase_msg = match progress.phase {
            ConversionPhase::Idle => "Starting...",
            ConversionPhase::Creating => "Creating...",
            ConversionPhase::Streaming => "Streaming...",
            ConversionPhase::Closed => "Complete!",
            ConversionPhase::Failed => "Failed",
        };
        handle.set_message(phase_msg);
    });

    Ok((Some(pb), Some(callback)))
}

fn finish(bar: Option<ProgressBar>, summary: &ConversionSummary, dest: &Path, quiet: bool) {
    if let Some(pb) = bar {
        pb.finish_with_message("Complete!");
    }
    if quiet {
        return;
    }

    println!();
    println!("Conversion completed successfully: {}", dest.display());
    println!(
        "Written: {} of {} ({} write calls, {} skipped)",
        format_bytes(summary.sectors_written * 512),
        format_bytes(summary.total_sectors * 512),
        summary.write_calls,
        format_bytes(summary.sectors_skipped() * 512)
    );
}

fn show_info(info: &ContainerInfo) {
    let footer = &info.footer;

    println!("VHD Information");
    println!("===============");
    println!();
    println!("File:          {}", info.path.display());
    println!(
        "Type:          {}",
        footer
            .disk_type()
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("unknown ({})", footer.disk_type))
    );
    println!("Virtual size:  {}", format_bytes(info.virtual_size()));
    println!("Original size: {}", format_bytes(footer.original_size));
    println!("Chain depth:   {}", info.chain_depth);
    println!();
    println!("Footer");
    println!("------");
    println!(
        "Cookie:        {}{}",
        String::from_utf8_lossy(&footer.cookie),
        if footer.cookie_valid() { "" } else { " (invalid)" }
    );
    println!("Features:      {:#010x}", footer.features);
    println!("Format:        {}", footer.format_version);
    println!(
        "Data offset:   {}",
        if footer.data_offset == u64::MAX {
            "none".to_string()
        } else {
            footer.data_offset.to_string()
        }
    );
    println!(
        "Created:       {}",
        footer
            .created_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| footer.timestamp.to_string())
    );
    println!(
        "Creator:       {} {} on {}",
        footer.creator_application().trim_end(),
        footer.creator_version,
        footer.creator_os()
    );
    println!("Geometry:      {}", footer.geometry);
    println!(
        "Checksum:      {:#010x}{}",
        footer.checksum,
        if footer.checksum_valid() { "" } else { " (mismatch)" }
    );
    println!("UUID:          {}", footer.unique_id);
    println!("Saved state:   {}", footer.saved_state != 0);
    println!("Hidden:        {}", footer.hidden != 0);

    if let Some(header) = &info.header {
        println!();
        println!("Header");
        println!("------");
        println!(
            "Cookie:        {}{}",
            String::from_utf8_lossy(&header.cookie),
            if header.cookie_valid() { "" } else { " (invalid)" }
        );
        println!("Table offset:  {}", header.table_offset);
        println!("Version:       {}", header.header_version);
        println!("Max entries:   {}", header.max_table_entries);
        println!("Max size:      {} MiB", header.max_virtual_size_mib());
        println!("Block size:    {}", format_bytes(header.block_size as u64));
        println!(
            "Checksum:      {:#010x}{}",
            header.checksum,
            if header.checksum_valid() { "" } else { " (mismatch)" }
        );

        if info.is_differencing() {
            println!("Parent:        {}", header.parent_name);
            println!("Parent UUID:   {}", header.parent_unique_id);
            if let Some(ts) = header.parent_created_at() {
                println!("Parent time:   {}", ts.to_rfc3339());
            }
            if header.locators.is_empty() {
                println!("Locators:      None");
            } else {
                println!("Locators:");
                for (i, loc) in header.locators.iter().enumerate() {
                    println!(
                        "  {}. {} - {} bytes at offset {} (space {})",
                        i + 1,
                        loc.platform,
                        loc.data_len,
                        loc.data_offset,
                        loc.data_space
                    );
                }
            }
        }
    }
}

/// Parse a size such as `4096`, `512K` or `10G` (binary multiples).
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        Some('T') => (&s[..s.len() - 1], 40),
        _ => (s, 0),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid size '{}'", s))?;
    match value.checked_mul(1u64 << shift) {
        Some(bytes) => Ok(bytes),
        None => bail!("size '{}' is too large", s),
    }
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512K").unwrap(), 512 * 1024);
        assert_eq!(parse_size("10g").unwrap(), 10 << 30);
        assert!(parse_size("ten").is_err());
        assert!(parse_size("99999999999T").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(100), "100 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_cli_parses_check_flags() {
        let cli = Cli::try_parse_from(["vhdtool", "check", "-b", "-p", "disk.vhd"]).unwrap();
        match cli.command {
            Commands::Check {
                file,
                check_data,
                check_parents,
                stats,
                ..
            } => {
                assert_eq!(file, PathBuf::from("disk.vhd"));
                assert!(check_data);
                assert!(check_parents);
                assert!(!stats);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_cli_parses_from_raw() {
        let cli = Cli::try_parse_from([
            "vhdtool", "-q", "from-raw", "disk.img", "disk.vhd", "--type", "fixed", "--sparse",
        ])
        .unwrap();
        assert!(cli.quiet);
        match cli.command {
            Commands::FromRaw {
                disk_type,
                sparse,
                chunk_sectors,
                ..
            } => {
                assert_eq!(disk_type, DiskType::Fixed);
                assert!(sparse);
                assert_eq!(chunk_sectors, DEFAULT_CHUNK_SECTORS);
            }
            _ => panic!("expected from-raw"),
        }
    }

    #[test]
    fn test_cli_parses_inspect_flags() {
        let cli = Cli::try_parse_from(["vhdtool", "inspect", "disk.vhd"]).unwrap();
        match cli.command {
            Commands::Inspect { flags, .. } => assert_eq!(flags, OpenFlags::RDONLY | OpenFlags::FAST),
            _ => panic!("expected inspect"),
        }

        let cli = Cli::try_parse_from([
            "vhdtool", "inspect", "--flags", "rdonly,strict", "disk.vhd",
        ])
        .unwrap();
        match cli.command {
            Commands::Inspect { flags, .. } => {
                assert_eq!(flags, OpenFlags::RDONLY | OpenFlags::STRICT)
            }
            _ => panic!("expected inspect"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_open_flag() {
        assert!(Cli::try_parse_from(["vhdtool", "inspect", "--flags", "rdonly,turbo", "a.vhd"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_disk_type() {
        assert!(Cli::try_parse_from(["vhdtool", "create", "a.vhd", "1M", "--type", "huge"]).is_err());
    }
}
