use std::fmt::Display;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indexmap::{IndexMap, IndexSet};

use dwscan::logging::{init_logging, LogFormat, LogLevel};
use dwscan::{AnalysisOptions, Analyzer, Image, PathTree};

#[derive(Parser)]
#[command(name = "dwscan")]
#[command(version)]
#[command(about = "Recover per-file macros and include paths from DWARF debug information")]
struct Cli {
    /// Executable or object file (ELF or PE) with DWARF 2 debug information
    binary: PathBuf,

    /// Print the per-file sets instead of the compressed directory tree
    #[arg(long)]
    raw: bool,

    /// Skip checking the compressed tree against the per-file sets
    #[arg(long)]
    no_verify: bool,

    /// Skip scanning .debug_line for tables no compile unit refers to
    #[arg(long)]
    no_line_scan: bool,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Log output format (pretty or json); defaults to DWSCAN_LOG_FORMAT
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_format)?;

    let mut options = AnalysisOptions::from_env();
    if cli.no_verify {
        options.verify_compression = false;
    }
    if cli.no_line_scan {
        options.scan_unreferenced_line_tables = false;
    }

    let image = Image::open(&cli.binary)?;
    let sections = image.debug_sections()?;
    let settings = Analyzer::new(&sections, options).run()?;

    println!(
        "{}: {} compile units, {} source files",
        cli.binary.display(),
        settings.compilation_units.len(),
        settings.source_files.len()
    );
    if settings.failed_units > 0 {
        println!("{} compile units could not be decoded", settings.failed_units);
    }

    if cli.raw {
        print_per_file("Macros", &settings.macros);
        print_per_file("Includes", &settings.includes);
    } else {
        print_tree("Macros", &settings.compressed_macros);
        print_tree("Includes", &settings.compressed_includes);
    }

    if !settings.is_consistent() {
        println!(
            "\nCompressed tree mismatches: {} macro, {} include",
            settings.macro_discrepancies.len(),
            settings.include_discrepancies.len()
        );
        for discrepancy in &settings.macro_discrepancies {
            println!("  {discrepancy}");
        }
        for discrepancy in &settings.include_discrepancies {
            println!("  {discrepancy}");
        }
    }
    Ok(())
}

fn print_per_file<T: Display>(title: &str, per_file: &IndexMap<String, IndexSet<T>>) {
    println!("\n{title}:");
    for (path, attrs) in per_file {
        if attrs.is_empty() {
            continue;
        }
        println!("  {path}");
        for attr in attrs {
            println!("    {attr}");
        }
    }
}

fn print_tree<T: Display>(title: &str, tree: &PathTree<T>) {
    println!("\n{title}:");
    for (path, attrs) in tree {
        println!("  {path}");
        for attr in attrs {
            println!("    {attr}");
        }
    }
}
