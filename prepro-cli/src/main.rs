#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # prepro CLI
//!
//! A command-line interface for the prepro C preprocessor library.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use prepro::{PreproConfig, PreproError, Preprocessor};
use std::path::PathBuf;

/// Exit codes for different error conditions
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const IO_ERROR: i32 = 2;
    pub const PREPROCESS_ERROR: i32 = 3;
    pub const ARGUMENT_ERROR: i32 = 4;
}

/// Command-line interface for the prepro C preprocessor
#[derive(Parser)]
#[command(
    name = "prepro",
    version,
    author,
    about = "A token-stream C preprocessor",
    long_about = "prepro expands macros, evaluates conditional compilation, and resolves includes over C/C++ source, emitting the preprocessed text.",
    after_help = "EXAMPLES:
  # Preprocess a single file
  $ prepro input.c -o output.i

  # Preprocess with include directories and predefined macros
  $ prepro input.c -I include -I /usr/include -D DEBUG=1 -o output.i

  # Read from stdin and write to stdout
  $ cat input.c | prepro - | gcc -x c -

  # Verbose preprocessing
  $ prepro input.c -v"
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Input file to preprocess (use '-' for stdin)
    #[arg(help = "Input C/C++ file to preprocess (use '-' for stdin)")]
    input: PathBuf,

    /// Output file (use '-' for stdout, default: stdout)
    #[arg(
        short = 'o',
        long,
        help = "Output file (use '-' for stdout, default: stdout)"
    )]
    output: Option<PathBuf>,

    /// Add include directory
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        help = "Add directory to include search path"
    )]
    include_dirs: Vec<PathBuf>,

    /// Predefine an object-like macro
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VALUE]",
        help = "Predefine NAME as an object-like macro (default value: 1)"
    )]
    defines: Vec<String>,

    /// Undefine a macro
    #[arg(
        short = 'U',
        long = "undef",
        value_name = "NAME",
        help = "Undefine NAME after all predefines are installed"
    )]
    undefines: Vec<String>,

    /// Enable verbose output
    #[arg(
        short = 'v',
        long,
        help = "Enable verbose output with diagnostic information"
    )]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short = 'q', long, help = "Suppress warnings (quiet mode)")]
    quiet: bool,
}

/// Main application entry point
fn main() {
    std::process::exit(match run() {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            determine_exit_code(&e)
        }
    });
}

/// Determine the appropriate exit code based on the error
fn determine_exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<std::io::Error>().is_some() {
        exit_code::IO_ERROR
    } else if let Some(pe) = error.downcast_ref::<PreproError>() {
        match pe {
            PreproError::Io(_) => exit_code::IO_ERROR,
            PreproError::Fatal { .. } => exit_code::PREPROCESS_ERROR,
        }
    } else {
        exit_code::GENERAL_ERROR
    }
}

/// Run the main application logic
fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    let config = create_config(&cli)?;

    let mut pp = Preprocessor::new();
    pp.apply_config(&config)
        .context("failed to apply configuration")?;

    let output = if cli.input == PathBuf::from("-") {
        let source = read_stdin()?;
        pp.process(&source, "<stdin>")?
    } else {
        pp.process_file(&cli.input)?
    };

    write_output(&cli, &output)?;

    if cli.verbose {
        show_verbose_info(&cli);
    }

    Ok(())
}

/// Route library diagnostics through the logger, honoring -v / -q.
fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Create preprocessor configuration from CLI arguments
fn create_config(cli: &Cli) -> Result<PreproConfig> {
    let mut config = PreproConfig::new();
    for dir in &cli.include_dirs {
        if !dir.is_dir() {
            return Err(anyhow::anyhow!(
                "include directory does not exist: {}",
                dir.display()
            ));
        }
        config = config.with_include_path(dir);
    }
    for spec in &cli.defines {
        let (name, value) = parse_define(spec)?;
        config = config.with_define(name, value);
    }
    for name in &cli.undefines {
        config = config.with_undefine(name);
    }
    Ok(config)
}

/// Split a `-D NAME[=VALUE]` spec; a bare name defines it as `1`.
fn parse_define(spec: &str) -> Result<(&str, &str)> {
    let (name, value) = match spec.split_once('=') {
        Some((name, value)) => (name, value),
        None => (spec, "1"),
    };
    if name.is_empty() {
        return Err(anyhow::anyhow!("empty macro name in -D {spec}"));
    }
    Ok((name, value))
}

/// Read input from stdin
fn read_stdin() -> Result<String> {
    use std::io::Read;
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Write output to file or stdout
fn write_output(cli: &Cli, content: &str) -> Result<()> {
    match &cli.output {
        Some(output_path) if output_path != &PathBuf::from("-") => {
            std::fs::write(output_path, content).with_context(|| {
                format!("Failed to write to output file: {}", output_path.display())
            })?;
        }
        _ => {
            print!("{content}");
        }
    }
    Ok(())
}

/// Log a summary of what was preprocessed; visible under -v.
fn show_verbose_info(cli: &Cli) {
    let input_display = format_path(&cli.input, "stdin");
    let output_display = cli
        .output
        .as_ref()
        .map_or("stdout".to_string(), |p| format_path(p, "stdout"));
    log::info!("preprocessed {input_display} -> {output_display}");
    if !cli.include_dirs.is_empty() {
        log::info!("include directories ({}):", cli.include_dirs.len());
        for dir in &cli.include_dirs {
            log::info!("  {}", dir.display());
        }
    }
    if !cli.defines.is_empty() {
        log::info!("predefined macros ({}):", cli.defines.len());
        for def in &cli.defines {
            log::info!("  {def}");
        }
    }
}

/// Format a path for display, substituting `label` for '-'
fn format_path(path: &PathBuf, label: &str) -> String {
    if path == &PathBuf::from("-") {
        label.to_string()
    } else {
        path.display().to_string()
    }
}
