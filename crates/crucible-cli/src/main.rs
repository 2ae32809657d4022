//! Crucible CLI
//!
//! A command-line tool for running code through the crucible execution
//! engine: one-shot submissions, language listing, and config scaffolding.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crucible::{
    EXAMPLE_CONFIG, Engine, EngineConfig, ResourceLimits, SubmissionRequest, SubmissionStatus,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "A multi-language code execution engine")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: crucible.toml)
        #[arg(short, long, default_value = "crucible.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file through the engine and print the result
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language key (e.g. python, cpp, java)
        #[arg(short, long)]
        language: String,

        /// Input file fed to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// CPU time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Memory limit in KB
        #[arg(short, long)]
        memory_limit: Option<u64>,

        /// Arguments appended to the program invocation
        #[arg(short, long)]
        args: Option<String>,

        /// Options passed to the compile step
        #[arg(long)]
        compiler_options: Option<String>,
    },

    /// List available languages
    Languages,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        EngineConfig::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        EngineConfig::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            input,
            time_limit,
            memory_limit,
            args,
            compiler_options,
        } => {
            run_submission(
                config,
                &source,
                &language,
                input.as_deref(),
                time_limit,
                memory_limit,
                args,
                compiler_options,
            )
            .await
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_submission(
    config: EngineConfig,
    source: &PathBuf,
    language: &str,
    input: Option<&std::path::Path>,
    time_limit: Option<f64>,
    memory_limit: Option<u64>,
    args: Option<String>,
    compiler_options: Option<String>,
) -> Result<()> {
    let source_code = tokio::fs::read(source)
        .await
        .context("failed to read source file")?;

    let stdin = if let Some(input_path) = input {
        tokio::fs::read(input_path)
            .await
            .context("failed to read input file")?
    } else {
        Vec::new()
    };

    // Only explicitly-given limits go into the request so language
    // defaults still apply to the rest
    let limits = ResourceLimits {
        cpu_time_limit: time_limit,
        memory_limit,
        ..ResourceLimits::none()
    };

    info!(language, "submitting program");
    let engine = Engine::start(config).await;

    let record = engine
        .submit_wait(SubmissionRequest {
            language: language.to_owned(),
            source_code,
            stdin,
            command_line_arguments: args,
            compiler_options,
            limits,
            ..Default::default()
        })
        .await
        .context("submission failed")?;

    if let Some(ref compile_output) = record.compile_output
        && record.status == SubmissionStatus::CompilationError
    {
        eprintln!("Compilation failed:");
        eprintln!("{compile_output}");
        std::process::exit(1);
    }

    if let Some(ref stdout) = record.stdout {
        print!("{}", String::from_utf8_lossy(stdout));
    }
    if let Some(ref stderr) = record.stderr {
        let err = String::from_utf8_lossy(stderr);
        if !err.is_empty() {
            eprint!("{err}");
        }
    }

    // Execution summary via tracing (stderr), keeping stdout clean for piping
    info!(
        status = %record.status,
        time = format_args!("{:.3}s", record.time.unwrap_or(0.0)),
        wall_time = format_args!("{:.3}s", record.wall_time.unwrap_or(0.0)),
        memory = format_args!("{} KB", record.memory.unwrap_or(0)),
        exit_code = record.exit_code,
        exit_signal = record.exit_signal,
        "execution result"
    );

    if let Some(ref message) = record.message {
        info!(message, "final reason");
    }

    match record.status {
        SubmissionStatus::Accepted => Ok(()),
        _ => std::process::exit(record.exit_code.unwrap_or(1)),
    }
}

fn list_languages(config: &EngineConfig) {
    println!("Available languages:\n");

    let mut languages: Vec<_> = config.languages.iter().collect();
    languages.sort_by_key(|(key, _)| *key);

    for (key, lang) in languages {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!("  {:<15} {} ({})", key, lang.name, lang_type);
    }
}

fn show_config(config: &EngineConfig) {
    println!("Engine:");
    println!("  Max concurrent: {}", config.max_concurrent);
    println!("  Max queue size: {}", config.max_queue_size);
    println!("  Workspace root: {}", config.workspace_root().display());
    println!("  Callback timeout: {} ms", config.callback_timeout_ms);
    println!(
        "  Network default: {}",
        if config.enable_network_default {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();
    println!("Default resource limits:");
    println!("  CPU time limit: {:?} s", config.default_limits.cpu_time_limit);
    println!("  CPU extra time: {:?} s", config.default_limits.cpu_extra_time);
    println!(
        "  Wall time limit: {:?} s",
        config.default_limits.wall_time_limit
    );
    println!("  Memory limit: {:?} KB", config.default_limits.memory_limit);
    println!("  Stack limit: {:?} KB", config.default_limits.stack_limit);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!(
        "  Max file size: {:?} KB",
        config.default_limits.max_file_size
    );
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
