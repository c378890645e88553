//! llmerge command-line tool.
//!
//! Provides subcommands for resolving conflicted files with an LLM
//! provider, scanning a working tree for unresolved conflicts, and
//! generating / validating configuration files.

mod discover;
mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL, Cell, ContentArrangement};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use llmerge_core::config::{AppConfig, LoggingConfig, ScanConfig};
use llmerge_core::{
    create_gateway, scan_conflicts, CancelToken, FileStatus, Pipeline, PipelineOptions,
    ProviderKind, ResolvedRegion,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// llmerge command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "llmerge",
    version,
    about = "Resolve git merge conflicts with an LLM"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults to
    /// ~/.config/llmerge/config.toml when that file exists.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve conflicted files with the configured provider.
    Resolve(ResolveArgs),

    /// List conflict regions without resolving anything.
    Scan {
        /// Files or directories to scan. Defaults to the current directory.
        paths: Vec<PathBuf>,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./llmerge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// List supported providers and their credential status.
    Providers,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Files or directories to resolve. When omitted, the working tree
    /// is scanned.
    paths: Vec<PathBuf>,

    /// Override the configured provider (google, groq, maritaca).
    #[arg(long)]
    provider: Option<String>,

    /// Override the configured model.
    #[arg(long)]
    model: Option<String>,

    /// Write resolutions back to the files in place.
    #[arg(short, long)]
    write: bool,

    /// Write resolved copies under this directory instead of in place.
    #[arg(long, value_name = "DIR", conflicts_with = "write")]
    output_dir: Option<PathBuf>,

    /// Skip the confirmation prompt for --write.
    #[arg(short = 'y', long)]
    yes: bool,

    /// Merge commit message, passed to the model as intent context.
    #[arg(short, long)]
    message: Option<String>,

    /// Override the configured concurrent-request limit.
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Write a JSON run report to this path.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Fail the exit status on partially resolved files too.
    #[arg(long)]
    strict: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Resolve and scan configure logging from the config file once it is
    // loaded; the bookkeeping commands get a minimal subscriber up front.
    if matches!(
        cli.command,
        Commands::Init { .. } | Commands::Validate | Commands::Providers
    ) {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("warn"))
            .with_target(false)
            .without_time()
            .init();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        Commands::Providers => cmd_providers(cli.config.as_deref()),
        _ => {
            // Resolve and scan need the full config
            let mut config = load_config(cli.config.as_deref())?;

            match cli.command {
                Commands::Resolve(mut args) => {
                    if let Some(provider) = args.provider.take() {
                        config.llm.provider = provider;
                    }
                    if let Some(model) = args.model.take() {
                        config.llm.model = Some(model);
                    }
                    config.validate().context("invalid configuration")?;

                    let _guard = init_logging(&config.logging, cli.verbose)?;
                    cmd_resolve(&config, args).await
                }
                Commands::Scan { paths } => {
                    let _guard = init_logging(&config.logging, cli.verbose)?;
                    cmd_scan(&config, paths)
                }
                _ => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config and logging helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_and_resolve(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => AppConfig::load_default().context("failed to load configuration"),
    }
}

fn init_logging(config: &LoggingConfig, verbose: u8) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(path) = &config.file {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .with_context(|| format!("log file path has no file name: {}", path.display()))?;
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        // Progress output owns stdout; diagnostics go to stderr.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        Ok(None)
    }
}

/// Expand the given paths into conflicted files: directories are scanned,
/// files are taken as-is. No paths means scanning the current directory.
fn gather_targets(paths: Vec<PathBuf>, scan: &ScanConfig) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        return discover::conflicted_files(Path::new("."), scan)
            .context("failed to scan for conflicted files");
    }

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                discover::conflicted_files(&path, scan)
                    .with_context(|| format!("failed to scan {}", path.display()))?,
            );
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_resolve(config: &AppConfig, args: ResolveArgs) -> Result<()> {
    let ResolveArgs {
        paths,
        write,
        output_dir,
        yes,
        message,
        max_concurrent,
        report,
        strict,
        ..
    } = args;

    let provider_config = config
        .provider_config()
        .context("invalid provider configuration")?;
    let provider = provider_config.provider.name().to_string();
    let model = provider_config.model.clone();

    let files = gather_targets(paths, &config.scan)?;
    if files.is_empty() {
        println!("No conflicted files found.");
        return Ok(());
    }

    // Read everything up front so a bad path fails before any request.
    let mut inputs = Vec::with_capacity(files.len());
    for path in &files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        inputs.push((path.display().to_string(), text));
    }

    println!(
        "{}",
        style::header(&format!("{} conflicted file(s):", files.len()))
    );
    for path in &files {
        println!("  {}", path.display());
    }
    println!();

    if write {
        if !yes {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Overwrite these files with resolutions from {}/{}?",
                    provider, model
                ))
                .default(false)
                .interact()
                .context("failed to read confirmation")?;
            if !confirmed {
                println!("Aborted.");
                return Ok(());
            }
        }
    } else if let Some(dir) = &output_dir {
        println!(
            "{}",
            style::dim(&format!("Resolved copies go to {}", dir.display()))
        );
    } else {
        println!(
            "{}",
            style::dim("Dry run: no files will be modified. Pass --write to apply.")
        );
    }

    // Ctrl-C stops new requests; regions already resolved are still applied.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let started_at = Utc::now();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(format!(
        "Resolving {} file(s) with {}/{}...",
        files.len(),
        provider,
        model
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut options = PipelineOptions::from(&config.pipeline);
    if let Some(limit) = max_concurrent {
        options.max_concurrent_units = limit;
    }
    options.commit_message = message;

    let gateway = create_gateway(&provider_config);
    let pipeline = Pipeline::new(gateway, options);
    let results = pipeline.resolve_files(inputs, &cancel).await;

    spinner.finish_and_clear();

    if write {
        for (path, result) in files.iter().zip(&results) {
            if result.is_modified() {
                std::fs::write(path, &result.patched_text)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
    } else if let Some(dir) = &output_dir {
        for (path, result) in files.iter().zip(&results) {
            if result.is_modified() {
                let dest = output_destination(dir, path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                std::fs::write(&dest, &result.patched_text)
                    .with_context(|| format!("failed to write {}", dest.display()))?;
            }
        }
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Regions", "Resolved", "Status"]);

    let mut failures = Vec::new();
    for result in &results {
        let status = match &result.status {
            FileStatus::FullyResolved if result.units.is_empty() => style::dim("no conflicts"),
            FileStatus::FullyResolved => style::success("resolved"),
            FileStatus::PartiallyResolved { .. } => style::warn(&result.status.to_string()),
            FileStatus::Failed { .. } => style::error(&result.status.to_string()),
        };
        table.add_row(vec![
            Cell::new(&result.file_path),
            Cell::new(result.units.len()),
            Cell::new(result.resolved_count()),
            Cell::new(status),
        ]);

        for (unit, region) in &result.units {
            if let ResolvedRegion::Failed { reason } = region {
                failures.push(format!(
                    "{}:{}: {}",
                    result.file_path, unit.start_line, reason
                ));
            }
        }
    }

    println!("{}", table);

    if !failures.is_empty() {
        println!();
        println!("{}", style::header("Unresolved regions:"));
        for line in &failures {
            println!("  {}", style::dim(line));
        }
    }

    let resolved: usize = results.iter().map(|r| r.resolved_count()).sum();
    let total: usize = results.iter().map(|r| r.units.len()).sum();

    println!();
    println!(
        "{} of {} region(s) resolved across {} file(s)",
        resolved,
        total,
        results.len()
    );
    if !write && output_dir.is_none() {
        println!(
            "{}",
            style::dim("Dry run: no files were modified. Pass --write to apply.")
        );
    }

    if let Some(path) = &report {
        let run_report = report::build_report(&provider, &model, started_at, &results);
        report::write_report(path, &run_report)?;
        println!("Run report written to {}", path.display());
    }

    if cancel.is_cancelled() {
        anyhow::bail!("run cancelled; pending regions were left unresolved");
    }
    let failed_files = results
        .iter()
        .filter(|r| matches!(r.status, FileStatus::Failed { .. }))
        .count();
    if failed_files > 0 {
        anyhow::bail!("{} file(s) failed", failed_files);
    }
    if strict {
        let partial_files = results
            .iter()
            .filter(|r| matches!(r.status, FileStatus::PartiallyResolved { .. }))
            .count();
        if partial_files > 0 {
            anyhow::bail!("{} file(s) only partially resolved", partial_files);
        }
    }

    Ok(())
}

fn cmd_scan(config: &AppConfig, paths: Vec<PathBuf>) -> Result<()> {
    let files = gather_targets(paths, &config.scan)?;
    if files.is_empty() {
        println!("No conflicted files found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Region", "Lines", "Labels", "Base"]);

    let mut total = 0;
    for path in &files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match scan_conflicts(&path.display().to_string(), &text) {
            Ok(units) if units.is_empty() => {
                table.add_row(vec![
                    Cell::new(path.display()),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new(style::dim("no conflicts")),
                    Cell::new("-"),
                ]);
            }
            Ok(units) => {
                total += units.len();
                for unit in &units {
                    let ours = if unit.ours_label.is_empty() {
                        "ours"
                    } else {
                        unit.ours_label.as_str()
                    };
                    let theirs = if unit.theirs_label.is_empty() {
                        "theirs"
                    } else {
                        unit.theirs_label.as_str()
                    };
                    let labels = format!("{} → {}", ours, theirs);
                    table.add_row(vec![
                        Cell::new(path.display()),
                        Cell::new(unit.index),
                        Cell::new(format!("{}-{}", unit.start_line, unit.end_line)),
                        Cell::new(labels),
                        Cell::new(if unit.base.is_some() { "yes" } else { "-" }),
                    ]);
                }
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(path.display()),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new(style::error(&e.to_string())),
                    Cell::new("-"),
                ]);
            }
        }
    }

    println!("{}", table);
    println!();
    println!("{} conflict region(s) in {} file(s)", total, files.len());

    Ok(())
}

fn cmd_init(output: &PathBuf) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, llmerge_core::config::default_template())
        .context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file and pick a provider (google, groq, maritaca)");
    println!("  2. Set the provider's API key (GOOGLE_API_KEY, GROQ_API_KEY, or MARITACA_API_KEY)");
    println!(
        "  3. Validate with: llmerge validate --config {}",
        output.display()
    );
    println!(
        "  4. Resolve conflicts: llmerge resolve --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = AppConfig::default_path()
                .context("could not determine the default config path")?;
            if !default.exists() {
                anyhow::bail!(
                    "no configuration file found at {}. Generate one with: llmerge init",
                    default.display()
                );
            }
            default
        }
    };

    println!("Validating configuration: {}", path.display());
    println!();

    let mut config = AppConfig::load_from_file(&path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let kind = config.provider_kind().context("invalid provider")?;

    println!();
    println!("Configuration summary:");
    println!("  Provider      : {}", kind);
    println!(
        "  Model         : {}",
        config.llm.model.as_deref().unwrap_or(kind.default_model())
    );
    for p in ProviderKind::ALL {
        let entry = config.providers.entry(p);
        println!(
            "  {:<14}: {}",
            format!("{} key", p),
            if entry.api_key.is_some() {
                "set"
            } else if p == kind {
                "NOT SET"
            } else {
                "not set"
            }
        );
    }
    println!("  Max units     : {}", config.pipeline.max_concurrent_units);
    println!("  Max files     : {}", config.pipeline.max_concurrent_files);
    println!("  Max retries   : {}", config.pipeline.max_retries);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_providers(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let configured = config.provider_kind().ok();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Provider", "Default model", "API key env", "Key"]);

    for kind in ProviderKind::ALL {
        let entry = config.providers.entry(kind);
        let name = if configured == Some(kind) {
            format!("{} (configured)", kind)
        } else {
            kind.to_string()
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(kind.default_model()),
            Cell::new(entry.key_env(kind)),
            Cell::new(if entry.api_key.is_some() {
                style::success("set")
            } else {
                style::dim("not set")
            }),
        ]);
    }

    println!("{}", table);

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Destination for a resolved copy under `--output-dir`: relative inputs
/// keep their directory structure, absolute inputs flatten to the file name.
fn output_destination(output_dir: &Path, source: &Path) -> PathBuf {
    let rel = source.strip_prefix(".").unwrap_or(source);
    if rel.is_absolute() {
        match rel.file_name() {
            Some(name) => output_dir.join(name),
            None => output_dir.to_path_buf(),
        }
    } else {
        output_dir.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_destination_keeps_relative_structure() {
        let dest = output_destination(Path::new("out"), Path::new("./src/a.rs"));
        assert_eq!(dest, Path::new("out/src/a.rs"));

        let dest = output_destination(Path::new("out"), Path::new("b.rs"));
        assert_eq!(dest, Path::new("out/b.rs"));
    }

    #[test]
    fn test_output_destination_flattens_absolute_paths() {
        let dest = output_destination(Path::new("out"), Path::new("/tmp/work/c.rs"));
        assert_eq!(dest, Path::new("out/c.rs"));
    }
}
