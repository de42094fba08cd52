//! callmap - Pull-request diff viewer with caller/callee sidebars
//!
//! Shows the diff of a pull request with, next to every displayed line, the
//! places that call into it and the declarations it calls, as reported by a
//! review backend. Reviews can also be built offline from a diff and a file of
//! call facts, or from a local git repository.

mod align;
mod annotate;
mod calls;
mod client;
mod config;
mod diff;
mod export;
mod index;
mod poll;
mod popup;
mod session;
mod storage;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::calls::load_calls;
use crate::client::{GitHubClient, HttpBackend};
use crate::config::Config;
use crate::diff::{find_repo_root, DiffEngine, DiffMode};
use crate::export::{export, ExportFormat};
use crate::poll::CancelToken;
use crate::popup::LocalDetails;
use crate::session::{LoadOptions, ReviewSession, Services};
use crate::storage::Storage;

#[derive(Parser)]
#[command(name = "callmap")]
#[command(about = "Pull-request diff viewer with caller/callee sidebars")]
#[command(version)]
struct Cli {
    /// Review backend URL (overrides the config file)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse a pull request interactively
    View {
        /// GitHub pull request URL (prompted for when omitted)
        pr_url: Option<String>,

        /// Ignore cached calls
        #[arg(long)]
        refresh: bool,
    },

    /// Print the call map of a pull request
    Review {
        /// GitHub pull request URL
        pr_url: String,

        /// Export format: markdown (md) or json
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Ignore cached calls
        #[arg(long)]
        refresh: bool,
    },

    /// Align call facts with a diff file, without a backend
    Align {
        /// Unified diff file
        #[arg(short, long)]
        diff: PathBuf,

        /// Call facts: JSON array, backend response, or extractor output
        #[arg(short, long)]
        calls: PathBuf,

        /// Export format: markdown (md) or json
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Browse a diff of the current git repository
    Local {
        /// Base revision (default: working tree changes)
        from: Option<String>,

        /// Target revision
        #[arg(default_value = "HEAD")]
        to: String,

        /// Compare the index with HEAD instead
        #[arg(long, conflicts_with = "from")]
        staged: bool,

        /// Call facts for the diff
        #[arg(short, long)]
        calls: PathBuf,

        /// Print instead of opening the viewer: markdown (md) or json
        #[arg(short, long)]
        format: Option<String>,

        /// Output file (implies printing)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage cached method calls
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached pull requests
    List,
    /// Remove every cached pull request
    Clear,
    /// Remove one pull request
    Remove {
        /// GitHub pull request URL
        pr_url: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let interactive = matches!(
        cli.command,
        Commands::View { .. }
            | Commands::Local {
                format: None,
                output: None,
                ..
            }
    );
    init_logging(cli.verbose, interactive)?;

    let backend = cli.backend;

    match cli.command {
        Commands::View { pr_url, refresh } => {
            let config = load_config(backend)?;
            tui::run(config, tui::Start::PullRequest { url: pr_url, refresh })?;
        }
        Commands::Review {
            pr_url,
            format,
            output,
            refresh,
        } => {
            cmd_review(&load_config(backend)?, &pr_url, &format, output, refresh)?;
        }
        Commands::Align {
            diff,
            calls,
            format,
            output,
        } => {
            cmd_align(&load_config(backend)?, &diff, &calls, &format, output)?;
        }
        Commands::Local {
            from,
            to,
            staged,
            calls,
            format,
            output,
        } => {
            let mode = match (from, staged) {
                (Some(from), _) => DiffMode::Commits { from, to },
                (None, true) => DiffMode::Staged,
                (None, false) => DiffMode::Unstaged,
            };
            cmd_local(load_config(backend)?, mode, &calls, format, output)?;
        }
        Commands::Cache { action } => {
            cmd_cache(action)?;
        }
        // Init must work even when the existing file does not parse
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            let path = Config::create_default()?;
            println!("Config written to {}", path.display());
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            cmd_config_show(&load_config(backend)?)?;
        }
    }

    Ok(())
}

/// Config file merged with the command line and `GITHUB_TOKEN`
fn load_config(backend: Option<String>) -> Result<Config> {
    Ok(Config::load()?.with_overrides(backend, std::env::var("GITHUB_TOKEN").ok()))
}

/// Logs go to stderr, or to a file while the viewer owns the terminal
fn init_logging(verbose: bool, to_file: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if to_file {
        let path = storage::data_dir()?.join("callmap.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

fn parse_format(format: &str) -> Result<ExportFormat> {
    ExportFormat::from_str(format).context("Invalid format. Use: markdown (md) or json")
}

fn write_output(content: &str, output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
        println!("Exported to {}", path.display());
    } else {
        print!("{}", content);
    }
    Ok(())
}

fn read_calls(path: &Path) -> Result<Vec<calls::MethodCall>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    load_calls(&text)
}

fn cmd_review(
    config: &Config,
    pr_url: &str,
    format: &str,
    output: Option<PathBuf>,
    refresh: bool,
) -> Result<()> {
    let export_format = parse_format(format)?;

    let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout_secs);
    let diffs = GitHubClient::new(config.github_api_url.clone(), config.request_timeout_secs)
        .with_token(config.github_token.clone());
    let cache = Storage::open_default()?;
    let services = Services {
        backend: &backend,
        diffs: &diffs,
        cache: Some(&cache),
    };
    let options = LoadOptions {
        policy: config.retry_policy(),
        refresh,
    };

    let session = ReviewSession::load(pr_url, services, options, &CancelToken::new(), |stage| {
        info!(%stage, "load progress")
    })?;

    let content = export(&session, export_format, config.label_widths())?;
    write_output(&content, output)
}

fn cmd_align(
    config: &Config,
    diff: &Path,
    calls: &Path,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let export_format = parse_format(format)?;
    let diff_text = std::fs::read_to_string(diff)
        .with_context(|| format!("Failed to read {}", diff.display()))?;

    let label = diff
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| diff.display().to_string());
    let session = ReviewSession::from_parts(&diff_text, read_calls(calls)?).with_label(label);

    let content = export(&session, export_format, config.label_widths())?;
    write_output(&content, output)
}

fn cmd_local(
    config: Config,
    mode: DiffMode,
    calls: &Path,
    format: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let repo_path = find_repo_root(&cwd)?;
    let engine = DiffEngine::new(repo_path, config.context_lines);

    let diff_text = engine.diff_text(&mode)?;
    if diff_text.trim().is_empty() {
        println!("No changes in {}", mode.label());
        return Ok(());
    }

    let session = ReviewSession::from_parts(&diff_text, read_calls(calls)?).with_label(mode.label());

    if format.is_some() || output.is_some() {
        let export_format = parse_format(format.as_deref().unwrap_or("markdown"))?;
        let content = export(&session, export_format, config.label_widths())?;
        return write_output(&content, output);
    }

    let details = Arc::new(LocalDetails::new(engine, mode));
    tui::run(config, tui::Start::Local { session, details })
}

fn cmd_cache(action: CacheAction) -> Result<()> {
    let storage = Storage::open_default()?;

    match action {
        CacheAction::List => {
            let reviews = storage.list_reviews()?;
            if reviews.is_empty() {
                println!("No cached reviews");
                return Ok(());
            }
            for review in reviews {
                println!(
                    "  {} review #{} {} call(s), fetched {}",
                    review.pr_url, review.review_id, review.call_count, review.fetched_at
                );
            }
        }
        CacheAction::Clear => {
            let count = storage.clear_all()?;
            println!("Cleared {} cached review(s)", count);
        }
        CacheAction::Remove { pr_url } => {
            if storage.remove(&pr_url)? {
                println!("Removed {}", pr_url);
            } else {
                println!("{} is not cached", pr_url);
            }
        }
    }

    Ok(())
}

fn cmd_config_show(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.github_token.is_some() {
        shown.github_token = Some("<set>".to_string());
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
