//! study-qa: one-shot CLI for the cached student Q&A client.
//! Reads config, answers a question (cache first, then the Gemini API), and
//! manages the local answer cache.

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use study_qa_client::{config, open_cache, CacheStore, Config, GeminiClient, QueryService, Source};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "study-qa", version, about = "Ask study questions, with a local answer cache")]
struct Args {
    /// Config file (default: $STUDY_QA_CONFIG or ~/.study-qa/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question (argument, or first line of stdin)
    Ask { question: Option<String> },
    /// Show answer cache statistics
    Stats,
    /// Delete every cached answer
    Clear,
    /// Check that the answer service is reachable and serves the configured model
    Status,
    /// Update the config file
    Configure {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        cache_path: Option<PathBuf>,
        /// Enable or disable the answer cache
        #[arg(long)]
        cache_enabled: Option<bool>,
    },
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}: {}", context, err);
    process::exit(1);
}

fn read_question(arg: Option<String>) -> String {
    if let Some(q) = arg {
        return q;
    }
    let mut line = String::new();
    if let Err(e) = io::stdin().lock().read_line(&mut line) {
        fail("failed to read stdin", e);
    }
    // Only the line terminator is stripped; the cache key is the question as typed.
    line.trim_end_matches(&['\r', '\n'][..]).to_string()
}

fn open_store(cfg: &Config) -> CacheStore {
    match open_cache(cfg) {
        Ok(Some(store)) => store,
        Ok(None) => fail("cannot use answer cache", "the answer cache is disabled"),
        Err(e) => fail("cannot open answer cache", e),
    }
}

fn configure(path: &Path, mut cfg: Config, update: Command) {
    if let Command::Configure {
        api_key,
        model,
        base_url,
        timeout_secs,
        cache_path,
        cache_enabled,
    } = update
    {
        cfg.api.api_key = api_key.or(cfg.api.api_key);
        cfg.api.model = model.or(cfg.api.model);
        cfg.api.base_url = base_url.or(cfg.api.base_url);
        cfg.api.timeout_secs = timeout_secs.or(cfg.api.timeout_secs);
        cfg.cache.path = cache_path.or(cfg.cache.path);
        cfg.cache.enabled = cache_enabled.or(cfg.cache.enabled);
    }
    if let Err(e) = cfg.timeout() {
        fail("refusing to save config", e);
    }
    if let Err(e) = config::save(path, &cfg) {
        fail(&format!("failed to save config to {}", path.display()), e);
    }
    println!("Saved {}", path.display());
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let config_path = config::resolve_config_path(args.config.as_deref())
        .unwrap_or_else(|e| fail("unable to determine config path", e));
    let cfg = config::load_or_default(&config_path).unwrap_or_else(|e| {
        fail(
            &format!("failed to load config from {}", config_path.display()),
            e,
        )
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Ask { question } => {
            let service = study_qa_client::service_from_config(&cfg)
                .unwrap_or_else(|e| fail("startup failed", e));
            let question = read_question(question);

            match service.answer(&question).await {
                Ok(answer) => {
                    let _ = writeln!(out, "{}", answer.text);
                    if answer.source == Source::Cache {
                        eprintln!("(from cache)");
                    }
                }
                Err(e) => fail("query failed", e),
            }
        }
        Command::Stats => {
            let stats = open_store(&cfg)
                .stats()
                .unwrap_or_else(|e| fail("cannot read cache statistics", e));
            let _ = writeln!(out, "Total entries: {}", stats.entry_count);
            if let Some(bytes) = stats.db_size_bytes {
                let _ = writeln!(out, "Database size: {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
            }
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                let _ = writeln!(out, "Oldest entry: {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
                let _ = writeln!(out, "Newest entry: {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            if !stats.recent_questions.is_empty() {
                let _ = writeln!(out, "\nRecent questions:");
                for q in &stats.recent_questions {
                    let _ = writeln!(out, "  - {}", q);
                }
            }
        }
        Command::Clear => {
            let removed = open_store(&cfg)
                .clear()
                .unwrap_or_else(|e| fail("cannot clear cache", e));
            let _ = writeln!(out, "Removed {} entries from the answer cache.", removed);
        }
        Command::Status => {
            let client =
                GeminiClient::from_config(&cfg).unwrap_or_else(|e| fail("startup failed", e));
            let service = QueryService::new(None, Box::new(client));
            match service.check_service().await {
                Ok(status) => {
                    let _ = writeln!(
                        out,
                        "Answer service is online ({} models listed).",
                        status.models_listed
                    );
                    if status.model_available == Some(false) {
                        fail(
                            "configured model is not available",
                            format!("'{}' was not in the model listing", status.model),
                        );
                    }
                    let _ = writeln!(out, "Model '{}' is available.", status.model);
                }
                Err(e) => fail("answer service check failed", e),
            }
        }
        update @ Command::Configure { .. } => configure(&config_path, cfg, update),
    }
    let _ = out.flush();
}
