//! study-qa-shell: interactive chat loop. Questions go to a background worker;
//! the loop shows a typing indicator until the reply arrives.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};
use study_qa_client::config;
use study_qa_shell::commands;
use study_qa_shell::session::CLEARED_NOTICE;
use study_qa_shell::{worker, ChatSession, Submitted};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Extra wait beyond the HTTP timeout before giving up on a reply.
const REPLY_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "study-qa-shell", version, about = "Interactive study question assistant")]
struct Args {
    /// Config file (default: $STUDY_QA_CONFIG or ~/.study-qa/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging to stderr
    #[arg(long)]
    debug: bool,
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}: {}", context, err);
    process::exit(1);
}

fn wait_for_reply(session: &mut ChatSession, id: u64, limit: Duration, out: &mut impl Write) {
    let started = Instant::now();
    let mut dots = 0usize;
    loop {
        match session.next_reply(POLL_INTERVAL) {
            Ok(Some(delivered)) => {
                if dots > 0 {
                    let _ = writeln!(out);
                }
                let _ = writeln!(out, "{}", delivered.text);
                if delivered.id == id {
                    return;
                }
            }
            Ok(None) => {
                if started.elapsed() > limit {
                    session.abandon(id);
                    let _ = writeln!(out, "\nNo reply yet; giving up on that question. You can ask again.");
                    return;
                }
                let _ = write!(out, ".");
                let _ = out.flush();
                dots += 1;
            }
            Err(e) => fail("worker failed", e),
        }
    }
}

fn main() {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "warn" };
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

    let config_path = config::resolve_config_path(args.config.as_deref())
        .unwrap_or_else(|e| fail("unable to determine config path", e));
    let cfg = config::load_or_default(&config_path).unwrap_or_else(|e| {
        fail(
            &format!("failed to load config from {}", config_path.display()),
            e,
        )
    });

    // Missing credential is fatal before the first question.
    let service =
        study_qa_client::service_from_config(&cfg).unwrap_or_else(|e| fail("startup failed", e));
    let limit = cfg
        .timeout()
        .map(|t| t + REPLY_GRACE)
        .unwrap_or_else(|e| fail("invalid config", e));
    let settings = commands::render_settings(&cfg, &config_path.display().to_string());

    let handle = worker::spawn(service).unwrap_or_else(|e| fail("failed to start worker", e));
    let mut session = ChatSession::new(handle, settings);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "Study Q&A assistant. Type /help for commands.");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        let _ = write!(out, "> ");
        let _ = out.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => fail("failed to read input", e),
        }

        match session.submit(&line) {
            Ok(Submitted::Pending(id)) => wait_for_reply(&mut session, id, limit, &mut out),
            Ok(Submitted::Local(text)) => {
                let _ = writeln!(out, "{}", text);
            }
            Ok(Submitted::Cleared) => {
                let _ = writeln!(out, "{}", CLEARED_NOTICE);
            }
            Ok(Submitted::Nothing) => {}
            Ok(Submitted::Quit) => break,
            Err(e) => fail("worker failed", e),
        }
    }
    let _ = writeln!(out, "Goodbye.");
}
