//! Input parsing and reply rendering for the chat shell.
//! Plain functions, kept free of I/O so they can be tested directly.

use study_qa_client::{Answer, CacheStats, Config, QueryError, ServiceStatus, Source};

pub const CACHE_SUFFIX: &str = "(Retrieved from cache)";

pub const HELP: &str = "\
Type a question and press Enter.

Commands:
  /stats        answer cache statistics
  /clear-cache  delete every cached answer
  /status       check the answer service
  /clear        clear the conversation
  /settings     show the active settings
  /help         this message
  /quit         exit

Start a question with // to send it with a leading /.";

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Stats,
    ClearCache,
    Status,
    ClearConversation,
    Settings,
    Help,
    Quit,
}

/// Parse an input line. Blank input is `Ok(None)`; an unknown `/command` is an error.
/// Questions are passed on exactly as typed, minus the line terminator.
///
/// Only a single `/word` is a command, so `/etc/hosts format?` is a question.
/// A leading `//` sends the rest with one `/`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.starts_with("//") {
        return Ok(Some(Command::Ask(line.replacen("//", "/", 1))));
    }
    let Some(name) = trimmed.strip_prefix('/') else {
        return Ok(Some(Command::Ask(line.to_string())));
    };
    if name.contains(|c: char| c.is_whitespace() || c == '/') {
        return Ok(Some(Command::Ask(line.to_string())));
    }
    let cmd = match name.to_ascii_lowercase().as_str() {
        "stats" => Command::Stats,
        "clear-cache" => Command::ClearCache,
        "status" => Command::Status,
        "clear" => Command::ClearConversation,
        "settings" => Command::Settings,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("Unknown command: /{} (try /help)", other)),
    };
    Ok(Some(cmd))
}

pub fn render_answer(answer: &Answer) -> String {
    match answer.source {
        Source::Live => answer.text.clone(),
        Source::Cache => format!("{}\n{}", answer.text, CACHE_SUFFIX),
    }
}

pub fn render_error(err: &QueryError) -> String {
    if err.is_retryable() {
        format!("Error: {}. You can try again.", err)
    } else {
        format!("Error: {}", err)
    }
}

pub fn render_stats(stats: &CacheStats) -> String {
    let mut out = format!("Cache statistics:\n  Total entries: {}", stats.entry_count);
    if let Some(bytes) = stats.db_size_bytes {
        out.push_str(&format!(
            "\n  Database size: {:.2} MB",
            bytes as f64 / (1024.0 * 1024.0)
        ));
    }
    if let Some(newest) = stats.newest {
        out.push_str(&format!(
            "\n  Last stored: {}",
            newest.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    if !stats.recent_questions.is_empty() {
        out.push_str("\n  Recent questions:");
        for q in &stats.recent_questions {
            out.push_str(&format!("\n  - {}", shorten(q, 50)));
        }
    }
    out
}

pub fn render_cleared(removed: usize) -> String {
    format!("Removed {} entries from the answer cache.", removed)
}

pub fn render_status(status: &ServiceStatus) -> String {
    match status.model_available {
        Some(true) => format!(
            "The answer service is online; model '{}' is available.",
            status.model
        ),
        Some(false) => format!(
            "The answer service is online, but model '{}' is not in its model list.",
            status.model
        ),
        None => "The answer service is online.".to_string(),
    }
}

/// Human-readable settings with the API key masked.
pub fn render_settings(cfg: &Config, config_path: &str) -> String {
    let key = match cfg.api_key() {
        Ok(key) => mask_key(&key),
        Err(_) => "(not set)".to_string(),
    };
    let cache = if cfg.cache_enabled() {
        cfg.cache_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|e| format!("(unavailable: {})", e))
    } else {
        "disabled".to_string()
    };
    let timeout = cfg
        .timeout()
        .map(|t| format!("{}s", t.as_secs()))
        .unwrap_or_else(|e| e.to_string());
    format!(
        "Settings ({}):\n  API URL: {}\n  Model: {}\n  API key: {}\n  Timeout: {}\n  Cache: {}",
        config_path,
        cfg.base_url(),
        cfg.model(),
        key,
        timeout,
        cache
    )
}

fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = key.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}
