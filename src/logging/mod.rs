//! Structured logging module using tracing
//!
//! Console output goes to stderr; an optional file layer (no ANSI) appends to
//! the log file from [`crate::config::Config::log_file_path`].

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ellipse a string for display: first half + "..." + last half.
/// If `s` has ≤ `max_len` chars, returns `s` unchanged.
pub fn ellipse(s: &str, max_len: usize) -> String {
    const SEP: &str = "...";
    let sep_len = 3;
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    if n <= max_len || max_len <= sep_len {
        return s.to_string();
    }
    let first_count = (max_len - sep_len) / 2;
    let last_count = (max_len - sep_len) - first_count;
    let first: String = chars[..first_count].iter().collect();
    let last: String = chars[n - last_count..].iter().collect();
    format!("{}{}{}", first, SEP, last)
}

/// Preview of an id list for log lines: the first `shown` ids, then a count of the rest.
pub fn preview_ids(ids: &[String], shown: usize) -> String {
    let head: Vec<String> = ids.iter().take(shown).map(|id| ellipse(id, 24)).collect();
    if ids.len() > shown {
        format!("[{}, ... +{} more]", head.join(", "), ids.len() - shown)
    } else {
        format!("[{}]", head.join(", "))
    }
}

fn filter_for(verbosity: u8) -> &'static str {
    // 0: info for this crate only. -v: debug. -vv: trace. -vvv: trace everywhere.
    match verbosity {
        0 => "warn,node_alerts=info",
        1 => "warn,node_alerts=debug",
        2 => "warn,node_alerts=trace",
        _ => "trace",
    }
}

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG`, when set, wins over the `-v` count.
pub fn init_tracing(verbosity: u8, log_file_path: Option<PathBuf>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file = log_file_path.and_then(|log_path| {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
    });

    match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_target(false)
                .with_ansi(false);
            registry.with(console_layer).with(file_layer).init();
        }
        // Console only if the file could not be opened
        None => registry.with(console_layer).init(),
    }
}
