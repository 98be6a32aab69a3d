//! Discord configuration.
//!
//! Token is resolved (in order) from: DISCORD_BOT_TOKEN env, `.config.env` in
//! the current directory, `.config.env` in the base directory. Without a token
//! notifications are only logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::channels::{DiscordNotifier, LogNotifier, Notifier};
use crate::config::Config;

const TOKEN_KEY: &str = "DISCORD_BOT_TOKEN";

/// Read the token from a .config.env-style file (`DISCORD_BOT_TOKEN=...`).
fn token_from_config_env_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let token = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with(TOKEN_KEY) && l[TOKEN_KEY.len()..].trim_start().starts_with('='))
        .and_then(|l| l.split_once('='))
        .map(|(_, v)| v.trim().trim_matches('"').to_string());
    token.filter(|t| !t.is_empty())
}

fn resolve_token<F>(env: F, files: &[PathBuf]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(t) = env(TOKEN_KEY).map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        info!("Discord: Token from {} env", TOKEN_KEY);
        return Some(t);
    }
    for path in files {
        if !path.is_file() {
            continue;
        }
        if let Some(t) = token_from_config_env_file(path) {
            info!("Discord: Token from {:?}", path);
            return Some(t);
        }
        debug!("Discord: {:?} has no {}", path, TOKEN_KEY);
    }
    None
}

/// Get the bot token from the environment or a .config.env file.
pub fn get_discord_token() -> Option<String> {
    let mut files = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        files.push(cwd.join(".config.env"));
    }
    files.push(Config::base_dir().join(".config.env"));
    resolve_token(|key| std::env::var(key).ok(), &files)
}

/// Discord notifier when a token is configured, log-only otherwise.
pub fn notifier_from_env() -> Arc<dyn Notifier> {
    match get_discord_token() {
        Some(token) => Arc::new(DiscordNotifier::new(&token)),
        None => {
            warn!("Discord: No token (env or .config.env), notifications will only be logged");
            Arc::new(LogNotifier)
        }
    }
}
