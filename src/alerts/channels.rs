//! Notification channel implementations

use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage};
use serenity::http::Http;
use serenity::model::id::UserId;
use serenity::model::Timestamp;
use std::sync::Arc;
use tracing::{debug, info};

use super::{NotificationIntent, NotificationKind};
use crate::logging::ellipse;

const FIRE_COLOUR: u32 = 0xaf3838;
const RESOLVE_COLOUR: u32 = 0x32b76c;
const FOOTER: &str = "Powered by www.dteam.tech \u{1F7E0}";
const THUMBNAIL_URL: &str = "https://raw.githubusercontent.com/DTEAMTECH/contributions/refs/heads/main/celestia/utils/da_layer_metrics.png";

/// Delivers one rendered notification to one user. Failures are reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_to_user(&self, intent: &NotificationIntent) -> Result<()>;

    fn name(&self) -> &str;
}

/// Discord direct messages through the REST API.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    fn embed(intent: &NotificationIntent) -> CreateEmbed {
        let colour = match intent.kind {
            NotificationKind::Fire => FIRE_COLOUR,
            NotificationKind::Resolve => RESOLVE_COLOUR,
        };
        CreateEmbed::new()
            .title(&intent.message.title)
            .description(&intent.message.text)
            .colour(colour)
            .thumbnail(THUMBNAIL_URL)
            .footer(CreateEmbedFooter::new(FOOTER))
            .timestamp(Timestamp::now())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_to_user(&self, intent: &NotificationIntent) -> Result<()> {
        let user_id: u64 = intent
            .user_id
            .parse()
            .with_context(|| format!("Invalid Discord user id {:?}", intent.user_id))?;
        anyhow::ensure!(user_id != 0, "Invalid Discord user id 0");
        let user = UserId::new(user_id);

        let channel = user
            .create_dm_channel(self.http.as_ref())
            .await
            .with_context(|| format!("Failed to open DM channel with {}", intent.user_id))?;
        channel
            .id
            .send_message(self.http.as_ref(), CreateMessage::new().embed(Self::embed(intent)))
            .await
            .with_context(|| format!("Failed to send DM to {}", intent.user_id))?;

        debug!(
            "Discord: sent {} for {} to user {}",
            intent.kind, intent.check, intent.user_id
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "Discord"
    }
}

/// Logs intents instead of sending them. Used when no bot token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_to_user(&self, intent: &NotificationIntent) -> Result<()> {
        info!(
            "Notify (log only): {} {} for user {}: {} | {}",
            intent.kind,
            intent.check,
            intent.user_id,
            intent.message.title,
            ellipse(&intent.message.text.replace('\n', " "), 160)
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "Log"
    }
}
