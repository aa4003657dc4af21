// Chat-platform contract consumed by the bossfight engine.
//
// The platform connection itself lives outside this crate. The engine only
// needs to post messages, toggle send permission on a channel, acknowledge a
// message with a reaction, and turn a user id into something printable.

pub mod bridge;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;

/// Default embed colour (orange).
pub const COLOR_DEFAULT: u32 = 0xFF8800;
/// Colour used for the settlement summary.
pub const COLOR_RESULTS: u32 = 0x00FF88;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat bridge is not connected")]
    Disconnected,
    #[error("missing permission to modify channel")]
    PermissionDenied,
    #[error("failed to encode chat action: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A chat message delivered to the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Rich message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: DateTime<Utc>,
}

impl Embed {
    pub fn simple(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color: COLOR_DEFAULT,
            fields: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Text { content: String },
    Embed { embed: Embed },
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        OutgoingMessage::Text {
            content: content.into(),
        }
    }

    /// Title for embeds, full content for plain text.
    pub fn headline(&self) -> &str {
        match self {
            OutgoingMessage::Text { content } => content,
            OutgoingMessage::Embed { embed } => &embed.title,
        }
    }
}

impl From<String> for OutgoingMessage {
    fn from(content: String) -> Self {
        OutgoingMessage::Text { content }
    }
}

impl From<&str> for OutgoingMessage {
    fn from(content: &str) -> Self {
        OutgoingMessage::text(content)
    }
}

impl From<Embed> for OutgoingMessage {
    fn from(embed: Embed) -> Self {
        OutgoingMessage::Embed { embed }
    }
}

/// Narrow interface onto the hosted chat platform.
pub trait ChatPlatform: Send + Sync + 'static {
    /// Post a message to a channel.
    fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Allow or deny sending for the default role of a channel.
    fn set_send_permission(
        &self,
        channel: ChannelId,
        allowed: bool,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Acknowledge a message with an emoji reaction.
    fn react(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &'static str,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Display name for a user, if the platform knows one.
    fn resolve_mention(&self, user: UserId) -> Option<String>;
}
