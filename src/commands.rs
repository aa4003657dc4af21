// Prefix commands: parsing and thin adapters onto the fight lifecycle.

use std::sync::Arc;

use crate::chat::{ChannelId, ChatPlatform, Embed, InboundMessage, OutgoingMessage};
use crate::db::DocumentStore;
use crate::engine::{BossFightServer, FightError, SessionSnapshot};

/// A recognised bossfight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Join,
    Status,
    Cancel,
}

impl Command {
    /// Parse `content` as a prefixed command. Anything after the command
    /// word is ignored.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        let word = rest.split_whitespace().next()?.to_lowercase();
        match word.as_str() {
            "bossstart" | "start-bossfight" => Some(Command::Start),
            "bossjoin" | "join-bossfight" => Some(Command::Join),
            "bossstatus" | "boss-status" => Some(Command::Status),
            "bosscancel" | "cancel-bossfight" => Some(Command::Cancel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start-bossfight",
            Command::Join => "join-bossfight",
            Command::Status => "boss-status",
            Command::Cancel => "cancel-bossfight",
        }
    }
}

/// Run `command` on behalf of the author of `msg`. Failures are replied to
/// in the invoking channel.
pub async fn dispatch<C: ChatPlatform, S: DocumentStore>(
    server: &Arc<BossFightServer<C, S>>,
    command: Command,
    msg: &InboundMessage,
    is_admin: bool,
) {
    tracing::debug!(
        command = command.name(),
        user_id = msg.author_id,
        channel_id = msg.channel_id,
        "Dispatching command"
    );

    let result = match command {
        Command::Start => server.start(msg.channel_id).await.map(|_| ()),
        Command::Join => server.register(msg.channel_id, msg.author_id).await,
        Command::Status => {
            let reply = status_reply(&server.status());
            reply_to(server.chat().as_ref(), msg.channel_id, reply).await;
            Ok(())
        }
        Command::Cancel if !is_admin => Err(FightError::PermissionDenied),
        Command::Cancel => server.cancel().await,
    };

    if let Err(e) = result {
        tracing::info!(command = command.name(), user_id = msg.author_id, "Command rejected: {e}");
        reply_to(server.chat().as_ref(), msg.channel_id, e.to_string()).await;
    }
}

fn status_reply(snapshot: &SessionSnapshot) -> OutgoingMessage {
    if !snapshot.active {
        return OutgoingMessage::text("No active bossfight.");
    }
    Embed::simple("Boss Status", "")
        .field("Boss HP", snapshot.boss_hp.to_string(), true)
        .field("Phase", snapshot.phase.to_string(), true)
        .field(
            "Registered",
            format!("{} ({} alive)", snapshot.registered, snapshot.alive),
            true,
        )
        .into()
}

async fn reply_to<C: ChatPlatform>(chat: &C, channel: ChannelId, reply: impl Into<OutgoingMessage>) {
    if let Err(e) = chat.send(channel, reply.into()).await {
        tracing::warn!(channel_id = channel, "Failed to send command reply: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::FightConfig;
    use crate::engine::test_support::{message, test_server, CHANNEL};

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Command::parse("b!", "b!bossstart"), Some(Command::Start));
        assert_eq!(Command::parse("b!", "b!start-bossfight"), Some(Command::Start));
        assert_eq!(Command::parse("b!", "b!BossJoin"), Some(Command::Join));
        assert_eq!(Command::parse("b!", "b!join-bossfight"), Some(Command::Join));
        assert_eq!(Command::parse("b!", "  b!boss-status now"), Some(Command::Status));
        assert_eq!(Command::parse("b!", "b!bosscancel"), Some(Command::Cancel));
        assert_eq!(Command::parse("b!", "b!cancel-bossfight"), Some(Command::Cancel));
    }

    #[test]
    fn test_parse_rejects_other_messages() {
        assert_eq!(Command::parse("b!", "hit"), None);
        assert_eq!(Command::parse("b!", "!bossstart"), None);
        assert_eq!(Command::parse("b!", "b!"), None);
        assert_eq!(Command::parse("b!", "b!shop"), None);
        assert_eq!(Command::parse("!", "!bossjoin"), Some(Command::Join));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_without_fight() {
        let server = test_server(FightConfig::default()).await;
        dispatch(&server, Command::Status, &message(1, CHANNEL, 7, "b!bossstatus"), false).await;
        assert_eq!(server.chat().headlines(), vec!["No active bossfight."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_join_and_status() {
        let server = test_server(FightConfig::default()).await;
        dispatch(&server, Command::Start, &message(1, CHANNEL, 7, "b!bossstart"), false).await;
        dispatch(&server, Command::Join, &message(2, CHANNEL, 7, "b!bossjoin"), false).await;
        dispatch(&server, Command::Join, &message(3, CHANNEL, 7, "b!bossjoin"), false).await;
        dispatch(&server, Command::Status, &message(4, CHANNEL, 8, "b!bossstatus"), false).await;

        let headlines = server.chat().headlines();
        assert_eq!(
            headlines,
            vec![
                "🔥 Bossfight Started!",
                "✅ Registered",
                "You're already registered for this bossfight.",
                "Boss Status",
            ]
        );
        assert_eq!(server.status().registered, 1);
        server.cancel().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_in_other_channel_is_rejected() {
        let server = test_server(FightConfig::default()).await;
        dispatch(&server, Command::Start, &message(1, CHANNEL, 7, "b!bossstart"), false).await;
        dispatch(&server, Command::Join, &message(2, CHANNEL + 1, 7, "b!bossjoin"), false).await;
        dispatch(&server, Command::Start, &message(3, CHANNEL + 1, 7, "b!bossstart"), false).await;

        let headlines = server.chat().headlines();
        assert_eq!(headlines[1], "No active bossfight in this channel.");
        assert_eq!(headlines[2], "A bossfight is already active in another channel.");
        server.cancel().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_requires_admin() {
        let server = test_server(FightConfig::default()).await;
        dispatch(&server, Command::Start, &message(1, CHANNEL, 7, "b!bossstart"), false).await;
        dispatch(&server, Command::Cancel, &message(2, CHANNEL, 7, "b!bosscancel"), false).await;
        assert!(server.status().active);
        assert_eq!(
            server.chat().headlines().last().map(String::as_str),
            Some("Only server managers can do that.")
        );

        dispatch(&server, Command::Cancel, &message(3, CHANNEL, 9, "b!bosscancel"), true).await;
        assert!(!server.status().active);
        assert_eq!(
            server.chat().headlines().last().map(String::as_str),
            Some("Bossfight cancelled by an admin.")
        );

        dispatch(&server, Command::Cancel, &message(4, CHANNEL, 9, "b!bosscancel"), true).await;
        assert_eq!(
            server.chat().headlines().last().map(String::as_str),
            Some("No active bossfight in this channel.")
        );
    }
}
