// Test doubles for the engine: a recording chat platform and fight fixtures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};

use crate::chat::{
    ChannelId, ChatError, ChatPlatform, InboundMessage, MessageId, OutgoingMessage, UserId,
};
use crate::db::{Database, DocumentStore};
use crate::points::PointLedger;

use super::config::{DamageRange, FightConfig};
use super::content::{ContentPool, Question};
use super::server::{BossFightServer, FightContext};

pub(crate) const CHANNEL: ChannelId = 500;

/// Records everything the engine does to the chat platform.
pub(crate) struct MockChat {
    sent: Mutex<Vec<(ChannelId, OutgoingMessage)>>,
    permissions: Mutex<Vec<(ChannelId, bool)>>,
    reactions: Mutex<Vec<(MessageId, &'static str)>>,
    outgoing: broadcast::Sender<OutgoingMessage>,
    deny_permissions: AtomicBool,
    panic_on: Mutex<Option<String>>,
}

impl MockChat {
    pub(crate) fn new() -> Self {
        let (outgoing, _) = broadcast::channel(1024);
        Self {
            sent: Mutex::new(Vec::new()),
            permissions: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            outgoing,
            deny_permissions: AtomicBool::new(false),
            panic_on: Mutex::new(None),
        }
    }

    /// Live feed of messages posted by the engine.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<OutgoingMessage> {
        self.outgoing.subscribe()
    }

    pub(crate) fn headlines(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.headline().to_string())
            .collect()
    }

    pub(crate) fn permissions(&self) -> Vec<(ChannelId, bool)> {
        self.permissions.lock().unwrap().clone()
    }

    pub(crate) fn reactions(&self) -> Vec<(MessageId, &'static str)> {
        self.reactions.lock().unwrap().clone()
    }

    /// Make every permission change fail as if the bot lacked the right.
    pub(crate) fn deny_permissions(&self) {
        self.deny_permissions.store(true, Ordering::Relaxed);
    }

    /// Panic inside `send` when a message with this headline is posted.
    pub(crate) fn panic_on(&self, headline: &str) {
        *self.panic_on.lock().unwrap() = Some(headline.to_string());
    }
}

impl ChatPlatform for MockChat {
    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> Result<(), ChatError> {
        let trap = self.panic_on.lock().unwrap().clone();
        if trap.as_deref() == Some(message.headline()) {
            panic!("chat platform exploded on {:?}", message.headline());
        }
        self.sent.lock().unwrap().push((channel, message.clone()));
        let _ = self.outgoing.send(message);
        Ok(())
    }

    async fn set_send_permission(&self, channel: ChannelId, allowed: bool) -> Result<(), ChatError> {
        if self.deny_permissions.load(Ordering::Relaxed) {
            return Err(ChatError::PermissionDenied);
        }
        self.permissions.lock().unwrap().push((channel, allowed));
        Ok(())
    }

    async fn react(
        &self,
        _channel: ChannelId,
        message: MessageId,
        emoji: &'static str,
    ) -> Result<(), ChatError> {
        self.reactions.lock().unwrap().push((message, emoji));
        Ok(())
    }

    fn resolve_mention(&self, user: UserId) -> Option<String> {
        Some(format!("player{user}"))
    }
}

pub(crate) type TestServer = BossFightServer<MockChat, Database>;

pub(crate) fn fixed(value: i64) -> DamageRange {
    DamageRange::new(value, value)
}

/// One question and a few words, so tests know what to answer.
pub(crate) fn test_content() -> ContentPool {
    ContentPool::new(
        vec![Question::new("Brightest star in Virgo?", &["Spica"])],
        vec!["nebula".to_string(), "comet".to_string(), "aurora".to_string()],
    )
    .unwrap()
}

/// Keep the runtime busy while `fut` runs so a paused clock cannot auto-advance
/// past sqlx's acquire timeout while SQLite works on its own thread.
pub(crate) async fn without_auto_advance<F: std::future::Future>(fut: F) -> F::Output {
    let done = Arc::new(AtomicBool::new(false));
    let spinner = tokio::spawn({
        let done = done.clone();
        async move {
            while !done.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        }
    });
    let output = fut.await;
    done.store(true, Ordering::SeqCst);
    let _ = spinner.await;
    output
}

pub(crate) async fn test_server(mut config: FightConfig) -> Arc<TestServer> {
    if config.rng_seed.is_none() {
        config.rng_seed = Some(42);
    }
    let store = without_auto_advance(Database::new("sqlite::memory:"))
        .await
        .unwrap();
    Arc::new(BossFightServer::new(
        Arc::new(MockChat::new()),
        Arc::new(PointLedger::new(store)),
        config,
        test_content(),
    ))
}

pub(crate) fn message(id: MessageId, channel: ChannelId, author: UserId, content: &str) -> InboundMessage {
    InboundMessage {
        message_id: id,
        channel_id: channel,
        author_id: author,
        content: content.to_string(),
        is_bot: false,
    }
}

/// Embed description, or the text itself for plain messages.
pub(crate) fn description(message: &OutgoingMessage) -> &str {
    match message {
        OutgoingMessage::Text { content } => content,
        OutgoingMessage::Embed { embed } => &embed.description,
    }
}

impl<C: ChatPlatform, S: DocumentStore> BossFightServer<C, S> {
    /// Open a fight with `players` registered, without launching the turn engine.
    pub(crate) fn open_fight(&self, channel: ChannelId, players: &[UserId]) -> FightContext {
        let mut state = self.state();
        let fight_id = state.begin(channel, self.config.boss_start_hp);
        for &player in players {
            state
                .register(channel, player, self.config.player_start_hp)
                .unwrap();
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.cancel_tx.lock().unwrap() = Some(cancel_tx);
        FightContext {
            fight_id,
            channel,
            cancel: cancel_rx,
        }
    }
}
