// WebSocket bridge: outbound chat actions are broadcast as JSON to whichever
// bridge process is connected on /ws/bridge, which performs them against the
// real chat platform.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use super::{ChannelId, ChatError, ChatPlatform, MessageId, OutgoingMessage, UserId};
use crate::metrics;

/// Actions the bridge must carry out on the platform.
#[derive(Clone, Serialize, Debug)]
#[serde(tag = "type")]
pub enum ChatAction {
    #[serde(rename = "send_message")]
    SendMessage {
        channel_id: ChannelId,
        message: OutgoingMessage,
    },
    #[serde(rename = "set_send_permission")]
    SetSendPermission { channel_id: ChannelId, allowed: bool },
    #[serde(rename = "add_reaction")]
    AddReaction {
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: String,
    },
}

/// [`ChatPlatform`] implementation backed by a broadcast channel. Actions are
/// fire-and-forget: the only failure reported is a missing bridge.
pub struct BridgeChat {
    tx: broadcast::Sender<String>,
    names: Mutex<HashMap<UserId, String>>,
}

impl BridgeChat {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            names: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to outbound actions. Returns a receiver that yields JSON strings.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of connected bridge sockets.
    pub fn bridge_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Remember a display name seen on an inbound event.
    pub fn remember_name(&self, user: UserId, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, name.to_string());
    }

    fn publish(&self, action: ChatAction) -> Result<(), ChatError> {
        let json = serde_json::to_string(&action)?;
        self.tx
            .send(json)
            .map_err(|_| ChatError::Disconnected)?;
        metrics::BRIDGE_MESSAGES_SENT_TOTAL.inc();
        Ok(())
    }
}

impl Default for BridgeChat {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatPlatform for BridgeChat {
    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> Result<(), ChatError> {
        self.publish(ChatAction::SendMessage {
            channel_id: channel,
            message,
        })
    }

    async fn set_send_permission(&self, channel: ChannelId, allowed: bool) -> Result<(), ChatError> {
        self.publish(ChatAction::SetSendPermission {
            channel_id: channel,
            allowed,
        })
    }

    async fn react(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &'static str,
    ) -> Result<(), ChatError> {
        self.publish(ChatAction::AddReaction {
            channel_id: channel,
            message_id: message,
            emoji: emoji.to_string(),
        })
    }

    fn resolve_mention(&self, user: UserId) -> Option<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .cloned()
    }
}
