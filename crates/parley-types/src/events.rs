use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatRef;

/// Events sent over the WebSocket gateway. These carry just enough for a
/// client to know which query to re-run; the REST API stays the source of
/// truth for message bodies, reader sets, and reaction aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A new message was posted in a chat
    MessageCreate {
        chat: ChatRef,
        message_id: Uuid,
        sender_id: Uuid,
    },

    /// A message was soft-deleted
    MessageDelete { chat: ChatRef, message_id: Uuid },

    /// A reaction was added to a message
    ReactionAdd {
        chat: ChatRef,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A reaction was removed from a message
    ReactionRemove {
        chat: ChatRef,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A user was added to reader sets in a chat (bulk mark-as-read)
    ReadUpdate { chat: ChatRef, user_id: Uuid },

    /// A user asserted or cleared their typing flag in a chat
    TypingUpdate {
        chat: ChatRef,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, is_online: bool },
}

impl GatewayEvent {
    /// Returns the chat this event is scoped to. Events that return `None`
    /// are global and are delivered to every connected client.
    pub fn chat_scope(&self) -> Option<ChatRef> {
        match self {
            Self::MessageCreate { chat, .. } => Some(*chat),
            Self::MessageDelete { chat, .. } => Some(*chat),
            Self::ReactionAdd { chat, .. } => Some(*chat),
            Self::ReactionRemove { chat, .. } => Some(*chat),
            Self::ReadUpdate { chat, .. } => Some(*chat),
            Self::TypingUpdate { chat, .. } => Some(*chat),
            // Ready and PresenceUpdate are global
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to chat-scoped events. The server only forwards scoped
    /// events (messages, reactions, typing) for subscribed chats.
    Subscribe { chats: Vec<ChatRef> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatKind;

    #[test]
    fn test_chat_scope() {
        let chat = ChatRef { kind: ChatKind::Dm, id: Uuid::new_v4() };
        let event = GatewayEvent::TypingUpdate { chat, user_id: Uuid::new_v4(), is_typing: true };
        assert_eq!(event.chat_scope(), Some(chat));

        let presence = GatewayEvent::PresenceUpdate { user_id: Uuid::new_v4(), is_online: true };
        assert_eq!(presence.chat_scope(), None);
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"Subscribe","data":{"chats":[{"kind":"group","id":"00000000-0000-0000-0000-000000000001"}]}}"#,
        )
        .unwrap();
        match cmd {
            GatewayCommand::Subscribe { chats } => {
                assert_eq!(chats.len(), 1);
                assert_eq!(chats[0].kind, ChatKind::Group);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
