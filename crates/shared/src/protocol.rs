use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationRecord, MessageId, MessageRecord},
    error::ApiError,
};

/// Frames carried by the notification channel in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChannelEvent {
    MessageUpdated { message: MessageRecord },
    MessageDeleted { message_id: MessageId },
    Error(ApiError),
}

impl ChannelEvent {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::MessageUpdated { message } => Some(message.id),
            Self::MessageDeleted { message_id } => Some(*message_id),
            Self::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

/// The authority answers a create-group call with either the group it just
/// made or one it already had.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_group: Option<ConversationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_group: Option<ConversationRecord>,
}

impl CreateGroupResponse {
    pub fn into_conversation(self) -> Option<ConversationRecord> {
        self.new_group.or(self.existing_group)
    }
}
