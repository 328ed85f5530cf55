//! Builders shared by the unit tests of several modules.

use chrono::{TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header};
use shared::domain::{
    ConversationId, ConversationRecord, MessageId, MessageRecord, UserId, UserRecord,
};

use crate::session::SessionClaims;

pub fn token_for(id: i64, username: &str, exp: Option<i64>) -> String {
    let claims = SessionClaims {
        id: UserId(id),
        username: username.to_string(),
        photo: None,
        exp,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"server-side-secret"),
    )
    .expect("encode token")
}

pub fn user(id: i64, username: &str) -> UserRecord {
    UserRecord {
        id: UserId(id),
        username: username.to_string(),
        photo: None,
    }
}

pub fn message(id: i64, conversation_id: i64, author_id: i64, content: &str) -> MessageRecord {
    MessageRecord {
        id: MessageId(id),
        author_id: UserId(author_id),
        content: content.to_string(),
        conversation_id: ConversationId(conversation_id),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        updated_at: None,
    }
}

pub fn group(id: i64, name: &str, members: Vec<UserRecord>) -> ConversationRecord {
    ConversationRecord {
        id: ConversationId(id),
        name: name.to_string(),
        direct_msg: false,
        members,
        messages: Vec::new(),
        photo: None,
    }
}

pub fn conversation(id: i64, messages: Vec<MessageRecord>) -> ConversationRecord {
    ConversationRecord {
        id: ConversationId(id),
        name: String::new(),
        direct_msg: true,
        members: vec![user(1, "alice"), user(2, "bob")],
        messages,
        photo: None,
    }
}
