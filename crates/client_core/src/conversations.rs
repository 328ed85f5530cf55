use std::collections::HashSet;

use shared::domain::{ConversationId, ConversationRecord, UserId, UserRecord};

/// The user's conversations, most recent first.
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    conversations: Vec<ConversationRecord>,
}

impl ConversationList {
    pub fn new(conversations: Vec<ConversationRecord>) -> Self {
        let mut list = Self::default();
        for conversation in conversations.into_iter().rev() {
            list.insert_most_recent(conversation);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.conversations.iter()
    }

    pub fn get(&self, id: ConversationId) -> Option<&ConversationRecord> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn group_chats(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.conversations.iter().filter(|c| c.is_group())
    }

    /// A group with exactly this member set (order ignored) and this name.
    pub fn find_group(&self, members: &[UserRecord], name: &str) -> Option<&ConversationRecord> {
        let wanted: HashSet<UserId> = members.iter().map(|m| m.id).collect();
        self.group_chats().find(|chat| {
            chat.name == name && chat.member_ids().collect::<HashSet<_>>() == wanted
        })
    }

    /// Everyone the user shares a conversation with, in first-seen order.
    pub fn contacts(&self, requester: UserId) -> Vec<UserRecord> {
        let mut seen = HashSet::from([requester]);
        self.conversations
            .iter()
            .flat_map(|c| c.members.iter())
            .filter(|member| seen.insert(member.id))
            .cloned()
            .collect()
    }

    /// Puts `conversation` at the front, replacing any copy with the same id.
    pub fn insert_most_recent(&mut self, conversation: ConversationRecord) {
        self.conversations.retain(|c| c.id != conversation.id);
        self.conversations.insert(0, conversation);
    }
}
