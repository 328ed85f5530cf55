use std::collections::HashSet;

use shared::domain::{ConversationRecord, UserId, UserRecord};
use tracing::{info, warn};

use crate::{
    conversations::ConversationList,
    error::{ClientError, ClientResult},
    gateway::{CreateGroupRequest, PhotoAttachment, RequestGateway},
    notice::TransientError,
};

const MIN_OTHER_MEMBERS: usize = 2;
const CREATE_FAILED: &str = "An error occurred when trying to create the group.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEntry {
    pub user: UserRecord,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStage {
    Selecting,
    Naming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// A group with the same members and name was already in the list.
    Existing(ConversationRecord),
    Created(ConversationRecord),
}

impl GroupOutcome {
    pub fn conversation(&self) -> &ConversationRecord {
        match self {
            Self::Existing(conversation) | Self::Created(conversation) => conversation,
        }
    }
}

/// `"a, b & c"`; two members give `"a & b"`.
pub fn generate_group_name(members: &[UserRecord]) -> String {
    match members {
        [] => String::new(),
        [only] => only.username.clone(),
        [rest @ .., last] => {
            let head = rest
                .iter()
                .map(|member| member.username.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{head} & {}", last.username)
        }
    }
}

/// Draft of a new group: pick at least two contacts, then optionally name
/// it and attach a photo. Submitting or cancelling consumes the draft.
pub struct GroupFormationFlow {
    contacts: Vec<ContactEntry>,
    stage: GroupStage,
    selected: Vec<UserRecord>,
    name: String,
    photo: Option<PhotoAttachment>,
    notice: TransientError,
}

impl GroupFormationFlow {
    pub fn new(contacts: Vec<UserRecord>, notice: TransientError) -> Self {
        Self {
            contacts: contacts
                .into_iter()
                .map(|user| ContactEntry {
                    user,
                    selected: false,
                })
                .collect(),
            stage: GroupStage::Selecting,
            selected: Vec::new(),
            name: String::new(),
            photo: None,
            notice,
        }
    }

    pub fn stage(&self) -> GroupStage {
        self.stage
    }

    pub fn contacts(&self) -> &[ContactEntry] {
        &self.contacts
    }

    /// Contacts whose username contains `search`, ignoring case.
    pub fn filtered_contacts(&self, search: &str) -> Vec<&ContactEntry> {
        let needle = search.trim().to_lowercase();
        self.contacts
            .iter()
            .filter(|entry| needle.is_empty() || entry.user.username.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn selected_contacts(&self) -> &[UserRecord] {
        &self.selected
    }

    pub fn error_notice(&self) -> Option<&str> {
        self.notice.current()
    }

    pub fn toggle_contact(&mut self, id: UserId) -> bool {
        match self.contacts.iter_mut().find(|entry| entry.user.id == id) {
            Some(entry) => {
                entry.selected = !entry.selected;
                entry.selected
            }
            None => false,
        }
    }

    pub fn next(&mut self) -> ClientResult<()> {
        let chosen: Vec<UserRecord> = self
            .contacts
            .iter()
            .filter(|entry| entry.selected)
            .map(|entry| entry.user.clone())
            .collect();

        if chosen.len() < MIN_OTHER_MEMBERS {
            let err = ClientError::validation(if chosen.is_empty() {
                "A group requires at least 2 more contacts."
            } else {
                "A group requires at least 1 more contact."
            });
            self.notice.show(&err);
            return Err(err);
        }

        self.selected = chosen;
        self.stage = GroupStage::Naming;
        Ok(())
    }

    pub fn back(&mut self) {
        self.stage = GroupStage::Selecting;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_photo(&mut self, photo: Option<PhotoAttachment>) {
        self.photo = photo;
    }

    /// Requester first, then the chosen contacts; a contact that is the
    /// requester is not listed twice.
    pub fn members(&self, requester: &UserRecord) -> Vec<UserRecord> {
        let mut seen = HashSet::new();
        std::iter::once(requester)
            .chain(self.selected.iter())
            .filter(|member| seen.insert(member.id))
            .cloned()
            .collect()
    }

    pub fn resolved_name(&self, members: &[UserRecord]) -> String {
        let explicit = self.name.trim();
        if explicit.is_empty() {
            generate_group_name(members)
        } else {
            explicit.to_string()
        }
    }

    pub async fn submit(
        self,
        requester: &UserRecord,
        conversations: &mut ConversationList,
        gateway: &dyn RequestGateway,
    ) -> ClientResult<GroupOutcome> {
        if self.stage != GroupStage::Naming {
            return Err(ClientError::validation(
                "Choose the group members before creating the group.",
            ));
        }

        let members = self.members(requester);
        let name = self.resolved_name(&members);

        if let Some(existing) = conversations.find_group(&members, &name) {
            info!(
                conversation_id = existing.id.0,
                "group: reusing existing conversation with same members and name"
            );
            return Ok(GroupOutcome::Existing(existing.clone()));
        }

        let member_count = members.len();
        let created = gateway
            .create_group(CreateGroupRequest {
                members,
                name,
                photo: self.photo,
            })
            .await
            .map_err(|err| {
                warn!(status = ?err.status, "group: create request failed: {err}");
                ClientError::sync(CREATE_FAILED, err)
            })?;

        info!(
            conversation_id = created.id.0,
            members = member_count,
            "group: conversation created"
        );
        conversations.insert_most_recent(created.clone());
        Ok(GroupOutcome::Created(created))
    }

    pub fn cancel(self) {}
}

#[cfg(test)]
#[path = "tests/group_tests.rs"]
mod tests;
