//! Keeps the message list of one open conversation consistent with the
//! authority.
//!
//! Local state changes only when a notification arrives. Edit and delete
//! requests never touch the list on their own; on success they re-emit the
//! confirmed outcome on the notification channel, and that event (delivered
//! to every participant, this client included) is the single path by which
//! the list is mutated. Notifications carry no ordering or delivery-count
//! guarantee, so every handler is an idempotent upsert or remove keyed by
//! message id.

use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{
    domain::{ConversationId, ConversationRecord, MessageId, MessageRecord},
    protocol::ChannelEvent,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, info, warn};

use crate::{
    channel::NotificationChannel,
    error::{ClientError, ClientResult},
    gateway::RequestGateway,
    notice::TransientError,
};

const EDIT_FAILED: &str = "An unknown error occurred when trying to update the message.";
const DELETE_FAILED: &str = "An unknown error occurred when trying to delete the message.";
const EMPTY_MESSAGE: &str = "The message cannot be empty.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Edit,
    Delete,
}

#[derive(Debug, Clone, Copy)]
struct PendingOperation {
    kind: PendingKind,
    ticket: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Replaced,
    Removed,
    Ignored,
}

struct SyncState {
    messages: Vec<MessageRecord>,
    pending: HashMap<MessageId, PendingOperation>,
    next_ticket: u64,
    notice: TransientError,
}

impl SyncState {
    fn position(&self, message_id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    fn begin(&mut self, message_id: MessageId, kind: PendingKind) -> ClientResult<u64> {
        if let Some(existing) = self.pending.get(&message_id) {
            let what = match existing.kind {
                PendingKind::Edit => "an edit",
                PendingKind::Delete => "a delete",
            };
            return Err(ClientError::validation(format!(
                "The message already has {what} in progress."
            )));
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending
            .insert(message_id, PendingOperation { kind, ticket });
        Ok(ticket)
    }

    /// Only the request that opened the pending record may close it;
    /// notifications never do, since they may come from another client.
    fn finish(&mut self, message_id: MessageId, ticket: u64) {
        if self
            .pending
            .get(&message_id)
            .is_some_and(|pending| pending.ticket == ticket)
        {
            self.pending.remove(&message_id);
        }
    }
}

pub struct MessageSync {
    conversation_id: ConversationId,
    gateway: Arc<dyn RequestGateway>,
    channel: Arc<dyn NotificationChannel>,
    inner: Mutex<SyncState>,
    /// Bumped whenever the message list changes.
    revision: watch::Sender<u64>,
}

impl MessageSync {
    pub fn new(
        conversation: &ConversationRecord,
        gateway: Arc<dyn RequestGateway>,
        channel: Arc<dyn NotificationChannel>,
        error_window: Duration,
    ) -> Arc<Self> {
        let mut messages: Vec<MessageRecord> = Vec::with_capacity(conversation.messages.len());
        for message in &conversation.messages {
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message.clone(),
                None => messages.push(message.clone()),
            }
        }
        Arc::new(Self {
            conversation_id: conversation.id,
            gateway,
            channel,
            inner: Mutex::new(SyncState {
                messages,
                pending: HashMap::new(),
                next_ticket: 0,
                notice: TransientError::new(error_window),
            }),
            revision: watch::Sender::new(0),
        })
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn message(&self, message_id: MessageId) -> Option<MessageRecord> {
        let guard = self.inner.lock().await;
        guard
            .position(message_id)
            .map(|index| guard.messages[index].clone())
    }

    pub async fn pending(&self, message_id: MessageId) -> Option<PendingKind> {
        self.inner
            .lock()
            .await
            .pending
            .get(&message_id)
            .map(|pending| pending.kind)
    }

    /// Resolves once `check` holds for the held copy of `message_id` (`None`
    /// when it is not held), re-checking after every change to the list.
    /// Returns `false` if `timeout` passes first.
    pub async fn wait_until(
        &self,
        message_id: MessageId,
        timeout: Duration,
        check: impl Fn(Option<&MessageRecord>) -> bool,
    ) -> bool {
        let mut changes = self.revision.subscribe();
        let settled = async {
            loop {
                {
                    let guard = self.inner.lock().await;
                    let held = guard.position(message_id).map(|index| &guard.messages[index]);
                    if check(held) {
                        return true;
                    }
                }
                if changes.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, settled).await.unwrap_or(false)
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// The last failure, until its display window runs out.
    pub async fn error_notice(&self) -> Option<String> {
        self.inner.lock().await.notice.current().map(str::to_string)
    }

    pub async fn submit_edit(&self, message_id: MessageId, new_content: &str) -> ClientResult<()> {
        let result = self.submit_edit_inner(message_id, new_content).await;
        self.note_failure(&result).await;
        result
    }

    async fn submit_edit_inner(&self, message_id: MessageId, new_content: &str) -> ClientResult<()> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            let index = guard
                .position(message_id)
                .ok_or_else(|| ClientError::message_not_found(message_id))?;
            if new_content.trim().is_empty() {
                return Err(ClientError::validation(EMPTY_MESSAGE));
            }
            if guard.messages[index].content == new_content {
                return Err(ClientError::validation("The message is unchanged."));
            }
            guard.begin(message_id, PendingKind::Edit)?
        };

        info!(
            conversation_id = self.conversation_id.0,
            message_id = message_id.0,
            "sync: submitting edit"
        );
        let result = self
            .gateway
            .update_message(self.conversation_id, message_id, new_content)
            .await;
        self.inner.lock().await.finish(message_id, ticket);

        let record = result.map_err(|err| {
            warn!(
                conversation_id = self.conversation_id.0,
                message_id = message_id.0,
                status = ?err.status,
                "sync: edit request failed: {err}"
            );
            ClientError::sync(EDIT_FAILED, err)
        })?;

        if record.id != message_id || record.conversation_id != self.conversation_id {
            warn!(
                conversation_id = self.conversation_id.0,
                message_id = message_id.0,
                returned_message_id = record.id.0,
                returned_conversation_id = record.conversation_id.0,
                "sync: edit response does not match the request target"
            );
            return Err(ClientError::unretryable(EDIT_FAILED));
        }

        self.emit(ChannelEvent::MessageUpdated { message: record })
            .await
    }

    pub async fn submit_delete(&self, message_id: MessageId) -> ClientResult<()> {
        let result = self.submit_delete_inner(message_id).await;
        self.note_failure(&result).await;
        result
    }

    async fn submit_delete_inner(&self, message_id: MessageId) -> ClientResult<()> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            if guard.position(message_id).is_none() {
                return Err(ClientError::message_not_found(message_id));
            }
            guard.begin(message_id, PendingKind::Delete)?
        };

        info!(
            conversation_id = self.conversation_id.0,
            message_id = message_id.0,
            "sync: submitting delete"
        );
        let result = self
            .gateway
            .delete_message(self.conversation_id, message_id)
            .await;
        self.inner.lock().await.finish(message_id, ticket);

        result.map_err(|err| {
            warn!(
                conversation_id = self.conversation_id.0,
                message_id = message_id.0,
                status = ?err.status,
                "sync: delete request failed: {err}"
            );
            ClientError::sync(DELETE_FAILED, err)
        })?;

        self.emit(ChannelEvent::MessageDeleted { message_id }).await
    }

    async fn emit(&self, event: ChannelEvent) -> ClientResult<()> {
        self.channel.emit(event).await.map_err(|err| {
            warn!(
                conversation_id = self.conversation_id.0,
                "sync: request confirmed but broadcast failed: {err:#}"
            );
            ClientError::unretryable(
                "The change was saved but could not be shared. Reopen the conversation to refresh.",
            )
        })
    }

    async fn note_failure(&self, result: &ClientResult<()>) {
        if let Err(err) = result {
            self.inner.lock().await.notice.show(err);
        }
    }

    /// Applies one pushed event. Unknown ids and events for other
    /// conversations are no-ops, never errors.
    pub async fn on_notification(&self, event: &ChannelEvent) -> NotificationOutcome {
        let outcome = self.apply(event).await;
        if outcome != NotificationOutcome::Ignored {
            self.bump_revision();
        }
        outcome
    }

    async fn apply(&self, event: &ChannelEvent) -> NotificationOutcome {
        let mut guard = self.inner.lock().await;
        match event {
            ChannelEvent::MessageUpdated { message } => {
                if message.conversation_id != self.conversation_id {
                    return NotificationOutcome::Ignored;
                }
                match guard.position(message.id) {
                    Some(index) => {
                        guard.messages[index] = message.clone();
                        debug!(
                            conversation_id = self.conversation_id.0,
                            message_id = message.id.0,
                            "sync: message replaced"
                        );
                        NotificationOutcome::Replaced
                    }
                    None => {
                        debug!(
                            conversation_id = self.conversation_id.0,
                            message_id = message.id.0,
                            "sync: update for message not held locally"
                        );
                        NotificationOutcome::Ignored
                    }
                }
            }
            ChannelEvent::MessageDeleted { message_id } => {
                let before = guard.messages.len();
                guard.messages.retain(|m| m.id != *message_id);
                if guard.messages.len() == before {
                    return NotificationOutcome::Ignored;
                }
                debug!(
                    conversation_id = self.conversation_id.0,
                    message_id = message_id.0,
                    "sync: message removed"
                );
                NotificationOutcome::Removed
            }
            ChannelEvent::Error(_) => NotificationOutcome::Ignored,
        }
    }

    /// Insert-on-send. Re-inserting a known id replaces it in place.
    pub async fn insert_local(&self, record: MessageRecord) -> bool {
        if record.conversation_id != self.conversation_id {
            return false;
        }
        {
            let mut guard = self.inner.lock().await;
            match guard.position(record.id) {
                Some(index) => guard.messages[index] = record,
                None => guard.messages.push(record),
            }
        }
        self.bump_revision();
        true
    }

    /// Starts applying pushed events to this conversation. Events stop being
    /// applied as soon as the returned guard is dropped.
    pub fn enter(self: &Arc<Self>) -> ConversationSubscription {
        let mut events = BroadcastStream::new(self.channel.subscribe());
        let sync = Arc::clone(self);
        let conversation_id = self.conversation_id;
        let task = tokio::spawn(async move {
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        sync.on_notification(&event).await;
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(
                            conversation_id = conversation_id.0,
                            skipped, "sync: notification receiver lagged; events lost"
                        );
                    }
                }
            }
        });
        info!(conversation_id = conversation_id.0, "sync: subscribed");
        ConversationSubscription {
            conversation_id,
            task,
        }
    }
}

pub struct ConversationSubscription {
    conversation_id: ConversationId,
    task: JoinHandle<()>,
}

impl ConversationSubscription {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }
}

impl Drop for ConversationSubscription {
    fn drop(&mut self) {
        self.task.abort();
        info!(
            conversation_id = self.conversation_id.0,
            "sync: unsubscribed"
        );
    }
}

#[cfg(test)]
#[path = "tests/message_sync_tests.rs"]
mod tests;
