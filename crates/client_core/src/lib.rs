use std::sync::Arc;

use shared::{
    domain::{ConversationRecord, UserRecord},
    error::ErrorCode,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub mod auth;
pub mod channel;
pub mod config;
pub mod conversations;
pub mod error;
pub mod gateway;
pub mod group;
pub mod message_sync;
pub mod notice;
pub mod session;

pub use auth::AuthenticationGate;
pub use channel::{LocalNotificationChannel, NotificationChannel, WsNotificationChannel};
pub use config::{load_settings, Settings};
pub use conversations::ConversationList;
pub use error::{AuthError, ClientError, ClientResult, GatewayError};
pub use gateway::{HttpGateway, PhotoAttachment, RequestGateway};
pub use group::{GroupFormationFlow, GroupOutcome, GroupStage};
pub use message_sync::{ConversationSubscription, MessageSync, NotificationOutcome, PendingKind};
pub use notice::TransientError;
pub use session::{FileTokenStore, MemoryTokenStore, SessionContext, TokenStore};

pub struct ChatClient {
    settings: Settings,
    gateway: Arc<HttpGateway>,
    auth: AuthenticationGate,
    session: RwLock<Option<SessionContext>>,
    channel: RwLock<Option<Arc<dyn NotificationChannel>>>,
}

impl ChatClient {
    pub fn from_settings(settings: Settings) -> Self {
        let store = Arc::new(FileTokenStore::new(settings.token_path.clone()));
        Self::with_token_store(settings, store)
    }

    pub fn with_token_store(settings: Settings, store: Arc<dyn TokenStore>) -> Self {
        let gateway = Arc::new(HttpGateway::new(settings.server_url.clone()));
        let auth = AuthenticationGate::new(gateway.clone(), store);
        Self {
            settings,
            gateway,
            auth,
            session: RwLock::new(None),
            channel: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn session(&self) -> Option<SessionContext> {
        self.session.read().await.clone()
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<SessionContext> {
        let session = self.auth.login(username, password).await?;
        self.install_session(session.clone()).await;
        Ok(session)
    }

    /// Picks up a previously stored session so the login step can be skipped.
    pub async fn restore_session(&self) -> Option<SessionContext> {
        let session = self.auth.restore().await?;
        self.install_session(session.clone()).await;
        Some(session)
    }

    async fn install_session(&self, session: SessionContext) {
        self.gateway
            .set_bearer(Some(session.token().to_string()))
            .await;
        *self.session.write().await = Some(session);
        self.channel.write().await.take();
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        self.channel.write().await.take();
        self.gateway.set_bearer(None).await;
        let session = self.session.write().await.take();
        match session {
            Some(session) => self.auth.logout(session).await,
            None => Ok(()),
        }
    }

    /// Uses `channel` for notifications instead of connecting a websocket.
    pub async fn attach_channel(&self, channel: Arc<dyn NotificationChannel>) {
        *self.channel.write().await = Some(channel);
    }

    async fn current_session(&self) -> ClientResult<SessionContext> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::validation("You need to log in first."))
    }

    /// The live channel, reconnecting when the previous websocket has gone
    /// away. Views opened on a dead channel have to be reopened.
    async fn notification_channel(&self) -> ClientResult<Arc<dyn NotificationChannel>> {
        if let Some(channel) = self.channel.read().await.as_ref() {
            if !channel.is_closed() {
                return Ok(Arc::clone(channel));
            }
        }

        let session = self.current_session().await?;
        let mut guard = self.channel.write().await;
        match guard.as_ref() {
            Some(channel) if !channel.is_closed() => return Ok(Arc::clone(channel)),
            Some(_) => info!("client: notification channel closed; reconnecting"),
            None => {}
        }
        let channel: Arc<dyn NotificationChannel> = Arc::new(
            WsNotificationChannel::connect(
                &self.settings.server_url,
                session.token(),
                self.settings.event_buffer,
            )
            .await
            .map_err(|err| {
                warn!("client: notification channel unavailable: {err:#}");
                ClientError::sync(
                    "Live updates are unavailable. Please try again.",
                    GatewayError::transport(format!("{err:#}")),
                )
            })?,
        );
        *guard = Some(Arc::clone(&channel));
        Ok(channel)
    }

    pub async fn list_conversations(&self) -> ClientResult<ConversationList> {
        self.current_session().await?;
        let conversations = match self.gateway.list_conversations().await {
            Ok(conversations) => conversations,
            Err(err) if err.code() == Some(ErrorCode::Unauthorized) => {
                warn!("client: session rejected by the server; logging out");
                if let Err(clear_err) = self.logout().await {
                    warn!("client: failed to clear rejected session: {clear_err:#}");
                }
                return Err(ClientError::unretryable(
                    "Your session has expired. Please log in again.",
                ));
            }
            Err(err) => {
                warn!(status = ?err.status, "client: listing conversations failed: {err}");
                return Err(ClientError::sync(
                    "Your conversations could not be loaded.",
                    err,
                ));
            }
        };
        info!(count = conversations.len(), "client: conversations loaded");
        Ok(ConversationList::new(conversations))
    }

    /// The view stays live for as long as the returned subscription is held.
    pub async fn open_conversation(
        &self,
        conversation: &ConversationRecord,
    ) -> ClientResult<(Arc<MessageSync>, ConversationSubscription)> {
        let channel = self.notification_channel().await?;
        let sync = MessageSync::new(
            conversation,
            self.gateway.clone(),
            channel,
            self.settings.error_display_window(),
        );
        let subscription = sync.enter();
        Ok((sync, subscription))
    }

    pub fn group_flow(&self, contacts: Vec<UserRecord>) -> GroupFormationFlow {
        GroupFormationFlow::new(
            contacts,
            TransientError::new(self.settings.error_display_window()),
        )
    }

    pub async fn create_group(
        &self,
        flow: GroupFormationFlow,
        conversations: &mut ConversationList,
    ) -> ClientResult<GroupOutcome> {
        let requester = self.current_session().await?.user();
        flow.submit(&requester, conversations, self.gateway.as_ref())
            .await
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
