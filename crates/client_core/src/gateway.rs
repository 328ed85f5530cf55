use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder};
use shared::{
    domain::{ConversationId, ConversationRecord, MessageId, MessageRecord, UserRecord},
    protocol::{CreateGroupResponse, LoginRequest, LoginResponse, UpdateMessageRequest},
};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::GatewayError;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoAttachment {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub members: Vec<UserRecord>,
    pub name: String,
    pub photo: Option<PhotoAttachment>,
}

/// Request/response calls against the authority.
#[async_trait]
pub trait RequestGateway: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> GatewayResult<String>;
    async fn list_conversations(&self) -> GatewayResult<Vec<ConversationRecord>>;
    async fn update_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: &str,
    ) -> GatewayResult<MessageRecord>;
    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> GatewayResult<()>;
    async fn create_group(&self, request: CreateGroupRequest) -> GatewayResult<ConversationRecord>;
}

pub struct HttpGateway {
    http: Client,
    server_url: String,
    bearer: RwLock<Option<String>>,
}

impl HttpGateway {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            bearer: RwLock::new(None),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Token attached to every subsequent request; `None` after logout.
    pub async fn set_bearer(&self, token: Option<String>) {
        *self.bearer.write().await = token;
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.bearer.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn message_url(&self, conversation_id: ConversationId, message_id: MessageId) -> String {
        format!(
            "{}/messages/{}/{}",
            self.server_url, conversation_id.0, message_id.0
        )
    }
}

#[async_trait]
impl RequestGateway for HttpGateway {
    async fn login(&self, username: &str, password: &str) -> GatewayResult<String> {
        let body: LoginResponse = self
            .http
            .post(format!("{}/users/login", self.server_url))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.token)
    }

    async fn list_conversations(&self) -> GatewayResult<Vec<ConversationRecord>> {
        let request = self
            .authorized(self.http.get(format!("{}/chats", self.server_url)))
            .await;
        let conversations: Vec<ConversationRecord> =
            request.send().await?.error_for_status()?.json().await?;
        Ok(conversations)
    }

    async fn update_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: &str,
    ) -> GatewayResult<MessageRecord> {
        let request = self
            .authorized(self.http.put(self.message_url(conversation_id, message_id)))
            .await;
        let record: MessageRecord = request
            .json(&UpdateMessageRequest {
                content: content.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(record)
    }

    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> GatewayResult<()> {
        let request = self
            .authorized(self.http.delete(self.message_url(conversation_id, message_id)))
            .await;
        request.send().await?.error_for_status()?;
        Ok(())
    }

    async fn create_group(&self, request: CreateGroupRequest) -> GatewayResult<ConversationRecord> {
        let members = serde_json::to_string(&request.members)
            .map_err(|err| GatewayError::transport(format!("failed to encode members: {err}")))?;
        let mut form = multipart::Form::new()
            .text("members", members)
            .text("name", request.name.clone());
        if let Some(photo) = request.photo {
            let mut part = multipart::Part::bytes(photo.bytes).file_name(photo.filename);
            if let Some(mime_type) = photo.mime_type {
                part = part.mime_str(&mime_type)?;
            }
            form = form.part("groupPhoto", part);
        }

        let builder = self
            .authorized(
                self.http
                    .post(format!("{}/groups/createGroup", self.server_url)),
            )
            .await;
        let response: CreateGroupResponse = builder
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let conversation = response.into_conversation().ok_or_else(|| {
            GatewayError::transport("create group response carried no conversation")
        })?;
        info!(
            conversation_id = conversation.id.0,
            members = conversation.members.len(),
            "gateway: group conversation returned"
        );
        Ok(conversation)
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
