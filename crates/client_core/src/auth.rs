use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    error::{AuthError, ClientError, ClientResult},
    gateway::RequestGateway,
    session::{SessionContext, TokenStore},
};

/// Status the login route uses for a wrong username/password pair.
const INVALID_CREDENTIALS_STATUS: u16 = 400;

/// Issues, restores and tears down the session context.
pub struct AuthenticationGate {
    gateway: Arc<dyn RequestGateway>,
    store: Arc<dyn TokenStore>,
}

impl AuthenticationGate {
    pub fn new(gateway: Arc<dyn RequestGateway>, store: Arc<dyn TokenStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<SessionContext> {
        if username.trim().is_empty() || password.trim().is_empty() {
            return Err(ClientError::validation(
                "Username and password are required.",
            ));
        }

        let token = self
            .gateway
            .login(username, password)
            .await
            .map_err(|err| {
                if err.status == Some(INVALID_CREDENTIALS_STATUS) {
                    info!(username, "auth: credentials rejected");
                    AuthError::InvalidCredentials
                } else {
                    warn!(username, status = ?err.status, "auth: login failed: {err}");
                    AuthError::Failed
                }
            })?;

        let session = SessionContext::from_token(token).map_err(|err| {
            warn!(username, "auth: issued token is unusable: {err:#}");
            AuthError::Failed
        })?;

        if let Err(err) = self.store.save(session.token()).await {
            warn!(username, "auth: failed to persist session token: {err:#}");
            return Err(AuthError::Failed.into());
        }

        info!(user_id = session.user_id().0, "auth: session established");
        Ok(session)
    }

    /// The stored session, if it still decodes and has not expired. Anything
    /// else is cleared so the login surface is shown.
    pub async fn restore(&self) -> Option<SessionContext> {
        let token = match self.store.load().await {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(err) => {
                warn!("auth: failed to read stored session: {err:#}");
                return None;
            }
        };

        match SessionContext::from_token(token) {
            Ok(session) if !session.is_expired() => {
                info!(user_id = session.user_id().0, "auth: session restored");
                Some(session)
            }
            Ok(session) => {
                info!(user_id = session.user_id().0, "auth: stored session expired");
                self.discard_stored().await;
                None
            }
            Err(err) => {
                warn!("auth: stored session is unreadable: {err:#}");
                self.discard_stored().await;
                None
            }
        }
    }

    pub async fn logout(&self, session: SessionContext) -> Result<()> {
        self.store.clear().await?;
        info!(user_id = session.user_id().0, "auth: session cleared");
        Ok(())
    }

    async fn discard_stored(&self) {
        if let Err(err) = self.store.clear().await {
            warn!("auth: failed to clear stored session: {err:#}");
        }
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
