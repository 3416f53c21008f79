//! Authentication collaborator.
//!
//! The workflow only asks one question of authentication: *is the current
//! session allowed to upload?* That is the [`SessionGate`] trait. Credential
//! storage lives in the HTTP client (cookie jar or bearer token), never in
//! the workflow.
//!
//! [`HttpSession`] is the stock implementation against the service's
//! `/auth/validate`, `/auth/login` and `/auth/logout` endpoints. It shares
//! the transport's `reqwest::Client`, so a successful login sets the session
//! cookie used by every later upload and status request.

use crate::config::IngestConfig;
use crate::error::{AuthError, TransportError};
use crate::transport::http::{decode, map_reqwest_error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Boolean gate consulted before every submission.
pub trait SessionGate: Send + Sync {
    fn is_authorized(&self) -> bool;
}

/// Gate that always allows uploads (token-less local services, tests).
pub struct AlwaysAuthorized;

impl SessionGate for AlwaysAuthorized {
    fn is_authorized(&self) -> bool {
        true
    }
}

/// The user object returned by the auth endpoints. Its shape is owned by the
/// service, so it is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionUser(pub serde_json::Value);

impl SessionUser {
    /// Best-effort display name: `username`, `name`, `email`, then `id`.
    pub fn display_name(&self) -> String {
        ["username", "name", "email", "id"]
            .iter()
            .find_map(|key| match self.0.get(key)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "unknown user".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Cookie/token session against the service's auth endpoints.
pub struct HttpSession {
    client: Client,
    config: IngestConfig,
    user: RwLock<Option<SessionUser>>,
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("api_base_url", &self.config.api_base_url)
            .field("user", &self.current_user())
            .finish()
    }
}

impl HttpSession {
    /// Build a session on `client`; pass the transport's client to share cookies.
    pub fn new(config: &IngestConfig, client: Client) -> Self {
        Self {
            client,
            config: config.clone(),
            user: RwLock::new(None),
        }
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_user(&self, user: Option<SessionUser>) {
        *self
            .user
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = user;
    }

    /// Ask the service whether the ambient credentials are still valid.
    ///
    /// A rejected session is not an error: it yields `Ok(None)` and clears
    /// the cached user. Network failures are returned.
    pub async fn validate(&self) -> Result<Option<SessionUser>, AuthError> {
        let response = self
            .client
            .get(self.config.endpoint("auth/validate"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, Some(self.config.request_timeout)))?;

        let user = match decode::<UserEnvelope>(response).await {
            Ok(envelope) => envelope.user,
            Err(TransportError::ServerRejected { status }) => {
                debug!("Session validation rejected with HTTP {}", status);
                None
            }
            Err(e) => return Err(e.into()),
        };
        self.set_user(user.clone());
        Ok(user)
    }

    /// Log in with username and password; the session cookie lands in the
    /// shared client's jar.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionUser, AuthError> {
        let response = self
            .client
            .post(self.config.endpoint("auth/login"))
            .timeout(self.config.request_timeout)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, Some(self.config.request_timeout)))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Invalid credentials".to_string());
            warn!("Login as '{}' refused (HTTP {}): {}", username, status, message);
            self.set_user(None);
            return Err(AuthError::InvalidCredentials(message));
        }

        let envelope: UserEnvelope = decode(response).await?;
        let user = envelope
            .user
            .unwrap_or_else(|| SessionUser(serde_json::json!({ "username": username })));
        info!("Logged in as {}", user.display_name());
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    /// End the session. The cached user is cleared even if the request fails.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.set_user(None);
        let response = self
            .client
            .post(self.config.endpoint("auth/logout"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, Some(self.config.request_timeout)))?;
        if !response.status().is_success() {
            return Err(TransportError::ServerRejected {
                status: response.status().as_u16(),
            }
            .into());
        }
        info!("Logged out");
        Ok(())
    }
}

impl SessionGate for HttpSession {
    fn is_authorized(&self) -> bool {
        self.current_user().is_some()
    }
}
