//! Authentication types

use super::provider::{OAuthProviderKind, ProviderErrorCode, ProviderSession};
use serde::{Deserialize, Serialize};

/// Identity source that produced a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Google,
    Facebook,
    Telegram,
    Password,
}

impl AuthProvider {
    /// Map an SDK provider id (e.g. `"google.com"`) to a provider tag.
    ///
    /// Sessions without provider metadata are treated as email/password.
    pub fn from_provider_id(provider_id: Option<&str>) -> Self {
        match provider_id {
            Some("google.com") => AuthProvider::Google,
            Some("facebook.com") => AuthProvider::Facebook,
            _ => AuthProvider::Password,
        }
    }
}

impl From<OAuthProviderKind> for AuthProvider {
    fn from(kind: OAuthProviderKind) -> Self {
        match kind {
            OAuthProviderKind::Google => AuthProvider::Google,
            OAuthProviderKind::Facebook => AuthProvider::Facebook,
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthProvider::Google => "google",
            AuthProvider::Facebook => "facebook",
            AuthProvider::Telegram => "telegram",
            AuthProvider::Password => "password",
        };
        write!(f, "{}", name)
    }
}

/// A signed-in user, immutable once constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Stable unique identifier, namespaced per provider. Telegram sessions
    /// use a `telegram_` prefix so they can never collide with SDK uids.
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: AuthProvider,
}

impl AuthUser {
    /// Build a user from an SDK session payload.
    pub fn from_provider_session(session: &ProviderSession) -> Self {
        Self {
            id: session.uid.clone(),
            email: session.email.clone(),
            display_name: session.display_name.clone(),
            avatar_url: session.avatar_url.clone(),
            provider: AuthProvider::from_provider_id(session.provider_id.as_deref()),
        }
    }

    /// Synthesize a user from a Telegram login widget payload.
    ///
    /// The payload is trusted as-is: the widget's `hash` field is NOT
    /// verified against the bot token here, so callers that care about
    /// authenticity must validate it upstream.
    pub fn from_telegram(payload: &TelegramLoginPayload) -> Result<Self, AuthError> {
        if payload.id <= 0 {
            return Err(AuthError::InvalidPayload(format!(
                "bad Telegram user id: {}",
                payload.id
            )));
        }
        let first = payload.first_name.trim();
        if first.is_empty() {
            return Err(AuthError::InvalidPayload(
                "missing first name".to_string(),
            ));
        }

        let mut display_name = first.to_string();
        if let Some(last) = payload.last_name.as_deref().map(str::trim) {
            if !last.is_empty() {
                display_name.push(' ');
                display_name.push_str(last);
            }
        }

        Ok(Self {
            id: format!("telegram_{}", payload.id),
            email: None,
            display_name: Some(display_name),
            avatar_url: payload.photo_url.clone(),
            provider: AuthProvider::Telegram,
        })
    }
}

/// Login data supplied by the Telegram login widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramLoginPayload {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Unix timestamp of the widget authentication
    #[serde(default)]
    pub auth_date: Option<i64>,
    /// Widget integrity hash; carried through but not verified here
    #[serde(default)]
    pub hash: Option<String>,
}

/// Read-only view of the current session state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<AuthUser>,
    /// True while any authentication operation (including the initial
    /// restore) is in flight
    pub loading: bool,
    /// Cached `user.is_some()`; kept in lockstep by the manager
    pub authenticated: bool,
    /// Most recent user-facing error, auto-cleared after a display window
    pub last_error: Option<String>,
}

/// Error types for authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A provider SDK call failed; `message` is already user-facing
    #[error("{message}")]
    Provider {
        code: ProviderErrorCode,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid login payload: {0}")]
    InvalidPayload(String),

    #[error("Another sign-in operation is already in progress")]
    OperationInProgress,
}
