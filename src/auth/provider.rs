//! Identity provider contract
//!
//! The narrow surface the session manager needs from the external identity
//! SDK. Adapters wrap the real SDK behind this trait; tests use a
//! programmable mock.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// OAuth provider reachable through the SDK's pop-up/redirect transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProviderKind {
    Google,
    Facebook,
}

impl std::fmt::Display for OAuthProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OAuthProviderKind::Google => write!(f, "Google"),
            OAuthProviderKind::Facebook => write!(f, "Facebook"),
        }
    }
}

/// Classified failure codes reported by the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    /// User closed the sign-in pop-up before completing
    PopupClosed,
    /// Browser refused to open the pop-up window
    PopupBlocked,
    Cancelled,
    Network,
    TooManyRequests,
    UserDisabled,
    AccountExistsWithDifferentCredential,
    Other,
}

impl std::fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ProviderErrorCode::PopupClosed => "popup-closed",
            ProviderErrorCode::PopupBlocked => "popup-blocked",
            ProviderErrorCode::Cancelled => "cancelled",
            ProviderErrorCode::Network => "network-failure",
            ProviderErrorCode::TooManyRequests => "too-many-requests",
            ProviderErrorCode::UserDisabled => "user-disabled",
            ProviderErrorCode::AccountExistsWithDifferentCredential => {
                "account-exists-different-credential"
            }
            ProviderErrorCode::Other => "other",
        };
        write!(f, "{}", code)
    }
}

/// Failure reported by an SDK call
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Session payload reported by the SDK
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSession {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// SDK provider id (e.g. `"google.com"`); absent for plain
    /// email/password sessions
    pub provider_id: Option<String>,
}

/// External identity provider SDK.
///
/// All methods suspend at the SDK boundary; none of them touch session
/// state directly. The session-change feed is the single source of truth
/// for SDK-backed sessions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Complete an OAuth sign-in in a pop-up window.
    async fn sign_in_with_popup(
        &self,
        kind: OAuthProviderKind,
        scopes: &[String],
    ) -> Result<ProviderSession, ProviderError>;

    /// Start an OAuth sign-in via full-page redirect. On success control
    /// is ceded to a navigation; resolution happens through
    /// [`redirect_result`](Self::redirect_result) on the next startup.
    async fn sign_in_with_redirect(
        &self,
        kind: OAuthProviderKind,
        scopes: &[String],
    ) -> Result<(), ProviderError>;

    /// Fetch the outcome of a previously initiated redirect sign-in, if any.
    async fn redirect_result(&self) -> Result<Option<ProviderSession>, ProviderError>;

    /// Subscribe to session-change notifications.
    ///
    /// Implementations must emit the current session state (possibly `None`)
    /// immediately on subscription, then every subsequent change. Dropping
    /// the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<ProviderSession>>;

    /// End the SDK-backed session. Observers receive a `None` notification.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// Set the display name on the currently signed-in session.
    async fn update_display_name(&self, name: &str) -> Result<(), ProviderError>;
}
