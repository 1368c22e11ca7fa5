//! Authentication module for Parlor
//!
//! Unifies the app's sign-in flows into a single session model:
//! - Google / Facebook OAuth via pop-up or full-page redirect, with
//!   automatic fallback between the two transports
//! - Telegram login widget payloads (locally-synthesized session,
//!   persisted across launches)
//! - Direct email/password sign-in and sign-up

mod device;
mod error_messages;
mod manager;
pub mod provider;
pub mod storage;
pub mod types;

pub use device::DeviceClass;
pub use error_messages::user_facing_message;
pub use manager::{AuthConfig, SessionManager};
pub use provider::{
    IdentityProvider, OAuthProviderKind, ProviderError, ProviderErrorCode, ProviderSession,
};
pub use storage::{
    FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, PendingRedirect, SessionStore,
};
pub use types::*;
