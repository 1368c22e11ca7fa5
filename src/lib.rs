//! Parlor Core Library
//!
//! Client-side session state for the Parlor app: authentication via
//! Google, Facebook, Telegram and email/password, reconciled into one
//! consistent session model. Used by the desktop and web shells.

pub mod auth;

// Re-export the surface most consumers need
pub use auth::AuthConfig;
pub use auth::AuthError;
pub use auth::AuthProvider;
pub use auth::AuthUser;
pub use auth::SessionManager;
pub use auth::SessionSnapshot;
pub use auth::TelegramLoginPayload;
