//! User-Friendly Error Messages
//!
//! Converts classified provider failures into messages suitable for display
//! in the UI. Each known code maps to one fixed message; unrecognized codes
//! fall back to the provider's raw message when it has one.

use super::provider::ProviderErrorCode;

const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

/// Convert a classified provider failure into a user-facing message
pub fn user_facing_message(code: ProviderErrorCode, raw: &str) -> String {
    match code {
        ProviderErrorCode::PopupClosed => {
            "Sign-in window was closed before finishing. Please try again.".to_string()
        }
        ProviderErrorCode::PopupBlocked => {
            "Sign-in pop-up was blocked by the browser.".to_string()
        }
        ProviderErrorCode::Cancelled => "Sign-in was cancelled.".to_string(),
        ProviderErrorCode::Network => {
            "Network error. Please check your connection and try again.".to_string()
        }
        ProviderErrorCode::TooManyRequests => {
            "Too many attempts. Please wait a moment and try again.".to_string()
        }
        ProviderErrorCode::UserDisabled => {
            "This account has been disabled. Please contact support.".to_string()
        }
        ProviderErrorCode::AccountExistsWithDifferentCredential => {
            "An account already exists with this email but a different sign-in method."
                .to_string()
        }
        ProviderErrorCode::Other => {
            let raw = raw.trim();
            if raw.is_empty() {
                GENERIC_MESSAGE.to_string()
            } else {
                raw.to_string()
            }
        }
    }
}
