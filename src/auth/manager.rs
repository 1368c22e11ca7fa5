//! Session manager - reconciles every sign-in flow into one canonical session
//!
//! The manager owns the session state and is its only writer. SDK-backed
//! sessions (Google, Facebook, email/password) arrive through the provider's
//! session-change feed; the Telegram session is synthesized locally and
//! persisted through the session store. Consumers read a snapshot or watch
//! for changes; they never mutate state directly.

use super::device::DeviceClass;
use super::error_messages::user_facing_message;
use super::provider::{
    IdentityProvider, OAuthProviderKind, ProviderError, ProviderErrorCode, ProviderSession,
};
use super::storage::{PendingRedirect, SessionStore};
use super::types::{AuthError, AuthProvider, AuthUser, SessionSnapshot, TelegramLoginPayload};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// How long a surfaced error stays visible before auto-clearing
const ERROR_DISPLAY_SECS: u64 = 10;

const GOOGLE_SCOPES: &[&str] = &["profile", "email"];
const FACEBOOK_SCOPES: &[&str] = &["email", "public_profile"];

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// User-agent string inspected to pick the sign-in transport
    pub user_agent: String,
    /// How long `last_error` stays set before auto-clearing
    pub error_display: Duration,
}

impl AuthConfig {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            error_display: Duration::from_secs(ERROR_DISPLAY_SECS),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Canonical session state; only mutated through [`Shared`]
#[derive(Debug, Clone)]
struct SessionState {
    user: Option<AuthUser>,
    loading: bool,
    authenticated: bool,
    last_error: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            user: None,
            loading: true,
            authenticated: false,
            last_error: None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            loading: self.loading,
            authenticated: self.authenticated,
            last_error: self.last_error.clone(),
        }
    }
}

/// State shared between the manager, the session-change listener and the
/// error-expiry timer
struct Shared {
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    store: SessionStore,
    error_display: Duration,
    /// Bumped on every `last_error` write so a superseded timer cannot
    /// clear a newer error
    error_epoch: AtomicU64,
    error_timer: Mutex<Option<JoinHandle<()>>>,
    /// Monotonic token source for writers of the `user` field
    write_seq: AtomicU64,
    /// Token of the newest committed `user` write
    last_user_commit: AtomicU64,
    op_in_flight: AtomicBool,
}

impl Shared {
    /// Mutate state under the lock and publish the resulting snapshot.
    ///
    /// `authenticated` is re-derived here, so it can never diverge from
    /// `user`.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, snap) = {
            let mut state = self.state.lock().unwrap();
            let result = f(&mut state);
            state.authenticated = state.user.is_some();
            (result, state.snapshot())
        };
        self.snapshot_tx.send_replace(snap);
        result
    }

    fn set_loading(&self, loading: bool) {
        self.update(|s| s.loading = loading);
    }

    fn next_write_token(&self) -> u64 {
        self.write_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace `user`, unless a newer writer has already committed.
    fn commit_user(&self, token: u64, user: Option<AuthUser>) -> bool {
        let snap = {
            let mut state = self.state.lock().unwrap();
            if token < self.last_user_commit.load(Ordering::SeqCst) {
                debug!("Discarding stale session write (token {})", token);
                return false;
            }
            self.last_user_commit.store(token, Ordering::SeqCst);
            state.user = user;
            state.authenticated = state.user.is_some();
            state.snapshot()
        };
        self.snapshot_tx.send_replace(snap);
        true
    }

    fn clear_error(&self) {
        self.error_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.error_timer.lock().unwrap().take() {
            timer.abort();
        }
        self.update(|s| s.last_error = None);
    }

    /// Restore the persisted Telegram session if the state is empty and
    /// idle. Re-run after every change to `user` or `loading`.
    fn maybe_restore_local_session(&self) {
        if self.op_in_flight.load(Ordering::SeqCst) {
            return;
        }
        {
            let state = self.state.lock().unwrap();
            if state.user.is_some() || state.loading {
                return;
            }
        }

        let user = match self.store.load_session() {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not read persisted session: {}", e);
                return;
            }
        };

        let token = self.next_write_token();
        let snap = {
            let mut state = self.state.lock().unwrap();
            // Re-check under the lock: a session-change notification may
            // have landed between the emptiness check and now.
            if state.user.is_some()
                || state.loading
                || token < self.last_user_commit.load(Ordering::SeqCst)
            {
                return;
            }
            self.last_user_commit.store(token, Ordering::SeqCst);
            info!("Restored persisted {} session {}", user.provider, user.id);
            state.user = Some(user);
            state.authenticated = true;
            state.snapshot()
        };
        self.snapshot_tx.send_replace(snap);
    }
}

/// Set `last_error` and (re)start its expiry timer.
fn set_error(shared: &Arc<Shared>, message: String) {
    debug!("Surfacing auth error: {}", message);
    let epoch = shared.error_epoch.fetch_add(1, Ordering::SeqCst) + 1;
    shared.update(|s| s.last_error = Some(message));

    let timer_shared = Arc::clone(shared);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(timer_shared.error_display).await;
        if timer_shared.error_epoch.load(Ordering::SeqCst) == epoch {
            debug!("Auth error display window elapsed");
            timer_shared.update(|s| s.last_error = None);
        }
    });
    if let Some(old) = shared.error_timer.lock().unwrap().replace(handle) {
        old.abort();
    }
}

/// Apply one session-change notification from the provider feed.
fn apply_session_change(shared: &Shared, payload: Option<ProviderSession>) {
    let token = shared.next_write_token();
    match payload {
        Some(session) => {
            let user = AuthUser::from_provider_session(&session);
            debug!("Session change: {} via {}", user.id, user.provider);
            shared.commit_user(token, Some(user));
        }
        None => {
            debug!("Session change: no active session");
            if shared.commit_user(token, None) {
                // The slot may hold a Telegram session that should take
                // over now that the SDK reports none.
                shared.maybe_restore_local_session();
            }
        }
    }
}

/// Single-flight marker for the current operation
struct OpGuard<'a> {
    shared: &'a Shared,
}

impl Shared {
    fn begin_operation(&self) -> Result<OpGuard<'_>, AuthError> {
        if self
            .op_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejecting overlapping auth operation");
            return Err(AuthError::OperationInProgress);
        }
        Ok(OpGuard { shared: self })
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.shared.op_in_flight.store(false, Ordering::SeqCst);
        // The operation may have left the state empty and idle
        self.shared.maybe_restore_local_session();
    }
}

/// Owns all authentication state and exposes the sign-in operations
pub struct SessionManager {
    shared: Arc<Shared>,
    provider: Arc<dyn IdentityProvider>,
    device: DeviceClass,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Start the manager: subscribe to session changes, complete any
    /// pending redirect sign-in, then resolve the initial loading state.
    ///
    /// The redirect-result check fails soft: its errors surface through
    /// `last_error` without blocking startup.
    pub async fn start(
        provider: Arc<dyn IdentityProvider>,
        store: SessionStore,
        config: AuthConfig,
    ) -> Self {
        let device = DeviceClass::classify(&config.user_agent);
        info!("Starting session manager ({:?} device)", device);

        let state = SessionState::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            snapshot_tx,
            store,
            error_display: config.error_display,
            error_epoch: AtomicU64::new(0),
            error_timer: Mutex::new(None),
            write_seq: AtomicU64::new(0),
            last_user_commit: AtomicU64::new(0),
            op_in_flight: AtomicBool::new(false),
        });

        // Long-lived session-change subscription, held until shutdown
        let mut rx = provider.subscribe();
        let (first_tx, first_rx) = oneshot::channel();
        let listener_shared = Arc::clone(&shared);
        let listener = tokio::spawn(async move {
            let mut first = Some(first_tx);
            loop {
                match rx.recv().await {
                    Some(payload) => {
                        apply_session_change(&listener_shared, payload);
                        if let Some(tx) = first.take() {
                            let _ = tx.send(());
                        }
                    }
                    None => {
                        debug!("Session-change feed closed");
                        if let Some(tx) = first.take() {
                            let _ = tx.send(());
                        }
                        break;
                    }
                }
            }
        });

        match shared.store.load_pending_redirect() {
            Ok(Some(pending)) => {
                info!(
                    "Completing {} redirect sign-in started at {}",
                    pending.provider, pending.started_at
                );
                if let Err(e) = shared.store.clear_pending_redirect() {
                    warn!("Could not clear redirect marker: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read redirect marker: {}", e),
        }

        match provider.redirect_result().await {
            Ok(Some(session)) => {
                // The session itself arrives through the change feed
                info!("Redirect sign-in completed for {}", session.uid);
            }
            Ok(None) => debug!("No pending redirect result"),
            Err(e) => {
                warn!("Redirect result check failed: {}", e);
                set_error(&shared, user_facing_message(e.code, &e.message));
            }
        }

        // First session-change notification resolves the initial state
        let _ = first_rx.await;

        shared.set_loading(false);
        shared.maybe_restore_local_session();
        info!(
            "Session manager ready (authenticated: {})",
            shared.state.lock().unwrap().authenticated
        );

        Self {
            shared,
            provider,
            device,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Sign in with Google via pop-up or redirect, depending on device.
    pub async fn sign_in_with_google(&self) -> Result<(), AuthError> {
        self.oauth_sign_in(OAuthProviderKind::Google, GOOGLE_SCOPES)
            .await
    }

    /// Sign in with Facebook via pop-up or redirect, depending on device.
    pub async fn sign_in_with_facebook(&self) -> Result<(), AuthError> {
        self.oauth_sign_in(OAuthProviderKind::Facebook, FACEBOOK_SCOPES)
            .await
    }

    async fn oauth_sign_in(
        &self,
        kind: OAuthProviderKind,
        scopes: &[&str],
    ) -> Result<(), AuthError> {
        let _op = self.shared.begin_operation()?;
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        info!("Signing in with {} ({:?} transport rules)", kind, self.device);
        self.shared.set_loading(true);

        if self.device.is_mobile() {
            // Pop-ups are unreliable on mobile browsers; go straight to the
            // redirect transport. Loading stays set: the startup sequence
            // after the reload clears it.
            return self.redirect_sign_in(kind, &scopes, false).await;
        }

        match self.provider.sign_in_with_popup(kind, &scopes).await {
            Ok(session) => {
                // The session arrives via the change feed; the explicit
                // result is only confirmation.
                info!("{} pop-up sign-in confirmed for {}", kind, session.uid);
                self.shared.clear_error();
                self.shared.set_loading(false);
                Ok(())
            }
            Err(e)
                if matches!(
                    e.code,
                    ProviderErrorCode::PopupClosed | ProviderErrorCode::PopupBlocked
                ) =>
            {
                info!("{} pop-up unavailable ({}), falling back to redirect", kind, e.code);
                self.redirect_sign_in(kind, &scopes, true).await
            }
            Err(e) => {
                error!("{} sign-in failed: {}", kind, e);
                self.surface_error(e)
            }
        }
    }

    async fn redirect_sign_in(
        &self,
        kind: OAuthProviderKind,
        scopes: &[String],
        clear_loading: bool,
    ) -> Result<(), AuthError> {
        let pending = PendingRedirect::new(AuthProvider::from(kind), scopes.to_vec());
        if let Err(e) = self.shared.store.save_pending_redirect(&pending) {
            // Sign-in can still proceed; the marker is informational
            warn!("Could not persist redirect marker: {}", e);
        }

        match self.provider.sign_in_with_redirect(kind, scopes).await {
            Ok(()) => {
                info!("{} redirect sign-in initiated", kind);
                if clear_loading {
                    self.shared.set_loading(false);
                }
                Ok(())
            }
            Err(e) => {
                if let Err(clear_err) = self.shared.store.clear_pending_redirect() {
                    warn!("Could not clear redirect marker: {}", clear_err);
                }
                error!("{} redirect sign-in failed: {}", kind, e);
                self.surface_error(e)
            }
        }
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _op = self.shared.begin_operation()?;
        info!("Signing in with email: {}", email);
        self.shared.set_loading(true);

        match self.provider.sign_in_with_password(email, password).await {
            Ok(session) => {
                info!("Email sign-in confirmed for {}", session.uid);
                self.shared.set_loading(false);
                Ok(())
            }
            Err(e) => {
                error!("Email sign-in failed: {}", e);
                self.surface_error(e)
            }
        }
    }

    /// Create an account, then set its display name as a second step.
    ///
    /// A failure between the two steps leaves an account with no display
    /// name; it is surfaced, not retried.
    pub async fn sign_up_with_email(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(), AuthError> {
        let _op = self.shared.begin_operation()?;
        info!("Creating account for {}", email);
        self.shared.set_loading(true);

        let session = match self.provider.sign_up(email, password).await {
            Ok(session) => session,
            Err(e) => {
                error!("Sign-up failed: {}", e);
                return self.surface_error(e);
            }
        };

        if let Err(e) = self.provider.update_display_name(display_name).await {
            error!(
                "Account {} created but display name update failed: {}",
                session.uid, e
            );
            return self.surface_error(e);
        }

        info!("Account created for {} ({})", email, session.uid);
        self.shared.set_loading(false);
        Ok(())
    }

    /// Sign in with a Telegram login widget payload.
    ///
    /// The synthesized session bypasses the provider feed entirely: it is
    /// committed straight into the session state and persisted locally. The
    /// payload is trusted as-is (see [`AuthUser::from_telegram`]).
    pub async fn sign_in_with_telegram(
        &self,
        payload: TelegramLoginPayload,
    ) -> Result<(), AuthError> {
        let _op = self.shared.begin_operation()?;
        let token = self.shared.next_write_token();
        info!("Signing in with Telegram (id {})", payload.id);
        self.shared.set_loading(true);

        let user = match AuthUser::from_telegram(&payload) {
            Ok(user) => user,
            Err(e) => {
                error!("Rejected Telegram payload: {}", e);
                set_error(&self.shared, e.to_string());
                self.shared.set_loading(false);
                return Err(e);
            }
        };

        self.shared.commit_user(token, Some(user.clone()));
        let persisted = self.shared.store.store_session(&user);
        self.shared.set_loading(false);

        match persisted {
            Ok(()) => {
                info!("Telegram session established for {}", user.id);
                Ok(())
            }
            Err(e) => {
                // The in-memory session stays; it just won't survive a restart
                warn!("Telegram session active but not persisted: {}", e);
                set_error(&self.shared, e.to_string());
                Err(e)
            }
        }
    }

    /// Sign out of the current session.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _op = self.shared.begin_operation()?;
        let token = self.shared.next_write_token();
        self.shared.set_loading(true);

        let current = self.shared.state.lock().unwrap().user.clone();
        match current {
            Some(user) if user.provider == AuthProvider::Telegram => {
                // Locally-synthesized session: nothing to tell the SDK
                info!("Signing out Telegram session {}", user.id);
                if let Err(e) = self.shared.store.clear_session() {
                    warn!("Could not clear persisted session: {}", e);
                }
                self.shared.commit_user(token, None);
                self.shared.set_loading(false);
                Ok(())
            }
            _ => {
                info!("Signing out via identity provider");
                match self.provider.sign_out().await {
                    Ok(()) => {
                        // State clears through the resulting None notification
                        self.shared.set_loading(false);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Provider sign-out failed: {}", e);
                        self.surface_error(e)
                    }
                }
            }
        }
    }

    /// Map a provider failure, publish it, and hand it to the caller.
    fn surface_error(&self, err: ProviderError) -> Result<(), AuthError> {
        let message = user_facing_message(err.code, &err.message);
        set_error(&self.shared, message.clone());
        self.shared.set_loading(false);
        Err(AuthError::Provider {
            code: err.code,
            message,
        })
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().unwrap().snapshot()
    }

    /// Watch for session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.shared.state.lock().unwrap().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.state.lock().unwrap().authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.lock().unwrap().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().unwrap().last_error.clone()
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device
    }

    /// Stop the session-change listener and any pending error timer.
    ///
    /// Also runs on drop; afterwards the manager no longer reacts to
    /// provider notifications.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().unwrap().take() {
            info!("Session manager shutting down");
            listener.abort();
        }
        if let Some(timer) = self.shared.error_timer.lock().unwrap().take() {
            timer.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
