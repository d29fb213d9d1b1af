//! Per-page session gate.
//!
//! Every page instance owns one `SessionGuard`. A login page either sends an
//! already signed-in user home or shows the form. A protected page checks
//! the stored credential locally, then verifies it with exactly one call to
//! the identity endpoint before its content may render. Any failure ends the
//! session; cancellation (page teardown) never does.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::{is_expired, SessionProfile, TokenStore};

// ============================================================================
// Routes and states
// ============================================================================

/// Navigation targets driven by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Home => "/",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Which kind of page the guard is protecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Login,
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Redirecting(Route),
    Authenticated(SessionProfile),
    LoginForm,
}

/// Result of driving the gate once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The gate reached this state
    Settled(GuardState),
    /// The page was torn down first; nothing was changed
    Cancelled,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Owner side of a page's cancellation scope.
///
/// Call `cancel` on teardown. Dropping every handle also counts as teardown.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

/// Guard side of a page's cancellation scope
pub struct CancellationReceiver {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (CancellationToken, CancellationReceiver) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, CancellationReceiver { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancellationReceiver {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the scope is cancelled or its owner is gone
    pub async fn cancelled(&mut self) {
        // Err means every token was dropped
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

// ============================================================================
// Identity verification
// ============================================================================

/// Server-side check of a credential
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<SessionProfile, ApiError>;
}

#[async_trait]
impl IdentityVerifier for ApiClient {
    async fn verify(&self, token: &str) -> Result<SessionProfile, ApiError> {
        self.fetch_me(token).await
    }
}

// ============================================================================
// Guard
// ============================================================================

pub struct SessionGuard<V> {
    store: Arc<dyn TokenStore>,
    verifier: V,
    page: PageKind,
    skew_secs: i64,
    state: GuardState,
    verification_started: bool,
}

impl<V> SessionGuard<V> {
    pub fn new(store: Arc<dyn TokenStore>, verifier: V, page: PageKind, skew_secs: i64) -> Self {
        Self {
            store,
            verifier,
            page,
            skew_secs: skew_secs.max(0),
            state: GuardState::Checking,
            verification_started: false,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub fn page(&self) -> PageKind {
        self.page
    }

    /// Verified identity, while authenticated
    pub fn profile(&self) -> Option<&SessionProfile> {
        match &self.state {
            GuardState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// Evaluate the login page gate. Never touches the network.
    ///
    /// A stored, locally valid credential sends the user home; anything
    /// else shows the form.
    pub fn run_login_page(&mut self) -> GuardOutcome {
        if self.state != GuardState::Checking {
            return GuardOutcome::Settled(self.state.clone());
        }

        let token = self.store.get();
        if token.is_some() && !is_expired(token.as_deref(), self.skew_secs) {
            debug!("Already signed in, leaving login page");
            self.settle(GuardState::Redirecting(Route::Home))
        } else {
            self.settle(GuardState::LoginForm)
        }
    }

    /// Clear the credential and send the user to the login page.
    ///
    /// Valid from any state; repeated calls have no further effect.
    pub fn logout(&mut self) -> &GuardState {
        self.store.clear();
        self.state = GuardState::Redirecting(Route::Login);
        &self.state
    }

    /// Store a credential issued by the login flow and go home.
    ///
    /// Replaces any previous credential wholesale.
    pub fn complete_login(&mut self, token: &str) -> &GuardState {
        self.store.set(token);
        self.state = GuardState::Redirecting(Route::Home);
        &self.state
    }

    /// Local half of the protected-page gate. Never touches the network.
    ///
    /// Settles on `/login` (clearing the store) and returns the outcome when
    /// the stored credential is missing or locally expired. Returns `None`
    /// when the credential still has to be verified by `run`.
    pub fn run_local_checks(&mut self) -> Option<GuardOutcome> {
        if self.state != GuardState::Checking {
            return Some(GuardOutcome::Settled(self.state.clone()));
        }
        self.screen_credential().err()
    }

    fn screen_credential(&mut self) -> Result<String, GuardOutcome> {
        match self.store.get() {
            Some(token) if !is_expired(Some(token.as_str()), self.skew_secs) => Ok(token),
            Some(_) => {
                info!("Stored credential expired, signing out");
                Err(self.end_session())
            }
            None => {
                debug!("No stored credential");
                Err(self.end_session())
            }
        }
    }

    fn end_session(&mut self) -> GuardOutcome {
        self.store.clear();
        self.settle(GuardState::Redirecting(Route::Login))
    }

    fn settle(&mut self, state: GuardState) -> GuardOutcome {
        self.state = state;
        GuardOutcome::Settled(self.state.clone())
    }
}

impl<V: IdentityVerifier> SessionGuard<V> {
    /// Evaluate the gate for this page instance.
    ///
    /// Runs at most one identity verification over the life of the
    /// instance. Once settled, further calls return the current state.
    pub async fn run(&mut self, cancel: &mut CancellationReceiver) -> GuardOutcome {
        if self.state != GuardState::Checking {
            return GuardOutcome::Settled(self.state.clone());
        }
        if self.verification_started || cancel.is_cancelled() {
            return GuardOutcome::Cancelled;
        }

        match self.page {
            PageKind::Login => self.run_login_page(),
            PageKind::Protected => self.run_protected_page(cancel).await,
        }
    }

    async fn run_protected_page(&mut self, cancel: &mut CancellationReceiver) -> GuardOutcome {
        let token = match self.screen_credential() {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };

        self.verification_started = true;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Page torn down during verification");
                return GuardOutcome::Cancelled;
            }
            result = self.verifier.verify(&token) => result,
        };

        // A response that lands after teardown must not commit
        if cancel.is_cancelled() {
            debug!("Discarding verification result for torn-down page");
            return GuardOutcome::Cancelled;
        }

        match result {
            Ok(profile) => {
                info!(username = %profile.username, "Session verified");
                self.settle(GuardState::Authenticated(profile))
            }
            Err(ApiError::Unauthorized) => {
                info!("Credential rejected by backend, signing out");
                self.end_session()
            }
            Err(e) => {
                warn!(error = %e, "Session verification failed, signing out");
                self.end_session()
            }
        }
    }
}
