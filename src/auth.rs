//! Sessions — sign-in/out, current session, auth-state subscription, and the
//! route guard that sends signed-out visitors to the login screen.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, AuthError};
use crate::store::Backend;

/// An authenticated session issued by the backend.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Current authentication state, as broadcast to subscribers.
#[derive(Debug, Clone, Default)]
pub enum AuthState {
    #[default]
    SignedOut,
    SignedIn(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::SignedIn(session) if !session.is_expired() => Some(session),
            _ => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.session().is_some()
    }
}

/// Client routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Board,
    Documents,
}

/// Route guard: every route but login requires a live session.
pub fn guard(route: Route, state: &AuthState) -> Route {
    match route {
        Route::Login => Route::Login,
        _ if state.is_signed_in() => route,
        _ => Route::Login,
    }
}

/// Owns the auth state and publishes changes over a watch channel.
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    tx: watch::Sender<AuthState>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (tx, _rx) = watch::channel(AuthState::SignedOut);
        Self { backend, tx }
    }

    /// Sign in with email + password.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        match self.backend.sign_in(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user_id, "Signed in");
                self.tx.send_replace(AuthState::SignedIn(session.clone()));
                Ok(session)
            }
            Err(ApiError::Unauthorized(reason)) => {
                warn!(email = %email, reason = %reason, "Sign-in rejected");
                Err(AuthError::InvalidCredentials)
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                Err(AuthError::Backend(e))
            }
        }
    }

    /// Sign out. Local state is cleared even if the backend call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.backend.sign_out().await;
        self.tx.send_replace(AuthState::SignedOut);
        match result {
            Ok(()) => {
                info!("Signed out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Sign-out request failed; local session dropped anyway");
                Err(AuthError::Backend(e))
            }
        }
    }

    /// Current live session, if any.
    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().session().cloned()
    }

    /// Current session or `NotSignedIn`.
    pub fn require(&self) -> Result<Session, AuthError> {
        self.current().ok_or(AuthError::NotSignedIn)
    }

    /// Subscribe to auth state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    /// Resolve where a navigation to `route` should land.
    pub fn navigate(&self, route: Route) -> Route {
        guard(route, &self.tx.borrow())
    }
}
