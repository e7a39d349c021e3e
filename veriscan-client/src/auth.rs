//! Bearer credential handling for outbound requests.
//!
//! Every non-exempt request reads the current token from the
//! [`CredentialStore`] at send time. A 401 on a non-exempt request clears
//! the stored credentials and publishes [`AuthEvent::SignInRequired`] once.

use crate::events::AuthEvent;
use crate::persistence::{CredentialStore, PersistenceError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use veriscan_core::{ApiError, RequestDescriptor, AUTHORIZATION_HEADER};

const EVENT_CAPACITY: usize = 64;

/// Credentials in effect for one request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub token: Option<String>,
}

impl AuthContext {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {token}"))
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub struct AuthGuard {
    store: Arc<dyn CredentialStore>,
    events: broadcast::Sender<AuthEvent>,
    sign_in_path: String,
}

impl AuthGuard {
    pub fn new(store: Arc<dyn CredentialStore>, sign_in_path: impl Into<String>) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            events,
            sign_in_path: sign_in_path.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    /// Read the current context. A failing store reads as signed out.
    pub fn context(&self) -> AuthContext {
        match self.store.token() {
            Ok(token) => AuthContext { token },
            Err(err) => {
                warn!(error = %err, "Failed to read stored credentials");
                AuthContext::default()
            }
        }
    }

    pub fn user(&self) -> Option<Value> {
        self.store.user().ok().flatten()
    }

    pub fn sign_in(&self, token: &str, user: Option<&Value>) -> Result<(), PersistenceError> {
        self.store.save(token, user)?;
        info!("Signed in");
        self.publish(AuthEvent::SignedIn);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), PersistenceError> {
        self.store.clear()?;
        info!("Signed out");
        self.publish(AuthEvent::SignedOut);
        Ok(())
    }

    /// Attach `Authorization: Bearer <token>` when a token is present; omit it otherwise.
    pub fn authorize(&self, request: &mut RequestDescriptor) {
        if request.skip_auth {
            request.remove_header(AUTHORIZATION_HEADER);
            return;
        }
        match self.context().bearer() {
            Some(bearer) => request.set_header(AUTHORIZATION_HEADER, bearer),
            None => request.remove_header(AUTHORIZATION_HEADER),
        }
    }

    /// React to the final outcome of a request. Call once per request.
    /// Returns whether credentials were torn down.
    pub fn observe<T>(&self, request: &RequestDescriptor, result: &Result<T, ApiError>) -> bool {
        match result {
            Err(err) if err.is_unauthorized() && !request.skip_auth => {
                self.handle_unauthorized(request);
                true
            }
            _ => false,
        }
    }

    fn handle_unauthorized(&self, request: &RequestDescriptor) {
        warn!(url = %request.url, "Request rejected with 401, clearing credentials");
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Failed to clear stored credentials");
        }
        self.publish(AuthEvent::SignInRequired {
            redirect_to: self.sign_in_path.clone(),
            request_url: request.url.clone(),
        });
    }

    fn publish(&self, event: AuthEvent) {
        let event_type = event.event_type();
        match self.events.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "Published auth event"),
            Err(_) => debug!(event_type, "No receivers for auth event"),
        }
    }
}
