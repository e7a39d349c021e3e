//! Event types published by the client core.

/// Authentication lifecycle, broadcast by the [`AuthGuard`](crate::auth::AuthGuard).
///
/// The guard never navigates by itself; the composition root subscribes and
/// routes the user to `redirect_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    /// A request was rejected with 401 and local credentials were cleared.
    SignInRequired {
        redirect_to: String,
        request_url: String,
    },
}

impl AuthEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::SignInRequired { .. } => "sign_in_required",
        }
    }
}
