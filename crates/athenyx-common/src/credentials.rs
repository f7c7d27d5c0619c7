//! Bearer-token store shared by every outbound call.
//!
//! Single writer (login, logout, or the gateway observing a 401), many
//! readers. Readers fetch the token per call and never cache a copy, so a
//! refresh takes effect on the very next request.

use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, RwLock};

/// Cloneable handle to the process-wide access token.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<SecretString>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token (login already happened).
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    /// Replace the stored token. Called on login and on refresh.
    pub fn set(&self, token: impl Into<String>) {
        let mut guard = self.inner.write().expect("token lock poisoned");
        *guard = Some(SecretString::from(token.into()));
    }

    /// Drop the stored token. Called on logout and on session expiry.
    pub fn clear(&self) {
        let mut guard = self.inner.write().expect("token lock poisoned");
        *guard = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().expect("token lock poisoned").is_some()
    }

    /// Current token for an `Authorization: Bearer` header, if any.
    pub fn bearer(&self) -> Option<String> {
        self.inner
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .map(|secret| secret.expose_secret().to_string())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
