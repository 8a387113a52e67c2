//! Identity of the signed-in user, supplied by the host application.
//!
//! The core never reads credentials from ambient storage. Whoever builds the
//! client hands it a [`SessionSupplier`], and every request asks it for the
//! current user and bearer token at the moment the request is made.

use std::sync::RwLock;

use shared::domain::UserId;

pub trait SessionSupplier: Send + Sync {
    fn user_id(&self) -> Option<UserId>;
    fn bearer_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user_id: Option<UserId>,
    token: Option<String>,
}

impl StaticSession {
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl SessionSupplier for StaticSession {
    fn user_id(&self) -> Option<UserId> {
        self.user_id.clone()
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    user_id: Option<UserId>,
    token: Option<String>,
}

/// Session that can change after the client is built (sign in / sign out).
#[derive(Debug, Default)]
pub struct SharedSession {
    state: RwLock<SessionState>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>, token: impl Into<String>) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.user_id = Some(user_id.into());
        state.token = Some(token.into());
    }

    pub fn sign_out(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.user_id = None;
        state.token = None;
    }
}

impl SessionSupplier for SharedSession {
    fn user_id(&self) -> Option<UserId> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .user_id
            .clone()
    }

    fn bearer_token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .token
            .clone()
    }
}
