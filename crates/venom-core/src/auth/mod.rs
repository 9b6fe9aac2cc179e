//! Authentication: a backend trait, the Firebase REST backend, and the
//! [`AuthSession`] that tracks the signed-in user and notifies subscribers.

mod firebase;

pub use firebase::FirebaseAuth;

use crate::error::AuthError;
use crate::store::ProfileStore;
use crate::types::{AuthUser, ProfileUpdate, UserProfile};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Identity provider.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;
    async fn sign_out(&self, user: &AuthUser) -> Result<(), AuthError>;
}

/// `{success, error?}` result of an auth session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl AuthOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(err: &AuthError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
        }
    }
}

type Listener = Arc<dyn Fn(Option<&AuthUser>) + Send + Sync>;
type Listeners = DashMap<u64, Listener>;

/// Handle returned by [`AuthSession::subscribe`]. Dropping it also unsubscribes.
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(&self.id);
        }
    }
}

#[derive(Debug, Default)]
struct AuthState {
    user: Option<AuthUser>,
    profile: Option<UserProfile>,
    is_loading: bool,
    error: Option<String>,
}

pub struct AuthSession {
    backend: Arc<dyn AuthBackend>,
    profiles: Arc<dyn ProfileStore>,
    state: RwLock<AuthState>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
}

impl AuthSession {
    pub fn new(backend: Arc<dyn AuthBackend>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            backend,
            profiles,
            state: RwLock::new(AuthState::default()),
            listeners: Arc::new(DashMap::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub async fn user(&self) -> Option<AuthUser> {
        self.state.read().await.user.clone()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.state.read().await.profile.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    /// Registers `callback` for sign-in/sign-out changes. It is called once
    /// right away with the current user.
    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&AuthUser>) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(callback);
        self.listeners.insert(id, listener.clone());
        let current = self.user().await;
        listener(current.as_ref());
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Creates the account and its profile record, then signs in as it.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        extra: BTreeMap<String, serde_json::Value>,
    ) -> AuthOutcome {
        self.begin().await;
        let result = async {
            let user = self.backend.sign_up(email, password).await?;
            let mut profile = UserProfile::new(email);
            profile.extra = extra;
            self.profiles
                .create_or_update_user(&user.uid, profile.clone())
                .await?;
            Ok::<_, AuthError>((user, Some(profile)))
        }
        .await;
        self.finish(result, "📝 Signed up").await
    }

    /// Signs in and loads the stored profile.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthOutcome {
        self.begin().await;
        let result = async {
            let user = self.backend.sign_in(email, password).await?;
            let profile = self.profiles.get_user_profile(&user.uid).await?;
            Ok::<_, AuthError>((user, profile))
        }
        .await;
        self.finish(result, "🔑 Signed in").await
    }

    pub async fn sign_out(&self) -> AuthOutcome {
        let Some(user) = self.user().await else {
            return AuthOutcome::ok();
        };
        if let Err(e) = self.backend.sign_out(&user).await {
            warn!(error = %e, "sign-out rejected by backend");
            self.state.write().await.error = Some(e.to_string());
            return AuthOutcome::failed(&e);
        }
        *self.state.write().await = AuthState::default();
        info!(uid = %user.uid, "👋 Signed out");
        self.notify(None);
        AuthOutcome::ok()
    }

    /// Merges `update` into the signed-in user's profile.
    pub async fn update_profile(&self, update: ProfileUpdate) -> AuthOutcome {
        let Some(user) = self.user().await else {
            return AuthOutcome::failed(&AuthError::NotSignedIn);
        };
        let mut incoming = UserProfile::new(user.email.clone());
        incoming.display_name = update.display_name;
        incoming.extra = update.extra;
        incoming.updated_at = Some(Utc::now());

        let result = async {
            self.profiles.create_or_update_user(&user.uid, incoming).await?;
            Ok::<_, AuthError>(self.profiles.get_user_profile(&user.uid).await?)
        }
        .await;
        let mut state = self.state.write().await;
        match result {
            Ok(profile) => {
                state.profile = profile;
                state.error = None;
                AuthOutcome::ok()
            }
            Err(e) => {
                state.error = Some(e.to_string());
                AuthOutcome::failed(&e)
            }
        }
    }

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error = None;
    }

    async fn finish(
        &self,
        result: Result<(AuthUser, Option<UserProfile>), AuthError>,
        action: &str,
    ) -> AuthOutcome {
        let mut state = self.state.write().await;
        state.is_loading = false;
        match result {
            Ok((user, profile)) => {
                info!(uid = %user.uid, "{}", action);
                state.user = Some(user.clone());
                state.profile = profile;
                drop(state);
                self.notify(Some(&user));
                AuthOutcome::ok()
            }
            Err(e) => {
                warn!(error = %e, "auth operation failed");
                state.error = Some(e.to_string());
                AuthOutcome::failed(&e)
            }
        }
    }

    fn notify(&self, user: Option<&AuthUser>) {
        let listeners: Vec<Listener> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            listener(user);
        }
    }
}
