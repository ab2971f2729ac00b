//! # Auth store
//!
//! Holds who is signed in for the whole process and mirrors the identity provider's change
//! notifications to any page that subscribed.
//!
//! ## Sign-in
//! 1. [`AuthStore::sign_in_with_google`] returns the authorize url plus the PKCE verifier
//! 2. The browser comes back to the loopback callback with a code
//! 3. [`AuthStore::complete_sign_in`] trades the code for a session and writes it to disk
//!
//! ## Notes
//! - `check_user` is skipped while another check is running.
//! - Repeated notifications are dropped unless they are a sign-in or a sign-out.
use std::{path::PathBuf, sync::Arc};

use remote::{
    auth::{AuthEvent, IdentityProvider, OAuthProvider, Pkce},
    models::{Session, User},
};
use tokio::{
    fs,
    sync::{Mutex, broadcast},
};
use tracing::{debug, error, info};

use crate::error::AppError;

const EVENT_CAPACITY: usize = 16;

/// The persisted session, one JSON document.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Option<Session>, AppError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, session: &Session) -> Result<(), AppError> {
        let contents = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, contents).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuthState {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub is_loading: bool,
    pub is_checking_user: bool,
    pub error: Option<String>,
    last_event: Option<AuthEvent>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Everything needed to finish a sign-in started with [`AuthStore::sign_in_with_google`].
#[derive(Clone, Debug)]
pub struct PendingSignIn {
    pub url: String,
    pub verifier: String,
}

pub struct AuthStore {
    identity: Arc<dyn IdentityProvider>,
    file: SessionFile,
    state: Mutex<AuthState>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthStore {
    pub fn new(identity: Arc<dyn IdentityProvider>, file: SessionFile) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            identity,
            file,
            state: Mutex::new(AuthState::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> AuthState {
        self.state.lock().await.clone()
    }

    pub async fn user(&self) -> Option<User> {
        self.state.lock().await.user.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|s| s.access_token.clone())
    }

    /// Picks up the session left on disk by a previous run.
    pub async fn initialize(&self) -> Result<(), AppError> {
        let session = self.file.load().await?;
        {
            let mut state = self.state.lock().await;
            state.user = session.as_ref().map(|s| s.user.clone());
            state.session = session;
        }

        self.on_auth_event(AuthEvent::InitialSession).await;
        self.check_user().await;

        Ok(())
    }

    pub async fn sign_in_with_google(&self, redirect_to: &str) -> Result<PendingSignIn, AppError> {
        info!("Starting Google sign in");
        {
            let mut state = self.state.lock().await;
            state.is_loading = true;
            state.error = None;
        }

        let pkce = Pkce::generate();
        match self
            .identity
            .authorize_url(OAuthProvider::Google, redirect_to, &pkce.challenge)
        {
            Ok(url) => Ok(PendingSignIn {
                url,
                verifier: pkce.verifier,
            }),
            Err(e) => {
                error!("Google sign in error: {e}");
                let mut state = self.state.lock().await;
                state.error = Some(e.to_string());
                state.is_loading = false;
                Err(e.into())
            }
        }
    }

    pub async fn complete_sign_in(
        &self,
        pending: PendingSignIn,
        code: &str,
    ) -> Result<User, AppError> {
        let result = self.exchange(&pending, code).await;

        let mut state = self.state.lock().await;
        state.is_loading = false;

        match result {
            Ok(session) => {
                let user = session.user.clone();
                state.user = Some(user.clone());
                state.session = Some(session);
                drop(state);

                self.on_auth_event(AuthEvent::SignedIn).await;
                Ok(user)
            }
            Err(e) => {
                error!("Google sign in error: {e}");
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn exchange(&self, pending: &PendingSignIn, code: &str) -> Result<Session, AppError> {
        let session = self.identity.exchange_code(code, &pending.verifier).await?;
        self.file.save(&session).await?;
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), AppError> {
        info!("Starting sign out");
        let token = {
            let mut state = self.state.lock().await;
            state.is_loading = true;
            state.error = None;
            state.session.as_ref().map(|s| s.access_token.clone())
        };

        let result = self.revoke(token.as_deref()).await;

        let mut state = self.state.lock().await;
        state.is_loading = false;

        match result {
            Ok(()) => {
                state.user = None;
                state.session = None;
                drop(state);

                self.on_auth_event(AuthEvent::SignedOut).await;
                Ok(())
            }
            Err(e) => {
                error!("Sign out error: {e}");
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn revoke(&self, token: Option<&str>) -> Result<(), AppError> {
        if let Some(token) = token {
            self.identity.sign_out(token).await?;
        }
        self.file.clear().await
    }

    /// Asks the identity provider who the current token belongs to.
    pub async fn check_user(&self) {
        let token = {
            let mut state = self.state.lock().await;
            if state.is_checking_user {
                debug!("Already checking user, skipping");
                return;
            }
            state.is_checking_user = true;
            state.error = None;
            state.session.as_ref().map(|s| s.access_token.clone())
        };

        let result = match token {
            Some(token) => self.identity.get_user(&token).await,
            None => Ok(None),
        };

        let mut state = self.state.lock().await;
        match result {
            Ok(new_user) => {
                let changed = state.user.as_ref().map(|u| &u.id) != new_user.as_ref().map(|u| &u.id);
                if changed {
                    debug!("Updating user state");
                    if new_user.is_none() {
                        state.session = None;
                    }
                    state.user = new_user;
                }
            }
            Err(e) => {
                error!("Auth error: {e}");
                state.error = Some(e.to_string());
                state.user = None;
            }
        }
        state.is_checking_user = false;
    }

    /// Mirrors a change notification. Returns false when the event was dropped as a repeat.
    pub async fn on_auth_event(&self, event: AuthEvent) -> bool {
        let significant = matches!(event, AuthEvent::SignedIn | AuthEvent::SignedOut);
        {
            let mut state = self.state.lock().await;
            if state.last_event == Some(event) && !significant {
                return false;
            }
            state.last_event = Some(event);
        }

        debug!("Auth state changed: {event:?}");
        // No subscribers is fine.
        let _ = self.events.send(event);

        if significant {
            self.check_user().await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use remote::fake::FakeIdentity;

    use super::*;

    fn store(dir: &tempfile::TempDir) -> (Arc<FakeIdentity>, AuthStore) {
        let identity = Arc::new(FakeIdentity::new(FakeIdentity::user(
            "user-1",
            "ana@example.com",
        )));
        let store = AuthStore::new(
            identity.clone(),
            SessionFile::new(dir.path().join("session.json")),
        );
        (identity, store)
    }

    #[tokio::test]
    async fn test_sign_in_persists_session() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store(&dir);
        let mut events = store.subscribe();

        let pending = store.sign_in_with_google("http://127.0.0.1/callback").await.unwrap();
        assert!(store.snapshot().await.is_loading);
        assert!(pending.url.contains("provider=google"));

        let user = store.complete_sign_in(pending, "code").await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn);

        let state = store.snapshot().await;
        assert!(state.is_authenticated());
        assert!(!state.is_loading);

        let saved = SessionFile::new(dir.path().join("session.json"))
            .load()
            .await
            .unwrap();
        assert_eq!(saved.map(|s| s.user.id), Some("user-1".to_string()));
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (identity, store) = store(&dir);

        let pending = store.sign_in_with_google("http://127.0.0.1/callback").await.unwrap();
        store.complete_sign_in(pending, "code").await.unwrap();
        store.sign_out().await.unwrap();

        assert!(store.user().await.is_none());
        assert!(store.access_token().await.is_none());
        assert_eq!(identity.sign_outs(), 1);
        assert!(!dir.path().join("session.json").exists());
    }

    #[tokio::test]
    async fn test_failed_exchange_stores_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store(&dir);

        let pending = store.sign_in_with_google("http://127.0.0.1/callback").await.unwrap();
        assert!(store.complete_sign_in(pending, "").await.is_err());

        let state = store.snapshot().await;
        assert!(state.error.is_some());
        assert!(!state.is_loading);
        assert!(state.user.is_none());
    }

    #[tokio::test]
    async fn test_revoked_token_signs_user_out() {
        let dir = tempfile::tempdir().unwrap();
        let (identity, store) = store(&dir);

        let pending = store.sign_in_with_google("http://127.0.0.1/callback").await.unwrap();
        store.complete_sign_in(pending, "code").await.unwrap();

        identity.revoke(&store.access_token().await.unwrap());
        store.check_user().await;

        assert!(store.user().await.is_none());
    }

    #[tokio::test]
    async fn test_check_user_skipped_while_checking() {
        let dir = tempfile::tempdir().unwrap();
        let (identity, store) = store(&dir);

        store.state.lock().await.is_checking_user = true;
        store.check_user().await;

        assert_eq!(identity.lookups(), 0);
    }

    #[tokio::test]
    async fn test_repeated_events_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store(&dir);

        assert!(store.on_auth_event(AuthEvent::TokenRefreshed).await);
        assert!(!store.on_auth_event(AuthEvent::TokenRefreshed).await);
        assert!(store.on_auth_event(AuthEvent::SignedOut).await);
        assert!(store.on_auth_event(AuthEvent::SignedOut).await);
    }

    #[tokio::test]
    async fn test_initialize_restores_session() {
        let dir = tempfile::tempdir().unwrap();
        let (_, first) = store(&dir);
        let pending = first.sign_in_with_google("http://127.0.0.1/callback").await.unwrap();
        first.complete_sign_in(pending, "code").await.unwrap();

        // Same identity service, new process.
        let second = AuthStore::new(
            first.identity.clone(),
            SessionFile::new(dir.path().join("session.json")),
        );
        second.initialize().await.unwrap();

        assert_eq!(second.user().await.map(|u| u.id), Some("user-1".to_string()));
    }
}
