//! Session state machine: login, logout, impersonation and the "who am I"
//! resolution that derives the current user from the stored token.
//!
//! State is observable through a `watch` snapshot; navigation side effects
//! (the browser app's router pushes) are emitted as [`SessionEvent`]s on an
//! unbounded channel consumed by the front-end.

use crate::client::services::api_client::ApiClient;
use crate::client::utils::token_store::{TokenSlot, TokenStore};
use crate::common::models::{LoginResponse, User};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    NavigateDashboard,
    NavigateLogin,
    /// Full view refresh after impersonation ends.
    Refresh,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_loading: bool,
    pub is_impersonating: bool,
}

pub struct SessionStore {
    api: ApiClient,
    tokens: Arc<dyn TokenStore>,
    state: watch::Sender<SessionSnapshot>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionStore {
    pub fn new(
        api: ApiClient,
    ) -> (
        Arc<Self>,
        watch::Receiver<SessionSnapshot>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let tokens = api.tokens();
        let (state, state_rx) = watch::channel(SessionSnapshot::default());
        let (events, events_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            api,
            tokens,
            state,
            events,
        });
        (store, state_rx, events_rx)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_modify(apply);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// App-start resolution: fetch the user when a stored token exists,
    /// otherwise settle in the unauthenticated state without a request.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let impersonating = self.tokens.load(TokenSlot::Admin).is_some();
        self.update(|s| s.is_impersonating = impersonating);
        if self.tokens.load(TokenSlot::Session).is_some() {
            self.update(|s| s.is_loading = true);
            self.fetch_user().await
        } else {
            self.update(|s| s.is_loading = false);
            Ok(())
        }
    }

    /// Exchange credentials for a token, then log in with it. Invalid
    /// credentials surface the server detail to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> anyhow::Result<()> {
        let resp: LoginResponse = self
            .api
            .post_form(
                "/auth/login/access-token",
                &[("username", email), ("password", password)],
            )
            .await?;
        self.login(&resp.access_token).await
    }

    /// Persist the token, fetch the user, then navigate to the dashboard.
    /// On failure the error propagates to the caller and the session is
    /// whatever the fetch fallback left behind.
    pub async fn login(&self, token: &str) -> anyhow::Result<()> {
        self.tokens.save(TokenSlot::Session, token)?;
        self.update(|s| s.is_loading = true);
        self.fetch_user().await?;
        self.emit(SessionEvent::NavigateDashboard);
        Ok(())
    }

    /// Start operating the session as another user, keeping the current
    /// token aside for restoration. The in-memory user is cleared first so
    /// no stale identity is observable while the fetch is in flight.
    pub async fn impersonate(&self, token: &str) -> anyhow::Result<()> {
        self.update(|s| {
            s.user = None;
            s.is_loading = true;
        });
        if self.tokens.load(TokenSlot::Admin).is_none() {
            if let Some(current) = self.tokens.load(TokenSlot::Session) {
                self.tokens.save(TokenSlot::Admin, &current)?;
            }
        }
        self.tokens.save(TokenSlot::Session, token)?;
        self.update(|s| s.is_impersonating = true);
        self.fetch_user().await?;
        self.emit(SessionEvent::NavigateDashboard);
        Ok(())
    }

    /// Restore the saved admin identity. A no-op when no admin token is
    /// stored.
    pub async fn stop_impersonating(&self) -> anyhow::Result<()> {
        let Some(admin) = self.tokens.load(TokenSlot::Admin) else {
            return Ok(());
        };
        self.update(|s| s.user = None);
        self.tokens.save(TokenSlot::Session, &admin)?;
        self.tokens.clear(TokenSlot::Admin)?;
        self.update(|s| s.is_impersonating = false);
        let result = self.fetch_user().await;
        self.emit(SessionEvent::Refresh);
        result
    }

    /// Clear both tokens and the user, then navigate to the login page.
    pub fn logout(&self) {
        let _ = self.tokens.clear(TokenSlot::Session);
        let _ = self.tokens.clear(TokenSlot::Admin);
        self.update(|s| {
            s.user = None;
            s.is_loading = false;
            s.is_impersonating = false;
        });
        self.emit(SessionEvent::NavigateLogin);
    }

    /// Resolve the current user from the active token. On failure, revert to
    /// the saved admin identity when one exists; otherwise log out. The
    /// session is never left half-authenticated.
    pub async fn fetch_user(&self) -> anyhow::Result<()> {
        loop {
            match self.api.get::<User>("/users/me").await {
                Ok(user) => {
                    self.update(|s| {
                        s.user = Some(user);
                        s.is_loading = false;
                    });
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("user fetch failed: {err}");
                    if let Some(admin) = self.tokens.load(TokenSlot::Admin) {
                        // revert to the saved admin identity and retry once;
                        // the cleared admin slot makes this loop terminate.
                        // The impersonation flag flips only after the store
                        // operations succeed, so a failed write leaves the
                        // flag and the stored admin token in agreement.
                        self.tokens.save(TokenSlot::Session, &admin)?;
                        self.tokens.clear(TokenSlot::Admin)?;
                        self.update(|s| {
                            s.user = None;
                            s.is_impersonating = false;
                        });
                        self.emit(SessionEvent::Refresh);
                        continue;
                    }
                    self.logout();
                    return Err(err.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::utils::token_store::MemoryTokenStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user_body(id: &str, email: &str) -> serde_json::Value {
        json!({"_id": id, "email": email, "role": "researcher", "is_active": true})
    }

    async fn store_with_server(
        server: &MockServer,
    ) -> (
        Arc<SessionStore>,
        Arc<MemoryTokenStore>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let tokens = Arc::new(MemoryTokenStore::new());
        let api = ApiClient::new(server.uri(), tokens.clone()).unwrap();
        let (store, _state, events) = SessionStore::new(api);
        (store, tokens, events)
    }

    #[tokio::test]
    async fn login_fetches_user_and_navigates_to_dashboard() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("u1", "ada@lab.io")))
            .mount(&server)
            .await;

        let (store, tokens, mut events) = store_with_server(&server).await;
        store.login("tok-1").await.unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.user.as_ref().unwrap().email, "ada@lab.io");
        assert!(!snap.is_loading);
        assert_eq!(tokens.load(TokenSlot::Session).as_deref(), Some("tok-1"));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::NavigateDashboard);
    }

    #[tokio::test]
    async fn authenticate_surfaces_server_detail_on_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login/access-token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"detail": "Incorrect email or password"})),
            )
            .mount(&server)
            .await;

        let (store, tokens, mut events) = store_with_server(&server).await;
        let err = store.authenticate("ada@lab.io", "wrong").await.unwrap_err();
        assert!(err.to_string().contains("Incorrect email or password"));
        assert!(tokens.load(TokenSlot::Session).is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn impersonation_flag_tracks_the_saved_admin_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("u1", "ada@lab.io")))
            .mount(&server)
            .await;

        let (store, tokens, _events) = store_with_server(&server).await;
        store.login("admin-tok").await.unwrap();
        assert!(!store.snapshot().is_impersonating);
        assert!(tokens.load(TokenSlot::Admin).is_none());

        store.impersonate("user-tok").await.unwrap();
        assert!(store.snapshot().is_impersonating);
        assert_eq!(tokens.load(TokenSlot::Admin).as_deref(), Some("admin-tok"));
        assert_eq!(tokens.load(TokenSlot::Session).as_deref(), Some("user-tok"));

        // a second impersonation must not overwrite the saved admin token
        store.impersonate("other-tok").await.unwrap();
        assert_eq!(tokens.load(TokenSlot::Admin).as_deref(), Some("admin-tok"));

        store.stop_impersonating().await.unwrap();
        assert!(!store.snapshot().is_impersonating);
        assert!(tokens.load(TokenSlot::Admin).is_none());
        assert_eq!(tokens.load(TokenSlot::Session).as_deref(), Some("admin-tok"));
    }

    #[tokio::test]
    async fn stop_impersonating_without_admin_token_is_a_no_op() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("u1", "ada@lab.io")))
            .expect(1)
            .mount(&server)
            .await;

        let (store, tokens, mut events) = store_with_server(&server).await;
        store.login("tok-1").await.unwrap();
        let before = store.snapshot();
        let _ = events.try_recv();

        store.stop_impersonating().await.unwrap();
        assert_eq!(store.snapshot(), before);
        assert_eq!(tokens.load(TokenSlot::Session).as_deref(), Some("tok-1"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_fetch_reverts_to_the_admin_identity() {
        let server = MockServer::start().await;
        // the impersonated token is rejected, the admin token still works
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer stale-tok"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer admin-tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("a1", "boss@lab.io")))
            .mount(&server)
            .await;

        let (store, tokens, _events) = store_with_server(&server).await;
        tokens.save(TokenSlot::Session, "stale-tok").unwrap();
        tokens.save(TokenSlot::Admin, "admin-tok").unwrap();

        store.fetch_user().await.unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.user.as_ref().unwrap().email, "boss@lab.io");
        assert!(!snap.is_impersonating);
        assert!(tokens.load(TokenSlot::Admin).is_none());
    }

    #[tokio::test]
    async fn failed_fetch_without_admin_token_logs_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
            .mount(&server)
            .await;

        let (store, tokens, mut events) = store_with_server(&server).await;
        tokens.save(TokenSlot::Session, "stale-tok").unwrap();

        assert!(store.fetch_user().await.is_err());
        assert!(tokens.load(TokenSlot::Session).is_none());
        assert!(store.snapshot().user.is_none());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::NavigateLogin);
    }

    /// Store whose writes always fail, as a keyring without a backend does.
    /// Reads and clears pass through so the seeded slots stay observable.
    struct WriteRejectingStore {
        inner: MemoryTokenStore,
    }

    impl TokenStore for WriteRejectingStore {
        fn save(&self, _slot: TokenSlot, _token: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("keyring rejected the write"))
        }

        fn load(&self, slot: TokenSlot) -> Option<String> {
            self.inner.load(slot)
        }

        fn clear(&self, slot: TokenSlot) -> anyhow::Result<()> {
            self.inner.clear(slot)
        }
    }

    #[tokio::test]
    async fn failed_revert_write_keeps_the_impersonation_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
            .mount(&server)
            .await;

        let store = WriteRejectingStore {
            inner: MemoryTokenStore::new(),
        };
        store.inner.save(TokenSlot::Session, "stale-tok").unwrap();
        store.inner.save(TokenSlot::Admin, "admin-tok").unwrap();
        let tokens = Arc::new(store);
        let api = ApiClient::new(server.uri(), tokens.clone()).unwrap();
        let (session, _state, _events) = SessionStore::new(api);

        // the revert path cannot persist the admin token; the error must
        // surface with the flag and the stored token still in agreement
        assert!(session.bootstrap().await.is_err());
        assert!(session.snapshot().is_impersonating);
        assert_eq!(tokens.load(TokenSlot::Admin).as_deref(), Some("admin-tok"));
    }

    #[tokio::test]
    async fn bootstrap_without_token_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("u1", "ada@lab.io")))
            .expect(0)
            .mount(&server)
            .await;

        let (store, _tokens, _events) = store_with_server(&server).await;
        store.bootstrap().await.unwrap();
        let snap = store.snapshot();
        assert!(snap.user.is_none());
        assert!(!snap.is_loading);
    }
}
