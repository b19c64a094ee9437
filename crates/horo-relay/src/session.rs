//! Session gate: tracks the signed-in identity and turns auth provider
//! events into discrete identity transitions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use horo_types::identity::Identity;

use crate::error::{RelayError, Result};

const CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: Identity,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user: impl Into<Identity>) -> Self {
        Self {
            user: user.into(),
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
    SessionExpired,
}

impl AuthEvent {
    /// Identity the app should consider signed in after this event.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(s) | Self::TokenRefreshed(s) | Self::UserUpdated(s) => Some(&s.user),
            Self::SignedOut | Self::SessionExpired => None,
        }
    }
}

/// The external authentication collaborator.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current persisted session, if any.
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Stream of auth state changes.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_out(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    BecamePresent(Identity),
    /// Carries the identity that just went away.
    BecameAbsent(Identity),
}

pub struct SessionGate {
    current: Mutex<Option<Identity>>,
    changes: broadcast::Sender<IdentityChange>,
}

impl SessionGate {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            current: Mutex::new(None),
            changes,
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        self.changes.subscribe()
    }

    /// Move to `next`, emitting the transitions in order. Switching straight
    /// from one user to another emits `BecameAbsent` before `BecamePresent`.
    pub fn set_identity(&self, next: Option<Identity>) {
        let mut current = self.current.lock().unwrap();
        if *current == next {
            return;
        }
        if let Some(previous) = current.take() {
            info!(user = %previous, "Identity cleared");
            let _ = self.changes.send(IdentityChange::BecameAbsent(previous));
        }
        if let Some(id) = next {
            info!(user = %id, "Identity set");
            *current = Some(id.clone());
            let _ = self.changes.send(IdentityChange::BecamePresent(id));
        }
    }

    pub fn apply(&self, event: &AuthEvent) {
        debug!(?event, "Auth state change");
        self.set_identity(event.identity().cloned());
    }

    /// Load the initial session from the provider.
    pub async fn bootstrap(&self, provider: &dyn AuthProvider) {
        match provider.get_session().await {
            Ok(session) => self.set_identity(session.map(|s| s.user)),
            Err(RelayError::InvalidRefreshToken) => {
                warn!("Stored session has an invalid refresh token, signing out");
                if let Err(e) = provider.sign_out().await {
                    error!("Error clearing invalid session: {e}");
                }
                self.set_identity(None);
            }
            Err(e) => error!("Error getting session: {e}"),
        }
    }

    /// Bootstrap, then follow the provider's auth events until its stream
    /// closes.
    pub fn spawn(self: &Arc<Self>, provider: Arc<dyn AuthProvider>) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        let mut events = provider.auth_events();
        tokio::spawn(async move {
            gate.bootstrap(provider.as_ref()).await;
            loop {
                match events.recv().await {
                    Ok(event) => gate.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {n} auth events, reloading session");
                        gate.bootstrap(provider.as_ref()).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Auth event stream closed");
        })
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process auth provider for simulations and tests.
pub struct MemoryAuth {
    session: Mutex<Option<Session>>,
    invalid_refresh_token: Mutex<bool>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            session: Mutex::new(None),
            invalid_refresh_token: Mutex::new(false),
            events,
        }
    }

    /// Start with a persisted session whose refresh token the backend rejects.
    pub fn with_invalid_refresh_token() -> Self {
        let auth = Self::new();
        *auth.invalid_refresh_token.lock().unwrap() = true;
        auth
    }

    pub fn with_session(session: Session) -> Self {
        let auth = Self::new();
        *auth.session.lock().unwrap() = Some(session);
        auth
    }

    pub fn sign_in(&self, user: impl Into<Identity>) {
        let session = Session::new(user);
        *self.session.lock().unwrap() = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session));
    }

    pub fn expire(&self) {
        *self.session.lock().unwrap() = None;
        let _ = self.events.send(AuthEvent::SessionExpired);
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn get_session(&self) -> Result<Option<Session>> {
        if *self.invalid_refresh_token.lock().unwrap() {
            return Err(RelayError::InvalidRefreshToken);
        }
        Ok(self.session.lock().unwrap().clone())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        *self.invalid_refresh_token.lock().unwrap() = false;
        *self.session.lock().unwrap() = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }
}
