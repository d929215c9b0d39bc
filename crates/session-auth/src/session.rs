//! Session management using FSM-based state tracking.
//!
//! The `SessionManager` is the single writer of the token store and the
//! single source of truth for the session status. Everything that depends on
//! authentication (live feeds, the dashboard) observes it through
//! [`SessionManager::add_state_listener`] or [`SessionManager::subscribe_status`].
//!
//! Every session change that invalidates in-flight work bumps an epoch.
//! Requests capture the epoch when they start and drop their result when it
//! moved in the meantime.

use crate::auth_fsm::{SessionMachine, SessionMachineInput, SessionStatus};
use crate::claims::{decode_claims, TokenClaims};
use crate::user::User;
use crate::{AuthError, AuthResult};
use api_transport::{RequestOptions, Transport, TransportError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use token_store::{TokenReader, TokenStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Point-in-time view of the session handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub epoch: u64,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.status.is_authenticated()
    }
}

/// Returned by [`SessionManager::logout`], which cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutComplete;

/// Identifies a registered state listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type StateListener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

struct SessionState {
    fsm: SessionMachine,
    user: Option<User>,
    claims: Option<TokenClaims>,
    epoch: u64,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        SessionStatus::from(self.fsm.state())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            user: self.user.clone(),
            epoch: self.epoch,
        }
    }

    fn consume(&mut self, input: SessionMachineInput) {
        let old_state = self.status();
        if self.fsm.consume(&input).is_err() {
            warn!(?input, state = %old_state, "Ignoring invalid session transition");
            return;
        }
        let new_state = self.status();
        if old_state != new_state {
            debug!(%old_state, %new_state, "Session state transition");
        }
    }

    /// Drop identity and move to `Unauthenticated`.
    fn end(&mut self, input: SessionMachineInput) {
        self.user = None;
        self.claims = None;
        self.epoch += 1;
        self.consume(input);
    }
}

/// Session manager with FSM-based state tracking.
pub struct SessionManager {
    tokens: TokenStore,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    /// Serializes status checks.
    check_lock: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<(ListenerId, StateListener)>>,
    next_listener_id: AtomicU64,
    status_tx: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Create a session manager over a token store.
    ///
    /// Starts in `Checking` when a token is already stored, so nothing that
    /// depends on authentication runs before [`check_auth_status`] resolves.
    ///
    /// [`check_auth_status`]: Self::check_auth_status
    pub fn new(tokens: TokenStore, transport: Arc<dyn Transport>) -> Self {
        let mut fsm = SessionMachine::new();
        let has_token = tokens.has().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read stored token on startup");
            false
        });
        if has_token {
            let _ = fsm.consume(&SessionMachineInput::CheckStarted);
        }

        let state = SessionState {
            fsm,
            user: None,
            claims: None,
            epoch: 0,
        };
        let (status_tx, _) = watch::channel(state.snapshot());

        Self {
            tokens,
            transport,
            state: Mutex::new(state),
            check_lock: tokio::sync::Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            status_tx,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.state.lock().user.clone()
    }

    /// Locally decoded claims of the current token, if it is a JWT.
    pub fn claims(&self) -> Option<TokenClaims> {
        self.state.lock().claims.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot()
    }

    /// The stored token, only while authenticated.
    pub fn bearer_token(&self) -> Option<String> {
        if !self.is_authenticated() {
            return None;
        }
        match self.tokens.get() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                None
            }
        }
    }

    /// Read-only token access for transports.
    pub fn token_reader(&self) -> TokenReader {
        self.tokens.reader()
    }

    /// Watch channel carrying the latest snapshot.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status_tx.subscribe()
    }

    /// Register a callback invoked synchronously on every status change, and
    /// when an authenticated session is replaced by a new login.
    ///
    /// Callbacks run after internal locks are released and may call back
    /// into the manager.
    pub fn add_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_state_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    /// Run `f` against the locked state, then publish the new snapshot if the
    /// status changed or a new authenticated session replaced the old one.
    fn commit<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, changed) = {
            let mut state = self.state.lock();
            let before = (state.status(), state.epoch);
            let result = f(&mut state);
            let after = (state.status(), state.epoch);
            let changed = before.0 != after.0
                || (after.0.is_authenticated() && before.1 != after.1);
            (result, changed.then(|| state.snapshot()))
        };

        if let Some(snapshot) = changed {
            self.publish(&snapshot);
        }
        result
    }

    fn publish(&self, snapshot: &SessionSnapshot) {
        self.status_tx.send_replace(snapshot.clone());
        let listeners: Vec<StateListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn clear_token(&self) {
        if let Err(e) = self.tokens.clear() {
            error!(error = %e, "Failed to clear stored token");
        }
    }

    /// Reject the session started at `epoch`. Returns false if the session
    /// moved on in the meantime, in which case nothing is touched.
    fn reject_since(&self, epoch: u64) -> bool {
        self.commit(|state| {
            if state.epoch != epoch {
                return false;
            }
            self.clear_token();
            let input = if state.status() == SessionStatus::Checking {
                SessionMachineInput::Rejected
            } else {
                SessionMachineInput::SignedOut
            };
            state.end(input);
            true
        })
    }

    /// Validate the stored token.
    ///
    /// - No token: `Unauthenticated` without any request.
    /// - Expired or undecodable JWT: token cleared, `Unauthenticated`, no
    ///   request, error returned.
    /// - Otherwise the token is verified by the server; any outcome other
    ///   than `{valid: true, user}` clears it.
    ///
    /// Checks are serialized. Observers see `Checking` followed by exactly one
    /// terminal state. Errors are returned after the state has settled; a
    /// check overtaken by a login or logout returns `Superseded`.
    pub async fn check_auth_status(&self) -> AuthResult<SessionStatus> {
        let _guard = self.check_lock.lock().await;

        let token = match self.tokens.get() {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to read stored token");
                let epoch = self.epoch();
                self.reject_since(epoch);
                return Err(e.into());
            }
        };

        let Some(token) = token else {
            self.commit(|state| match state.status() {
                SessionStatus::Unauthenticated => {}
                SessionStatus::Checking => state.end(SessionMachineInput::Rejected),
                SessionStatus::Authenticated => state.end(SessionMachineInput::SignedOut),
            });
            debug!("No stored token");
            return Ok(SessionStatus::Unauthenticated);
        };

        let epoch = self.commit(|state| {
            if state.status() != SessionStatus::Checking {
                state.user = None;
                state.consume(SessionMachineInput::CheckStarted);
            }
            state.epoch
        });

        let claims = match decode_claims(&token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Stored token is undecodable");
                return Err(self.rejected(epoch, e.into()));
            }
        };

        if let Some(claims) = &claims {
            if claims.is_expired_at(Utc::now().timestamp()) {
                info!(expires_at = ?claims.expires_at, "Stored token expired");
                return Err(self.rejected(epoch, AuthError::TokenExpired));
            }
        }

        debug!("Verifying token with server");
        let response = self
            .transport
            .post("/verify-token", json!({}), RequestOptions::bearer(token))
            .await;

        match parse_verify_response(response) {
            Ok(user) => self.commit(|state| {
                if state.epoch != epoch {
                    return Err(AuthError::Superseded);
                }
                info!(user_id = %user.id, "Session verified");
                state.user = Some(user);
                state.claims = claims;
                state.consume(SessionMachineInput::Verified);
                Ok(SessionStatus::Authenticated)
            }),
            Err(e) => {
                warn!(error = %e, "Server rejected stored token");
                Err(self.rejected(epoch, e))
            }
        }
    }

    fn rejected(&self, epoch: u64, err: AuthError) -> AuthError {
        if self.reject_since(epoch) {
            err
        } else {
            AuthError::Superseded
        }
    }

    /// Alias for [`check_auth_status`](Self::check_auth_status).
    pub async fn refresh_auth(&self) -> AuthResult<SessionStatus> {
        self.check_auth_status().await
    }

    /// Log in and persist the issued token.
    ///
    /// A response that arrives after a logout (or another login) issued
    /// during the call is discarded with `Superseded`.
    pub async fn login(&self, identifier: &str, secret: &str) -> AuthResult<User> {
        let identifier = required("identifier", identifier)?;
        required("secret", secret)?;

        let epoch = self.epoch();
        debug!(identifier, "Attempting login");

        let response = self
            .transport
            .post(
                "/login",
                json!({ "identifier": identifier, "secret": secret }),
                RequestOptions::default(),
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Login request failed");
                AuthError::from(e)
            })?;

        let (token, user) = parse_login_response(&response)?;
        let claims = decode_claims(&token).unwrap_or_else(|e| {
            warn!(error = %e, "Issued token has undecodable claims");
            None
        });

        self.commit(|state| {
            if state.epoch != epoch {
                info!("Discarding login response superseded by a session change");
                return Err(AuthError::Superseded);
            }
            self.tokens.set(&token)?;
            state.user = Some(user.clone());
            state.claims = claims;
            state.epoch += 1;
            state.consume(SessionMachineInput::LoginSucceeded);
            info!(user_id = %user.id, "Login successful");
            Ok(user)
        })
    }

    /// Create an account. Does not log in and never touches session state.
    pub async fn register(&self, name: &str, identifier: &str, secret: &str) -> AuthResult<String> {
        let name = required("name", name)?;
        let identifier = required("identifier", identifier)?;
        required("secret", secret)?;

        debug!(identifier, "Registering account");
        let response = self
            .transport
            .post(
                "/register",
                json!({ "name": name, "identifier": identifier, "secret": secret }),
                RequestOptions::default(),
            )
            .await?;

        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Registration successful")
            .to_string();
        info!(identifier, "Registration accepted");
        Ok(message)
    }

    /// End the session.
    ///
    /// Status, user and token are cleared before listeners run. A storage
    /// failure while clearing the token is logged, not returned. Calling it
    /// again is a no-op for observers.
    pub fn logout(&self) -> LogoutComplete {
        self.commit(|state| {
            self.clear_token();
            state.end(SessionMachineInput::SignedOut);
        });
        info!("Logged out");
        LogoutComplete
    }
}

fn required<'a>(field: &str, value: &'a str) -> AuthResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AuthError::Validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn parse_login_response(response: &Value) -> AuthResult<(String, User)> {
    let token = response
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AuthError::MalformedResponse("login response has no token".into()))?;
    let user = parse_user(response.get("user"))?;
    Ok((token.to_string(), user))
}

fn parse_user(value: Option<&Value>) -> AuthResult<User> {
    match value {
        None | Some(Value::Null) => Err(AuthError::MalformedResponse("response has no user".into())),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| AuthError::MalformedResponse(format!("invalid user: {e}"))),
    }
}

fn parse_verify_response(response: Result<Value, TransportError>) -> AuthResult<User> {
    let response = match response {
        Ok(value) => value,
        Err(e) if e.is_unauthorized() => return Err(AuthError::TokenInvalid(e.to_string())),
        Err(e) => return Err(e.into()),
    };

    if response.get("valid").and_then(Value::as_bool) != Some(true) {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("rejected by server");
        return Err(AuthError::TokenInvalid(message.to_string()));
    }
    parse_user(response.get("user"))
}
