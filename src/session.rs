//! Cookie sessions: user binding, basket and anonymous orders.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::Basket;
use crate::{Result, ShopError};

pub const SESSION_COOKIE: &str = "sessionid";

/// Idle time after which a session is forgotten. Two weeks.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: Option<i64>,
    pub basket: Basket,
    /// Orders placed before signing in, handed over at sign-in.
    pub orders: Vec<i64>,
    last_seen: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self { user_id: None, basket: Basket::default(), orders: Vec::new(), last_seen: Instant::now() }
    }
}

/// Who is calling. Inserted into every request by [`session_layer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub session_id: Uuid,
    pub user_id: Option<i64>,
}

impl RequestContext {
    pub fn require_user(&self) -> Result<i64> {
        self.user_id.ok_or(ShopError::Unauthenticated)
    }
}

/// Cookie change a handler asks [`session_layer`] to send, returned as a response extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CookieUpdate {
    Issue(Uuid),
    Clear,
}

impl CookieUpdate {
    fn header(self) -> Option<HeaderValue> {
        let cookie = match self {
            Self::Issue(id) => format!("{SESSION_COOKIE}={id}; HttpOnly; Path=/; SameSite=Lax"),
            Self::Clear => format!("{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0"),
        };
        HeaderValue::from_str(&cookie).ok()
    }
}

/// Sessions are created on first write; reads against an unknown id see an empty session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self { Self::with_ttl(DEFAULT_SESSION_TTL) }
}

impl SessionStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { inner: Arc::default(), ttl }
    }

    /// Returns the live session for `id`, or a transient id that is not stored until written.
    /// The flag is true when the session is live.
    pub async fn resolve(&self, id: Option<Uuid>) -> (Uuid, Option<i64>, bool) {
        if let Some(id) = id {
            let mut sessions = self.inner.write().await;
            let expired = match sessions.get_mut(&id) {
                Some(session) if session.last_seen.elapsed() < self.ttl => {
                    session.last_seen = Instant::now();
                    return (id, session.user_id, true);
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                sessions.remove(&id);
                debug!(session_id = %id, "session expired");
            }
        }
        (Uuid::new_v4(), None, false)
    }

    pub async fn get(&self, id: Uuid) -> Session {
        self.inner.read().await.get(&id).cloned().unwrap_or_default()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Runs `f` on the session under the write lock so mutations of one session serialize.
    /// The first write stores the session.
    pub async fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.inner.write().await;
        if !sessions.contains_key(&id) {
            self.sweep(&mut sessions);
            debug!(session_id = %id, "session opened");
        }
        let session = sessions.entry(id).or_default();
        session.last_seen = Instant::now();
        f(session)
    }

    /// Moves the session to a fresh id, applies `f` and drops the old id.
    pub async fn rotate(&self, old: Uuid, f: impl FnOnce(&mut Session)) -> Uuid {
        let mut sessions = self.inner.write().await;
        let mut session = sessions.remove(&old).unwrap_or_default();
        f(&mut session);
        session.last_seen = Instant::now();
        let id = Uuid::new_v4();
        self.sweep(&mut sessions);
        sessions.insert(id, session);
        debug!(old = %old, session_id = %id, "session rotated");
        id
    }

    /// Hands the session's anonymous orders to `user_id` through `assign`, then rotates the
    /// session onto the user. If `assign` fails the session keeps its orders and its id.
    pub async fn bind_user<F, Fut>(&self, id: Uuid, user_id: i64, assign: F) -> Result<Uuid>
    where
        F: FnOnce(Vec<i64>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let pending = self.get(id).await.orders;
        assign(pending.clone()).await?;
        Ok(self.rotate(id, |s| {
            s.user_id = Some(user_id);
            s.orders.retain(|order| !pending.contains(order));
        }).await)
    }

    /// Forgets the session entirely; its cookie no longer resolves.
    pub async fn remove(&self, id: Uuid) {
        self.inner.write().await.remove(&id);
    }

    fn sweep(&self, sessions: &mut HashMap<Uuid, Session>) {
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() < self.ttl);
        if sessions.len() < before {
            debug!(expired = before - sessions.len(), "idle sessions dropped");
        }
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

pub async fn session_layer(State(sessions): State<SessionStore>, mut request: Request, next: Next) -> Response {
    let existing = cookie_value(request.headers(), SESSION_COOKIE).and_then(|v| Uuid::parse_str(v).ok());
    let (session_id, user_id, live) = sessions.resolve(existing).await;
    request.extensions_mut().insert(RequestContext { session_id, user_id });

    let mut response = next.run(request).await;
    let update = match response.extensions_mut().remove::<CookieUpdate>() {
        Some(update) => Some(update),
        None if !live && sessions.contains(session_id).await => Some(CookieUpdate::Issue(session_id)),
        None => None,
    };
    if let Some(value) = update.and_then(CookieUpdate::header) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
