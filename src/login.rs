#![cfg(not(tarpaulin_include))]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{FromRef, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::local_store::{BlobStore, FileBlobStore, keys};
use crate::workflow::Role;

/// Name of the cookie carrying the access token
pub const SESSION_COOKIE: &str = "session";

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
}

/// User data structure representing a registered application user
///
/// This structure contains all the information about a registered user,
/// including their authentication details and workflow role.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Email address
    #[serde(default)]
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    /// Role deciding which status changes the user may make
    #[serde(default)]
    pub role: Role,

    /// When the account was created
    pub created_at: DateTime<Utc>,
}

/// Credential data for login and registration
///
/// Used to receive login and registration requests from the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Username for login/registration
    pub username: String,

    /// Email address (optional for login, required for registration)
    #[serde(default)]
    pub email: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// Body of a token refresh request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// The authenticated caller, attached to each request by [`require_auth`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub username: String,
    pub role: Role,
}

/// Token pair handed out at login and on every refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: SessionUser,
}

/// Registered users, persisted as `users.json` under the data directory
pub struct UserDirectory {
    path: PathBuf,
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    /// Load the user file
    ///
    /// Creates the data directory and an empty users file if they don't exist.
    ///
    /// # Arguments
    /// * `data_dir` - Directory holding `users.json`
    ///
    /// # Errors
    /// * Returns an error if the file cannot be created, read, or parsed
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let path = data_dir.join("users.json");
        let users = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            fs::write(&path, b"{}")?;
            HashMap::new()
        };

        Ok(UserDirectory {
            path,
            users: RwLock::new(users),
        })
    }

    pub fn get(&self, username: &str) -> Option<User> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(username).cloned()
    }

    /// Register a new user
    ///
    /// Creates a new account with the provided username, email, and password.
    /// The password is hashed before storage. The very first account becomes
    /// an admin so a fresh installation can approve records; later accounts
    /// start as plain users.
    ///
    /// # Errors
    /// * Returns a validation error if a field is empty or malformed
    /// * Returns a validation error if the username or email is already in use
    pub fn register(&self, credentials: &UserCredentials, now: DateTime<Utc>) -> Result<User> {
        let username = credentials.username.trim();
        let email = credentials.email.trim();
        if !USERNAME_RE.is_match(username) {
            return Err(Error::Validation(
                "Username must be 3-32 letters, digits, '.', '_' or '-'".to_string(),
            ));
        }
        if email.is_empty() || credentials.password.len() < 6 {
            return Err(Error::Validation(
                "Email and a password of at least 6 characters are required".to_string(),
            ));
        }

        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(username) {
            return Err(Error::Validation("Username already exists".to_string()));
        }
        if users.values().any(|user| user.email.eq_ignore_ascii_case(email)) {
            return Err(Error::Validation(
                "Email address is already registered".to_string(),
            ));
        }

        let user = User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(&credentials.password)?,
            role: if users.is_empty() { Role::Admin } else { Role::User },
            created_at: now,
        };
        users.insert(user.username.clone(), user.clone());
        fs::write(&self.path, serde_json::to_string_pretty(&*users)?)?;

        info!("registered {} as {:?}", user.username, user.role);
        Ok(user)
    }

    /// Change a user's role; used by admins.
    pub fn set_role(&self, username: &str, role: Role) -> Result<User> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users
            .get_mut(username)
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))?;
        user.role = role;
        let updated = user.clone();
        fs::write(&self.path, serde_json::to_string_pretty(&*users)?)?;
        Ok(updated)
    }

    /// Verify user credentials
    ///
    /// # Returns
    /// * `Result<Option<User>>` - The user if the credentials match, `None` if not
    ///
    /// # Errors
    /// * Returns an error if the stored hash is malformed
    pub fn verify(&self, username: &str, password: &str) -> Result<Option<User>> {
        match self.get(username.trim()) {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(Some(user)),
            _ => Ok(None),
        }
    }
}

/// Hash a password using Argon2
///
/// Creates a cryptographically secure hash of a password using Argon2id.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::Validation("Password hashing failed".to_string()))
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `Result<bool>` - True if the password matches, false if not, or an error
///   when the hash is in an invalid format
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| Error::Validation("Invalid password hash format".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// User session
///
/// Represents an authenticated user session.
#[derive(Debug, Clone)]
struct Session {
    user: SessionUser,
    expires_at: DateTime<Utc>,
}

/// Refresh grant, tied to the access token issued with it
#[derive(Debug, Clone)]
struct RefreshGrant {
    access_token: String,
    username: String,
    expires_at: DateTime<Utc>,
}

/// Sessions storage
///
/// Access tokens are short-lived; a refresh token can be exchanged exactly
/// once for a new pair, which revokes the pair it came with.
pub struct SessionStore {
    access: RwLock<HashMap<String, Session>>,
    refresh: RwLock<HashMap<String, RefreshGrant>>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionStore {
    pub fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        SessionStore {
            access: RwLock::new(HashMap::new()),
            refresh: RwLock::new(HashMap::new()),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Create a new session pair for an authenticated user
    pub fn create(&self, user: &User, now: DateTime<Utc>) -> SessionTokens {
        self.issue(
            SessionUser {
                username: user.username.clone(),
                role: user.role,
            },
            now,
        )
    }

    fn issue(&self, user: SessionUser, now: DateTime<Utc>) -> SessionTokens {
        let access_token = Uuid::new_v4().to_string();
        let refresh_token = Uuid::new_v4().to_string();
        let expires_at = now + self.access_ttl;

        self.access
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                access_token.clone(),
                Session {
                    user: user.clone(),
                    expires_at,
                },
            );
        self.refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                refresh_token.clone(),
                RefreshGrant {
                    access_token: access_token.clone(),
                    username: user.username.clone(),
                    expires_at: now + self.refresh_ttl,
                },
            );

        SessionTokens {
            access_token,
            refresh_token,
            expires_at,
            user,
        }
    }

    /// Validate an access token
    ///
    /// # Returns
    /// * `Option<SessionUser>` - The caller if the token is known and not expired
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Option<SessionUser> {
        let sessions = self.access.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(token)
            .filter(|session| session.expires_at > now)
            .map(|session| session.user.clone())
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The presented refresh token and its access token stop working. The new
    /// pair carries the role the user has in `users` now, and a user that no
    /// longer exists gets nothing.
    pub fn refresh(
        &self,
        refresh_token: &str,
        users: &UserDirectory,
        now: DateTime<Utc>,
    ) -> Option<SessionTokens> {
        let grant = self
            .refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(refresh_token)?;
        self.access
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&grant.access_token);

        if grant.expires_at <= now {
            return None;
        }
        let user = users.get(&grant.username)?;
        Some(self.create(&user, now))
    }

    /// Forget an access token and every refresh grant tied to it
    pub fn revoke(&self, access_token: &str) {
        self.access
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(access_token);
        self.refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, grant| grant.access_token != access_token);
    }

    /// Drop expired sessions and grants
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.access
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, session| session.expires_at > now);
        self.refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, grant| grant.expires_at > now);
    }
}

/// Everything the authentication handlers need from the application state
#[derive(Clone)]
pub struct AuthState {
    pub users: Arc<UserDirectory>,
    pub sessions: Arc<SessionStore>,
    /// Root of the per-user blob stores
    pub blob_root: PathBuf,
}

impl AuthState {
    /// Blob store holding one user's cached profile and drafts
    pub fn blobs_for(&self, username: &str) -> FileBlobStore {
        FileBlobStore::new(self.blob_root.join(username))
    }
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Reads the access token from the `session` cookie or a bearer header
fn presented_token(jar: &CookieJar, headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn tokens_response(jar: CookieJar, tokens: SessionTokens) -> Response {
    let cookie = session_cookie(tokens.access_token.clone());
    (jar.add(cookie), Json(json!({ "status": "ok", "session": tokens }))).into_response()
}

/// Handle user login
///
/// Checks the credentials, starts a session and caches the user profile in
/// the user's blob store.
///
/// # Returns
/// * `Response` - The token pair with a session cookie, or 401
pub async fn handle_login(
    State(auth): State<AuthState>,
    jar: CookieJar,
    Json(credentials): Json<UserCredentials>,
) -> Result<Response> {
    let Some(user) = auth.users.verify(&credentials.username, &credentials.password)? else {
        warn!("failed login for {}", credentials.username.trim());
        return Err(Error::Unauthorized);
    };

    let tokens = auth.sessions.create(&user, Utc::now());
    let profile = json!({ "username": user.username, "email": user.email, "role": user.role });
    auth.blobs_for(&user.username).set(keys::USER, &profile)?;

    info!("{} logged in", user.username);
    Ok(tokens_response(jar, tokens))
}

/// Handle user registration
///
/// # Returns
/// * The created user without the password hash
pub async fn handle_register(
    State(auth): State<AuthState>,
    Json(credentials): Json<UserCredentials>,
) -> Result<Json<serde_json::Value>> {
    let user = auth.users.register(&credentials, Utc::now())?;
    Ok(Json(json!({
        "status": "ok",
        "user": { "username": user.username, "email": user.email, "role": user.role },
    })))
}

/// Handle token refresh
///
/// # Returns
/// * A fresh token pair with a new session cookie, or 401 when the refresh
///   token is unknown, already used, or expired
pub async fn handle_refresh(
    State(auth): State<AuthState>,
    jar: CookieJar,
    Json(request): Json<RefreshRequest>,
) -> Result<Response> {
    let tokens = auth
        .sessions
        .refresh(&request.refresh_token, &auth.users, Utc::now())
        .ok_or(Error::Unauthorized)?;
    Ok(tokens_response(jar, tokens))
}

/// Handle user logout
///
/// Revokes the session, removes the cached profile and clears the cookie.
pub async fn handle_logout(
    State(auth): State<AuthState>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
) -> Result<(CookieJar, Json<serde_json::Value>)> {
    if let Some(token) = presented_token(&jar, &headers) {
        if let Some(user) = auth.sessions.validate(&token, Utc::now()) {
            auth.blobs_for(&user.username).remove(keys::USER)?;
        }
        auth.sessions.revoke(&token);
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/").build());
    Ok((jar, Json(json!({ "status": "ok" }))))
}

/// Authentication middleware
///
/// Lets the request through when it carries a valid access token, either as
/// the `session` cookie or as `Authorization: Bearer <token>`. The caller is
/// attached to the request as a [`SessionUser`] extension, with the role
/// read from the user directory so role changes apply to live sessions.
///
/// # Returns
/// * `Response` - Either the downstream response or 401
pub async fn require_auth(
    State(auth): State<AuthState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let user = presented_token(&jar, request.headers())
        .and_then(|token| auth.sessions.validate(&token, Utc::now()))
        .and_then(|session| auth.users.get(&session.username))
        .map(|user| SessionUser {
            username: user.username,
            role: user.role,
        });

    match user {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => Error::Unauthorized.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn credentials(username: &str, email: &str) -> UserCredentials {
        UserCredentials {
            username: username.to_string(),
            email: email.to_string(),
            password: "s3cret-pass".to_string(),
        }
    }

    fn sessions() -> SessionStore {
        SessionStore::new(Duration::hours(1), Duration::days(7))
    }

    #[test]
    fn first_user_is_admin_and_users_persist() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();

        let admin = users.register(&credentials("asha", "asha@example.com"), now()).unwrap();
        let second = users.register(&credentials("ravi", "ravi@example.com"), now()).unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(second.role, Role::User);

        let reopened = UserDirectory::open(dir.path()).unwrap();
        assert!(reopened.verify("ravi", "s3cret-pass").unwrap().is_some());
        assert!(reopened.verify("ravi", "wrong").unwrap().is_none());
        assert!(reopened.verify("nobody", "s3cret-pass").unwrap().is_none());
    }

    #[test]
    fn duplicate_and_malformed_registrations_fail() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        users.register(&credentials("asha", "asha@example.com"), now()).unwrap();

        for bad in [
            credentials("asha", "other@example.com"),
            credentials("asha2", "ASHA@example.com"),
            credentials("a/b", "x@example.com"),
            credentials("neha", ""),
        ] {
            assert!(matches!(users.register(&bad, now()), Err(Error::Validation(_))));
        }
    }

    #[test]
    fn set_role_promotes() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        users.register(&credentials("asha", "asha@example.com"), now()).unwrap();
        users.register(&credentials("ravi", "ravi@example.com"), now()).unwrap();

        assert_eq!(users.set_role("ravi", Role::Manager).unwrap().role, Role::Manager);
        assert!(matches!(users.set_role("ghost", Role::Admin), Err(Error::NotFound(_))));
    }

    #[test]
    fn sessions_expire() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        let user = users.register(&credentials("asha", "asha@example.com"), now()).unwrap();

        let store = sessions();
        let tokens = store.create(&user, now());
        assert_eq!(
            store.validate(&tokens.access_token, now()).map(|u| u.username),
            Some("asha".to_string())
        );
        assert_eq!(store.validate(&tokens.access_token, now() + Duration::hours(2)), None);
        assert_eq!(store.validate("made-up", now()), None);
    }

    #[test]
    fn refresh_rotates_the_pair() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        let user = users.register(&credentials("asha", "asha@example.com"), now()).unwrap();

        let store = sessions();
        let first = store.create(&user, now());
        let later = now() + Duration::minutes(30);
        let second = store.refresh(&first.refresh_token, &users, later).unwrap();

        assert_eq!(store.validate(&first.access_token, later), None);
        assert!(store.validate(&second.access_token, later).is_some());
        assert!(store.refresh(&first.refresh_token, &users, later).is_none());
        assert!(
            store
                .refresh(&second.refresh_token, &users, now() + Duration::days(8))
                .is_none()
        );
    }

    #[test]
    fn refresh_picks_up_role_changes() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        let admin = users.register(&credentials("asha", "asha@example.com"), now()).unwrap();
        assert_eq!(admin.role, Role::Admin);

        let store = sessions();
        let first = store.create(&admin, now());
        users.set_role("asha", Role::User).unwrap();

        let second = store.refresh(&first.refresh_token, &users, now()).unwrap();
        assert_eq!(second.user.role, Role::User);
        assert_eq!(
            store.validate(&second.access_token, now()).map(|u| u.role),
            Some(Role::User)
        );
    }

    #[test]
    fn revoke_kills_access_and_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        let user = users.register(&credentials("asha", "asha@example.com"), now()).unwrap();

        let store = sessions();
        let tokens = store.create(&user, now());
        store.revoke(&tokens.access_token);
        assert_eq!(store.validate(&tokens.access_token, now()), None);
        assert!(store.refresh(&tokens.refresh_token, &users, now()).is_none());
    }
}
