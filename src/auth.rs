use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::AppState;

// The single administrator principal. There is no user store.
pub const ADMIN_EMAIL: &str = "admin@admin.com";
pub const ADMIN_PASSWORD: &str = "Admin123";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

/// Issues, verifies and revokes the admin's bearer tokens. A token is
/// valid iff its signature verifies, it has not expired and it is not
/// on the blacklist; every failure maps to the same generic error.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_minutes: u64,
    blacklist: Blacklist,
}

impl TokenService {
    pub fn new(
        secret: &str,
        ttl_minutes: u64,
        blacklist_path: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_minutes,
            blacklist: Blacklist::open(blacklist_path.into())?,
        })
    }

    pub fn expires_in_secs(&self) -> u64 {
        self.ttl_minutes * 60
    }

    pub fn issue(&self, subject: &str) -> Result<String, ApiError> {
        let now = now_unix_seconds();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + self.ttl_minutes * 60,
            jti: Uuid::new_v4().simple().to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<String, ApiError> {
        if self.blacklist.contains(token) {
            return Err(ApiError::Auth);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|_| ApiError::Auth)?;
        if data.claims.sub.is_empty() {
            return Err(ApiError::Auth);
        }
        Ok(data.claims.sub)
    }

    /// Idempotent: a token already on the blacklist is left alone, so
    /// the log file never grows duplicate lines.
    pub fn revoke(&self, token: &str) -> Result<(), ApiError> {
        self.blacklist
            .insert(token)
            .map_err(|e| ApiError::Internal(format!("record revoked token: {e}")))
    }
}

/// Revoked-token set mirrored by an append-only log, loaded fully at
/// startup so restarts keep every revocation for its remaining window.
struct Blacklist {
    path: PathBuf,
    entries: Mutex<HashSet<String>>,
}

impl Blacklist {
    fn open(path: PathBuf) -> anyhow::Result<Self> {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("read blacklist {}", path.display()));
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn contains(&self, token: &str) -> bool {
        self.entries
            .lock()
            .expect("blacklist mutex poisoned")
            .contains(token)
    }

    fn insert(&self, token: &str) -> std::io::Result<()> {
        // The lock is held across the append so concurrent revokes
        // cannot interleave lines in the log.
        let mut entries = self.entries.lock().expect("blacklist mutex poisoned");
        if !entries.insert(token.to_string()) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{token}")
    }
}

/// Subject of the verified token, stored in request extensions for
/// handlers that care who called.
#[derive(Debug, Clone)]
pub struct AuthSubject(pub String);

pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Auth)?;
    let token = bearer_token(header).ok_or(ApiError::Auth)?;
    let subject = state.tokens.verify(token)?;
    request.extensions_mut().insert(AuthSubject(subject));
    Ok(next.run(request).await)
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> TokenService {
        TokenService::new("test-secret", 60, dir.path().join("blacklist.txt"))
            .expect("token service")
    }

    #[test]
    fn issue_then_verify_round_trips_the_subject() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let token = svc.issue(ADMIN_EMAIL).unwrap();
        assert_eq!(svc.verify(&token).unwrap(), ADMIN_EMAIL);
    }

    #[test]
    fn each_token_gets_a_fresh_id() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let a = svc.issue(ADMIN_EMAIL).unwrap();
        let b = svc.issue(ADMIN_EMAIL).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_and_wrong_key_tokens_are_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(matches!(svc.verify("not-a-token"), Err(ApiError::Auth)));

        let other = TokenService::new("another-secret", 60, dir.path().join("other.txt")).unwrap();
        let token = other.issue(ADMIN_EMAIL).unwrap();
        assert!(matches!(svc.verify(&token), Err(ApiError::Auth)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_unix_seconds();
        let claims = Claims {
            sub: ADMIN_EMAIL.to_string(),
            iat: now - 7200,
            exp: now - 3600,
            jti: Uuid::new_v4().simple().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(svc.verify(&token), Err(ApiError::Auth)));
    }

    #[test]
    fn empty_subject_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_unix_seconds();
        let claims = Claims {
            sub: String::new(),
            iat: now,
            exp: now + 3600,
            jti: Uuid::new_v4().simple().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(svc.verify(&token), Err(ApiError::Auth)));
    }

    #[test]
    fn revoke_blocks_the_token_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        let svc = TokenService::new("test-secret", 60, &path).unwrap();
        let token = svc.issue(ADMIN_EMAIL).unwrap();

        svc.revoke(&token).unwrap();
        assert!(matches!(svc.verify(&token), Err(ApiError::Auth)));

        svc.revoke(&token).unwrap();
        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert_eq!(log.lines().next(), Some(token.as_str()));
    }

    #[test]
    fn blacklist_survives_a_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        let token = {
            let svc = TokenService::new("test-secret", 60, &path).unwrap();
            let token = svc.issue(ADMIN_EMAIL).unwrap();
            svc.revoke(&token).unwrap();
            token
        };

        let restarted = TokenService::new("test-secret", 60, &path).unwrap();
        assert!(matches!(restarted.verify(&token), Err(ApiError::Auth)));
    }

    #[test]
    fn bearer_prefix_extraction() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
