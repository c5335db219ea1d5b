//! In-memory credential store shared by one client instance.

use std::fmt;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Opaque bearer token with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Build a token, taking the expiry from its JWT `exp` claim when present.
    pub fn from_bearer(value: impl Into<String>) -> Self {
        let value = value.into();
        let expires_at = jwt_expiry(&value);
        Self { value, expires_at }
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            expires_at.timestamp() <= now.timestamp() + EXPIRY_SKEW_SECONDS
        })
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Holds the current session token for one client.
///
/// Cloning shares the same slot. Writes are crate-private so only the auth
/// manager mutates it.
#[derive(Clone, Default)]
pub struct CredentialStore {
    slot: Arc<RwLock<Option<SessionToken>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_token(token: SessionToken) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(token))),
        }
    }

    /// Current token, expired or not.
    #[must_use]
    pub fn current(&self) -> Option<SessionToken> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Current token when it is present and not expired.
    #[must_use]
    pub fn valid(&self) -> Option<SessionToken> {
        self.current().filter(|token| !token.is_expired())
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.current().is_some()
    }

    pub(crate) fn replace(&self, token: SessionToken) {
        match self.slot.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    pub(crate) fn clear(&self) {
        match self.slot.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CredentialStore")
            .field("token", &self.current())
            .finish()
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim of a JWT without verifying its signature.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&decoded).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}
