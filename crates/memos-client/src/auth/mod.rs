//! Session auth against the Memos `/api/v1/auth/sessions` endpoint.
//!
//! The [`AuthManager`] turns the configured [`Credential`] into a bearer
//! token and is the only writer of the [`CredentialStore`]. Logins run under
//! a single refresh lock, so a burst of concurrent 401s triggers at most one
//! network login.

mod store;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::transport::retry::RetryPolicy;
use crate::transport::{bounded, parse_api_error};
use crate::util::normalize_text_option;
use crate::{Error, Result};

pub use store::{CredentialStore, SessionToken};

const SESSION_COOKIE: &str = "memos.access-token";
const DEFAULT_SESSION_LIFETIME_DAYS: i64 = 14;
const LOGIN_OPERATION: &str = "login";

/// Single sign-on assertion obtained from an identity provider.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoCredentials {
    pub idp_id: i32,
    pub code: String,
    pub redirect_uri: String,
}

impl fmt::Debug for SsoCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SsoCredentials")
            .field("idp_id", &self.idp_id)
            .field("code", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// The one credential a client authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Pre-issued access token. Cannot be renewed.
    Token(String),
    Password { username: String, password: String },
    Sso(SsoCredentials),
}

impl Credential {
    /// Whether a rejected or expired session can be replaced by logging in again.
    #[must_use]
    pub const fn is_renewable(&self) -> bool {
        !matches!(self, Self::Token(_))
    }

    fn login_payload(&self) -> Option<Value> {
        match self {
            Self::Token(_) => None,
            Self::Password { username, password } => Some(json!({
                "passwordCredentials": {
                    "username": username,
                    "password": password,
                }
            })),
            Self::Sso(sso) => Some(json!({
                "ssoCredentials": {
                    "idpId": sso.idp_id,
                    "code": sso.code,
                    "redirectUri": sso.redirect_uri,
                }
            })),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => formatter.debug_tuple("Token").field(&"[REDACTED]").finish(),
            Self::Password { username, .. } => formatter
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Sso(sso) => formatter.debug_tuple("Sso").field(sso).finish(),
        }
    }
}

/// Resolves the configured credential into a valid session token.
pub struct AuthManager {
    credential: Credential,
    store: CredentialStore,
    http: Client,
    sessions_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    refresh_lock: Mutex<()>,
    closed: AtomicBool,
}

impl AuthManager {
    pub fn new(config: &ClientConfig, http: Client) -> Self {
        let credential = config.credential().clone();
        let store = match &credential {
            Credential::Token(token) => {
                CredentialStore::with_token(SessionToken::from_bearer(token.clone()))
            }
            Credential::Password { .. } | Credential::Sso(_) => CredentialStore::new(),
        };

        Self {
            credential,
            store,
            http,
            sessions_url: format!("{}/auth/sessions", config.api_base_url()),
            timeout: config.timeout,
            retry: RetryPolicy::from_config(config),
            refresh_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &CredentialStore {
        &self.store
    }

    #[must_use]
    pub const fn can_reauthenticate(&self) -> bool {
        self.credential.is_renewable()
    }

    /// Exchange `credential` for a session token.
    ///
    /// Does not touch the credential store. Any 4xx is permanent; network
    /// failures, timeouts and 5xx are retried with backoff.
    pub async fn authenticate(&self, credential: &Credential) -> Result<SessionToken> {
        if let Credential::Token(token) = credential {
            return Ok(SessionToken::from_bearer(token.clone()));
        }
        let Some(payload) = credential.login_payload() else {
            return Err(Error::authentication(
                LOGIN_OPERATION,
                "credential has no login payload",
            ));
        };

        let mut attempt = 1;
        loop {
            match self.login_once(&payload).await {
                Ok(token) => {
                    tracing::info!("Signed in to {}", self.sessions_url);
                    return Ok(token);
                }
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        "Login attempt {} failed, retrying in {:?}: {}",
                        attempt,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(into_authentication_error(error)),
            }
        }
    }

    /// Current token, logging in again when it is missing or expired.
    pub async fn get_token(&self) -> Result<SessionToken> {
        self.ensure_open()?;
        if let Some(token) = self.store.valid() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        self.ensure_open()?;
        if let Some(token) = self.store.valid() {
            return Ok(token);
        }
        if !self.can_reauthenticate() {
            let message = if self.store.has_token() {
                "access token has expired and cannot be renewed"
            } else {
                "no access token is available"
            };
            return Err(Error::authentication("get_token", message));
        }

        let token = self.authenticate(&self.credential).await?;
        self.store.replace(token.clone());
        Ok(token)
    }

    /// Replace a token the server rejected with 401.
    ///
    /// When another task already replaced `stale`, its token is returned
    /// without a network call.
    pub async fn refresh_after_rejection(&self, stale: &SessionToken) -> Result<SessionToken> {
        let _guard = self.refresh_lock.lock().await;
        self.ensure_open()?;

        if let Some(current) = self.store.valid() {
            if current != *stale {
                tracing::debug!("Session already refreshed by a concurrent request");
                return Ok(current);
            }
        }
        if !self.can_reauthenticate() {
            return Err(Error::Authentication {
                operation: "refresh",
                message: "server rejected the access token and it cannot be renewed".to_string(),
                status: Some(StatusCode::UNAUTHORIZED.as_u16()),
            });
        }

        tracing::warn!("Session token rejected by server; signing in again");
        let token = self.authenticate(&self.credential).await?;
        self.store.replace(token.clone());
        Ok(token)
    }

    /// End the server session. The local token is cleared even when the
    /// server call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        let token = self.store.current();
        self.store.clear();
        let Some(token) = token else {
            return Ok(());
        };

        let request = self
            .http
            .delete(format!("{}/current", self.sessions_url))
            .bearer_auth(token.secret())
            .timeout(self.timeout);
        let response = bounded("sign_out", None, self.timeout, request.send())
            .await
            .inspect_err(|error| tracing::warn!("Sign-out request failed: {}", error))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            tracing::info!("Signed out of {}", self.sessions_url);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        tracing::warn!("Sign-out rejected by server: {}", message);
        Err(Error::Api {
            operation: "sign_out",
            resource: None,
            status: status.as_u16(),
            message,
        })
    }

    /// Drop the token and refuse further requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.store.clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::authentication("get_token", "client has been closed"));
        }
        Ok(())
    }

    async fn login_once(&self, payload: &Value) -> Result<SessionToken> {
        let request = self
            .http
            .post(&self.sessions_url)
            .json(payload)
            .timeout(self.timeout);
        tracing::debug!("POST {}", self.sessions_url);

        let (status, cookie, body) = bounded(LOGIN_OPERATION, None, self.timeout, async {
            let response = request.send().await?;
            let status = response.status();
            let cookie = session_cookie(response.headers());
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, cookie, body))
        })
        .await?;

        if status.is_server_error() {
            return Err(Error::Api {
                operation: LOGIN_OPERATION,
                resource: None,
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        if !status.is_success() {
            return Err(Error::Authentication {
                operation: LOGIN_OPERATION,
                message: parse_api_error(status, &body),
                status: Some(status.as_u16()),
            });
        }

        let response = if body.trim().is_empty() {
            SessionResponse::default()
        } else {
            serde_json::from_str::<SessionResponse>(&body).map_err(|error| {
                Error::authentication(
                    LOGIN_OPERATION,
                    format!("invalid session response: {error}"),
                )
            })?
        };
        response.into_token(cookie, Utc::now())
    }
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthManager")
            .field("credential", &self.credential)
            .field("store", &self.store)
            .field("sessions_url", &self.sessions_url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn into_authentication_error(error: Error) -> Error {
    match error {
        Error::Authentication { .. } => error,
        other => Error::Authentication {
            operation: LOGIN_OPERATION,
            status: other.status(),
            message: other.to_string(),
        },
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            (name.trim() == SESSION_COOKIE).then(|| value.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default, alias = "access_token")]
    access_token: Option<String>,
    #[serde(default, alias = "expires_at", alias = "accessTokenExpiresAt")]
    expires_at: Option<String>,
}

impl SessionResponse {
    fn into_token(self, cookie: Option<String>, now: DateTime<Utc>) -> Result<SessionToken> {
        let value = normalize_text_option(self.access_token)
            .or(cookie)
            .ok_or_else(|| {
                Error::authentication(
                    LOGIN_OPERATION,
                    "session response did not include an access token",
                )
            })?;

        let explicit_expiry = match normalize_text_option(self.expires_at) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map(|value| value.with_timezone(&Utc))
                    .map_err(|error| {
                        Error::authentication(
                            LOGIN_OPERATION,
                            format!("invalid session expiry '{raw}': {error}"),
                        )
                    })?,
            ),
            None => None,
        };

        let token = SessionToken::from_bearer(value);
        let expires_at = explicit_expiry
            .or_else(|| token.expires_at())
            .unwrap_or_else(|| now + chrono::Duration::days(DEFAULT_SESSION_LIFETIME_DAYS));
        Ok(SessionToken::new(token.secret(), Some(expires_at)))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn token_from_json_body_wins_over_cookie() {
        let response = SessionResponse {
            access_token: Some("body-token".to_string()),
            expires_at: Some("2030-01-01T00:00:00Z".to_string()),
        };
        let token = response
            .into_token(Some("cookie-token".to_string()), Utc::now())
            .unwrap();
        assert_eq!(token.secret(), "body-token");
        assert_eq!(
            token.expires_at().map(|expires_at| expires_at.to_rfc3339()),
            Some("2030-01-01T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn cookie_token_gets_default_lifetime() {
        let now = Utc::now();
        let token = SessionResponse::default()
            .into_token(Some("cookie-token".to_string()), now)
            .unwrap();
        assert_eq!(token.secret(), "cookie-token");
        assert_eq!(
            token.expires_at(),
            Some(now + chrono::Duration::days(DEFAULT_SESSION_LIFETIME_DAYS))
        );
    }

    #[test]
    fn missing_token_is_an_authentication_error() {
        let error = SessionResponse::default()
            .into_token(None, Utc::now())
            .unwrap_err();
        assert!(matches!(error, Error::Authentication { .. }));
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("memos.access-token=abc.def.ghi; Path=/; HttpOnly"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn sso_payload_uses_camel_case() {
        let credential = Credential::Sso(SsoCredentials {
            idp_id: 3,
            code: "auth-code".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
        });
        let payload = credential.login_payload().unwrap();
        assert_eq!(payload["ssoCredentials"]["idpId"], json!(3));
        assert_eq!(
            payload["ssoCredentials"]["redirectUri"],
            json!("https://app.example.com/callback")
        );
    }

    #[test]
    fn credential_debug_redacts_secrets() {
        let password = Credential::Password {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let token = Credential::Token("secret-token".to_string());
        let rendered = format!("{password:?} {token:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("alice"));
    }

    #[test]
    fn network_failures_surface_as_authentication_errors() {
        let error = into_authentication_error(Error::Api {
            operation: LOGIN_OPERATION,
            resource: None,
            status: 503,
            message: "unavailable".to_string(),
        });
        assert!(matches!(
            error,
            Error::Authentication {
                status: Some(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn token_credential_cannot_be_renewed() {
        let config = ClientConfig::builder("http://127.0.0.1:9")
            .access_token("opaque")
            .build()
            .unwrap();
        let manager = AuthManager::new(&config, Client::new());
        let token = manager.get_token().await.unwrap();
        assert_eq!(token.secret(), "opaque");

        let error = manager.refresh_after_rejection(&token).await.unwrap_err();
        assert_eq!(error.status(), Some(401));

        manager.close();
        assert!(manager.get_token().await.is_err());
    }
}
