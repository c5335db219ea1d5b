//! Client configuration.
//!
//! A `ClientConfig` is built once per client through [`ClientConfigBuilder`],
//! from a JSON document ([`ClientConfig::from_json`]) or from `MEMOS_*`
//! environment variables ([`ClientConfig::from_env`]). All three paths go
//! through the same validation.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{Credential, SsoCredentials};
use crate::util::{normalize_base_url, normalize_text_option};
use crate::{Error, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("memos-client/", env!("CARGO_PKG_VERSION"));

const ENV_BASE_URL: &str = "MEMOS_BASE_URL";
const ENV_ACCESS_TOKEN: &str = "MEMOS_ACCESS_TOKEN";
const ENV_USERNAME: &str = "MEMOS_USERNAME";
const ENV_PASSWORD: &str = "MEMOS_PASSWORD";
const ENV_TIMEOUT_SECS: &str = "MEMOS_TIMEOUT_SECS";
const ENV_MAX_ATTEMPTS: &str = "MEMOS_MAX_RETRIES";
const ENV_BACKOFF_BASE_MS: &str = "MEMOS_BACKOFF_BASE_MS";
const ENV_BACKOFF_MULTIPLIER: &str = "MEMOS_BACKOFF_MULTIPLIER";
const ENV_VERIFY_TLS: &str = "MEMOS_VERIFY_TLS";

/// How `create_memos_batch` schedules its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// One item at a time, in input order.
    #[default]
    Sequential,
    /// Up to `max_in_flight` items at once; results keep input order.
    Concurrent { max_in_flight: usize },
}

/// Validated client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    base_url: String,
    pub(crate) credential: Credential,
    pub timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
    pub verify_tls: bool,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    /// Size of each streamed upload chunk.
    pub chunk_size: usize,
    pub max_upload_size: u64,
    pub batch_mode: BatchMode,
}

impl ClientConfig {
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    /// Server root, without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/api/v1`
    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!("{}/api/v1", self.base_url)
    }

    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Parse a JSON configuration document. Unknown keys are rejected.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(raw)
            .map_err(|error| Error::Configuration(format!("invalid config JSON: {error}")))?;
        file.into_builder()?.build()
    }

    /// Load configuration from `MEMOS_*` environment variables.
    ///
    /// Returns `Ok(None)` when no variables are set.
    pub fn from_env() -> Result<Option<Self>> {
        parse_env(|key| env::var(key).ok())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("backoff_max", &self.backoff_max)
            .field("verify_tls", &self.verify_tls)
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("chunk_size", &self.chunk_size)
            .field("max_upload_size", &self.max_upload_size)
            .field("batch_mode", &self.batch_mode)
            .finish()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Clone)]
pub struct ClientConfigBuilder {
    base_url: String,
    access_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    sso: Option<SsoCredentials>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_multiplier: f64,
    backoff_max: Duration,
    verify_tls: bool,
    user_agent: String,
    headers: BTreeMap<String, String>,
    chunk_size: usize,
    max_upload_size: u64,
    batch_mode: BatchMode,
}

impl ClientConfigBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            username: None,
            password: None,
            sso: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            verify_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            batch_mode: BatchMode::Sequential,
        }
    }

    #[must_use]
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn password(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn sso(mut self, sso: SsoCredentials) -> Self {
        self.sso = Some(sso);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn backoff(mut self, base: Duration, multiplier: f64, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_multiplier = multiplier;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub const fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn max_upload_size(mut self, bytes: u64) -> Self {
        self.max_upload_size = bytes;
        self
    }

    #[must_use]
    pub const fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let base_url = normalize_base_url(&self.base_url).map_err(Error::Configuration)?;
        let credential = resolve_credential(
            normalize_text_option(self.access_token),
            normalize_text_option(self.username),
            self.password.filter(|password| !password.is_empty()),
            self.sso,
        )?;

        if self.timeout.is_zero() {
            return Err(Error::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Configuration(
                "backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::Configuration(
                "backoff_max must not be smaller than backoff_base".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if matches!(self.batch_mode, BatchMode::Concurrent { max_in_flight: 0 }) {
            return Err(Error::Configuration(
                "batch concurrency must be at least 1".to_string(),
            ));
        }
        if self
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("authorization"))
        {
            return Err(Error::Configuration(
                "the Authorization header is managed by the client".to_string(),
            ));
        }

        Ok(ClientConfig {
            base_url,
            credential,
            timeout: self.timeout,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            backoff_multiplier: self.backoff_multiplier,
            backoff_max: self.backoff_max,
            verify_tls: self.verify_tls,
            user_agent: self.user_agent,
            headers: self.headers,
            chunk_size: self.chunk_size,
            max_upload_size: self.max_upload_size,
            batch_mode: self.batch_mode,
        })
    }
}

impl fmt::Debug for ClientConfigBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfigBuilder")
            .field("base_url", &self.base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("sso", &self.sso)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("verify_tls", &self.verify_tls)
            .field("batch_mode", &self.batch_mode)
            .finish_non_exhaustive()
    }
}

/// Exactly one credential must be configured.
fn resolve_credential(
    access_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    sso: Option<SsoCredentials>,
) -> Result<Credential> {
    let password = match (username, password) {
        (Some(username), Some(password)) => Some(Credential::Password { username, password }),
        (Some(_), None) | (None, Some(_)) => {
            return Err(Error::Configuration(
                "username and password must be provided together".to_string(),
            ))
        }
        (None, None) => None,
    };

    let mut configured = [access_token.map(Credential::Token), password, sso.map(Credential::Sso)]
        .into_iter()
        .flatten();
    match (configured.next(), configured.next()) {
        (Some(credential), None) => Ok(credential),
        (Some(_), Some(_)) => Err(Error::Configuration(
            "only one of access_token, username/password, or SSO credentials may be provided"
                .to_string(),
        )),
        (None, _) => Err(Error::Configuration(
            "either access_token, username/password, or SSO credentials must be provided"
                .to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    sso: Option<SsoCredentials>,
    #[serde(default)]
    timeout_secs: Option<f64>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    backoff_base_ms: Option<u64>,
    #[serde(default)]
    backoff_multiplier: Option<f64>,
    #[serde(default)]
    backoff_max_ms: Option<u64>,
    #[serde(default)]
    verify_tls: Option<bool>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    max_upload_size: Option<u64>,
    #[serde(default)]
    batch_concurrency: Option<usize>,
}

impl ConfigFile {
    fn into_builder(self) -> Result<ClientConfigBuilder> {
        let mut builder = ClientConfigBuilder::new(self.base_url);
        builder.access_token = self.access_token;
        builder.username = self.username;
        builder.password = self.password;
        builder.sso = self.sso;
        if let Some(timeout_secs) = self.timeout_secs {
            builder.timeout = duration_from_secs(timeout_secs, "timeout_secs")?;
        }
        if let Some(max_attempts) = self.max_attempts {
            builder.max_attempts = max_attempts;
        }
        if let Some(base) = self.backoff_base_ms {
            builder.backoff_base = Duration::from_millis(base);
        }
        if let Some(multiplier) = self.backoff_multiplier {
            builder.backoff_multiplier = multiplier;
        }
        if let Some(max) = self.backoff_max_ms {
            builder.backoff_max = Duration::from_millis(max);
        }
        if let Some(verify_tls) = self.verify_tls {
            builder.verify_tls = verify_tls;
        }
        if let Some(user_agent) = normalize_text_option(self.user_agent) {
            builder.user_agent = user_agent;
        }
        builder.headers = self.headers;
        if let Some(chunk_size) = self.chunk_size {
            builder.chunk_size = chunk_size;
        }
        if let Some(max_upload_size) = self.max_upload_size {
            builder.max_upload_size = max_upload_size;
        }
        builder.batch_mode = match self.batch_concurrency {
            None | Some(1) => BatchMode::Sequential,
            Some(max_in_flight) => BatchMode::Concurrent { max_in_flight },
        };
        Ok(builder)
    }
}

fn duration_from_secs(secs: f64, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|error| Error::Configuration(format!("invalid {field}: {error}")))
}

fn parse_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<ClientConfig>> {
    let read = |key: &str| normalize_text_option(lookup(key));

    let base_url = read(ENV_BASE_URL);
    let access_token = read(ENV_ACCESS_TOKEN);
    let username = read(ENV_USERNAME);
    let password = lookup(ENV_PASSWORD).filter(|password| !password.is_empty());

    if base_url.is_none() && access_token.is_none() && username.is_none() && password.is_none() {
        return Ok(None);
    }
    let base_url = base_url.ok_or_else(|| {
        Error::Configuration(format!("{ENV_BASE_URL} is required when other MEMOS_* variables are set"))
    })?;

    let mut builder = ClientConfigBuilder::new(base_url);
    builder.access_token = access_token;
    builder.username = username;
    builder.password = password;

    if let Some(raw) = read(ENV_TIMEOUT_SECS) {
        let secs = raw
            .parse::<f64>()
            .map_err(|error| Error::Configuration(format!("invalid {ENV_TIMEOUT_SECS}: {error}")))?;
        builder.timeout = duration_from_secs(secs, ENV_TIMEOUT_SECS)?;
    }
    if let Some(raw) = read(ENV_MAX_ATTEMPTS) {
        builder.max_attempts = raw
            .parse()
            .map_err(|error| Error::Configuration(format!("invalid {ENV_MAX_ATTEMPTS}: {error}")))?;
    }
    if let Some(raw) = read(ENV_BACKOFF_BASE_MS) {
        let millis = raw.parse().map_err(|error| {
            Error::Configuration(format!("invalid {ENV_BACKOFF_BASE_MS}: {error}"))
        })?;
        builder.backoff_base = Duration::from_millis(millis);
    }
    if let Some(raw) = read(ENV_BACKOFF_MULTIPLIER) {
        builder.backoff_multiplier = raw.parse().map_err(|error| {
            Error::Configuration(format!("invalid {ENV_BACKOFF_MULTIPLIER}: {error}"))
        })?;
    }
    if let Some(raw) = read(ENV_VERIFY_TLS) {
        builder.verify_tls = parse_bool(&raw).ok_or_else(|| {
            Error::Configuration(format!("invalid {ENV_VERIFY_TLS}: expected true or false"))
        })?;
    }

    builder.build().map(Some)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
