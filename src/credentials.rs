//! Credential Resolution
//!
//! Signing credentials are resolved once and held in a mutex-guarded cache
//! that is created at startup and shared by every signing call. Static
//! credentials from the configuration file win; otherwise the standard AWS
//! environment variables are consulted. Cached values are re-fetched through
//! the provider shortly before they expire.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::CredentialsConfig;
use crate::{GatewayError, Result};

/// Re-fetch this many seconds before the cached value actually expires
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// AWS-style credentials used to sign outbound storage requests
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Credentials plus the instant they stop being valid (None = never)
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub credentials: Credentials,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Source of signing credentials.
///
/// Implementations may read configuration, the process environment, or an
/// instance metadata service.
pub trait CredentialProvider: Send + Sync {
    fn fetch(&self) -> Result<ResolvedCredentials>;
}

/// Fixed credentials from configuration; they never expire
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn fetch(&self) -> Result<ResolvedCredentials> {
        Ok(ResolvedCredentials {
            credentials: self.credentials.clone(),
            expires_at: None,
        })
    }
}

/// Credentials from the standard AWS environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    fn fetch(&self) -> Result<ResolvedCredentials> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            GatewayError::CredentialError(
                "no credentials configured and AWS_ACCESS_KEY_ID is not set".to_string(),
            )
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            GatewayError::CredentialError("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        Ok(ResolvedCredentials {
            credentials: Credentials::new(access_key_id, secret_access_key, session_token),
            expires_at: None,
        })
    }
}

/// Mutex-guarded cache in front of a credential provider.
///
/// One instance is created at startup and injected into the storage client;
/// every signing call goes through it rather than re-resolving credentials.
pub struct CredentialCache {
    provider: Box<dyn CredentialProvider>,
    cached: Mutex<Option<ResolvedCredentials>>,
}

impl CredentialCache {
    pub fn new(provider: Box<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
        }
    }

    /// Pick the provider for this deployment: configured static credentials
    /// win, otherwise the AWS environment variables.
    pub fn from_config(config: &CredentialsConfig) -> Self {
        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                info!("Using static credentials from configuration");
                Self::new(Box::new(StaticCredentialProvider::new(Credentials::new(
                    access_key_id.clone(),
                    secret_access_key.clone(),
                    config.session_token.clone(),
                ))))
            }
            _ => {
                debug!("No configured credentials, will resolve from environment");
                Self::new(Box::new(EnvCredentialProvider))
            }
        }
    }

    /// Current credentials, fetching through the provider when the cache is
    /// empty or the cached value is about to expire
    pub fn credentials(&self) -> Result<Credentials> {
        let mut cached = self.lock_cache()?;

        if let Some(resolved) = cached.as_ref() {
            if still_valid(resolved) {
                return Ok(resolved.credentials.clone());
            }
            debug!("Cached credentials expired, refreshing");
        }

        Self::fetch_into(&*self.provider, &mut cached)
    }

    /// Force re-resolution through the provider, replacing whatever is
    /// cached even when it has not expired yet
    pub fn refresh(&self) -> Result<Credentials> {
        let mut cached = self.lock_cache()?;
        debug!("Forcing credential refresh");
        Self::fetch_into(&*self.provider, &mut cached)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, Option<ResolvedCredentials>>> {
        self.cached.lock().map_err(|_| {
            GatewayError::CredentialError("credential cache lock poisoned".to_string())
        })
    }

    fn fetch_into(
        provider: &dyn CredentialProvider,
        cached: &mut Option<ResolvedCredentials>,
    ) -> Result<Credentials> {
        let resolved = provider.fetch()?;
        let credentials = resolved.credentials.clone();
        *cached = Some(resolved);
        Ok(credentials)
    }
}

fn still_valid(resolved: &ResolvedCredentials) -> bool {
    match resolved.expires_at {
        Some(expires_at) => Utc::now() + Duration::seconds(REFRESH_MARGIN_SECONDS) < expires_at,
        None => true,
    }
}
