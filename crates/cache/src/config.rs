//! Cache server address resolution.
//!
//! Clients reach a remote cache server when an address is configured either
//! explicitly (CLI flag) or through `RITUAL_CACHE_SERVER`. Addresses look like
//! `localhost:4000` or `http://localhost:4000` and normalize to a base URL.

use std::sync::RwLock;

use url::Url;

use crate::errors::{CacheError, Result};

/// Environment variable naming the cache server (`host:port`).
pub const CACHE_SERVER_ENV: &str = "RITUAL_CACHE_SERVER";

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Pick the cache server address: a non-blank CLI value wins over the env value.
pub fn resolve_cache_server_address(cli: Option<&str>, env: Option<&str>) -> Option<String> {
    normalize(cli).or_else(|| normalize(env))
}

fn has_scheme(address: &str) -> bool {
    let Some((scheme, _)) = address.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Normalize an address to `scheme://host:port`.
///
/// `http://` is assumed when no scheme is given. Host and an explicit port
/// are required.
pub fn to_cache_server_base_url(address: &str) -> Result<String> {
    let Some(address) = normalize(Some(address)) else {
        return Err(CacheError::InvalidAddress(
            "Cache server must be a non-empty hostname and port (example: localhost:4000)."
                .to_string(),
        ));
    };

    let with_scheme = if has_scheme(&address) {
        address
    } else {
        format!("http://{}", address)
    };

    let invalid = || {
        CacheError::InvalidAddress(
            "Cache server must include hostname and port (example: localhost:4000 or http://localhost:4000)."
                .to_string(),
        )
    };

    let parsed = Url::parse(&with_scheme).map_err(|_| invalid())?;
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(invalid)?;
    let port = parsed.port().ok_or_else(invalid)?;

    Ok(format!("{}://{}:{}", parsed.scheme(), host, port))
}

/// Runtime cache configuration shared by every cache manager in a process.
///
/// An explicit override, once set (even to no address), takes precedence over
/// the environment value captured at construction.
#[derive(Debug, Default)]
pub struct CacheContext {
    env_address: Option<String>,
    address_override: RwLock<Option<Option<String>>>,
}

impl CacheContext {
    /// Context whose fallback address is `env_address`.
    pub fn new(env_address: Option<&str>) -> Self {
        Self {
            env_address: normalize(env_address),
            address_override: RwLock::new(None),
        }
    }

    /// Context that falls back to `RITUAL_CACHE_SERVER`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(CACHE_SERVER_ENV).ok().as_deref())
    }

    /// Local-only context: no remote server unless an override is set.
    pub fn local() -> Self {
        Self::new(None)
    }

    pub fn set_address_override(&self, address: Option<&str>) {
        let mut guard = self
            .address_override
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(normalize(address));
    }

    pub fn clear_address_override(&self) {
        let mut guard = self
            .address_override
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }

    /// The address in effect, if any.
    pub fn configured_address(&self) -> Option<String> {
        let guard = self
            .address_override
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(address) => address.clone(),
            None => self.env_address.clone(),
        }
    }

    /// Base URL of the configured cache server, or `None` for local mode.
    pub fn base_url(&self) -> Result<Option<String>> {
        self.configured_address()
            .map(|address| to_cache_server_base_url(&address))
            .transpose()
    }
}
