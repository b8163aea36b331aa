//! Identity selection for the ledger's storage slot.
//!
//! Preference order: a previously cached identity, a public address from an
//! optional provider, then a locally generated value. Whatever is chosen is
//! cached so later runs land on the same slot.

use crate::persistence::KeyValueStore;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

/// Key under which the chosen identity is cached.
pub const IDENTITY_KEY: &str = "ledger_identity";

const PUBLIC_ADDRESS_URL: &str = "https://api.ipify.org";

/// Best-effort source of an identity string.
pub trait IdentityProvider {
    /// Returns an identity, or `None` if unavailable.
    fn lookup(&self) -> Option<String>;
}

/// Asks a public service for this machine's public address.
pub struct PublicAddressLookup {
    url: String,
    timeout: Duration,
}

impl PublicAddressLookup {
    pub fn new(timeout: Duration) -> Self {
        Self {
            url: PUBLIC_ADDRESS_URL.to_string(),
            timeout,
        }
    }

    fn fetch(&self) -> Result<String, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        client.get(&self.url).send()?.error_for_status()?.text()
    }
}

impl IdentityProvider for PublicAddressLookup {
    fn lookup(&self) -> Option<String> {
        match self.fetch() {
            Ok(body) => {
                let body = body.trim();
                match body.parse::<IpAddr>() {
                    Ok(addr) => Some(addr.to_string()),
                    Err(_) => {
                        log::debug!("Ignoring non-address identity response");
                        None
                    }
                }
            }
            Err(e) => {
                log::debug!("Public address lookup failed: {}", e);
                None
            }
        }
    }
}

/// Locally generated identity: creation time plus random suffix.
pub fn local_identity(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("local-{}-{}", now.timestamp_millis(), &random[..8])
}

/// Identity cached by an earlier run, if any.
pub fn cached_identity(store: &dyn KeyValueStore) -> Option<String> {
    match store.get(IDENTITY_KEY) {
        Ok(cached) => cached.filter(|id| !id.trim().is_empty()),
        Err(e) => {
            log::warn!("Failed to read cached identity: {}", e);
            None
        }
    }
}

pub fn cache_identity(store: &dyn KeyValueStore, identity: &str) {
    if let Err(e) = store.set(IDENTITY_KEY, identity) {
        log::warn!("Failed to cache identity: {}", e);
    }
}

/// Resolves the identity, caching the result in `store`. Never fails.
///
/// The provider is consulted inline. To keep a slow provider off the startup
/// path, resolve without one and hand its answer to `App::adopt_identity` later.
pub fn resolve_identity(
    store: &dyn KeyValueStore,
    provider: Option<&dyn IdentityProvider>,
    now: DateTime<Utc>,
) -> String {
    if let Some(cached) = cached_identity(store) {
        return cached;
    }

    let identity = provider
        .and_then(|p| p.lookup())
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| {
            log::info!("Using locally generated identity");
            local_identity(now)
        });

    cache_identity(store, &identity);
    identity
}
