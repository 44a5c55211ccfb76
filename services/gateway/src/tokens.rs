//! Credential cache sitting between the session layer and the OAuth gateway.
//!
//! Tokens are persisted in sqlite so restarts do not burn issuance quota, and
//! refreshed lazily when a session asks for one that is about to expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use govor_core::oauth::TokenIssuer;
use tracing::{info, warn};

use crate::db::TokenStore;

pub const SALUTE_SPEECH: &str = "salute_speech";
pub const GIGA_CHAT: &str = "giga_chat";

/// Issuance parameters for one named credential.
#[derive(Clone, Debug)]
pub struct TokenSpec {
    pub scope: String,
    pub auth_key: String,
}

/// Anything that can hand out a currently-valid bearer token by name.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, name: &str) -> Result<String>;
}

/// Persistent token cache with lazy refresh against the OAuth gateway.
pub struct CredentialCache {
    store: TokenStore,
    issuer: Arc<dyn TokenIssuer>,
    specs: HashMap<String, TokenSpec>,
    safety_margin: Duration,
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl CredentialCache {
    pub fn new(
        store: TokenStore,
        issuer: Arc<dyn TokenIssuer>,
        specs: HashMap<String, TokenSpec>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            specs,
            safety_margin,
            refresh_locks: DashMap::new(),
        }
    }

    /// A token is usable if it outlives the safety margin from now.
    fn is_fresh(&self, expires_at_ms: i64) -> bool {
        let remaining = expires_at_ms / 1000 - now_epoch_secs();
        remaining > self.safety_margin.as_secs() as i64
    }

    async fn ensure_fresh(&self, name: &str) -> Result<String> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| anyhow!("No credential spec registered for '{name}'"))?;

        if let Some(record) = self.store.get(name).await? {
            if self.is_fresh(record.expires_at) {
                return Ok(record.token);
            }
        }

        // Serialize refreshes per credential name so concurrent sessions
        // trigger at most one issuance round-trip.
        let lock = self
            .refresh_locks
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();
        let _guard = lock.lock().await;

        // Another session may have refreshed while we waited on the lock.
        let stale = self.store.get(name).await?;
        if let Some(record) = &stale {
            if self.is_fresh(record.expires_at) {
                return Ok(record.token.clone());
            }
        }

        match self.issuer.issue(&spec.auth_key, &spec.scope).await {
            Ok(issued) => {
                self.store.upsert(name, &issued.value, issued.expires_at).await?;
                info!(name, "Refreshed OAuth token");
                Ok(issued.value)
            }
            Err(e) => match stale {
                // A stale token may still be accepted upstream; better than
                // failing the turn outright.
                Some(record) => {
                    warn!(name, error = %e, "Token refresh failed, using stale token");
                    Ok(record.token)
                }
                None => Err(anyhow!("Token refresh for '{name}' failed: {e}")),
            },
        }
    }
}

#[async_trait]
impl TokenSource for CredentialCache {
    async fn token(&self, name: &str) -> Result<String> {
        self.ensure_fresh(name).await
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
