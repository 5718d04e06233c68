//! Cached resources with TTL and offline fallback.
//!
//! A [`CachedResource`] stores values of one type in the local
//! [`KeyValueStore`] under `cache:{namespace}:{id}`, wrapped in an envelope
//! carrying the time they were stored. Reads come in two flavours:
//!
//! - [`get_or_fetch`](CachedResource::get_or_fetch): cache-first, the API is
//!   only asked once the entry is older than the TTL
//! - [`refresh`](CachedResource::refresh): network-first
//!
//! Both fall back to a stale entry when the API is unreachable.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use roombook_core::Clock;
use roombook_providers::{ApiResult, KeyValueStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{EngineError, EngineResult};

/// Key prefix shared by every cached resource.
pub const CACHE_PREFIX: &str = "cache:";

/// Where a value returned by a cached read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// A cache entry younger than the TTL.
    Fresh,
    /// The API, just now.
    Remote,
    /// An expired cache entry served because the API was unreachable.
    Stale,
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub source: CacheSource,
    /// When the value was stored locally (or fetched, for remote values).
    pub stored_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    /// Returns true if the value may be out of date.
    pub fn is_stale(&self) -> bool {
        self.source == CacheSource::Stale
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    value: T,
    stored_at: DateTime<Utc>,
}

/// A typed view over one cache namespace.
pub struct CachedResource<T> {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    namespace: &'static str,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CachedResource<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            namespace: self.namespace,
            ttl: self.ttl,
            _marker: PhantomData,
        }
    }
}

impl<T> CachedResource<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        namespace: &'static str,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            namespace,
            ttl,
            _marker: PhantomData,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}:{}", CACHE_PREFIX, self.namespace, id)
    }

    fn is_fresh(&self, stored_at: DateTime<Utc>) -> bool {
        match (self.clock.now() - stored_at).to_std() {
            Ok(age) => age < self.ttl,
            // Stored "in the future" (clock moved back): treat as fresh.
            Err(_) => true,
        }
    }

    /// Returns the cached value whatever its age.
    ///
    /// An entry that fails to decode is treated as absent.
    pub async fn peek(&self, id: &str) -> EngineResult<Option<Cached<T>>> {
        let key = self.key(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(env) => {
                let source = if self.is_fresh(env.stored_at) {
                    CacheSource::Fresh
                } else {
                    CacheSource::Stale
                };
                Ok(Some(Cached {
                    value: env.value,
                    source,
                    stored_at: env.stored_at,
                }))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Stores `value`, replacing any previous entry.
    pub async fn put(&self, id: &str, value: &T) -> EngineResult<()> {
        self.put_at(id, value, self.clock.now()).await
    }

    /// Stores `value` with an explicit store time.
    ///
    /// Local edits of an existing entry keep its age so that they never make
    /// a list look fresher than its last fetch.
    pub async fn put_at(&self, id: &str, value: &T, stored_at: DateTime<Utc>) -> EngineResult<()> {
        let env = Envelope { value, stored_at };
        let raw = serde_json::to_string(&env)?;
        self.store.set(&self.key(id), raw).await?;
        trace!(namespace = self.namespace, id = %id, "Cached value");
        Ok(())
    }

    pub async fn invalidate(&self, id: &str) -> EngineResult<()> {
        self.store.remove(&self.key(id)).await?;
        debug!(namespace = self.namespace, id = %id, "Invalidated cache entry");
        Ok(())
    }

    /// Drops every entry of this namespace.
    pub async fn invalidate_all(&self) -> EngineResult<()> {
        let prefix = format!("{}{}:", CACHE_PREFIX, self.namespace);
        let keys = self.store.keys_with_prefix(&prefix).await?;
        let count = keys.len();
        self.store.remove_many(&keys).await?;
        debug!(namespace = self.namespace, count, "Invalidated cache namespace");
        Ok(())
    }

    /// Cache-first read.
    ///
    /// A fresh entry is returned without calling `fetch`. Otherwise the value
    /// is fetched and cached; if the API is unreachable the stale entry is
    /// returned instead, and the network error only surfaces when there is
    /// nothing cached at all.
    pub async fn get_or_fetch<F, Fut>(&self, id: &str, fetch: F) -> EngineResult<Cached<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        match self.peek(id).await? {
            Some(c) if c.source == CacheSource::Fresh => {
                trace!(namespace = self.namespace, id = %id, "Cache hit");
                Ok(c)
            }
            cached => self.fetch_with_fallback(id, cached, fetch).await,
        }
    }

    /// Network-first read with the same stale fallback as
    /// [`get_or_fetch`](Self::get_or_fetch).
    pub async fn refresh<F, Fut>(&self, id: &str, fetch: F) -> EngineResult<Cached<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let cached = self.peek(id).await?;
        self.fetch_with_fallback(id, cached, fetch).await
    }

    async fn fetch_with_fallback<F, Fut>(
        &self,
        id: &str,
        cached: Option<Cached<T>>,
        fetch: F,
    ) -> EngineResult<Cached<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        match fetch().await {
            Ok(value) => {
                self.put(id, &value).await?;
                Ok(Cached {
                    value,
                    source: CacheSource::Remote,
                    stored_at: self.clock.now(),
                })
            }
            Err(e) if e.is_network() => match cached {
                Some(mut c) => {
                    warn!(
                        namespace = self.namespace,
                        id = %id,
                        error = %e,
                        "API unreachable, serving cached value"
                    );
                    c.source = CacheSource::Stale;
                    Ok(c)
                }
                None => Err(EngineError::Network(e)),
            },
            Err(e) => Err(e.into()),
        }
    }
}
