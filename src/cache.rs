// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # response cache
//!
//! A TTL'd cache of serialized response payloads for the two hot catalog reads: the unfiltered
//! movie list (key [`MOVIES_LIST`]) and each movie detail (key [`movie_detail_key`]). Entries
//! expire a configurable number of seconds after insertion, but expiry is the
//! *backstop*, not the consistency mechanism: every write that can change a cached payload (to
//! the movie itself or to its reviews) invalidates the affected keys inline, before the write's
//! response is sent. A subsequent read misses and rebuilds from storage.
//!
//! Keys are flat strings so the cache itself needs no knowledge of the entities it's fronting.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::entities::MovieId;

/// Cache key under which the unfiltered movie listing is stored
pub const MOVIES_LIST: &str = "movies:list";

/// Cache key under which one movie's detail payload is stored
pub fn movie_detail_key(id: &MovieId) -> String {
    format!("movies:detail:{}", id)
}

struct Entry {
    body: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// A TTL'd map from cache key to serialized response payload
pub struct ResponseCache {
    ttl: TimeDelta,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ResponseCache {
    /// Create a [ResponseCache] whose entries live for `ttl_seconds` after insertion
    pub fn new(ttl_seconds: u32) -> ResponseCache {
        ResponseCache {
            ttl: TimeDelta::seconds(ttl_seconds as i64),
            entries: RwLock::new(HashMap::new()),
        }
    }
    /// Fetch the payload under `key`, if present & un-expired. Expired entries are dropped on
    /// the way out.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if Utc::now() < entry.expires_at => return Some(entry.body.clone()),
                Some(_) => (),
                None => return None,
            }
        }
        // expired; upgrade to the write lock to evict
        self.evict_if_expired(key).await;
        None
    }
    // A writer may have replaced the entry between a reader's two lock acquisitions; re-check
    // expiry under the write lock so a fresh replacement survives.
    async fn evict_if_expired(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| Utc::now() >= entry.expires_at)
        {
            entries.remove(key);
        }
    }
    /// Store `body` under `key`, replacing any previous entry & restarting the TTL clock
    pub async fn put(&self, key: String, body: serde_json::Value) {
        let entry = Entry {
            body,
            expires_at: Utc::now() + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }
    /// Drop the entry under `key`, if any. Idempotent.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
    /// Drop the movie-list entry *and* the given movie's detail entry; the invalidation every
    /// movie & review write performs
    pub async fn invalidate_movie(&self, id: &MovieId) {
        let mut entries = self.entries.write().await;
        entries.remove(MOVIES_LIST);
        entries.remove(&movie_detail_key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_put_invalidate() {
        let cache = ResponseCache::new(300);
        assert!(cache.get(MOVIES_LIST).await.is_none());

        cache.put(MOVIES_LIST.to_string(), json!([{"title": "Inception"}])).await;
        assert_eq!(
            cache.get(MOVIES_LIST).await,
            Some(json!([{"title": "Inception"}]))
        );

        cache.invalidate(MOVIES_LIST).await;
        assert!(cache.get(MOVIES_LIST).await.is_none());
        // invalidating an absent key is fine
        cache.invalidate(MOVIES_LIST).await;
    }

    #[tokio::test]
    async fn entries_expire() {
        // zero TTL: everything is born expired
        let cache = ResponseCache::new(0);
        cache.put(MOVIES_LIST.to_string(), json!([])).await;
        assert!(cache.get(MOVIES_LIST).await.is_none());
    }

    #[tokio::test]
    async fn eviction_rechecks_expiry() {
        let cache = ResponseCache::new(300);

        // A reader that observed an expired entry must not take out a fresh replacement.
        cache.put(MOVIES_LIST.to_string(), json!(["fresh"])).await;
        cache.evict_if_expired(MOVIES_LIST).await;
        assert_eq!(cache.get(MOVIES_LIST).await, Some(json!(["fresh"])));

        // A genuinely expired entry still goes.
        cache.entries.write().await.insert(
            MOVIES_LIST.to_string(),
            Entry {
                body: json!([]),
                expires_at: Utc::now() - TimeDelta::seconds(1),
            },
        );
        cache.evict_if_expired(MOVIES_LIST).await;
        assert!(cache.entries.read().await.get(MOVIES_LIST).is_none());
    }

    #[tokio::test]
    async fn movie_invalidation_takes_out_both_keys() {
        let cache = ResponseCache::new(300);
        let id = MovieId::new();
        let other = MovieId::new();
        cache.put(MOVIES_LIST.to_string(), json!([])).await;
        cache.put(movie_detail_key(&id), json!({})).await;
        cache.put(movie_detail_key(&other), json!({})).await;

        cache.invalidate_movie(&id).await;
        assert!(cache.get(MOVIES_LIST).await.is_none());
        assert!(cache.get(&movie_detail_key(&id)).await.is_none());
        // an unrelated movie's detail entry survives
        assert!(cache.get(&movie_detail_key(&other)).await.is_some());
    }
}
