//! Observable cache of resolved links per (film, provider, episode).
//!
//! Every mutation publishes a complete snapshot of the map through a watch
//! channel. Readers always see a consistent point-in-time view and never
//! block writers; the map itself is copied on write only while an older
//! snapshot is still held somewhere.

use crate::models::{Episode, Stream, Subtitle};
use futures::stream::{self, Stream as FuturesStream};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpisodeKey {
    pub season: u32,
    pub number: u32,
}

impl From<&Episode> for EpisodeKey {
    fn from(episode: &Episode) -> Self {
        Self {
            season: episode.season,
            number: episode.number,
        }
    }
}

/// Identity of a cached link-resolution result.
///
/// A key without provider and episode is the film-only alias, which answers
/// "does any provider have links cached for this film".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub film_id: String,
    pub provider_id: Option<String>,
    pub episode: Option<EpisodeKey>,
}

impl CacheKey {
    pub fn new(
        film_id: impl Into<String>,
        provider_id: impl Into<String>,
        episode: Option<&Episode>,
    ) -> Self {
        Self {
            film_id: film_id.into(),
            provider_id: Some(provider_id.into()),
            episode: episode.map(EpisodeKey::from),
        }
    }

    pub fn film_only(film_id: impl Into<String>) -> Self {
        Self {
            film_id: film_id.into(),
            provider_id: None,
            episode: None,
        }
    }

    pub fn to_film_only(&self) -> Self {
        Self::film_only(self.film_id.clone())
    }

    pub fn is_film_only(&self) -> bool {
        self.provider_id.is_none() && self.episode.is_none()
    }
}

/// Links resolved by one provider for one film or episode.
///
/// Streams and subtitles keep discovery order and never contain duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLinks {
    pub watch_id: String,
    pub provider_id: String,
    pub episode: Option<Episode>,
    pub streams: Vec<Stream>,
    pub subtitles: Vec<Subtitle>,
}

impl CachedLinks {
    pub fn new(
        watch_id: impl Into<String>,
        provider_id: impl Into<String>,
        episode: Option<Episode>,
    ) -> Self {
        Self {
            watch_id: watch_id.into(),
            provider_id: provider_id.into(),
            episode,
            streams: Vec::new(),
            subtitles: Vec::new(),
        }
    }

    pub fn has_no_stream_links(&self) -> bool {
        self.streams.is_empty()
    }

    /// Returns false when the stream was already present.
    pub fn add_stream(&mut self, stream: Stream) -> bool {
        if self.streams.contains(&stream) {
            return false;
        }
        self.streams.push(stream);
        true
    }

    pub fn add_subtitle(&mut self, subtitle: Subtitle) -> bool {
        if self.subtitles.contains(&subtitle) {
            return false;
        }
        self.subtitles.push(subtitle);
        true
    }
}

pub type LinkSnapshot = Arc<HashMap<CacheKey, CachedLinks>>;

pub struct LinkCache {
    snapshots: watch::Sender<LinkSnapshot>,
}

impl Default for LinkCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LinkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCache")
            .field("entries", &self.snapshots.borrow().len())
            .finish()
    }
}

impl LinkCache {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Arc::new(HashMap::new()));
        Self { snapshots }
    }

    /// Inserts or overwrites the entry for `key` and its film-only alias.
    pub fn store(&self, key: CacheKey, links: CachedLinks) {
        self.snapshots.send_modify(|snapshot| {
            let map = Arc::make_mut(snapshot);
            if !key.is_film_only() {
                map.insert(key.to_film_only(), links.clone());
            }
            map.insert(key, links);
        });
        tracing::trace!("link cache entry stored");
    }

    /// Appends `stream` to an existing entry. No-op when the entry is absent
    /// or already holds an equal stream.
    pub fn add_stream(&self, key: &CacheKey, stream: Stream) -> bool {
        self.merge(key, |links| links.add_stream(stream))
    }

    pub fn add_subtitle(&self, key: &CacheKey, subtitle: Subtitle) -> bool {
        self.merge(key, |links| links.add_subtitle(subtitle))
    }

    fn merge<F>(&self, key: &CacheKey, apply: F) -> bool
    where
        F: FnOnce(&mut CachedLinks) -> bool,
    {
        self.snapshots.send_if_modified(|snapshot| {
            let Some(existing) = snapshot.get(key) else {
                return false;
            };
            let mut merged = existing.clone();
            if !apply(&mut merged) {
                return false;
            }
            let map = Arc::make_mut(snapshot);
            if !key.is_film_only() {
                map.insert(key.to_film_only(), merged.clone());
            }
            map.insert(key.clone(), merged);
            true
        })
    }

    pub fn get_cache(&self, key: &CacheKey) -> Option<CachedLinks> {
        self.snapshots.borrow().get(key).cloned()
    }

    /// Most recently written entry for `film_id` across all providers.
    pub fn get_film_cache(&self, film_id: &str) -> Option<CachedLinks> {
        self.get_cache(&CacheKey::film_only(film_id))
    }

    /// Values for `key` as they change.
    ///
    /// Seeds the cache with `default` when nothing is stored yet. An entry
    /// without streams is reported as `None`, and consecutive equal values
    /// are emitted once.
    pub fn observe_cache(
        &self,
        key: CacheKey,
        default: CachedLinks,
    ) -> impl FuturesStream<Item = Option<CachedLinks>> + Send + 'static {
        if self.get_cache(&key).is_none() {
            self.store(key.clone(), default);
        }

        let rx = self.snapshots.subscribe();
        stream::unfold(
            (rx, key, None::<Option<CachedLinks>>),
            |(mut rx, key, last)| async move {
                loop {
                    if last.is_some() && rx.changed().await.is_err() {
                        return None;
                    }
                    let current = usable(rx.borrow_and_update().get(&key));
                    if last.as_ref() != Some(&current) {
                        return Some((current.clone(), (rx, key, Some(current))));
                    }
                }
            },
        )
    }

    /// Removes the entry for `key` and its film-only alias.
    pub fn remove_cache(&self, key: &CacheKey) -> bool {
        self.snapshots.send_if_modified(|snapshot| {
            let alias = key.to_film_only();
            if !snapshot.contains_key(key) && !snapshot.contains_key(&alias) {
                return false;
            }
            let map = Arc::make_mut(snapshot);
            map.remove(key);
            map.remove(&alias);
            true
        })
    }

    pub fn clear(&self) {
        self.snapshots.send_if_modified(|snapshot| {
            if snapshot.is_empty() {
                return false;
            }
            *snapshot = Arc::new(HashMap::new());
            true
        });
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshots.subscribe()
    }
}

fn usable(entry: Option<&CachedLinks>) -> Option<CachedLinks> {
    entry.filter(|links| !links.has_no_stream_links()).cloned()
}
