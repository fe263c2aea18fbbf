use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a film is a single movie or an episodic show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilmType {
    #[default]
    Movie,
    TvShow,
}

/// A provider-scoped film entry as returned from catalogs and searches.
///
/// `id` is opaque to the host and only meaningful to the provider that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Film {
    pub id: String,
    pub provider_id: String,
    pub title: String,
    #[serde(default)]
    pub film_type: FilmType,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub poster_image: Option<String>,
    #[serde(default)]
    pub backdrop_image: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<u64>,
    #[serde(default)]
    pub imdb_id: Option<String>,
}

impl Film {
    /// Image to show as a thumbnail, backdrop first.
    pub fn preview_image(&self) -> Option<&str> {
        self.backdrop_image
            .as_deref()
            .or(self.poster_image.as_deref())
    }
}

/// A single episode of a show.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub season: u32,
    pub number: u32,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub number: u32,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

/// Full metadata for a film; shows carry their seasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilmDetails {
    pub film: Film,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub seasons: Vec<Season>,
}

impl FilmDetails {
    pub fn first_episode(&self) -> Option<&Episode> {
        self.seasons.iter().flat_map(|s| s.episodes.iter()).next()
    }
}

impl From<Film> for FilmDetails {
    fn from(film: Film) -> Self {
        Self {
            film,
            overview: None,
            genres: Vec::new(),
            seasons: Vec::new(),
        }
    }
}

/// A paginated listing the provider exposes (e.g. "Trending").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub can_paginate: bool,
}

/// A named group of search filters; at most one option is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub name: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub selected: Option<usize>,
}

/// A playable stream discovered by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Stream {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }
}

/// A caption track discovered by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subtitle {
    pub language: String,
    pub url: String,
}

impl Subtitle {
    pub fn new(language: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            url: url.into(),
        }
    }
}

/// Anything `get_links` can discover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaLink {
    Stream(Stream),
    Subtitle(Subtitle),
}

/// Search parameters handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub title: String,
    pub page: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<u64>,
    #[serde(default)]
    pub filters: Vec<FilterGroup>,
}

impl SearchQuery {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            page: 1,
            id: None,
            imdb_id: None,
            tmdb_id: None,
            filters: Vec::new(),
        }
    }

    /// Query that should find `film` on its own provider.
    pub fn for_film(film: &Film) -> Self {
        Self {
            title: film.title.clone(),
            page: 1,
            id: Some(film.id.clone()),
            imdb_id: film.imdb_id.clone(),
            tmdb_id: film.tmdb_id,
            filters: Vec::new(),
        }
    }
}

/// A single page of items. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    #[serde(default)]
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn single_page(items: Vec<T>) -> Self {
        Self {
            items,
            page: 1,
            has_next_page: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn film() -> Film {
        Film {
            id: "f-1".into(),
            provider_id: "demo".into(),
            title: "Heat".into(),
            film_type: FilmType::Movie,
            year: Some(1995),
            poster_image: Some("poster.jpg".into()),
            backdrop_image: None,
            tmdb_id: Some(949),
            imdb_id: None,
        }
    }

    #[test]
    fn preview_prefers_backdrop() {
        let mut film = film();
        assert_eq!(film.preview_image(), Some("poster.jpg"));
        film.backdrop_image = Some("backdrop.jpg".into());
        assert_eq!(film.preview_image(), Some("backdrop.jpg"));
    }

    #[test]
    fn media_link_is_tagged() {
        let json = serde_json::to_string(&MediaLink::Subtitle(Subtitle::new("en", "a.vtt"))).unwrap();
        assert!(json.contains("\"kind\":\"subtitle\""));
    }

    #[test]
    fn first_episode_walks_seasons_in_order() {
        let details = FilmDetails {
            seasons: vec![
                Season {
                    number: 1,
                    episodes: Vec::new(),
                },
                Season {
                    number: 2,
                    episodes: vec![Episode {
                        id: "s2e1".into(),
                        season: 2,
                        number: 1,
                        title: None,
                    }],
                },
            ],
            ..FilmDetails::from(film())
        };
        assert_eq!(details.first_episode().map(|e| e.id.as_str()), Some("s2e1"));
    }
}
