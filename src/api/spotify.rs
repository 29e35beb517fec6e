use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::token::TokenManager;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Which of the user's top items to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopKind {
    Tracks,
    Artists,
}

impl TopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopKind::Tracks => "tracks",
            TopKind::Artists => "artists",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tracks" => Some(TopKind::Tracks),
            "artists" => Some(TopKind::Artists),
            _ => None,
        }
    }
}

/// Seeds for `/recommendations`, already comma-joined.
#[derive(Debug, Clone, Default)]
pub struct Seeds {
    pub tracks: Option<String>,
    pub artists: Option<String>,
}

impl Seeds {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_none() && self.artists.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedTrack {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub uri: String,
    pub preview_url: Option<String>,
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageRecommendations {
    pub lang: String,
    pub market: String,
    pub items: Vec<RecommendedTrack>,
}

/// First Spotify market for a language; unknown languages fall back to US.
pub fn market_for_lang(lang: &str) -> &'static str {
    match lang {
        "es" => "ES",
        "en" => "US",
        "pt" => "BR",
        "fr" => "FR",
        _ => "US",
    }
}

/// Stateless pass-through to the Spotify Web API. Every user-scoped call
/// first obtains a valid token from the `TokenManager`; upstream failures
/// are surfaced as-is and never retried here.
#[derive(Clone)]
pub struct SpotifyGateway {
    client: Client,
    api_base: String,
    tokens: TokenManager,
}

impl SpotifyGateway {
    pub fn new(cfg: &Config, client: Client, tokens: TokenManager) -> Self {
        Self {
            client,
            api_base: cfg.spotify_api_base.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Authenticated GET with an explicit access token.
    pub async fn get_with_token(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(CoreError::from_transport)?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(%status, path, "spotify request failed");
            return Err(CoreError::Upstream {
                status: Some(status.as_u16()),
                detail: body,
            });
        }
        resp.json::<Value>().await.map_err(CoreError::from_transport)
    }

    async fn get_for_user(&self, user_id: &str, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let token = self.tokens.ensure_valid_token(user_id).await?;
        self.get_with_token(&token, path, query).await
    }

    pub async fn me(&self, user_id: &str) -> Result<Value> {
        self.get_for_user(user_id, "/me", &[]).await
    }

    pub async fn top(&self, user_id: &str, kind: TopKind, limit: u32, time_range: &str) -> Result<Value> {
        let token = self.tokens.ensure_valid_token(user_id).await?;
        self.top_with_token(&token, kind, limit, time_range).await
    }

    async fn top_with_token(&self, token: &str, kind: TopKind, limit: u32, time_range: &str) -> Result<Value> {
        let path = format!("/me/top/{}", kind.as_str());
        let query = [
            ("limit", limit.clamp(1, 50).to_string()),
            ("time_range", time_range.to_string()),
        ];
        self.get_with_token(token, &path, &query).await
    }

    pub async fn search_tracks(&self, user_id: &str, q: &str, limit: u32) -> Result<Value> {
        let query = [
            ("q", q.to_string()),
            ("type", "track".to_string()),
            ("limit", limit.clamp(1, 50).to_string()),
        ];
        self.get_for_user(user_id, "/search", &query).await
    }

    pub async fn track(&self, user_id: &str, track_id: &str) -> Result<Value> {
        let path = format!("/tracks/{}", urlencoding::encode(track_id));
        let v = self.get_for_user(user_id, &path, &[]).await?;
        let empty = match &v {
            Value::Null => true,
            Value::Object(m) => m.is_empty(),
            _ => false,
        };
        if empty {
            return Err(CoreError::NotFound(format!("track {}", track_id)));
        }
        Ok(v)
    }

    pub async fn recommendations(
        &self,
        user_id: &str,
        seeds: &Seeds,
        limit: u32,
        market: Option<&str>,
    ) -> Result<Value> {
        let token = self.tokens.ensure_valid_token(user_id).await?;
        self.recommendations_with_token(&token, seeds, limit, market).await
    }

    async fn recommendations_with_token(
        &self,
        token: &str,
        seeds: &Seeds,
        limit: u32,
        market: Option<&str>,
    ) -> Result<Value> {
        let mut query = vec![("limit", limit.clamp(1, 100).to_string())];
        if let Some(t) = &seeds.tracks {
            query.push(("seed_tracks", t.clone()));
        }
        if let Some(a) = &seeds.artists {
            query.push(("seed_artists", a.clone()));
        }
        if let Some(m) = market {
            query.push(("market", m.to_string()));
        }
        self.get_with_token(token, "/recommendations", &query).await
    }

    /// Seed recommendations from the user's top tracks and artists and
    /// restrict them to the market of `lang`.
    pub async fn recommend_by_language(
        &self,
        user_id: &str,
        lang: &str,
        limit: u32,
    ) -> Result<LanguageRecommendations> {
        let token = self.tokens.ensure_valid_token(user_id).await?;
        let (top_tracks, top_artists) = futures::future::try_join(
            self.top_with_token(&token, TopKind::Tracks, 5, "medium_term"),
            self.top_with_token(&token, TopKind::Artists, 5, "medium_term"),
        )
        .await?;

        let seeds = Seeds {
            tracks: seed_ids(&top_tracks),
            artists: seed_ids(&top_artists),
        };
        if seeds.is_empty() {
            return Err(CoreError::InvalidPayload(
                "not enough Spotify listening history to build recommendations".into(),
            ));
        }

        let market = market_for_lang(lang);
        let reco = self
            .recommendations_with_token(&token, &seeds, limit.min(100), Some(market))
            .await?;
        let items = reco["tracks"]
            .as_array()
            .map(|ts| ts.iter().filter_map(simplify_track).collect())
            .unwrap_or_default();
        Ok(LanguageRecommendations {
            lang: lang.to_string(),
            market: market.to_string(),
            items,
        })
    }
}

/// Up to three ids from a paging object's `items`, comma-joined.
fn seed_ids(page: &Value) -> Option<String> {
    let ids: Vec<&str> = page["items"]
        .as_array()
        .map(|items| items.iter().filter_map(|i| i["id"].as_str()).take(3).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        None
    } else {
        Some(ids.join(","))
    }
}

fn simplify_track(t: &Value) -> Option<RecommendedTrack> {
    let artist = t["artists"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|x| x["name"].as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    Some(RecommendedTrack {
        id: t["id"].as_str()?.to_string(),
        name: t["name"].as_str().unwrap_or("").to_string(),
        artist,
        uri: t["uri"].as_str().unwrap_or("").to_string(),
        preview_url: t["preview_url"].as_str().map(str::to_string),
        external_url: t["external_urls"]["spotify"].as_str().map(str::to_string),
    })
}
