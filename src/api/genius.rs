//! Lyrics metadata lookups against the Genius search API.
//!
//! Genius does not return lyrics themselves; we return song metadata and the
//! page URL for the client to open.

use crate::config::Config;
use crate::error::{CoreError, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

const ARTIST_MATCH_SCORE: u32 = 5;
const TITLE_MATCH_SCORE: u32 = 4;
const MAX_SEARCH_RESULTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongMatch {
    pub song_id: Option<i64>,
    pub title: String,
    pub full_title: String,
    pub primary_artist: String,
    pub genius_url: Option<String>,
    pub thumbnail: Option<String>,
}

/// Case-fold, strip accents and surrounding whitespace.
pub fn normalize(s: &str) -> String {
    s.nfkd()
        .filter(|c| canonical_combining_class(*c) == 0)
        .collect::<String>()
        .trim()
        .to_lowercase()
}

fn song_from_result(res: &Value) -> SongMatch {
    let url = res["url"].as_str().filter(|s| !s.is_empty());
    let path = res["path"].as_str().filter(|s| !s.is_empty());
    SongMatch {
        song_id: res["id"].as_i64(),
        title: res["title"].as_str().unwrap_or("").to_string(),
        full_title: res["full_title"].as_str().unwrap_or("").to_string(),
        primary_artist: res["primary_artist"]["name"].as_str().unwrap_or("").to_string(),
        genius_url: url
            .map(str::to_string)
            .or_else(|| path.map(|p| format!("https://genius.com{}", p))),
        thumbnail: res["song_art_image_thumbnail_url"]
            .as_str()
            .or_else(|| res["header_image_thumbnail_url"].as_str())
            .map(str::to_string),
    }
}

fn hits(payload: &Value) -> &[Value] {
    payload["response"]["hits"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Score one candidate against the wanted artist/title.
pub fn score(candidate: &SongMatch, want_artist: Option<&str>, want_title: Option<&str>) -> u32 {
    let mut score = 0;
    if let Some(a) = want_artist.map(normalize).filter(|a| !a.is_empty()) {
        if normalize(&candidate.primary_artist) == a {
            score += ARTIST_MATCH_SCORE;
        }
    }
    if let Some(t) = want_title.map(normalize).filter(|t| !t.is_empty()) {
        let ti = normalize(&candidate.title);
        if ti == t || ti.contains(&t) || t.contains(&ti) {
            score += TITLE_MATCH_SCORE;
        }
    }
    score
}

/// Highest-scoring hit; on equal scores the earlier hit wins, which also
/// means the first hit is returned when nothing scores above zero.
pub fn pick_best_hit(payload: &Value, want_artist: Option<&str>, want_title: Option<&str>) -> Option<SongMatch> {
    let mut best: Option<(u32, SongMatch)> = None;
    for h in hits(payload) {
        let cand = song_from_result(&h["result"]);
        let s = score(&cand, want_artist, want_title);
        if best.as_ref().map_or(true, |(b, _)| s > *b) {
            best = Some((s, cand));
        }
    }
    best.map(|(_, m)| m)
}

#[derive(Clone)]
pub struct GeniusClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl GeniusClient {
    pub fn new(cfg: &Config, client: Client) -> Self {
        Self {
            client,
            api_base: cfg.genius_api_base.trim_end_matches('/').to_string(),
            token: cfg.genius_api_token.clone().filter(|t| !t.is_empty()),
        }
    }

    /// Raw `/search` response.
    pub async fn search(&self, q: &str) -> Result<Value> {
        let token = self
            .token
            .as_deref()
            .ok_or(CoreError::NotConfigured("genius_api_token"))?;
        let resp = self
            .client
            .get(format!("{}/search", self.api_base))
            .bearer_auth(token)
            .query(&[("q", q)])
            .send()
            .await
            .map_err(CoreError::from_transport)?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CoreError::Upstream {
                status: Some(401),
                detail: "Genius API auth failed (check genius_api_token)".into(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::Upstream {
                status: Some(status.as_u16()),
                detail: body,
            });
        }
        resp.json::<Value>().await.map_err(CoreError::from_transport)
    }

    /// Best match for an artist + title pair.
    pub async fn lyrics_metadata(&self, artist: &str, title: &str) -> Result<SongMatch> {
        let payload = self.search(&format!("{} {}", artist, title)).await?;
        pick_best_hit(&payload, Some(artist), Some(title))
            .ok_or_else(|| CoreError::NotFound(format!("song {} - {} on Genius", artist, title)))
    }

    /// Free-form search, first ten hits.
    pub async fn search_songs(&self, q: &str) -> Result<Vec<SongMatch>> {
        let payload = self.search(q).await?;
        Ok(hits(&payload)
            .iter()
            .take(MAX_SEARCH_RESULTS)
            .map(|h| song_from_result(&h["result"]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(artist: &str, title: &str, id: i64) -> Value {
        json!({"result": {
            "id": id,
            "title": title,
            "full_title": format!("{} by {}", title, artist),
            "primary_artist": {"name": artist},
            "path": format!("/songs/{}", id),
        }})
    }

    #[test]
    fn normalize_folds_case_and_accents() {
        assert_eq!(normalize("  Beyoncé "), "beyonce");
        assert_eq!(normalize("ÁRBOL"), "arbol");
    }

    #[test]
    fn exact_match_beats_same_artist() {
        let payload = json!({"response": {"hits": [
            hit("The Beatles", "Hey Jude", 1),
            hit("The Beatles", "Let It Be", 2),
        ]}});
        let best = pick_best_hit(&payload, Some("The Beatles"), Some("Let It Be")).unwrap();
        assert_eq!(best.song_id, Some(2));
        assert_eq!(score(&best, Some("The Beatles"), Some("Let It Be")), 9);
    }

    #[test]
    fn ties_and_zero_scores_keep_first_seen() {
        let payload = json!({"response": {"hits": [
            hit("Someone", "Other", 1),
            hit("Nobody", "Else", 2),
        ]}});
        let best = pick_best_hit(&payload, Some("Queen"), Some("Bohemian Rhapsody")).unwrap();
        assert_eq!(best.song_id, Some(1));
        assert_eq!(best.genius_url.as_deref(), Some("https://genius.com/songs/1"));
    }

    #[test]
    fn title_substring_counts() {
        let c = song_from_result(&hit("X", "Let It Be (Remastered 2009)", 3)["result"]);
        assert_eq!(score(&c, None, Some("let it be")), TITLE_MATCH_SCORE);
    }

    #[test]
    fn blank_wants_do_not_score() {
        let c = song_from_result(&hit("Queen", "Innuendo", 4)["result"]);
        assert_eq!(score(&c, Some("   "), Some(" \t ")), 0);
        // a lone combining acute accent folds to nothing
        assert_eq!(score(&c, Some("\u{301}"), Some("\u{301}")), 0);
        assert_eq!(score(&c, Some(" queen "), Some("  ")), ARTIST_MATCH_SCORE);
    }

    #[test]
    fn no_hits_is_none() {
        assert!(pick_best_hit(&json!({"response": {"hits": []}}), Some("a"), Some("b")).is_none());
        assert!(pick_best_hit(&json!({}), None, None).is_none());
    }
}
