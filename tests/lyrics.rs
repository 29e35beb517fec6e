use mockito::{Matcher, Server};
use music_reco_backend as lib;
use lib::api::genius::GeniusClient;
use lib::config::Config;
use lib::service::http_client;
use lib::CoreError;
use serde_json::json;
use std::path::PathBuf;

fn client(base: &str, token: Option<&str>) -> GeniusClient {
    let mut cfg = Config::for_tests(PathBuf::from("unused.db"), base);
    cfg.genius_api_token = token.map(str::to_string);
    GeniusClient::new(&cfg, http_client(&cfg).expect("http client"))
}

fn hit(id: i64, title: &str, artist: &str) -> serde_json::Value {
    json!({"result": {
        "id": id,
        "title": title,
        "full_title": format!("{} by {}", title, artist),
        "primary_artist": {"name": artist},
        "path": format!("/songs/{}", id),
        "song_art_image_thumbnail_url": format!("https://images.example/{}.jpg", id)
    }})
}

#[test]
fn best_match_prefers_artist_and_title() {
    let mut server = Server::new();
    let m = server
        .mock("GET", "/search")
        .match_header("authorization", "Bearer genius-token")
        .match_query(Matcher::UrlEncoded("q".into(), "The Beatles Let It Be".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"response": {"hits": [
                hit(1, "Let It Be (Cover)", "Some Tribute Band"),
                hit(2, "Let It Be", "The Beatles"),
                hit(3, "Let It Be", "The Beatles"),
            ]}})
            .to_string(),
        )
        .expect(1)
        .create();

    let g = client(&server.url(), Some("genius-token"));
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let song = rt.block_on(g.lyrics_metadata("The Beatles", "Let It Be")).expect("song");
    // score 9; the later tie does not displace it
    assert_eq!(song.song_id, Some(2));
    assert_eq!(song.primary_artist, "The Beatles");
    assert_eq!(song.genius_url.as_deref(), Some("https://genius.com/songs/2"));
    m.assert();
}

#[test]
fn accents_and_case_do_not_matter() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"response": {"hits": [
                hit(10, "Otra", "Otro"),
                hit(11, "Canción", "Beyoncé"),
            ]}})
            .to_string(),
        )
        .create();

    let g = client(&server.url(), Some("genius-token"));
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let song = rt.block_on(g.lyrics_metadata("  beyonce ", "CANCION")).expect("song");
    assert_eq!(song.song_id, Some(11));
}

#[test]
fn no_hits_is_not_found() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"response": {"hits": []}}).to_string())
        .create();

    let g = client(&server.url(), Some("genius-token"));
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(g.lyrics_metadata("Nobody", "Nothing"));
    assert!(matches!(res, Err(CoreError::NotFound(_))));
}

#[test]
fn rejected_token_is_upstream_auth_failure() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(401)
        .create();

    let g = client(&server.url(), Some("wrong"));
    let rt = tokio::runtime::Runtime::new().expect("rt");
    match rt.block_on(g.search_songs("anything")) {
        Err(CoreError::Upstream { status, detail }) => {
            assert_eq!(status, Some(401));
            assert!(detail.contains("genius_api_token"));
        }
        other => panic!("expected Upstream, got {:?}", other),
    }
}

#[test]
fn missing_token_never_calls_out() {
    let mut server = Server::new();
    let m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let g = client(&server.url(), None);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(g.search_songs("anything"));
    assert!(matches!(res, Err(CoreError::NotConfigured(_))));
    m.assert();
}

#[test]
fn search_returns_at_most_ten() {
    let mut server = Server::new();
    let many: Vec<_> = (0..15).map(|i| hit(i, &format!("Song {}", i), "Band")).collect();
    let _m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"response": {"hits": many}}).to_string())
        .create();

    let g = client(&server.url(), Some("genius-token"));
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let items = rt.block_on(g.search_songs("band")).expect("search");
    assert_eq!(items.len(), 10);
    assert_eq!(items[0].title, "Song 0");
}
