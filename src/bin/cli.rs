use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use music_reco_backend as lib;
use lib::api::spotify::TopKind;
use lib::config::Config;
use lib::error::{CoreError, UserFacing};
use lib::models::Payload;
use lib::Backend;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "music-reco", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply the schema
    InitDb,
    /// Validate config file and exit
    ConfigValidate,
    /// Local user management
    User {
        #[command(subcommand)]
        sub: UserCommands,
    },
    /// Spotify authorization and Web API pass-through
    Spotify {
        #[command(subcommand)]
        sub: SpotifyCommands,
    },
    /// Listening event log
    Events {
        #[command(subcommand)]
        sub: EventCommands,
    },
    /// Cached recommendations
    Reco {
        #[command(subcommand)]
        sub: RecoCommands,
    },
    /// Lyrics metadata lookups
    Lyrics {
        #[command(subcommand)]
        sub: LyricsCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a local user
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Create an admin user
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and print a bearer token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Show a user
    Show { user_id: String },
    /// List users (requires an admin bearer token)
    List {
        #[arg(long)]
        token: String,
    },
    /// Delete a user and everything attached to it
    Delete { user_id: String },
    /// Set the preferred language
    SetLang { user_id: String, lang: String },
}

#[derive(Subcommand)]
enum SpotifyCommands {
    /// Print the authorization URL for a user
    AuthUrl { user_id: String },
    /// Complete authorization with the `state` and `code` from the redirect
    Connect {
        #[arg(long)]
        state: String,
        #[arg(long)]
        code: String,
    },
    /// Print a currently valid access token (refreshing if needed)
    Token { user_id: String },
    /// Spotify profile of the user
    Me { user_id: String },
    /// Top tracks or artists
    Top {
        user_id: String,
        #[arg(long, default_value = "tracks")]
        kind: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value = "medium_term")]
        time_range: String,
    },
    /// Search tracks
    Search {
        user_id: String,
        q: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Track details
    Track { user_id: String, track_id: String },
    /// Recommendations seeded from top items, restricted to a language market
    ByLanguage {
        user_id: String,
        #[arg(long, default_value = "es")]
        lang: String,
        #[arg(long, default_value_t = 30)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum EventCommands {
    /// Ingest an event; the payload must be a JSON object
    Ingest {
        user_id: String,
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        payload: String,
    },
    /// List a user's events
    List {
        user_id: String,
        #[arg(long = "type")]
        kind: Option<String>,
    },
}

#[derive(Subcommand)]
enum RecoCommands {
    /// Recompute every user's recommendations
    Refresh,
    /// Show a user's cached recommendations
    Show { user_id: String },
}

#[derive(Subcommand)]
enum LyricsCommands {
    /// Best match for artist + title
    Get {
        #[arg(long)]
        artist: String,
        #[arg(long)]
        title: String,
    },
    /// Free-form search
    Search { q: String },
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

/// Attach the user-visible failure class to a library error.
fn describe(e: CoreError) -> anyhow::Error {
    let class = match e.user_facing() {
        UserFacing::NeedsReconnection => "needs reconnection",
        UserFacing::NotAuthorized => "not authorized",
        UserFacing::NotFound => "not found",
        UserFacing::ServiceUnavailable => "service temporarily unavailable",
        UserFacing::BadRequest => "bad request",
        UserFacing::Internal => "internal error",
    };
    anyhow!("{}: {}", class, e)
}

fn parse_payload(raw: &str) -> Result<Payload> {
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(m) => Ok(m),
        _ => Err(describe(CoreError::InvalidPayload("payload must be a JSON object".into()))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Resolve config path: explicit --config overrides; otherwise prefer
    // /etc/music-reco/config.toml and fall back to a local config.toml.
    let resolved_config_path: PathBuf = match &cli.config {
        Some(p) => p.clone(),
        None => {
            let etc_path = Path::new("/etc/music-reco/config.toml");
            if etc_path.exists() {
                etc_path.to_path_buf()
            } else {
                PathBuf::from("config.toml")
            }
        }
    };

    if let Commands::ConfigValidate = cli.command {
        match Config::from_path(&resolved_config_path) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&cfg.log_dir, "music-reco.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking))
        .with(fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber_global::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    let backend = Backend::new(&cfg).map_err(describe).context("opening backend")?;

    match cli.command {
        Commands::ConfigValidate => {}
        Commands::InitDb => println!("database ready at {}", cfg.db_path.display()),
        Commands::User { sub } => match sub {
            UserCommands::Register { email, password, display_name } => {
                let u = backend
                    .register(&email, &password, display_name.as_deref())
                    .await
                    .map_err(describe)?;
                print_json(&u)?;
            }
            UserCommands::CreateAdmin { email, password } => {
                let u = backend
                    .create_user(&email, &password, None, lib::models::Role::Admin)
                    .await
                    .map_err(describe)?;
                print_json(&u)?;
            }
            UserCommands::Login { email, password } => {
                let token = backend.login(&email, &password).await.map_err(describe)?;
                println!("{}", token);
            }
            UserCommands::Show { user_id } => {
                print_json(&backend.get_user(&user_id).await.map_err(describe)?)?;
            }
            UserCommands::List { token } => {
                let claims = backend.authenticate(&token).map_err(describe)?;
                print_json(&backend.list_users(&claims).await.map_err(describe)?)?;
            }
            UserCommands::Delete { user_id } => {
                backend.delete_user(&user_id).await.map_err(describe)?;
                println!("deleted {}", user_id);
            }
            UserCommands::SetLang { user_id, lang } => {
                backend.set_preferred_lang(&user_id, &lang).await.map_err(describe)?;
                println!("preferred_lang = {}", lang);
            }
        },
        Commands::Spotify { sub } => match sub {
            SpotifyCommands::AuthUrl { user_id } => {
                backend.get_user(&user_id).await.map_err(describe)?;
                println!("{}", backend.spotify_authorize_url(&user_id).map_err(describe)?);
            }
            SpotifyCommands::Connect { state, code } => {
                let cred = backend
                    .complete_spotify_authorization(&state, &code)
                    .await
                    .map_err(describe)?;
                println!("connected spotify user {}", cred.provider_user_id);
            }
            SpotifyCommands::Token { user_id } => {
                println!("{}", backend.ensure_valid_token(&user_id).await.map_err(describe)?);
            }
            SpotifyCommands::Me { user_id } => {
                print_json(&backend.spotify().me(&user_id).await.map_err(describe)?)?;
            }
            SpotifyCommands::Top { user_id, kind, limit, time_range } => {
                let kind = TopKind::parse(&kind)
                    .ok_or_else(|| anyhow!("kind must be 'tracks' or 'artists'"))?;
                let v = backend
                    .spotify()
                    .top(&user_id, kind, limit, &time_range)
                    .await
                    .map_err(describe)?;
                print_json(&v)?;
            }
            SpotifyCommands::Search { user_id, q, limit } => {
                let v = backend.spotify().search_tracks(&user_id, &q, limit).await.map_err(describe)?;
                print_json(&v)?;
            }
            SpotifyCommands::Track { user_id, track_id } => {
                print_json(&backend.spotify().track(&user_id, &track_id).await.map_err(describe)?)?;
            }
            SpotifyCommands::ByLanguage { user_id, lang, limit } => {
                let v = backend
                    .spotify()
                    .recommend_by_language(&user_id, &lang, limit)
                    .await
                    .map_err(describe)?;
                print_json(&v)?;
            }
        },
        Commands::Events { sub } => match sub {
            EventCommands::Ingest { user_id, kind, payload } => {
                let payload = parse_payload(&payload)?;
                let id = backend.append_event(&user_id, &kind, payload).await.map_err(describe)?;
                println!("event {}", id);
            }
            EventCommands::List { user_id, kind } => {
                print_json(&backend.list_events(&user_id, kind.as_deref()).await.map_err(describe)?)?;
            }
        },
        Commands::Reco { sub } => match sub {
            RecoCommands::Refresh => {
                let n = backend.refresh_all_recommendations().await.map_err(describe)?;
                println!("refreshed {} users", n);
            }
            RecoCommands::Show { user_id } => {
                print_json(&backend.get_recommendations(&user_id).await.map_err(describe)?)?;
            }
        },
        Commands::Lyrics { sub } => match sub {
            LyricsCommands::Get { artist, title } => {
                print_json(&backend.genius().lyrics_metadata(&artist, &title).await.map_err(describe)?)?;
            }
            LyricsCommands::Search { q } => {
                let items = backend.genius().search_songs(&q).await.map_err(describe)?;
                print_json(&serde_json::json!({ "count": items.len(), "items": items }))?;
            }
        },
    }

    Ok(())
}
