// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;

use crate::elo::RatingModel;
use crate::queue::DEFAULT_QUEUE_TARGET;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Which rating model votes are scored with.
    pub rating_model: RatingModel,
    /// How many pairs the queue keeps ready.
    pub queue_target: usize,
    /// Recompute all ratings from the vote history before serving.
    pub recalculate_on_start: bool,
    /// JSON roster used to seed an empty database.
    pub players_file: Option<PathBuf>,
    /// Directory containing pre-built frontend files to serve.
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:duel.db?mode=rwc".to_string(),
            port: 3000,
            rating_model: RatingModel::Glicko2,
            queue_target: DEFAULT_QUEUE_TARGET,
            recalculate_on_start: true,
            players_file: None,
            static_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:duel.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `RATING_MODEL` - `elo` or `glicko2` (default: `glicko2`)
    /// - `PAIR_QUEUE_TARGET` - prefetched pairs to keep ready (default: 5)
    /// - `RECALCULATE_ON_START` - `false` skips the startup recalculation
    /// - `PLAYERS_FILE` - JSON roster used to seed an empty database
    /// - `STATIC_DIR` - Path to frontend dist directory for static file serving
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    /// - `--rating-model <MODEL>` - Override the rating model
    /// - `--no-recalculate` - Skip the startup recalculation
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a config from CLI args and an environment lookup.
    /// CLI flags take precedence over the environment.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let database_url = env("DATABASE_URL").unwrap_or(defaults.database_url);

        let port = match Self::parse_cli_value(args, "--port").or_else(|| env("PORT")) {
            Some(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid port {v:?}, using {}", defaults.port);
                defaults.port
            }),
            None => defaults.port,
        };

        let rating_model =
            match Self::parse_cli_value(args, "--rating-model").or_else(|| env("RATING_MODEL")) {
                Some(v) => RatingModel::from_str_name(&v).unwrap_or_else(|| {
                    tracing::warn!(
                        "Unknown rating model {v:?}, using {}",
                        defaults.rating_model.as_str()
                    );
                    defaults.rating_model
                }),
                None => defaults.rating_model,
            };

        let queue_target = match env("PAIR_QUEUE_TARGET") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!("Invalid PAIR_QUEUE_TARGET {v:?}, using {DEFAULT_QUEUE_TARGET}");
                    defaults.queue_target
                }
            },
            None => defaults.queue_target,
        };

        let recalculate_on_start = !args.iter().any(|a| a == "--no-recalculate")
            && env("RECALCULATE_ON_START")
                .map(|v| !(v.eq_ignore_ascii_case("false") || v == "0"))
                .unwrap_or(defaults.recalculate_on_start);

        let players_file = env("PLAYERS_FILE").map(PathBuf::from);
        let static_dir = env("STATIC_DIR").map(PathBuf::from);

        Config {
            database_url,
            port,
            rating_model,
            queue_target,
            recalculate_on_start,
            players_file,
            static_dir,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
