// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Directory containing `questions.json` and `typing_words.json`.
    pub content_dir: Option<PathBuf>,
    /// JSON file with fight balancing overrides.
    pub fight_config: Option<PathBuf>,
    /// Shared secret the chat bridge must present.
    pub bridge_token: Option<String>,
    /// Prefix for chat commands, e.g. `b!bossstart`.
    pub command_prefix: String,
    /// Whether to run in local mode (no bridge auth).
    pub local_mode: bool,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:bossfight.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `CONTENT_DIR` - Directory with question and typing word pools
    /// - `FIGHT_CONFIG` - Path to a JSON fight balancing file
    /// - `BRIDGE_TOKEN` - Bearer token required from the chat bridge
    /// - `COMMAND_PREFIX` - Chat command prefix (default: `b!`)
    /// - `BOSSFIGHT_LOCAL_MODE` - Set to `true` to enable local mode
    ///
    /// CLI flags:
    /// - `--local` - Enable local mode (same as `BOSSFIGHT_LOCAL_MODE=true`)
    /// - `--port <PORT>` - Override the port
    /// - `--fight-config <PATH>` - Override the balancing file
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:bossfight.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let content_dir = std::env::var("CONTENT_DIR").ok().map(PathBuf::from);

        let fight_config = Self::parse_cli_value(&args, "--fight-config")
            .or_else(|| std::env::var("FIGHT_CONFIG").ok())
            .map(PathBuf::from);

        let bridge_token = std::env::var("BRIDGE_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let command_prefix = std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "b!".to_string());

        let local_mode = args.contains(&"--local".to_string())
            || std::env::var("BOSSFIGHT_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        Config {
            database_url,
            port,
            content_dir,
            fight_config,
            bridge_token,
            command_prefix,
            local_mode,
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
