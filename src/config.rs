// Application configuration, loaded from environment variables and CLI flags.

use std::fmt;
use std::time::Duration;

use crate::coc::keys::MAX_KEYS_PER_ACCOUNT;

pub const DEFAULT_API_URL: &str = "https://api.clashofclans.com/v1";
pub const DEFAULT_DEVELOPER_URL: &str = "https://developer.clashofclans.com";
pub const DEFAULT_KEY_NAME: &str = "cwl-status";

/// How the upstream session obtains API keys.
#[derive(Clone)]
pub enum Credentials {
    /// A pre-issued API key, used as-is.
    Token(String),
    /// Developer-portal login; keys are provisioned for the current IP.
    Portal { email: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(<redacted>)"),
            Credentials::Portal { email, .. } => f
                .debug_struct("Portal")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Settings for the Clash of Clans API collaborator.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the game API, without trailing slash.
    pub api_url: String,
    /// Base URL of the developer portal used for key provisioning.
    pub developer_url: String,
    pub credentials: Option<Credentials>,
    /// Name given to provisioned keys; keys with other names are left alone.
    pub key_name: String,
    /// Number of keys to rotate across, 1 to 10.
    pub key_count: usize,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            api_url: DEFAULT_API_URL.to_string(),
            developer_url: DEFAULT_DEVELOPER_URL.to_string(),
            credentials: None,
            key_name: DEFAULT_KEY_NAME.to_string(),
            key_count: 1,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_addr: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `BIND_ADDR` - listen address (default: `0.0.0.0`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `COC_API_URL` - game API base URL
    /// - `COC_DEVELOPER_URL` - developer portal base URL
    /// - `COC_API_TOKEN` - static API key; takes precedence over portal login
    /// - `COC_EMAIL` / `COC_PASSWORD` - developer portal login
    /// - `COC_KEY_NAME` - name of provisioned keys (default: `cwl-status`)
    /// - `COC_KEY_COUNT` - number of keys to rotate across (default: 1)
    /// - `COC_TIMEOUT_SECS` - upstream request timeout (default: 10)
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a config from CLI arguments and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = env("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let defaults = UpstreamConfig::default();

        let credentials = match (env("COC_API_TOKEN"), env("COC_EMAIL"), env("COC_PASSWORD")) {
            (Some(token), _, _) if !token.is_empty() => Some(Credentials::Token(token)),
            (_, Some(email), Some(password)) => Some(Credentials::Portal { email, password }),
            _ => None,
        };

        let key_count = env("COC_KEY_COUNT")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.key_count)
            .clamp(1, MAX_KEYS_PER_ACCOUNT);

        let timeout = env("COC_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let upstream = UpstreamConfig {
            api_url: env("COC_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            developer_url: env("COC_DEVELOPER_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.developer_url),
            credentials,
            key_name: env("COC_KEY_NAME").unwrap_or(defaults.key_name),
            key_count,
            timeout,
        };

        Config {
            bind_addr,
            port,
            upstream,
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
