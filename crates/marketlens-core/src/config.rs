// Configuration loading and parsing (server.toml, credentials.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::chat::ProviderSelector;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub quotes: QuotesConfig,
    pub rate_limits: RateLimitsConfig,
    pub ai: AiConfig,
    pub auth: AuthConfig,
    pub credentials: CredentialsConfig,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire server.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ServerFile {
    server: ServerConfig,
    database: DatabaseSection,
    #[serde(default)]
    logging: LoggingConfig,
    quotes: QuotesConfig,
    rate_limits: RateLimitsConfig,
    ai: AiConfig,
    #[serde(default)]
    auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log file path. When absent, logs go to stderr.
    #[serde(default)]
    pub file: Option<String>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
    pub provider_url: String,
    pub timeout_secs: u64,
}

/// A named admission policy: at most `limit` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsConfig {
    pub quotes: RateLimitPolicy,
    pub ai: RateLimitPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub default_provider: ProviderSelector,
    pub openai_base_url: String,
    pub openai_model: String,
    /// Empty disables the Ollama provider.
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_days: default_session_ttl_days(),
            cookie_name: default_cookie_name(),
        }
    }
}

/// Longest rate-limit window accepted, one year.
pub const MAX_WINDOW_SECS: u64 = 86_400 * 365;

/// Longest session lifetime accepted, ten years.
pub const MAX_SESSION_TTL_DAYS: i64 = 3650;

fn default_session_ttl_days() -> i64 {
    30
}

fn default_cookie_name() -> String {
    "marketlens_session".to_string()
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub openai_api_key: Option<String>,
}

impl CredentialsConfig {
    /// The OpenAI key, treating an empty string as absent.
    pub fn openai_key(&self) -> Option<&str> {
        self.openai_api_key.as_deref().filter(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/server.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults or read environment overrides; `load_config()`
/// does both.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- server.toml (required) ---
    let server_path = config_dir.join("server.toml");
    let server_text = read_file(&server_path)?;
    let file: ServerFile = toml::from_str(&server_text).map_err(|e| ConfigError::ParseError {
        path: server_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: file.server,
        logging: file.logging,
        quotes: file.quotes,
        rate_limits: file.rate_limits,
        ai: file.ai,
        auth: file.auth,
        credentials,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying default
/// files first and then applying `MARKETLENS_PORT` / `OPENAI_API_KEY`.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("MARKETLENS_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::ValidationError {
            field: "MARKETLENS_PORT".into(),
            message: format!("not a valid port: {port}"),
        })?;
    }
    if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
        config.credentials.openai_api_key = Some(key);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: "must not be empty".into(),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.quotes.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "quotes.timeout_secs".into(),
            message: "must be > 0".into(),
        });
    }

    let policies: &[(&str, RateLimitPolicy)] = &[
        ("rate_limits.quotes", config.rate_limits.quotes),
        ("rate_limits.ai", config.rate_limits.ai),
    ];
    for (name, policy) in policies {
        if policy.limit == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.limit"),
                message: "must be > 0".into(),
            });
        }
        if policy.window_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.window_secs"),
                message: "must be > 0".into(),
            });
        }
        if policy.window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.window_secs"),
                message: format!("must be at most {MAX_WINDOW_SECS}, got {}", policy.window_secs),
            });
        }
    }

    let ai = &config.ai;
    if ai.max_tokens == 0 {
        return Err(ConfigError::ValidationError {
            field: "ai.max_tokens".into(),
            message: "must be > 0".into(),
        });
    }
    if !(0.0..=2.0).contains(&ai.temperature) {
        return Err(ConfigError::ValidationError {
            field: "ai.temperature".into(),
            message: format!("must be between 0.0 and 2.0 inclusive, got {}", ai.temperature),
        });
    }
    if ai.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "ai.timeout_secs".into(),
            message: "must be > 0".into(),
        });
    }

    if !(1..=MAX_SESSION_TTL_DAYS).contains(&config.auth.session_ttl_days) {
        return Err(ConfigError::ValidationError {
            field: "auth.session_ttl_days".into(),
            message: format!(
                "must be between 1 and {MAX_SESSION_TTL_DAYS}, got {}",
                config.auth.session_ttl_days
            ),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
