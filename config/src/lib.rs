//! Configuration for the Dalibot relay.
//!
//! Settings come from `~/.dalibot/config.toml` (or the file named by
//! `DALIBOT_CONFIG`), then the deployment environment variables override
//! them. String values may reference the environment as `${VAR}`.
//!
//! ```toml
//! [app]
//! bot_name = "Dalibot"
//! operator_chat_id = 123456789
//!
//! [telegram]
//! token = "${TELEGRAM_TOKEN}"
//! webhook_url = "https://dalibot.example.com"
//! listen_port = 8443
//!
//! [openai]
//! api_key = "${OPENAI_TOKEN}"
//! chat_model = "gpt-4o"
//!
//! [history]
//! capacity_count = 20
//! capacity_tokens = 2048
//! archive_threshold = 50
//!
//! [archive]
//! dir = "/var/lib/dalibot/archive"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use dalibot_types::{ApiKey, ModelName};

pub const CONFIG_PATH_ENV: &str = "DALIBOT_CONFIG";

pub const DEFAULT_BOT_NAME: &str = "Dalibot";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_ROUTER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing {what}: set {env} or {key} in the config file")]
    Missing {
        what: &'static str,
        env: &'static str,
        key: &'static str,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The config file as written. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub app: Option<AppSection>,
    pub telegram: Option<TelegramSection>,
    pub openai: Option<OpenAISection>,
    pub history: Option<HistorySection>,
    pub archive: Option<ArchiveSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppSection {
    pub bot_name: Option<String>,
    pub log_file: Option<String>,
    /// Chat that receives failure diagnostics.
    pub operator_chat_id: Option<i64>,
}

#[derive(Default, Deserialize)]
pub struct TelegramSection {
    pub token: Option<String>,
    /// Public base URL; switches the bot from long polling to a webhook.
    pub webhook_url: Option<String>,
    pub listen_port: Option<u16>,
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("token", &mask(self.token.as_ref()))
            .field("webhook_url", &self.webhook_url)
            .field("listen_port", &self.listen_port)
            .finish()
    }
}

#[derive(Default, Deserialize)]
pub struct OpenAISection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub chat_model: Option<String>,
    pub image_model: Option<String>,
    /// Cheap model that decides whether a message asks for an image.
    pub router_model: Option<String>,
    pub image_size: Option<String>,
    pub temperature: Option<f32>,
    pub request_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

impl std::fmt::Debug for OpenAISection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAISection")
            .field("api_key", &mask(self.api_key.as_ref()))
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("image_model", &self.image_model)
            .field("router_model", &self.router_model)
            .field("image_size", &self.image_size)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn mask(value: Option<&String>) -> &'static str {
    if value.is_some() { "[REDACTED]" } else { "None" }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistorySection {
    pub capacity_count: Option<usize>,
    pub capacity_tokens: Option<u32>,
    pub archive_threshold: Option<usize>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArchiveSection {
    pub dir: Option<String>,
}

/// How updates reach the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Polling,
    /// Telegram posts to `url`; the bot listens on `0.0.0.0:port`.
    Webhook { url: Url, port: u16 },
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub token: String,
    pub transport: Transport,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The webhook URL embeds the token as its path.
        let transport = match &self.transport {
            Transport::Polling => "polling".to_string(),
            Transport::Webhook { port, .. } => format!("webhook on port {port}"),
        };
        f.debug_struct("TelegramSettings")
            .field("token", &"[REDACTED]")
            .field("transport", &transport)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OpenAISettings {
    pub api_key: ApiKey,
    pub base_url: Option<String>,
    pub chat_model: ModelName,
    pub image_model: ModelName,
    pub router_model: ModelName,
    pub image_size: String,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

/// History limits; `None` means the buffer's built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLimits {
    pub capacity_count: Option<usize>,
    pub capacity_tokens: Option<u32>,
    pub archive_threshold: Option<usize>,
    pub system_prompt: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bot_name: String,
    pub log_file: Option<PathBuf>,
    pub operator_chat_id: Option<i64>,
    pub telegram: TelegramSettings,
    pub openai: OpenAISettings,
    pub history: HistoryLimits,
    /// Archive root; archival is disabled when unset.
    pub archive_dir: Option<PathBuf>,
}

/// Replaces `${VAR}` using `lookup`. Unset variables expand to the empty
/// string; an unclosed `${` is kept as is.
fn expand_with(value: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if !name.is_empty() {
            out.push_str(&lookup(name).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Default location of the config file.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".dalibot").join("config.toml"))
}

impl ConfigFile {
    /// Reads `path`; a missing file is an empty config.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file; using environment only");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RelayConfig {
    /// Loads the config file and applies the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match config_path() {
            Some(path) => ConfigFile::load_from(&path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, &|name| std::env::var(name).ok())
    }

    /// Applies environment overrides and defaults to a parsed file.
    pub fn resolve(
        file: ConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let expand = |value: Option<String>| non_empty(value.map(|v| expand_with(&v, env)));
        let from_env = |name: &str| non_empty(env(name));

        let app = file.app.unwrap_or_default();
        let telegram = file.telegram.unwrap_or_default();
        let openai = file.openai.unwrap_or_default();
        let history = file.history.unwrap_or_default();
        let archive = file.archive.unwrap_or_default();

        let bot_name = from_env("BOT_NAME")
            .or_else(|| expand(app.bot_name))
            .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());

        let token = from_env("TELEGRAM_TOKEN")
            .or_else(|| expand(telegram.token))
            .ok_or(ConfigError::Missing {
                what: "Telegram bot token",
                env: "TELEGRAM_TOKEN",
                key: "[telegram] token",
            })?;

        let api_key = from_env("OPENAI_TOKEN")
            .or_else(|| expand(openai.api_key))
            .ok_or(ConfigError::Missing {
                what: "OpenAI API key",
                env: "OPENAI_TOKEN",
                key: "[openai] api_key",
            })?;

        let port = match from_env("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                field: "PORT",
                reason: format!("{raw:?}: {e}"),
            })?,
            None => telegram.listen_port.unwrap_or(DEFAULT_WEBHOOK_PORT),
        };

        let transport = match from_env("HEROKU_DOMAIN").or_else(|| expand(telegram.webhook_url)) {
            Some(base) => {
                let raw = format!("{}/{token}", base.trim().trim_end_matches('/'));
                let url = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    field: "[telegram] webhook_url",
                    reason: format!("{base:?}: {e}"),
                })?;
                Transport::Webhook { url, port }
            }
            None => Transport::Polling,
        };

        let temperature = openai.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid {
                field: "[openai] temperature",
                reason: format!("{temperature} is outside 0.0..=2.0"),
            });
        }

        let model = |value: Option<String>, default: &str| {
            ModelName::new(expand(value).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            bot_name,
            log_file: expand(app.log_file).map(PathBuf::from),
            operator_chat_id: app.operator_chat_id,
            telegram: TelegramSettings { token, transport },
            openai: OpenAISettings {
                api_key: ApiKey::new(api_key),
                base_url: expand(openai.base_url),
                chat_model: model(openai.chat_model, DEFAULT_CHAT_MODEL),
                image_model: model(openai.image_model, DEFAULT_IMAGE_MODEL),
                router_model: model(openai.router_model, DEFAULT_ROUTER_MODEL),
                image_size: expand(openai.image_size)
                    .unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string()),
                temperature,
                request_timeout: Duration::from_secs(
                    openai
                        .request_timeout_secs
                        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
                        .max(1),
                ),
                max_retries: openai.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            },
            history: HistoryLimits {
                capacity_count: history.capacity_count,
                capacity_tokens: history.capacity_tokens,
                archive_threshold: history.archive_threshold,
                system_prompt: expand(history.system_prompt),
            },
            archive_dir: from_env("DALIBOT_ARCHIVE_DIR")
                .or_else(|| expand(archive.dir))
                .map(PathBuf::from),
        })
    }
}
