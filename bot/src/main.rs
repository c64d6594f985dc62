//! Dalibot - Telegram front end for OpenAI chat and image models.
//!
//! ```text
//! main() -> RelayConfig::load() -> init_tracing() -> build_relay() -> telegram::run()
//!                                                                          |
//!                                              polling | webhook listener  v
//!                                                           Dispatcher -> Relay
//! ```

mod telegram;

use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dalibot_config::RelayConfig;
use dalibot_context::{
    Archiver, DEFAULT_ARCHIVE_THRESHOLD, DEFAULT_CAPACITY_COUNT, DEFAULT_CAPACITY_TOKENS,
    FsArchiveSink, HistorySettings, SessionDefaults, SessionStore,
};
use dalibot_engine::{DEFAULT_SYSTEM_PROMPT, Relay, RelaySettings};
use dalibot_providers::{ClientSettings, OpenAIClient, RetryPolicy};
use dalibot_types::ModelSelection;

/// Installs the global subscriber. Logs go to `log_file` when it can be
/// opened, otherwise to stderr.
fn init_tracing(log_file: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut open_error = None;
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(env_filter)
                    .init();
                tracing::info!(path = %path.display(), "Logging initialized");
                return;
            }
            Err(err) => open_error = Some(format!("{}: {err}", path.display())),
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    if let Some(warning) = open_error {
        tracing::warn!("Failed to open log file {warning}; logging to stderr");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn session_defaults(config: &RelayConfig) -> SessionDefaults {
    let limits = &config.history;
    SessionDefaults {
        system_prompt: limits
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        models: ModelSelection::new(
            config.openai.chat_model.clone(),
            config.openai.image_model.clone(),
        ),
        history: HistorySettings::new(
            limits.capacity_count.unwrap_or(DEFAULT_CAPACITY_COUNT),
            limits.capacity_tokens.unwrap_or(DEFAULT_CAPACITY_TOKENS),
            limits.archive_threshold.unwrap_or(DEFAULT_ARCHIVE_THRESHOLD),
        ),
    }
}

fn build_relay(config: &RelayConfig) -> Result<Relay<OpenAIClient>> {
    let openai = &config.openai;
    let mut client_settings = ClientSettings {
        request_timeout: openai.request_timeout,
        retry: RetryPolicy::default().with_max_retries(openai.max_retries),
        ..ClientSettings::default()
    };
    if let Some(base_url) = &openai.base_url {
        client_settings.base_url.clone_from(base_url);
    }
    let client = OpenAIClient::new(openai.api_key.clone(), client_settings)
        .context("building OpenAI client")?;

    let mut sessions = SessionStore::new(session_defaults(config));
    match &config.archive_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Archiving conversations");
            let sink = Arc::new(FsArchiveSink::new(dir.clone()));
            sessions = sessions.with_archiver(Arc::new(Archiver::new(sink, config.bot_name.clone())));
        }
        None => tracing::info!("No archive directory configured; archiving disabled"),
    }

    Ok(Relay::new(
        client,
        sessions,
        RelaySettings {
            bot_name: config.bot_name.clone(),
            bot_username: None,
            router_model: openai.router_model.clone(),
            image_size: openai.image_size.clone(),
            temperature: openai.temperature,
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::load().context("loading configuration")?;
    init_tracing(config.log_file.as_deref());

    tracing::info!(
        bot = %config.bot_name,
        chat_model = %config.openai.chat_model,
        telegram = ?config.telegram,
        "Starting Dalibot"
    );

    let relay = build_relay(&config)?;
    telegram::run(config.telegram, config.operator_chat_id, relay).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use dalibot_config::ConfigFile;

    fn config(extra: &[(&str, &str)]) -> RelayConfig {
        let mut vars = vec![("TELEGRAM_TOKEN", "123:abc"), ("OPENAI_TOKEN", "sk-test")];
        vars.extend_from_slice(extra);
        RelayConfig::resolve(ConfigFile::default(), &|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        })
        .unwrap()
    }

    #[test]
    fn defaults_fill_missing_history_settings() {
        let defaults = session_defaults(&config(&[]));

        assert_eq!(defaults.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(defaults.models.chat_model().as_str(), "gpt-4o");
        assert_eq!(defaults.models.image_model().as_str(), "dall-e-3");
        assert_eq!(defaults.history.capacity_count(), DEFAULT_CAPACITY_COUNT);
        assert_eq!(defaults.history.capacity_tokens(), DEFAULT_CAPACITY_TOKENS);
        assert_eq!(defaults.history.archive_threshold(), DEFAULT_ARCHIVE_THRESHOLD);
    }

    #[test]
    fn relay_uses_configured_names() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().to_string_lossy().into_owned();
        let relay = build_relay(&config(&[
            ("BOT_NAME", "Testbot"),
            ("DALIBOT_ARCHIVE_DIR", archive.as_str()),
        ]))
        .unwrap();

        assert_eq!(relay.settings().bot_name, "Testbot");
        assert_eq!(relay.settings().router_model.as_str(), "gpt-4o-mini");
        assert_eq!(relay.sessions().session_count(), 0);
    }

    #[test]
    fn log_file_parent_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("dalibot.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
