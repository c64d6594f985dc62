//! Telegram transport: update dispatch, reply delivery, error reporting.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, ParseMode, PhotoSize, User};
use teloxide::update_listeners::webhooks;

use dalibot_config::{TelegramSettings, Transport};
use dalibot_engine::{
    APOLOGY, InboundPhoto, Relay, RelayReply, TELEGRAM_MESSAGE_LIMIT, format_diagnostic, split_message,
};
use dalibot_providers::OpenAIClient;
use dalibot_types::SessionId;

const PHOTO_CAPTION_LIMIT: usize = 1024;

struct BotState {
    relay: Relay<OpenAIClient>,
    operator_chat: Option<ChatId>,
}

/// Runs the dispatcher until Ctrl-C.
pub async fn run(
    settings: TelegramSettings,
    operator_chat_id: Option<i64>,
    relay: Relay<OpenAIClient>,
) -> Result<()> {
    let bot = Bot::new(settings.token);
    let me = bot.get_me().await.context("fetching bot identity")?;
    tracing::info!(username = ?me.user.username, "Authorized with Telegram");
    let state = Arc::new(BotState {
        relay: relay.with_bot_username(me.user.username.clone()),
        operator_chat: operator_chat_id.map(ChatId),
    });

    let handler = Update::filter_message().endpoint(handle_message);
    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .default_handler(|_| async {})
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    match settings.transport {
        Transport::Polling => {
            tracing::info!("Receiving updates by long polling");
            dispatcher.dispatch().await;
        }
        Transport::Webhook { url, port } => {
            tracing::info!(port, "Receiving updates by webhook");
            let options = webhooks::Options::new(([0, 0, 0, 0], port).into(), url);
            let listener = webhooks::axum(bot, options)
                .await
                .context("registering Telegram webhook")?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("Webhook listener error"),
                )
                .await;
        }
    }

    tracing::info!("Dispatcher stopped");
    Ok(())
}

fn sender_name(user: Option<&User>) -> String {
    user.map_or_else(
        || "Unknown".to_string(),
        |user| display_name(&user.first_name, user.last_name.as_deref()),
    )
}

fn display_name(first: &str, last: Option<&str>) -> String {
    match last {
        Some(last) if !last.is_empty() => format!("{first} {last}"),
        _ => first.to_string(),
    }
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    state: Arc<BotState>,
) -> Result<(), Infallible> {
    let session = SessionId::new(msg.chat.id.0);
    let username = sender_name(msg.from.as_ref());

    let (summary, outcome) = if let Some(photos) = msg.photo() {
        let caption = msg.caption().unwrap_or_default();
        let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
        let outcome = photo_turn(&bot, &state.relay, session, &username, caption, photos).await;
        (format!("photo from {username}: {caption}"), outcome)
    } else if let Some(text) = msg.text() {
        let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
        let outcome = state
            .relay
            .handle_text(session, &username, text)
            .await
            .map_err(anyhow::Error::from);
        (format!("text from {username}: {text}"), outcome)
    } else {
        tracing::debug!(session = %session, "Ignoring message without text or photo");
        return Ok(());
    };

    let delivered = match outcome {
        Ok(reply) => deliver(&bot, msg.chat.id, reply).await,
        Err(err) => Err(err),
    };

    if let Err(err) = delivered {
        report_failure(&bot, &state, msg.chat.id, &summary, &err).await;
    }
    Ok(())
}

async fn photo_turn(
    bot: &Bot,
    relay: &Relay<OpenAIClient>,
    session: SessionId,
    username: &str,
    caption: &str,
    photos: &[PhotoSize],
) -> Result<RelayReply> {
    // Sizes are listed smallest first.
    let photo = photos.last().context("photo message without sizes")?;
    let file = bot
        .get_file(photo.file.id.clone())
        .await
        .context("looking up photo file")?;
    let mut bytes = Vec::new();
    bot.download_file(&file.path, &mut bytes)
        .await
        .context("downloading photo")?;

    let inbound = InboundPhoto {
        file_id: &photo.file.unique_id,
        bytes: &bytes,
    };
    Ok(relay.handle_photo(session, username, caption, inbound).await?)
}

async fn deliver(bot: &Bot, chat: ChatId, reply: RelayReply) -> Result<()> {
    match reply {
        RelayReply::Text(text) if text.trim().is_empty() => {
            tracing::warn!(chat = chat.0, "Model returned an empty reply");
        }
        RelayReply::Text(text) => {
            for chunk in split_message(&text, TELEGRAM_MESSAGE_LIMIT) {
                bot.send_message(chat, chunk)
                    .await
                    .context("sending reply")?;
            }
        }
        RelayReply::Photo { url, caption } => {
            let parsed = url::Url::parse(&url).with_context(|| format!("image URL {url}"))?;
            let request = bot.send_photo(chat, InputFile::url(parsed));
            let request = match caption
                .as_deref()
                .and_then(|c| split_message(c, PHOTO_CAPTION_LIMIT).into_iter().next())
            {
                Some(caption) => request.caption(caption),
                None => request,
            };
            request.await.context("sending photo")?;
        }
    }
    Ok(())
}

async fn report_failure(
    bot: &Bot,
    state: &BotState,
    chat: ChatId,
    summary: &str,
    err: &anyhow::Error,
) {
    tracing::error!(chat = chat.0, error = %format!("{err:#}"), "Failed to handle update");

    let target = state.operator_chat.unwrap_or(chat);
    let diagnostic = format_diagnostic(summary, err.as_ref());
    if let Err(send_err) = bot
        .send_message(target, diagnostic)
        .parse_mode(ParseMode::Html)
        .await
    {
        tracing::warn!(chat = target.0, error = %send_err, "Failed to send diagnostic");
    }

    if let Err(send_err) = bot.send_message(chat, APOLOGY).await {
        tracing::warn!(chat = chat.0, error = %send_err, "Failed to send apology");
    }
}
