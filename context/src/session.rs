//! Per-conversation state keyed by session.
//!
//! Each session owns its own [`HistoryBuffer`] and [`ModelSelection`] behind
//! its own mutex, so one busy chat never blocks another. Archive writes are
//! started after the session lock is released and never fail the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dalibot_types::{ChatMessage, ModelName, ModelSelection, SessionId, WireMessage};

use crate::archive::{ArchiveBatch, Archiver};
use crate::history::{HistoryBuffer, HistorySettings};
use crate::model_limits::ModelRegistry;
use crate::token_counter::TokenCounter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Values every new session starts from.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub system_prompt: String,
    pub models: ModelSelection,
    pub history: HistorySettings,
}

#[derive(Debug)]
struct Session {
    history: HistoryBuffer,
    models: ModelSelection,
}

impl Session {
    fn counter(&self) -> TokenCounter {
        TokenCounter::for_model(self.models.chat_model().as_str())
    }
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
    defaults: SessionDefaults,
    registry: ModelRegistry,
    archiver: Option<Arc<Archiver>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            defaults,
            registry: ModelRegistry::new(),
            archiver: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    #[must_use]
    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    fn session(&self, id: SessionId) -> Arc<Mutex<Session>> {
        let mut sessions = lock(&self.sessions);
        sessions
            .entry(id)
            .or_insert_with(|| {
                tracing::debug!(session = %id, "Creating conversation session");
                Arc::new(Mutex::new(Session {
                    history: HistoryBuffer::new(
                        self.defaults.system_prompt.clone(),
                        self.defaults.history,
                    ),
                    models: self.defaults.models.clone(),
                }))
            })
            .clone()
    }

    /// Largest window the active chat model accepts, capped by `capacity_tokens`.
    fn budget(&self, session: &Session) -> u32 {
        let model = session.models.chat_model();
        let resolved = self.registry.get(model.as_str());
        session
            .history
            .settings()
            .capacity_tokens()
            .min(resolved.limits().effective_input_budget())
    }

    /// Records a turn.
    pub fn insert(&self, id: SessionId, message: ChatMessage) {
        let handle = self.session(id);
        let batch = {
            let mut session = lock(&handle);
            let counter = session.counter();
            session.history.insert(message, &counter).archive
        };
        self.archive(id, batch);
    }

    /// Records a turn and returns the truncated window to send upstream, in
    /// one critical section.
    pub fn record_and_window(&self, id: SessionId, message: ChatMessage) -> Vec<WireMessage> {
        let handle = self.session(id);
        let (window, batch) = {
            let mut session = lock(&handle);
            let counter = session.counter();
            let batch = session.history.insert(message, &counter).archive;
            let budget = self.budget(&session);
            (session.history.truncate(budget, &counter), batch)
        };
        self.archive(id, batch);
        window
    }

    /// Truncates the history to the active model's budget and returns the window.
    pub fn window(&self, id: SessionId) -> Vec<WireMessage> {
        let handle = self.session(id);
        let mut session = lock(&handle);
        let counter = session.counter();
        let budget = self.budget(&session);
        session.history.truncate(budget, &counter)
    }

    /// Clears the conversation and restores the default system prompt.
    /// Turns not yet archived are flushed first.
    pub fn reset(&self, id: SessionId) {
        let handle = self.session(id);
        let batch = {
            let mut session = lock(&handle);
            session
                .history
                .replace_system_prompt(self.defaults.system_prompt.clone());
            session.history.reset()
        };
        self.archive(id, batch);
    }

    /// Replaces the system prompt and clears the conversation.
    pub fn set_system_prompt(&self, id: SessionId, prompt: impl Into<String>) {
        let handle = self.session(id);
        let batch = {
            let mut session = lock(&handle);
            session.history.replace_system_prompt(prompt);
            session.history.reset()
        };
        self.archive(id, batch);
    }

    #[must_use]
    pub fn models(&self, id: SessionId) -> ModelSelection {
        lock(&self.session(id)).models.clone()
    }

    pub fn set_chat_model(&self, id: SessionId, model: ModelName) {
        tracing::info!(session = %id, model = %model, "Changing chat model");
        lock(&self.session(id)).models.set_chat_model(model);
    }

    pub fn set_image_model(&self, id: SessionId, model: ModelName) {
        tracing::info!(session = %id, model = %model, "Changing image model");
        lock(&self.session(id)).models.set_image_model(model);
    }

    /// Copy of the turns currently held for `id`.
    #[must_use]
    pub fn entries(&self, id: SessionId) -> Vec<ChatMessage> {
        lock(&self.session(id)).history.entries().to_vec()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn archive(&self, id: SessionId, batch: Option<ArchiveBatch>) {
        let Some(batch) = batch else {
            return;
        };
        let Some(archiver) = self.archiver.clone() else {
            tracing::debug!(
                session = %id,
                turns = batch.len(),
                "Archive not configured; dropping batch"
            );
            return;
        };

        let push = move || {
            if let Err(e) = archiver.push_to_archive(&batch) {
                tracing::warn!(session = %id, turns = batch.len(), "Archive push failed: {e}");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                drop(runtime.spawn_blocking(push));
            }
            Err(_) => push(),
        }
    }
}
